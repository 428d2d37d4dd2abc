//! Transmitter configuration.

/// When a client's snapshot of a field advances to the value sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Advance only once the client acknowledges the frame.
    ///
    /// Unacknowledged changes, creates, and destroys are repeated every frame,
    /// so a lost frame never loses state.
    #[default]
    AdvanceOnAck,
    /// Advance as soon as the frame is encoded.
    ///
    /// Cheapest on the wire, but a lost change is not resent until the field
    /// changes again. Suited to reliable transports.
    AdvanceOnSend,
}

/// Transmitter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitConfig {
    pub snapshot_policy: SnapshotPolicy,
    /// Write an update block for objects with no changed field.
    pub emit_unchanged_objects: bool,
}

impl TransmitConfig {
    #[must_use]
    pub const fn advance_on_send() -> Self {
        Self {
            snapshot_policy: SnapshotPolicy::AdvanceOnSend,
            emit_unchanged_objects: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_advances_on_ack() {
        let config = TransmitConfig::default();
        assert_eq!(config.snapshot_policy, SnapshotPolicy::AdvanceOnAck);
        assert!(!config.emit_unchanged_objects);
    }

    #[test]
    fn advance_on_send_preset() {
        assert_eq!(
            TransmitConfig::advance_on_send().snapshot_policy,
            SnapshotPolicy::AdvanceOnSend
        );
    }
}
