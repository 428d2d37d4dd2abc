//! Limits for codec-level encoding and decoding.

/// Codec-specific limits.
///
/// Decode limits bound what a hostile transmitter can make a receiver
/// allocate; the unacknowledged frame limit bounds how far a silent client may
/// fall behind before the transmitter gives up on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum number of object lists on either side.
    pub max_lists: usize,
    /// Maximum number of live objects in one list.
    pub max_objects_per_list: usize,
    /// Maximum number of object blocks in one list section.
    pub max_blocks_per_section: usize,
    /// Maximum number of frames a client may leave unacknowledged.
    pub max_unacked_frames: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_lists: 64,
            max_objects_per_list: 4096,
            max_blocks_per_section: 4096,
            max_unacked_frames: 256,
        }
    }
}

impl CodecLimits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_lists: 4,
            max_objects_per_list: 64,
            max_blocks_per_section: 64,
            max_unacked_frames: 16,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_lists: usize::MAX,
            max_objects_per_list: usize::MAX,
            max_blocks_per_section: usize::MAX,
            max_unacked_frames: usize::MAX,
        }
    }
}
