//! Configurable limits for bounded decoding.

/// Wire-level limits for message decoding.
///
/// These limits are enforced during decoding to bound memory use on hostile
/// input. Object block limits belong to the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum message size in bytes.
    pub max_message_bytes: usize,

    /// Maximum number of list sections in a frame.
    pub max_sections: usize,

    /// Maximum length of a single section body in bytes.
    pub max_section_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: 64 * 1024,
            max_sections: 64,
            max_section_len: 48 * 1024,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_message_bytes: 4096,
            max_sections: 8,
            max_section_len: 1024,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_message_bytes: usize::MAX,
            max_sections: usize::MAX,
            max_section_len: usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_message_bytes, 64 * 1024);
        assert_eq!(limits.max_sections, 64);
        assert!(limits.max_section_len < limits.max_message_bytes);
    }

    #[test]
    fn testing_limits_smaller() {
        let test_limits = Limits::for_testing();
        let default_limits = Limits::default();

        assert!(test_limits.max_message_bytes < default_limits.max_message_bytes);
        assert!(test_limits.max_sections < default_limits.max_sections);
        assert!(test_limits.max_section_len < default_limits.max_section_len);
    }

    #[test]
    fn unlimited_limits() {
        let limits = Limits::unlimited();
        assert_eq!(limits.max_message_bytes, usize::MAX);
        assert_eq!(limits.max_sections, usize::MAX);
        assert_eq!(limits.max_section_len, usize::MAX);
    }

    #[test]
    fn limits_const_constructible() {
        const LIMITS: Limits = Limits::for_testing();
        assert_eq!(LIMITS.max_message_bytes, 4096);
    }
}
