use crate::domain::Timestamp;
use crate::ports::TimeSource;

/// Wall-clock time source.
///
/// Tests use `FixedTimeSource` from `test_utils` instead.
///
/// # Example
///
/// ```rust
/// use geomesh_directory::adapters::SystemTimeSource;
/// use geomesh_directory::ports::TimeSource;
///
/// let now = SystemTimeSource::new().now();
/// assert!(now.as_secs() > 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Create a system time source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Timestamp::new(duration.as_secs())
    }
}
