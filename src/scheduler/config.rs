use std::time::Duration;

use super::SchedulerError;

/// Background task slots available when nothing else is configured.
pub const DEFAULT_MAX_TASKS: usize = 32;
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(20);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// The externally tunable scheduler parameters.
///
/// ```rust
/// use std::time::Duration;
/// use weft::SchedulerConfig;
///
/// let config = SchedulerConfig::new()
///     .max_tasks(64)
///     .time_slice(Duration::from_millis(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum concurrent background tasks; the main task is extra.
    pub max_tasks: usize,
    /// Run time after which `maybe_yield` hands control back.
    pub time_slice: Duration,
    /// Default timeout for blocking transport calls.
    pub io_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            time_slice: DEFAULT_TIME_SLICE,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn time_slice(mut self, time_slice: Duration) -> Self {
        self.time_slice = time_slice;
        self
    }

    pub fn io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_tasks == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_tasks must be at least 1".into(),
            ));
        }
        if self.max_tasks >= u32::MAX as usize {
            return Err(SchedulerError::InvalidConfig(format!(
                "max_tasks must be below {}",
                u32::MAX
            )));
        }
        if self.io_timeout.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "io_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();

        assert_eq!(config.max_tasks, DEFAULT_MAX_TASKS);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "InvalidConfig")]
    fn zero_tasks_rejected() {
        SchedulerConfig::new().max_tasks(0).validate().unwrap();
    }

    #[test]
    fn zero_io_timeout_rejected() {
        let config = SchedulerConfig::new().io_timeout(Duration::ZERO);

        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
