//! Exit codes for the promhouse CLI.
//!
//! Codes follow the ranges of [`ph_common::Error::code`] so scripts can tell
//! a bad config from an unreachable store without parsing output.

/// Exit codes for promhouse commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    /// Command-line usage error
    UsageError = 2,

    /// Configuration missing or invalid
    ConfigError = 10,

    /// Invalid query input (range, sample budget, matcher)
    ValidationError = 20,

    /// Routing failure (enqueue timeout, closed queues)
    RoutingError = 30,

    /// Store unreachable or failing
    StorageError = 40,

    /// I/O error
    IoError = 60,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }
}

impl From<&ph_common::Error> for ExitCode {
    fn from(err: &ph_common::Error) -> Self {
        match err.code() {
            10..=19 => ExitCode::ConfigError,
            20..=29 => ExitCode::ValidationError,
            30..=39 => ExitCode::RoutingError,
            40..=49 => ExitCode::StorageError,
            60..=69 => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ph_common::Error;

    #[test]
    fn error_ranges_map_to_codes() {
        assert_eq!(ExitCode::from(&Error::Config("x".into())), ExitCode::ConfigError);
        assert_eq!(
            ExitCode::from(&Error::InvalidSampleBudget(0)),
            ExitCode::ValidationError
        );
        assert_eq!(ExitCode::from(&Error::QueuesClosed), ExitCode::RoutingError);
        assert_eq!(
            ExitCode::from(&Error::StorageTimeout { seconds: 3 }),
            ExitCode::StorageError
        );
    }

    #[test]
    fn success_and_error_classes() {
        assert!(ExitCode::Clean.is_success());
        assert!(!ExitCode::UsageError.is_error());
        assert!(ExitCode::StorageError.is_error());
        assert_eq!(i32::from(ExitCode::IoError), 60);
    }
}
