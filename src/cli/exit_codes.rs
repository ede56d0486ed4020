//! CLI Exit Codes
//!
//! Stable exit codes so scripts driving the reflector can tell failures apart.

use crate::core::error::{ConfigError, ReflectorError, TraceError};
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Link dropped or failed mid-run
    pub const LINK_ERROR: u8 = 9;

    /// Capture log or trace could not be written
    pub const TRACE_FAILED: u8 = 10;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Bit range or bit string rejected
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::ConnectionRefused => ExitCodes::CONNECTION_FAILED,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(&err), err.to_string())
    }
}

impl From<ReflectorError> for CliResult {
    fn from(err: ReflectorError) -> Self {
        let code = match &err {
            ReflectorError::Config(ConfigError::Load { source, .. }) => io_code(source),
            ReflectorError::Config(_) => ExitCodes::CONFIG_ERROR,
            ReflectorError::Bits(_) => ExitCodes::VALIDATION_FAILED,
            ReflectorError::Transport(TransportError::PortNotFound(_)) => ExitCodes::PORT_NOT_FOUND,
            ReflectorError::Transport(TransportError::PermissionDenied(_)) => ExitCodes::PERMISSION_DENIED,
            ReflectorError::Transport(TransportError::ConnectionFailed(_)) => ExitCodes::CONNECTION_FAILED,
            ReflectorError::Transport(_) => ExitCodes::LINK_ERROR,
            ReflectorError::Trace(TraceError::Task(_)) => ExitCodes::INTERNAL_ERROR,
            ReflectorError::Trace(_) => ExitCodes::TRACE_FAILED,
            ReflectorError::NotOpen => ExitCodes::INTERNAL_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        ReflectorError::from(err).into()
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Link error",
        10 => "Trace failed",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accessor::Direction;
    use crate::core::bits::BitModelError;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);
        assert_eq!(success.message(), None);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_reflector_error_codes() {
        let width = ConfigError::WidthExceeded {
            direction: Direction::Send,
            required: 12,
            configured: 8,
        };
        assert_eq!(CliResult::from(width).code(), ExitCodes::CONFIG_ERROR);

        let missing = ReflectorError::Transport(TransportError::PortNotFound("COM9".into()));
        let result = CliResult::from(missing);
        assert_eq!(result.code(), ExitCodes::PORT_NOT_FOUND);
        assert_eq!(exit_code_description(result.code()), "Port not found");

        let range = ReflectorError::Bits(BitModelError::Length { expected: 4, actual: 3 });
        assert_eq!(CliResult::from(range).code(), ExitCodes::VALIDATION_FAILED);

        let dropped = ReflectorError::Transport(TransportError::Disconnected);
        assert_eq!(CliResult::from(dropped).code(), ExitCodes::LINK_ERROR);
    }
}
