//! Error types for the Dev Tunnels integration.
//!
//! One variant per originating component. Every variant carries a stable
//! [`ErrorCode`] chosen where the failure happens, so callers branch on
//! `code()` instead of matching on message text.

use std::fmt;

use thiserror::Error;

/// Boxed low-level cause attached to an [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias using the Dev Tunnels [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CliNotFound,
    CliInstallFailed,
    CliCommandFailed,
    CliParseError,

    AuthNotAuthenticated,
    AuthLoginFailed,
    AuthTokenExpired,
    AuthTokenInvalid,

    TunnelCreateFailed,
    TunnelDeleteFailed,
    TunnelNotFound,
    TunnelConnectionLost,

    PortNotAccessible,
    PortNoHttpService,
    PortScanFailed,

    ProcessStartFailed,
    ProcessStopFailed,
    ProcessNotFound,
    ProcessTimeout,

    ConfigInvalid,
}

impl ErrorCode {
    /// The literal code string, e.g. `"TUNNEL_CREATE_FAILED"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CliNotFound => "CLI_NOT_FOUND",
            Self::CliInstallFailed => "CLI_INSTALL_FAILED",
            Self::CliCommandFailed => "CLI_COMMAND_FAILED",
            Self::CliParseError => "CLI_PARSE_ERROR",
            Self::AuthNotAuthenticated => "AUTH_NOT_AUTHENTICATED",
            Self::AuthLoginFailed => "AUTH_LOGIN_FAILED",
            Self::AuthTokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::AuthTokenInvalid => "AUTH_TOKEN_INVALID",
            Self::TunnelCreateFailed => "TUNNEL_CREATE_FAILED",
            Self::TunnelDeleteFailed => "TUNNEL_DELETE_FAILED",
            Self::TunnelNotFound => "TUNNEL_NOT_FOUND",
            Self::TunnelConnectionLost => "TUNNEL_CONNECTION_LOST",
            Self::PortNotAccessible => "PORT_NOT_ACCESSIBLE",
            Self::PortNoHttpService => "PORT_NO_HTTP_SERVICE",
            Self::PortScanFailed => "PORT_SCAN_FAILED",
            Self::ProcessStartFailed => "PROCESS_START_FAILED",
            Self::ProcessStopFailed => "PROCESS_STOP_FAILED",
            Self::ProcessNotFound => "PROCESS_NOT_FOUND",
            Self::ProcessTimeout => "PROCESS_TIMEOUT",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the Dev Tunnels service layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure talking to, installing, or parsing the wrapped CLI.
    #[error("[{code}] {message}")]
    Cli {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Microsoft account authentication failure.
    #[error("[{code}] {message}")]
    Authentication {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Tunnel lifecycle failure.
    #[error("[{code}] {message}")]
    Tunnel {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Local port discovery failure.
    #[error("[{code}] {message}")]
    PortScan {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// External process spawn or timeout failure.
    #[error("[{code}] {message}")]
    Process {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration loading failure.
    #[error("[{code}] Configuration error: {message}")]
    Config {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    pub fn cli(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Cli {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn auth(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Authentication {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn tunnel(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Tunnel {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn port_scan(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::PortScan {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn process(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Process {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the low-level cause.
    #[must_use]
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        let slot = match &mut self {
            Self::Cli { source, .. }
            | Self::Authentication { source, .. }
            | Self::Tunnel { source, .. }
            | Self::PortScan { source, .. }
            | Self::Process { source, .. }
            | Self::Config { source, .. } => source,
        };
        *slot = Some(cause.into());
        self
    }

    /// The stable code of this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Cli { code, .. }
            | Self::Authentication { code, .. }
            | Self::Tunnel { code, .. }
            | Self::PortScan { code, .. }
            | Self::Process { code, .. }
            | Self::Config { code, .. } => *code,
        }
    }

    /// Name of the component that raised the error.
    pub const fn component(&self) -> &'static str {
        match self {
            Self::Cli { .. } => "CLI",
            Self::Authentication { .. } => "Authentication",
            Self::Tunnel { .. } => "Tunnel",
            Self::PortScan { .. } => "PortScanner",
            Self::Process { .. } => "Process",
            Self::Config { .. } => "Config",
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Cli { message, .. }
            | Self::Authentication { message, .. }
            | Self::Tunnel { message, .. }
            | Self::PortScan { message, .. }
            | Self::Process { message, .. }
            | Self::Config { message, .. } => message,
        }
    }

    /// Whether this error is a command timeout.
    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::ProcessTimeout
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(ErrorCode::CliParseError.as_str(), "CLI_PARSE_ERROR");
        assert_eq!(ErrorCode::AuthTokenExpired.to_string(), "AUTH_TOKEN_EXPIRED");
        assert_eq!(ErrorCode::TunnelConnectionLost.as_str(), "TUNNEL_CONNECTION_LOST");
        assert_eq!(ErrorCode::ProcessTimeout.as_str(), "PROCESS_TIMEOUT");
    }

    #[test]
    fn component_follows_variant() {
        let err = Error::cli(ErrorCode::TunnelCreateFailed, "boom");
        assert_eq!(err.component(), "CLI");
        assert_eq!(err.code(), ErrorCode::TunnelCreateFailed);
        assert_eq!(Error::auth(ErrorCode::AuthLoginFailed, "x").component(), "Authentication");
        assert_eq!(Error::port_scan(ErrorCode::PortScanFailed, "x").component(), "PortScanner");
        assert_eq!(Error::config("bad").code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::tunnel(ErrorCode::TunnelNotFound, "no tunnel abc");
        assert_eq!(err.to_string(), "[TUNNEL_NOT_FOUND] no tunnel abc");
        assert_eq!(err.message(), "no tunnel abc");
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary");
        let err = Error::process(ErrorCode::ProcessStartFailed, "spawn failed").with_source(io);
        assert_eq!(err.source().unwrap().to_string(), "missing binary");
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_classification() {
        assert!(Error::process(ErrorCode::ProcessTimeout, "slow").is_timeout());
        assert!(!Error::cli(ErrorCode::CliCommandFailed, "slow").is_timeout());
    }
}
