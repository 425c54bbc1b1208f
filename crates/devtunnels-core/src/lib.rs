//! Dev Tunnels Core Library
//!
//! Shared functionality for the Dev Tunnels service layer:
//! - Typed error taxonomy with stable codes
//! - Level-filtered logger with a bounded ring buffer
//! - Configuration constants and hierarchical loading
//! - Tunnel, authentication, and port-scan data types

pub mod config;
pub mod error;
pub mod logging;
pub mod tracing_init;
pub mod types;

pub use config::DevTunnelsConfig;
pub use error::{Error, ErrorCode, Result};
pub use logging::{LogEntry, LogLevel, Logger};
pub use types::{
    AccessControl, AuthInfo, AuthStatus, ConnectionState, PortScanResult, Protocol, TunnelInfo,
    TunnelOptions, TunnelState, TunnelStatus,
};
