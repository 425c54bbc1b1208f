//! Dev Tunnels Service Layer
//!
//! Drives the Microsoft `devtunnel` CLI as a subprocess:
//! - Process execution with captured output and hard timeouts
//! - CLI installation (winget, npm, direct download) and verification
//! - Typed tunnel and authentication operations over the CLI
//! - Authentication caching with an owner-only snapshot file
//! - Local web-server discovery and tunnel health monitoring

pub mod auth;
pub mod download;
pub mod installer;
pub mod monitor;
pub mod parse;
pub mod ports;
pub mod runner;
pub mod wrapper;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::AuthenticationManager;
pub use installer::{CliInstaller, InstallMethod, InstallationResult, Platform};
pub use monitor::{HealthOutcome, ReconnectPolicy, TunnelMonitor};
pub use ports::PortScanner;
pub use runner::{CommandResult, CommandRunner, ProcessRunner};
pub use wrapper::CliWrapper;
