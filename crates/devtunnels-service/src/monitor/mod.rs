//! Tunnel lifecycle tracking for hosted tunnels.
//!
//! Provides the tunnel registry, periodic health checks and
//! exponential-backoff reconnection.

pub mod health;
pub mod policy;
pub mod tunnels;

pub use health::spawn_monitor_task;
pub use policy::ReconnectPolicy;
pub use tunnels::{HealthOutcome, TunnelMonitor};
