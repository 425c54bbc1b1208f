//! Shared data types for tunnels, authentication, and port discovery.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCode, Result};

/// Who may reach a tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessControl {
    #[default]
    Public,
    Authenticated,
}

/// Protocol exposed by a tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

/// Desired tunnel configuration for a single create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub allow_anonymous: bool,
    pub access_control: AccessControl,
    pub protocol: Protocol,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            name: None,
            allow_anonymous: true,
            access_control: AccessControl::Public,
            protocol: Protocol::Https,
        }
    }
}

impl TunnelOptions {
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    #[must_use]
    pub const fn access_control(mut self, access: AccessControl) -> Self {
        self.access_control = access;
        self
    }

    /// Reject option combinations the CLI would accept but contradict each
    /// other: anonymous access on an authenticated-only tunnel.
    pub fn validate(&self) -> Result<()> {
        if self.access_control == AccessControl::Authenticated && self.allow_anonymous {
            return Err(Error::tunnel(
                ErrorCode::TunnelCreateFailed,
                "anonymous access conflicts with authenticated access control",
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::tunnel(
                    ErrorCode::TunnelCreateFailed,
                    "tunnel name must not be empty",
                ));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Active,
    Inactive,
    Connecting,
    Error,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Connecting => "connecting",
            Self::Error => "error",
        })
    }
}

/// Connection state of a tunnel as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// A created tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    pub id: String,
    pub port: u16,
    pub public_url: String,
    pub status: TunnelState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Live state of a monitored tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub tunnel_id: String,
    pub port: u16,
    pub public_url: String,
    pub status: TunnelState,
    pub connection_state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub options: TunnelOptions,
}

impl TunnelStatus {
    /// A freshly created, connected tunnel.
    pub fn active(
        tunnel_id: impl Into<String>,
        port: u16,
        public_url: impl Into<String>,
        options: TunnelOptions,
    ) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            port,
            public_url: public_url.into(),
            status: TunnelState::Active,
            connection_state: ConnectionState::Connected,
            last_health_check: None,
            reconnect_attempts: 0,
            created_at: Utc::now(),
            options,
        }
    }

    pub fn info(&self) -> TunnelInfo {
        TunnelInfo {
            id: self.tunnel_id.clone(),
            port: self.port,
            public_url: self.public_url.clone(),
            status: self.status,
            created_at: self.created_at,
            last_health_check: self.last_health_check,
        }
    }

    /// Whether the monitor has given up on this tunnel.
    pub fn is_terminal(&self) -> bool {
        self.status == TunnelState::Error
    }
}

/// Authentication snapshot. Also the on-disk cache file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    pub last_auth_check: DateTime<Utc>,
}

impl AuthInfo {
    pub fn unauthenticated() -> Self {
        Self {
            is_authenticated: false,
            account_email: None,
            token_expiry: None,
            last_auth_check: Utc::now(),
        }
    }

    /// Whether this snapshot is younger than `window` at `now`.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_auth_check);
        chrono::Duration::from_std(window).is_ok_and(|w| age < w)
    }
}

/// Result of a single login or status probe against the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Outcome of probing one local port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortScanResult {
    pub port: u16,
    pub is_active: bool,
    pub is_http_service: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
