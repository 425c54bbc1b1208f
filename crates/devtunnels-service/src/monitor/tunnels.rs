//! Registry of hosted tunnels with health checks and reconnection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use devtunnels_core::config::messages;
use devtunnels_core::{
    ConnectionState, DevTunnelsConfig, Error, ErrorCode, Logger, Result, TunnelOptions,
    TunnelState, TunnelStatus,
};

use super::policy::ReconnectPolicy;
use crate::parse::tunnel_id_from_url;
use crate::wrapper::CliWrapper;

const COMPONENT: &str = "TunnelMonitor";

/// Result of a successful health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    /// The CLI still lists the tunnel.
    Healthy,
    /// The tunnel was lost and recreated. `tunnel_id` is the id it is
    /// tracked under from now on.
    Reconnected {
        tunnel_id: String,
        public_url: String,
        attempts: u32,
    },
    /// The CLI could not list tunnels, so nothing was checked or changed.
    Unknown,
}

/// Tracks the tunnels this process hosts and keeps them alive.
pub struct TunnelMonitor {
    cli: Arc<CliWrapper>,
    policy: ReconnectPolicy,
    interval: Duration,
    tunnels: Mutex<HashMap<String, TunnelStatus>>,
    logger: Arc<Logger>,
}

impl TunnelMonitor {
    pub fn new(cli: Arc<CliWrapper>, config: &DevTunnelsConfig, logger: Arc<Logger>) -> Self {
        Self {
            cli,
            policy: ReconnectPolicy::from_config(config),
            interval: config.health_check_interval(),
            tunnels: Mutex::new(HashMap::new()),
            logger,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Create a tunnel for `port` and start tracking it.
    pub async fn start_tunnel(&self, port: u16, options: TunnelOptions) -> Result<TunnelStatus> {
        let public_url = self.cli.create_tunnel(port, &options).await?;
        let tunnel_id = derive_tunnel_id(&public_url, port, &options);
        let status = TunnelStatus::active(tunnel_id.clone(), port, public_url, options);

        if self.lock().insert(tunnel_id.clone(), status.clone()).is_some() {
            self.logger.warn(
                COMPONENT,
                format!("Replaced existing registration for tunnel {tunnel_id}"),
            );
        }
        self.logger.info_with(
            COMPONENT,
            format!("{} {}", messages::TUNNEL_CREATED, status.public_url),
            json!({ "tunnelId": tunnel_id, "port": port }),
        );
        Ok(status)
    }

    /// [`Self::start_tunnel`] with the configured default options.
    pub async fn start_default_tunnel(&self, port: u16) -> Result<TunnelStatus> {
        let options = self.cli.config().default_tunnel_options.clone();
        self.start_tunnel(port, options).await
    }

    /// Stop tracking `tunnel_id` and delete it through the CLI.
    ///
    /// The registration is dropped even when the delete fails, so a tunnel
    /// the CLI already forgot can still be cleared.
    pub async fn stop_tunnel(&self, tunnel_id: &str) -> Result<()> {
        if self.lock().remove(tunnel_id).is_none() {
            return Err(not_found(tunnel_id));
        }

        self.cli.delete_tunnel(tunnel_id).await.inspect_err(|e| {
            self.logger.warn(
                COMPONENT,
                format!("Tunnel {tunnel_id} unregistered but delete failed: {e}"),
            );
        })?;

        self.logger.info(
            COMPONENT,
            format!("{}: {tunnel_id}", messages::TUNNEL_STOPPED),
        );
        Ok(())
    }

    pub fn status(&self, tunnel_id: &str) -> Option<TunnelStatus> {
        self.lock().get(tunnel_id).cloned()
    }

    /// Every tracked tunnel, ordered by id.
    pub fn statuses(&self) -> Vec<TunnelStatus> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.tunnel_id.cmp(&b.tunnel_id));
        all
    }

    /// Check one tunnel and reconnect it if the CLI no longer lists it.
    ///
    /// Fails with `TUNNEL_NOT_FOUND` for unknown ids and with
    /// `TUNNEL_CONNECTION_LOST` once reconnection is exhausted. Tunnels that
    /// already exhausted their attempts fail immediately. A failed listing
    /// leaves the tunnel untouched and reports [`HealthOutcome::Unknown`].
    pub async fn check_health(&self, tunnel_id: &str) -> Result<HealthOutcome> {
        let snapshot = self.status(tunnel_id).ok_or_else(|| not_found(tunnel_id))?;
        if snapshot.is_terminal() {
            return Err(connection_lost(tunnel_id));
        }

        let listed = match self.cli.try_list_tunnels().await {
            Ok(listed) => listed,
            Err(e) => {
                self.logger.warn_with(
                    COMPONENT,
                    format!("Skipping health check for {tunnel_id}, tunnel list unavailable"),
                    json!({ "error": e.to_string() }),
                );
                return Ok(HealthOutcome::Unknown);
            }
        };
        let now = Utc::now();

        if listed.iter().any(|l| is_listed(tunnel_id, l)) {
            self.update(tunnel_id, |s| {
                s.status = TunnelState::Active;
                s.connection_state = ConnectionState::Connected;
                s.last_health_check = Some(now);
            });
            self.logger
                .debug(COMPONENT, format!("Tunnel {tunnel_id} is healthy"));
            return Ok(HealthOutcome::Healthy);
        }

        self.logger.warn(
            COMPONENT,
            format!("{} ({tunnel_id})", messages::CONNECTION_LOST),
        );
        self.update(tunnel_id, |s| {
            s.status = TunnelState::Connecting;
            s.connection_state = ConnectionState::Reconnecting;
            s.last_health_check = Some(now);
        });
        self.reconnect(&snapshot).await
    }

    /// One health pass over every tunnel that is not in the terminal state.
    pub async fn check_all(&self) -> Vec<(String, Result<HealthOutcome>)> {
        let ids: Vec<String> = self
            .statuses()
            .into_iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.tunnel_id)
            .collect();

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.check_health(&id).await;
            outcomes.push((id, outcome));
        }
        outcomes
    }

    async fn reconnect(&self, snapshot: &TunnelStatus) -> Result<HealthOutcome> {
        let tunnel_id = snapshot.tunnel_id.as_str();
        let mut attempt: u32 = 0;

        while self.policy.should_retry(attempt) {
            let delay = self.policy.delay_for_attempt(attempt);
            self.logger.info_with(
                COMPONENT,
                format!("Reconnecting tunnel {tunnel_id}"),
                json!({ "attempt": attempt + 1, "delayMs": delay.as_millis() }),
            );
            tokio::time::sleep(delay).await;

            attempt = attempt.saturating_add(1);
            self.update(tunnel_id, |s| s.reconnect_attempts = attempt);

            match self.cli.create_tunnel(snapshot.port, &snapshot.options).await {
                Ok(public_url) => {
                    let new_id = derive_tunnel_id(&public_url, snapshot.port, &snapshot.options);
                    if !self.rekey(tunnel_id, &new_id, &public_url) {
                        return Err(self.discard_orphan(tunnel_id, &new_id).await);
                    }
                    self.logger.info_with(
                        COMPONENT,
                        format!("{}: {public_url}", messages::RECONNECTED),
                        json!({ "previousId": tunnel_id, "tunnelId": new_id }),
                    );
                    return Ok(HealthOutcome::Reconnected {
                        tunnel_id: new_id,
                        public_url,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    self.logger.warn(
                        COMPONENT,
                        format!("Reconnect attempt {attempt} for {tunnel_id} failed: {e}"),
                    );
                }
            }
        }

        self.update(tunnel_id, |s| {
            s.status = TunnelState::Error;
            s.connection_state = ConnectionState::Disconnected;
        });
        self.logger.error(
            COMPONENT,
            format!("{} ({tunnel_id})", messages::MAX_RETRIES_EXCEEDED),
        );
        Err(connection_lost(tunnel_id))
    }

    /// Move a reconnected tunnel to the id the CLI gave its replacement.
    /// Returns `false` if the tunnel was stopped meanwhile.
    fn rekey(&self, old_id: &str, new_id: &str, public_url: &str) -> bool {
        let mut tunnels = self.lock();
        let Some(mut status) = tunnels.remove(old_id) else {
            return false;
        };
        status.tunnel_id = new_id.to_string();
        status.public_url = public_url.to_string();
        status.status = TunnelState::Active;
        status.connection_state = ConnectionState::Connected;
        status.reconnect_attempts = 0;
        status.last_health_check = Some(Utc::now());
        tunnels.insert(new_id.to_string(), status);
        true
    }

    /// Delete a replacement created for a tunnel that was stopped while
    /// reconnecting.
    async fn discard_orphan(&self, old_id: &str, new_id: &str) -> Error {
        self.logger.warn(
            COMPONENT,
            format!("Tunnel {old_id} was stopped during reconnect, deleting {new_id}"),
        );
        if let Err(e) = self.cli.delete_tunnel(new_id).await {
            self.logger
                .warn(COMPONENT, format!("Could not delete orphaned tunnel {new_id}: {e}"));
        }
        not_found(old_id)
    }

    /// Apply `f` to a tracked tunnel; no-op if it was stopped meanwhile.
    fn update(&self, tunnel_id: &str, f: impl FnOnce(&mut TunnelStatus)) {
        if let Some(status) = self.lock().get_mut(tunnel_id) {
            f(status);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TunnelStatus>> {
        self.tunnels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Explicit name, else the URL's first host label without its `-<port>`
/// suffix (`https://abc123-3000.usw2.devtunnels.ms` gives `abc123`).
fn derive_tunnel_id(public_url: &str, port: u16, options: &TunnelOptions) -> String {
    if let Some(name) = &options.name {
        return name.clone();
    }
    let suffix = format!("-{port}");
    tunnel_id_from_url(public_url).map_or_else(
        || format!("tunnel-{port}"),
        |label| label.strip_suffix(&suffix).unwrap_or(label.as_str()).to_string(),
    )
}

/// `devtunnel list` prints ids with a cluster suffix (`abc123.usw2`).
fn is_listed(tunnel_id: &str, listed: &str) -> bool {
    listed == tunnel_id || listed.split('.').next() == Some(tunnel_id)
}

fn not_found(tunnel_id: &str) -> Error {
    Error::tunnel(
        ErrorCode::TunnelNotFound,
        format!("Tunnel not found: {tunnel_id}"),
    )
}

fn connection_lost(tunnel_id: &str) -> Error {
    Error::tunnel(
        ErrorCode::TunnelConnectionLost,
        format!("{} ({tunnel_id})", messages::MAX_RETRIES_EXCEEDED),
    )
}
