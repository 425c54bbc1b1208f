//! Periodic health-check loop for tracked tunnels.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use super::tunnels::{HealthOutcome, TunnelMonitor};

const COMPONENT: &str = "TunnelMonitor";

impl TunnelMonitor {
    /// Run a health pass every interval until `shutdown` flips (or its
    /// sender is dropped). A pass in progress is abandoned on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let logger = self.logger();
        // `interval` panics on a zero period.
        let mut timer = tokio::time::interval(self.interval().max(Duration::from_millis(1)));
        timer.tick().await; // Skip first immediate tick

        logger.info(
            COMPONENT,
            format!(
                "Health monitoring started ({}ms interval)",
                self.interval().as_millis()
            ),
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => {
                    logger.info(COMPONENT, "Health monitoring shutting down");
                    return;
                }
            }

            tokio::select! {
                outcomes = self.check_all() => {
                    let healthy = outcomes
                        .iter()
                        .filter(|(_, o)| matches!(o, Ok(HealthOutcome::Healthy)))
                        .count();
                    let reconnected = outcomes
                        .iter()
                        .filter(|(_, o)| matches!(o, Ok(HealthOutcome::Reconnected { .. })))
                        .count();
                    let unknown = outcomes
                        .iter()
                        .filter(|(_, o)| matches!(o, Ok(HealthOutcome::Unknown)))
                        .count();
                    let lost: Vec<&str> = outcomes
                        .iter()
                        .filter(|(_, o)| o.is_err())
                        .map(|(id, _)| id.as_str())
                        .collect();
                    logger.debug_with(
                        COMPONENT,
                        "Health pass completed",
                        json!({
                            "healthy": healthy,
                            "reconnected": reconnected,
                            "unknown": unknown,
                            "lost": lost,
                        }),
                    );
                }
                _ = shutdown.changed() => {
                    logger.info(COMPONENT, "Health monitoring shutting down during health pass");
                    return;
                }
            }
        }
    }
}

/// Spawn [`TunnelMonitor::run`] on the runtime.
pub fn spawn_monitor_task(
    monitor: Arc<TunnelMonitor>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { monitor.run(shutdown).await })
}
