#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Tunnel creation, listing and monitoring through the public API.

use std::sync::Arc;

use devtunnels_core::{
    ConnectionState, DevTunnelsConfig, ErrorCode, LogLevel, Logger, TunnelOptions, TunnelState,
};
use devtunnels_service::testing::{ScriptedRunner, exit, ok};
use devtunnels_service::{CliWrapper, CommandRunner, HealthOutcome, TunnelMonitor};

struct Harness {
    _dir: tempfile::TempDir,
    config: DevTunnelsConfig,
    runner: Arc<ScriptedRunner>,
    cli: Arc<CliWrapper>,
    logger: Arc<Logger>,
}

fn harness() -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let config = DevTunnelsConfig {
        install_dir: Some(dir.path().join("bin")),
        reconnect_backoff_base_ms: 1,
        reconnect_backoff_max_ms: 2,
        ..DevTunnelsConfig::default()
    };
    let runner = Arc::new(ScriptedRunner::new());
    let logger = Arc::new(Logger::with_level(500, LogLevel::Debug));
    let cli = Arc::new(CliWrapper::new(
        Arc::new(config.clone()),
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&logger),
    ));
    Harness {
        _dir: dir,
        config,
        runner,
        cli,
        logger,
    }
}

#[tokio::test]
async fn create_named_anonymous_tunnel() {
    let h = harness();
    h.runner.respond(
        "devtunnel",
        &["host"],
        ok("Hosting port 3000 at https://mytunnel.devtunnels.ms\nReady to accept connections"),
    );

    let options = TunnelOptions::default()
        .named("mytunnel")
        .allow_anonymous(true);
    let url = h.cli.create_tunnel(3000, &options).await.unwrap();
    assert_eq!(url, "https://mytunnel.devtunnels.ms");

    let calls = h.runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec!["host", "-p", "3000", "--name", "mytunnel", "--allow-anonymous"]
    );
    assert_eq!(calls[0].timeout, h.config.process_timeout());
}

#[tokio::test]
async fn list_tunnels_swallows_cli_failure() {
    let h = harness();
    h.runner
        .respond("devtunnel", &["list"], exit(1, "Unauthorized"));

    assert!(h.cli.list_tunnels().await.is_empty());
    assert!(
        h.logger
            .entries(Some("CLIWrapper"), Some(LogLevel::Warn))
            .iter()
            .any(|e| e.message == "Failed to list tunnels")
    );
}

#[tokio::test]
async fn monitored_tunnel_lifecycle() {
    let h = harness();
    let url = "https://web01-8080.usw2.devtunnels.ms";
    h.runner
        .respond("devtunnel", &["host", "-p", "8080"], ok(url))
        .respond_once("devtunnel", &["list"], ok(&format!("web01.usw2  8080  {url}")))
        .respond_once("devtunnel", &["list"], ok("Found 0 tunnels."))
        .respond("devtunnel", &["delete", "web01"], ok("Deleted tunnel web01"));

    let monitor = TunnelMonitor::new(Arc::clone(&h.cli), &h.config, Arc::clone(&h.logger));
    let started = monitor
        .start_tunnel(8080, TunnelOptions::default())
        .await
        .unwrap();
    assert_eq!(started.tunnel_id, "web01");
    assert_eq!(started.info().public_url, url);

    assert_eq!(
        monitor.check_health("web01").await.unwrap(),
        HealthOutcome::Healthy
    );

    // Second check: the CLI lost it, first reconnect attempt succeeds.
    let outcome = monitor.check_health("web01").await.unwrap();
    assert!(matches!(outcome, HealthOutcome::Reconnected { attempts: 1, .. }));
    let status = monitor.status("web01").unwrap();
    assert_eq!(status.status, TunnelState::Active);
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);

    monitor.stop_tunnel("web01").await.unwrap();
    assert!(monitor.statuses().is_empty());
    let err = monitor.stop_tunnel("web01").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TunnelNotFound);
}
