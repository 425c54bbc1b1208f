#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! CLI discovery and installation through the wrapper.

use std::sync::Arc;

use devtunnels_core::{DevTunnelsConfig, ErrorCode, LogLevel, Logger};
use devtunnels_service::installer::{InstallMethod, Platform};
use devtunnels_service::testing::{ScriptedFailure, ScriptedRunner, ok};
use devtunnels_service::{CliInstaller, CliWrapper, CommandRunner};

fn setup(dir: &tempfile::TempDir) -> (Arc<DevTunnelsConfig>, Arc<ScriptedRunner>, Arc<Logger>) {
    let config = Arc::new(DevTunnelsConfig {
        install_dir: Some(dir.path().join("bin")),
        download_base_url: "http://127.0.0.1:9/download".into(),
        install_timeout_ms: 2_000,
        ..DevTunnelsConfig::default()
    });
    let logger = Arc::new(Logger::with_level(500, LogLevel::Debug));
    (config, Arc::new(ScriptedRunner::new()), logger)
}

#[tokio::test]
async fn missing_cli_is_installed_via_npm() {
    let dir = tempfile::TempDir::new().unwrap();
    let (config, runner, logger) = setup(&dir);
    runner
        .fail_once("devtunnel", &["--version"], ScriptedFailure::NotFound)
        .respond("devtunnel", &["--version"], ok("devtunnel 1.2.3"))
        .respond("npm", &["--version"], ok("10.2.0"))
        .respond("npm", &["install", "-g", "@microsoft/dev-tunnels-cli"], ok("added 1 package"));

    let linux = Platform {
        os: "linux",
        arch: "x86_64",
    };
    let installer = CliInstaller::new(
        Arc::clone(&config),
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&logger),
    )
    .with_platform(linux);
    let wrapper = CliWrapper::with_installer(
        Arc::clone(&config),
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        installer,
        Arc::clone(&logger),
    );

    assert!(!wrapper.is_installed().await);
    wrapper.install().await.unwrap();
    assert!(wrapper.is_installed().await);

    // Winget is never probed off Windows.
    assert_eq!(runner.call_count("winget", &[]), 0);
    assert_eq!(runner.call_count("npm", &["install", "-g"]), 1);

    let version = wrapper
        .installer()
        .installed_version(&config.cli_program())
        .await;
    assert_eq!(version, "1.2.3");
}

#[tokio::test]
async fn install_result_reports_npm_method() {
    let dir = tempfile::TempDir::new().unwrap();
    let (config, runner, logger) = setup(&dir);
    runner
        .respond("devtunnel", &["--version"], ok("devtunnel 1.2.3"))
        .respond("npm", &["--version"], ok("10.2.0"))
        .respond("npm", &["install", "-g"], ok(""));

    let installer = CliInstaller::new(config, runner as Arc<dyn CommandRunner>, logger)
        .with_platform(Platform {
            os: "macos",
            arch: "aarch64",
        });
    let result = installer.install().await.unwrap();
    assert!(result.success);
    assert_eq!(result.method, InstallMethod::Npm);
    assert_eq!(result.version, "1.2.3");
    assert!(result.binary_path.is_none());
    assert!(installer.verify_installation().await);
}

#[tokio::test]
async fn every_strategy_failing_is_install_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let (config, runner, logger) = setup(&dir);

    let wrapper = CliWrapper::new(config, runner as Arc<dyn CommandRunner>, Arc::clone(&logger));
    let err = wrapper.install().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CliInstallFailed);
    assert_eq!(err.component(), "CLI");

    let instructions = logger
        .entries(Some("CLIWrapper"), None)
        .into_iter()
        .find(|e| e.message == "Manual installation instructions:")
        .and_then(|e| e.data)
        .unwrap();
    assert!(instructions.as_str().unwrap().contains("npm install -g"));
}
