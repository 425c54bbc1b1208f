//! Installation of the `devtunnel` CLI.
//!
//! Strategies are tried in order: winget (Windows only), the npm package,
//! then a direct download of the release binary into the managed install
//! directory. The first strategy that succeeds wins.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use devtunnels_core::{DevTunnelsConfig, Error, ErrorCode, Logger, Result};

use crate::download::{download_binary, download_url};
use crate::parse::{looks_like_cli_version, parse_version};
use crate::runner::CommandRunner;

const COMPONENT: &str = "CLIInstaller";

/// Version string reported when the installed CLI cannot be queried.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Operating system and CPU architecture, as named by `std::env::consts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub const fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    pub fn is_windows(self) -> bool {
        self.os == "windows"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMethod {
    Winget,
    Npm,
    DirectDownload,
}

impl InstallMethod {
    pub const ORDER: [Self; 3] = [Self::Winget, Self::Npm, Self::DirectDownload];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Winget => "winget",
            Self::Npm => "npm",
            Self::DirectDownload => "direct-download",
        }
    }
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one installation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationResult {
    pub success: bool,
    pub method: InstallMethod,
    pub version: String,
    pub error: Option<String>,
    /// Set when the binary was placed in the managed install directory.
    pub binary_path: Option<PathBuf>,
}

impl InstallationResult {
    fn installed(method: InstallMethod, version: String) -> Self {
        Self {
            success: true,
            method,
            version,
            error: None,
            binary_path: None,
        }
    }

    fn failed(method: InstallMethod, error: &Error) -> Self {
        Self {
            success: false,
            method,
            version: UNKNOWN_VERSION.to_string(),
            error: Some(error.message().to_string()),
            binary_path: None,
        }
    }
}

/// Installs, verifies and removes the `devtunnel` CLI.
pub struct CliInstaller {
    config: Arc<DevTunnelsConfig>,
    runner: Arc<dyn CommandRunner>,
    logger: Arc<Logger>,
    platform: Platform,
}

impl CliInstaller {
    pub fn new(
        config: Arc<DevTunnelsConfig>,
        runner: Arc<dyn CommandRunner>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            config,
            runner,
            logger,
            platform: Platform::current(),
        }
    }

    /// Override the detected platform.
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Install the CLI with the first strategy that works.
    ///
    /// Fails with `CLI_INSTALL_FAILED` once every strategy has failed.
    pub async fn install(&self) -> Result<InstallationResult> {
        self.logger
            .info(COMPONENT, "Starting Dev Tunnels CLI installation");

        let mut failures = Vec::new();
        for method in InstallMethod::ORDER {
            match self.install_with(method).await {
                Ok(result) => {
                    self.logger.info_with(
                        COMPONENT,
                        format!("CLI installed successfully via {method}"),
                        json!({ "version": result.version }),
                    );
                    return Ok(result);
                }
                Err(e) => {
                    self.logger.debug_with(
                        COMPONENT,
                        format!("Installation via {method} failed"),
                        json!({ "error": e.to_string() }),
                    );
                    failures.push(InstallationResult::failed(method, &e));
                }
            }
        }

        let summary = failures
            .iter()
            .map(|f| format!("{}: {}", f.method, f.error.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("; ");
        self.logger.error_with(
            COMPONENT,
            "All installation methods failed",
            json!({ "attempts": summary }),
        );
        Err(Error::cli(
            ErrorCode::CliInstallFailed,
            "All installation methods failed",
        ))
    }

    async fn install_with(&self, method: InstallMethod) -> Result<InstallationResult> {
        match method {
            InstallMethod::Winget => self.install_via_winget().await,
            InstallMethod::Npm => self.install_via_npm().await,
            InstallMethod::DirectDownload => self.install_via_download().await,
        }
    }

    async fn install_via_winget(&self) -> Result<InstallationResult> {
        if !self.platform.is_windows() {
            return Err(Error::cli(
                ErrorCode::CliInstallFailed,
                "Winget is only available on Windows",
            ));
        }
        if !self.tool_available("winget").await {
            return Err(Error::cli(ErrorCode::CliInstallFailed, "Winget is not available"));
        }

        self.logger.info(COMPONENT, "Installing via winget");
        self.run_installer(
            "winget",
            &[
                "install",
                "--id",
                &self.config.winget_package,
                "--exact",
                "--accept-source-agreements",
                "--accept-package-agreements",
            ],
        )
        .await?;

        let version = self.installed_version(&self.config.cli_program()).await;
        Ok(InstallationResult::installed(InstallMethod::Winget, version))
    }

    async fn install_via_npm(&self) -> Result<InstallationResult> {
        if !self.tool_available("npm").await {
            return Err(Error::cli(ErrorCode::CliInstallFailed, "npm is not available"));
        }

        self.logger.info(COMPONENT, "Installing via npm");
        self.run_installer("npm", &["install", "-g", &self.config.npm_package])
            .await?;

        let version = self.installed_version(&self.config.cli_program()).await;
        Ok(InstallationResult::installed(InstallMethod::Npm, version))
    }

    async fn install_via_download(&self) -> Result<InstallationResult> {
        let url = download_url(&self.config.download_base_url, self.platform)?;
        let target = self.config.managed_binary_path();
        self.logger.info_with(
            COMPONENT,
            "Downloading CLI binary",
            json!({ "url": url, "target": target.display().to_string() }),
        );

        let bytes = download_binary(&url, &target, self.config.install_timeout()).await?;
        self.logger.debug(
            COMPONENT,
            format!("Downloaded {bytes} bytes to {}", target.display()),
        );

        let version = self.installed_version(&target).await;
        let mut result = InstallationResult::installed(InstallMethod::DirectDownload, version);
        result.binary_path = Some(target);
        Ok(result)
    }

    /// Run a package-manager install command. A non-zero exit, or `error`
    /// on stderr without an accompanying warning, counts as failure.
    async fn run_installer(&self, tool: &str, args: &[&str]) -> Result<()> {
        let result = self
            .runner
            .execute(Path::new(tool), args, self.config.install_timeout())
            .await?;

        let stderr = result.stderr.to_ascii_lowercase();
        if !result.success() || (stderr.contains("error") && !stderr.contains("warn")) {
            return Err(Error::cli(
                ErrorCode::CliInstallFailed,
                format!("{tool} installation failed: {}", result.stderr),
            ));
        }
        Ok(())
    }

    /// Whether `tool --version` runs and exits 0.
    async fn tool_available(&self, tool: &str) -> bool {
        self.runner
            .execute(Path::new(tool), &["--version"], self.config.status_timeout())
            .await
            .is_ok_and(|r| r.success())
    }

    /// Version reported by `program --version`, or `"unknown"`.
    pub async fn installed_version(&self, program: &Path) -> String {
        match self
            .runner
            .execute(
                program,
                &[self.config.version_flag.as_str()],
                self.config.status_timeout(),
            )
            .await
        {
            Ok(result) if result.success() => {
                parse_version(&result.stdout).unwrap_or_else(|| UNKNOWN_VERSION.to_string())
            }
            _ => UNKNOWN_VERSION.to_string(),
        }
    }

    /// Whether the resolved CLI answers its version flag sensibly.
    pub async fn verify_installation(&self) -> bool {
        let program = self.config.cli_program();
        match self
            .runner
            .execute(
                &program,
                &[self.config.version_flag.as_str()],
                self.config.status_timeout(),
            )
            .await
        {
            Ok(result) => {
                result.success()
                    && !result.stderr.to_ascii_lowercase().contains("error")
                    && looks_like_cli_version(&result.stdout, &self.config.cli_name)
            }
            Err(e) => {
                self.logger.debug(
                    COMPONENT,
                    format!("Installation verification failed: {e}"),
                );
                false
            }
        }
    }

    /// Availability of what each install strategy depends on. `winget` is
    /// only probed on Windows; `download` is whether a release binary exists
    /// for this platform.
    pub async fn check_prerequisites(&self) -> BTreeMap<String, bool> {
        let mut available = BTreeMap::new();
        if self.platform.is_windows() {
            available.insert("winget".to_string(), self.tool_available("winget").await);
        }
        available.insert("npm".to_string(), self.tool_available("npm").await);
        available.insert(
            "download".to_string(),
            download_url(&self.config.download_base_url, self.platform).is_ok(),
        );
        self.logger.debug_with(
            COMPONENT,
            "Prerequisites checked",
            json!(available),
        );
        available
    }

    /// Remove the managed binary if there is one, then uninstall through npm
    /// or, failing that, winget (Windows). Returns `true` if anything was
    /// removed.
    pub async fn uninstall(&self) -> bool {
        let removed_binary = self.remove_managed_binary().await;
        let removed_package = self.uninstall_package().await;

        if !removed_binary && !removed_package {
            self.logger
                .warn(COMPONENT, "Failed to uninstall CLI: no installation removed");
        }
        removed_binary || removed_package
    }

    async fn remove_managed_binary(&self) -> bool {
        let managed = self.config.managed_binary_path();
        match tokio::fs::remove_file(&managed).await {
            Ok(()) => {
                self.logger.info(
                    COMPONENT,
                    format!("Removed managed binary {}", managed.display()),
                );
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                self.logger.warn(
                    COMPONENT,
                    format!("Failed to remove managed binary {}: {e}", managed.display()),
                );
                false
            }
        }
    }

    async fn uninstall_package(&self) -> bool {
        let timeout = self.config.uninstall_timeout();

        let npm = self
            .runner
            .execute(
                Path::new("npm"),
                &["uninstall", "-g", &self.config.npm_package],
                timeout,
            )
            .await;
        if npm.is_ok_and(|r| r.success()) {
            self.logger.info(COMPONENT, "CLI uninstalled via npm");
            return true;
        }

        if self.platform.is_windows() {
            let winget = self
                .runner
                .execute(
                    Path::new("winget"),
                    &["uninstall", "--id", &self.config.winget_package, "--exact"],
                    timeout,
                )
                .await;
            if winget.is_ok_and(|r| r.success()) {
                self.logger.info(COMPONENT, "CLI uninstalled via winget");
                return true;
            }
        }
        false
    }

    /// Human-readable steps for installing the CLI by hand.
    pub fn manual_installation_instructions(&self) -> String {
        let url = download_url(&self.config.download_base_url, self.platform)
            .unwrap_or_else(|_| self.config.download_base_url.clone());
        let mut steps = vec![
            "Microsoft Dev Tunnels CLI could not be installed automatically.".to_string(),
            "Install it manually with one of:".to_string(),
        ];
        if self.platform.is_windows() {
            steps.push(format!("  winget install {}", self.config.winget_package));
        } else if self.platform.os == "macos" {
            steps.push("  brew install --cask devtunnel".to_string());
        } else {
            steps.push("  curl -sL https://aka.ms/DevTunnelCliInstall | bash".to_string());
        }
        steps.push(format!("  npm install -g {}", self.config.npm_package));
        steps.push(format!("  or download {url} and place it on your PATH"));
        steps.push(format!(
            "Then verify with: {} {}",
            self.config.cli_name, self.config.version_flag
        ));
        steps.join("\n")
    }
}
