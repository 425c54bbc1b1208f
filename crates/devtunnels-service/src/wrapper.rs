//! Typed operations over the `devtunnel` command line.

use std::sync::Arc;

use serde_json::json;

use devtunnels_core::config::messages;
use devtunnels_core::{
    AccessControl, AuthStatus, DevTunnelsConfig, Error, ErrorCode, Logger, Result, TunnelOptions,
};

use crate::installer::CliInstaller;
use crate::parse::{parse_auth_output, parse_tunnel_list, parse_tunnel_url};
use crate::runner::{CommandResult, CommandRunner};

const COMPONENT: &str = "CLIWrapper";

/// Runs `devtunnel` subcommands and turns their output into typed results.
pub struct CliWrapper {
    config: Arc<DevTunnelsConfig>,
    runner: Arc<dyn CommandRunner>,
    installer: CliInstaller,
    logger: Arc<Logger>,
}

impl CliWrapper {
    pub fn new(
        config: Arc<DevTunnelsConfig>,
        runner: Arc<dyn CommandRunner>,
        logger: Arc<Logger>,
    ) -> Self {
        let installer = CliInstaller::new(
            Arc::clone(&config),
            Arc::clone(&runner),
            Arc::clone(&logger),
        );
        Self::with_installer(config, runner, installer, logger)
    }

    pub const fn with_installer(
        config: Arc<DevTunnelsConfig>,
        runner: Arc<dyn CommandRunner>,
        installer: CliInstaller,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            config,
            runner,
            installer,
            logger,
        }
    }

    pub const fn installer(&self) -> &CliInstaller {
        &self.installer
    }

    pub fn config(&self) -> &DevTunnelsConfig {
        &self.config
    }

    /// Whether the CLI runs and names itself in its version output.
    pub async fn is_installed(&self) -> bool {
        self.logger
            .debug(COMPONENT, "Checking if Dev Tunnels CLI is installed");

        let installed = match self
            .run(&[self.config.version_flag.as_str()], self.config.status_timeout())
            .await
        {
            Ok(result) => result.success() && result.stdout.contains(&self.config.cli_name),
            Err(e) => {
                self.logger.debug(
                    COMPONENT,
                    format!("CLI not found or error checking version: {e}"),
                );
                false
            }
        };

        self.logger.info(
            COMPONENT,
            format!(
                "CLI installation status: {}",
                if installed { "installed" } else { "not installed" }
            ),
        );
        installed
    }

    /// Install the CLI and verify it afterwards.
    pub async fn install(&self) -> Result<()> {
        self.logger
            .info(COMPONENT, "Installing Microsoft Dev Tunnels CLI...");

        match self.install_and_verify().await {
            Ok(method) => {
                self.logger.info(
                    COMPONENT,
                    format!("{} ({method})", messages::CLI_INSTALLED),
                );
                Ok(())
            }
            Err(e) => {
                self.logger.error_with(
                    COMPONENT,
                    messages::INSTALLATION_FAILED,
                    json!({ "error": e.to_string() }),
                );
                self.logger.info_with(
                    COMPONENT,
                    "Manual installation instructions:",
                    json!(self.installer.manual_installation_instructions()),
                );
                Err(e)
            }
        }
    }

    /// Install the CLI unless it already runs.
    pub async fn ensure_installed(&self) -> Result<()> {
        if self.is_installed().await {
            return Ok(());
        }
        self.logger.warn(COMPONENT, messages::CLI_NOT_FOUND);
        self.install().await
    }

    async fn install_and_verify(&self) -> Result<&'static str> {
        let result = self.installer.install().await.map_err(|e| {
            if e.code() == ErrorCode::CliInstallFailed {
                e
            } else {
                Error::cli(ErrorCode::CliInstallFailed, format!("Installation failed: {e}"))
                    .with_source(e)
            }
        })?;

        if !result.success {
            return Err(Error::cli(
                ErrorCode::CliInstallFailed,
                result.error.unwrap_or_else(|| "Installation failed".into()),
            ));
        }

        if !self.installer.verify_installation().await {
            return Err(Error::cli(
                ErrorCode::CliInstallFailed,
                "Installation completed but CLI verification failed",
            ));
        }
        Ok(result.method.as_str())
    }

    /// Run the interactive `user login` flow.
    ///
    /// A non-zero exit, or a failure to run the CLI at all, is
    /// `AUTH_LOGIN_FAILED`.
    pub async fn authenticate(&self) -> Result<AuthStatus> {
        self.logger
            .info(COMPONENT, "Starting Microsoft account authentication...");

        let result = self
            .run(&["user", "login"], self.config.auth_timeout())
            .await
            .map_err(|e| {
                Error::cli(ErrorCode::AuthLoginFailed, format!("Authentication failed: {e}"))
                    .with_source(e)
            })
            .and_then(|result| {
                if result.success() {
                    Ok(result)
                } else {
                    Err(Error::cli(
                        ErrorCode::AuthLoginFailed,
                        format!("Authentication failed: {}", result.stderr),
                    ))
                }
            })
            .inspect_err(|e| {
                self.logger
                    .error(COMPONENT, format!("Authentication failed: {e}"));
            })?;

        let status = parse_auth_output(&result.stdout);
        if status.is_authenticated {
            self.logger.info(COMPONENT, messages::AUTH_SUCCESS);
        }
        Ok(status)
    }

    /// Probe `user show`. Never fails: problems become `AuthStatus::error`.
    pub async fn get_auth_status(&self) -> AuthStatus {
        self.logger
            .debug(COMPONENT, "Checking authentication status");

        match self
            .run(&["user", "show"], self.config.status_timeout())
            .await
        {
            Ok(result) if result.success() => parse_auth_output(&result.stdout),
            Ok(result) => AuthStatus::failed(result.stderr),
            Err(e) => {
                self.logger
                    .debug(COMPONENT, format!("Error checking auth status: {e}"));
                AuthStatus::failed(e.to_string())
            }
        }
    }

    /// Host a tunnel for `port` and return its public URL exactly as printed.
    pub async fn create_tunnel(&self, port: u16, options: &TunnelOptions) -> Result<String> {
        options.validate()?;
        self.logger.info_with(
            COMPONENT,
            format!("Creating tunnel for port {port}"),
            json!(options),
        );

        let port_arg = port.to_string();
        let mut args = vec!["host", "-p", port_arg.as_str()];
        if let Some(name) = options.name.as_deref() {
            args.extend(["--name", name]);
        }
        if options.allow_anonymous {
            args.push("--allow-anonymous");
        }
        if options.access_control == AccessControl::Authenticated {
            args.extend(["--access-control", "authenticated"]);
        }

        let url = self
            .run(&args, self.config.process_timeout())
            .await
            .map_err(|e| {
                Error::cli(
                    ErrorCode::TunnelCreateFailed,
                    format!("Tunnel creation failed: {e}"),
                )
                .with_source(e)
            })
            .and_then(|result| {
                if !result.success() {
                    return Err(Error::cli(
                        ErrorCode::TunnelCreateFailed,
                        format!("Tunnel creation failed: {}", result.stderr),
                    ));
                }
                parse_tunnel_url(&result.stdout).ok_or_else(|| {
                    Error::cli(
                        ErrorCode::CliParseError,
                        "Could not parse tunnel URL from CLI output",
                    )
                })
            })
            .inspect_err(|e| {
                self.logger.error_with(
                    COMPONENT,
                    messages::TUNNEL_CREATION_FAILED,
                    json!({ "port": port, "error": e.to_string() }),
                );
            })?;

        self.logger
            .info(COMPONENT, format!("Tunnel created successfully: {url}"));
        Ok(url)
    }

    pub async fn delete_tunnel(&self, tunnel_id: &str) -> Result<()> {
        self.logger
            .info(COMPONENT, format!("Deleting tunnel: {tunnel_id}"));

        self.run(&["delete", tunnel_id], self.config.delete_timeout())
            .await
            .map_err(|e| {
                Error::cli(
                    ErrorCode::TunnelDeleteFailed,
                    format!("Tunnel deletion failed: {e}"),
                )
                .with_source(e)
            })
            .and_then(|result| {
                if result.success() {
                    Ok(())
                } else {
                    Err(Error::cli(
                        ErrorCode::TunnelDeleteFailed,
                        format!("Tunnel deletion failed: {}", result.stderr),
                    ))
                }
            })
            .inspect_err(|e| {
                self.logger
                    .error(COMPONENT, format!("Failed to delete tunnel: {e}"));
            })?;

        self.logger
            .info(COMPONENT, format!("Tunnel deleted successfully: {tunnel_id}"));
        Ok(())
    }

    /// Ids of the tunnels the CLI knows about. Empty on any failure.
    pub async fn list_tunnels(&self) -> Vec<String> {
        self.try_list_tunnels().await.unwrap_or_else(|e| {
            self.logger.warn_with(
                COMPONENT,
                "Failed to list tunnels",
                json!({ "error": e.to_string() }),
            );
            Vec::new()
        })
    }

    /// Like [`Self::list_tunnels`], but a failed `list` is an error rather
    /// than an empty listing.
    pub(crate) async fn try_list_tunnels(&self) -> Result<Vec<String>> {
        self.logger.debug(COMPONENT, "Listing active tunnels");

        let result = self.run(&["list"], self.config.status_timeout()).await?;
        if result.success() {
            Ok(parse_tunnel_list(&result.stdout))
        } else {
            Err(Error::cli(
                ErrorCode::CliCommandFailed,
                format!("Failed to list tunnels: {}", result.stderr),
            ))
        }
    }

    async fn run(&self, args: &[&str], timeout: std::time::Duration) -> Result<CommandResult> {
        let program = self.config.cli_program();
        self.runner.execute(&program, args, timeout).await
    }
}
