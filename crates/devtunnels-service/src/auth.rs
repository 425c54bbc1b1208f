//! Authentication state on top of the CLI's own login.
//!
//! The CLI holds the real credentials. This module keeps a short-lived
//! in-memory snapshot and persists a non-sensitive copy (account email and
//! timestamps, never a token) to an owner-only JSON file.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use devtunnels_core::config::messages;
use devtunnels_core::{AuthInfo, DevTunnelsConfig, Error, ErrorCode, Logger, Result};

use crate::wrapper::CliWrapper;

const COMPONENT: &str = "AuthManager";

pub struct AuthenticationManager {
    cli: Arc<CliWrapper>,
    cache_file: PathBuf,
    cache_window: Duration,
    refresh_threshold: Duration,
    cached: Mutex<Option<AuthInfo>>,
    logger: Arc<Logger>,
}

impl AuthenticationManager {
    pub fn new(cli: Arc<CliWrapper>, config: &DevTunnelsConfig, logger: Arc<Logger>) -> Self {
        Self {
            cli,
            cache_file: config.auth_cache_file(),
            cache_window: config.auth_cache_window(),
            refresh_threshold: config.token_refresh_threshold(),
            cached: Mutex::new(None),
            logger,
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Whether the user is signed in. Served from memory while the last
    /// check is younger than the cache window; never fails.
    pub async fn is_authenticated(&self) -> bool {
        self.logger.debug(COMPONENT, "Checking authentication status");
        if let Some(info) = self.fresh_cached() {
            self.logger
                .debug(COMPONENT, "Using cached authentication status");
            return info.is_authenticated;
        }
        self.probe().await.is_authenticated
    }

    /// Full snapshot with the same caching as [`Self::is_authenticated`].
    pub async fn get_auth_status(&self) -> AuthInfo {
        if let Some(info) = self.fresh_cached() {
            return info;
        }
        self.probe().await
    }

    /// Run the CLI login and record the result.
    pub async fn authenticate(&self) -> Result<AuthInfo> {
        self.logger
            .info(COMPONENT, "Starting Microsoft account authentication...");

        let status = self
            .cli
            .authenticate()
            .await
            .map_err(|e| {
                Error::auth(ErrorCode::AuthLoginFailed, e.message().to_string()).with_source(e)
            })
            .inspect_err(|e| self.log_auth_failure(e))?;

        if !status.is_authenticated {
            let err = Error::auth(
                ErrorCode::AuthLoginFailed,
                status.error.unwrap_or_else(|| "Authentication failed".into()),
            );
            self.log_auth_failure(&err);
            return Err(err);
        }

        let token_expiry = match status.token_expiry {
            Some(expiry) => Some(expiry),
            None => self.load_persisted().await.and_then(|p| p.token_expiry),
        };
        let info = AuthInfo {
            is_authenticated: true,
            account_email: status.account_email,
            token_expiry,
            last_auth_check: Utc::now(),
        };

        if let Err(e) = self.persist(&info).await {
            self.logger.warn(
                COMPONENT,
                format!("Could not cache authentication info: {e}"),
            );
        }
        *self.lock() = Some(info.clone());

        self.logger.info(
            COMPONENT,
            format!(
                "Successfully authenticated as {}",
                info.account_email.as_deref().unwrap_or("unknown account")
            ),
        );
        Ok(info)
    }

    /// Re-probe the CLI when the persisted token expiry is within the
    /// refresh threshold. Fails with `AUTH_TOKEN_EXPIRED` if the CLI no
    /// longer reports a signed-in user.
    pub async fn refresh_token(&self) -> Result<()> {
        self.refresh_token_at(Utc::now()).await
    }

    pub(crate) async fn refresh_token_at(&self, now: DateTime<Utc>) -> Result<()> {
        self.logger
            .debug(COMPONENT, "Checking if token refresh is needed");

        let Some(expiry) = self.load_persisted().await.and_then(|p| p.token_expiry) else {
            self.logger
                .debug(COMPONENT, "No token info found, skipping refresh");
            return Ok(());
        };

        let threshold = TimeDelta::from_std(self.refresh_threshold).unwrap_or(TimeDelta::MAX);
        if expiry.signed_duration_since(now) > threshold {
            self.logger
                .debug(COMPONENT, "Token is still valid, no refresh needed");
            return Ok(());
        }

        self.logger
            .info(COMPONENT, "Token is close to expiry, refreshing...");
        let status = self.cli.get_auth_status().await;
        if !status.is_authenticated {
            self.logger.warn(
                COMPONENT,
                "Token refresh failed, re-authentication required",
            );
            return Err(Error::auth(
                ErrorCode::AuthTokenExpired,
                "Token expired and refresh failed",
            ));
        }

        // The CLI renewed the token behind our back; record the new expiry.
        if status.token_expiry.is_some() {
            let info = AuthInfo {
                is_authenticated: true,
                account_email: status.account_email,
                token_expiry: status.token_expiry,
                last_auth_check: now,
            };
            if let Err(e) = self.persist(&info).await {
                self.logger
                    .debug(COMPONENT, format!("Could not update token cache: {e}"));
            }
            *self.lock() = Some(info);
        }

        self.logger
            .info(COMPONENT, "Token refresh completed successfully");
        Ok(())
    }

    /// Forget the cached state and delete the cache file. The CLI has no
    /// logout; its tokens expire on their own.
    pub async fn sign_out(&self) -> Result<()> {
        self.logger.info(COMPONENT, "Signing out...");
        *self.lock() = None;

        match tokio::fs::remove_file(&self.cache_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.logger
                    .debug(COMPONENT, "No token cache to clear");
            }
            Err(e) => {
                self.logger
                    .error(COMPONENT, format!("Error during sign out: {e}"));
                return Err(Error::auth(
                    ErrorCode::AuthLoginFailed,
                    format!("Sign out failed: {e}"),
                )
                .with_source(e));
            }
        }

        self.logger.info(COMPONENT, "Sign out completed");
        Ok(())
    }

    /// Gate for tunnel operations: fails with `AUTH_NOT_AUTHENTICATED` when
    /// signed out and with `AUTH_TOKEN_EXPIRED` when the token lapsed. Other
    /// refresh problems are logged and ignored.
    pub async fn validate_authentication(&self) -> Result<()> {
        if !self.is_authenticated().await {
            self.logger.warn(COMPONENT, messages::AUTH_REQUIRED);
            return Err(Error::auth(
                ErrorCode::AuthNotAuthenticated,
                "Authentication required. Please run authentication first.",
            ));
        }

        match self.refresh_token().await {
            Err(e) if e.code() == ErrorCode::AuthTokenExpired => Err(e),
            Err(e) => {
                self.logger.warn_with(
                    COMPONENT,
                    "Token refresh check failed (non-critical)",
                    json!({ "error": e.to_string() }),
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn log_auth_failure(&self, err: &Error) {
        self.logger.error_with(
            COMPONENT,
            messages::AUTH_FAILED,
            json!({ "error": err.to_string() }),
        );
    }

    fn fresh_cached(&self) -> Option<AuthInfo> {
        self.lock()
            .as_ref()
            .filter(|info| info.is_fresh(self.cache_window, Utc::now()))
            .cloned()
    }

    async fn probe(&self) -> AuthInfo {
        let status = self.cli.get_auth_status().await;
        let mut info = AuthInfo {
            is_authenticated: status.is_authenticated,
            account_email: status.account_email,
            token_expiry: status.token_expiry,
            last_auth_check: Utc::now(),
        };
        if info.is_authenticated && info.token_expiry.is_none() {
            info.token_expiry = self.load_persisted().await.and_then(|p| p.token_expiry);
        }
        *self.lock() = Some(info.clone());
        info
    }

    async fn load_persisted(&self) -> Option<AuthInfo> {
        let raw = match tokio::fs::read(&self.cache_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                self.logger
                    .debug(COMPONENT, format!("Could not load token info: {e}"));
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                self.logger
                    .debug(COMPONENT, format!("Ignoring malformed token cache: {e}"));
                None
            }
        }
    }

    async fn persist(&self, info: &AuthInfo) -> io::Result<()> {
        if let Some(dir) = self.cache_file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(info).map_err(io::Error::other)?;
        tokio::fs::write(&self.cache_file, body).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.cache_file, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<AuthInfo>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
