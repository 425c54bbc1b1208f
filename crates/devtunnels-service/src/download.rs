//! Direct binary download for the CLI.

use std::path::Path;
use std::time::Duration;

use devtunnels_core::{Error, ErrorCode, Result};

use crate::installer::Platform;

/// Release asset URL for `platform` under `base_url`.
pub fn download_url(base_url: &str, platform: Platform) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let asset = match platform.os {
        "windows" => {
            let arch = if platform.arch == "x86_64" { "x64" } else { "x86" };
            format!("devtunnel-windows-{arch}.exe")
        }
        "macos" => {
            let arch = if platform.arch == "aarch64" { "arm64" } else { "x64" };
            format!("devtunnel-osx-{arch}")
        }
        "linux" => {
            let arch = if platform.arch == "aarch64" { "arm64" } else { "x64" };
            format!("devtunnel-linux-{arch}")
        }
        other => {
            return Err(Error::cli(
                ErrorCode::CliInstallFailed,
                format!("Unsupported platform: {other}"),
            ));
        }
    };
    Ok(format!("{base}/{asset}"))
}

/// Download `url` to `target` and mark it executable. Returns the byte count.
///
/// The body is written next to `target` first and renamed into place, so a
/// failed download never leaves a truncated binary at `target`.
pub async fn download_binary(url: &str, target: &Path, timeout: Duration) -> Result<u64> {
    let fail = |msg: String| Error::cli(ErrorCode::CliInstallFailed, msg);

    // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
    // The `Err` case just means it was already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("devtunnels/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| fail("Failed to build HTTP client".into()).with_source(e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fail(format!("Download request failed: {url}")).with_source(e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("Download failed with HTTP {status}: {url}")));
    }

    // A release page instead of the asset means the URL is wrong.
    if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        let ct = content_type.to_str().unwrap_or("").to_ascii_lowercase();
        if ct.contains("text/html") {
            return Err(fail(format!("Download returned an HTML page: {url}")));
        }
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| fail(format!("Failed to read download body: {url}")).with_source(e))?;
    if body.is_empty() {
        return Err(fail(format!("Downloaded file is empty: {url}")));
    }

    if let Some(dir) = target.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            fail(format!("Failed to create install directory {}", dir.display())).with_source(e)
        })?;
    }

    let partial = target.with_extension("download");
    tokio::fs::write(&partial, &body).await.map_err(|e| {
        fail(format!("Failed to write {}", partial.display())).with_source(e)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| {
                fail(format!("Failed to mark {} executable", partial.display())).with_source(e)
            })?;
    }

    tokio::fs::rename(&partial, target).await.map_err(|e| {
        fail(format!("Failed to move binary into {}", target.display())).with_source(e)
    })?;

    Ok(body.len() as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const BASE: &str = "https://github.com/microsoft/dev-tunnels/releases/latest/download";

    fn platform(os: &'static str, arch: &'static str) -> Platform {
        Platform { os, arch }
    }

    #[test]
    fn urls_per_platform() {
        assert_eq!(
            download_url(BASE, platform("windows", "x86_64")).unwrap(),
            format!("{BASE}/devtunnel-windows-x64.exe")
        );
        assert_eq!(
            download_url(BASE, platform("windows", "x86")).unwrap(),
            format!("{BASE}/devtunnel-windows-x86.exe")
        );
        assert_eq!(
            download_url(BASE, platform("macos", "aarch64")).unwrap(),
            format!("{BASE}/devtunnel-osx-arm64")
        );
        assert_eq!(
            download_url(&format!("{BASE}/"), platform("linux", "x86_64")).unwrap(),
            format!("{BASE}/devtunnel-linux-x64")
        );
    }

    #[test]
    fn unsupported_platform_is_install_error() {
        let err = download_url(BASE, platform("freebsd", "x86_64")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CliInstallFailed);
        assert!(err.message().contains("freebsd"));
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_writing() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("bin").join("devtunnel");
        let err = download_binary(
            "http://127.0.0.1:9/devtunnel-linux-x64",
            &target,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CliInstallFailed);
        assert!(!target.exists());
    }
}
