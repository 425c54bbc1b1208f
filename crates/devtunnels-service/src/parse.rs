//! Pure parsers for free-text `devtunnel` output.
//!
//! None of these touch a process; they are tested against captured output.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use devtunnels_core::AuthStatus;

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static HTTPS_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://\S+").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static ANY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static TUNNEL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s+.*https://\S+").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?)").expect("static regex is valid")
});

#[allow(clippy::expect_used)]
static EXPIRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)expir\w*\W+(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2}))",
    )
    .expect("static regex is valid")
});

/// Phrases that mean the user is *not* signed in, checked before the
/// positive markers because "Not authenticated" contains "authenticated".
const NEGATIVE_MARKERS: &[&str] = &["not signed in", "not authenticated", "not logged in"];

/// Interpret `devtunnel user login` / `user show` stdout.
///
/// Signed in when the output mentions `Signed in`, `authenticated`, or an
/// email address, unless a negative phrase is present. The first email-like
/// token becomes `account_email`.
pub fn parse_auth_output(output: &str) -> AuthStatus {
    let lowered = output.to_ascii_lowercase();
    let negative = NEGATIVE_MARKERS.iter().any(|m| lowered.contains(m));
    let account_email = extract_email(output);

    let is_authenticated = !negative
        && (output.contains("Signed in")
            || output.contains("authenticated")
            || account_email.is_some());

    AuthStatus {
        is_authenticated,
        account_email: if is_authenticated { account_email } else { None },
        token_expiry: if is_authenticated {
            extract_token_expiry(output)
        } else {
            None
        },
        error: None,
    }
}

/// First email address in `output`.
pub fn extract_email(output: &str) -> Option<String> {
    EMAIL_RE.captures(output).map(|c| c[1].to_string())
}

/// RFC 3339 timestamp following an `expir…` keyword, e.g.
/// `Token expires: 2026-01-01T00:00:00Z`.
pub fn extract_token_expiry(output: &str) -> Option<DateTime<Utc>> {
    let raw = EXPIRY_RE.captures(output)?.get(1)?.as_str().replacen(' ', "T", 1);
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First `https://` URL in `output`, falling back to any `http(s)://` URL.
/// The URL is returned byte-for-byte up to the next whitespace.
pub fn parse_tunnel_url(output: &str) -> Option<String> {
    HTTPS_URL_RE
        .find(output)
        .or_else(|| ANY_URL_RE.find(output))
        .map(|m| m.as_str().to_string())
}

/// Tunnel identifiers from `devtunnel list`: one per line whose leading
/// token is followed (anywhere later on the line) by an `https://` URL.
/// Header and summary lines without a URL are skipped.
pub fn parse_tunnel_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| TUNNEL_LINE_RE.captures(line))
        .map(|c| c[1].to_string())
        .collect()
}

/// Semantic version from `--version` output, normalised through `semver`.
pub fn parse_version(output: &str) -> Option<String> {
    let token = VERSION_RE.captures(output)?.get(1)?.as_str();
    semver::Version::parse(token).ok().map(|v| v.to_string())
}

/// Heuristic check that `--version` output came from the CLI: it names the
/// CLI or carries a version token.
pub fn looks_like_cli_version(output: &str, cli_name: &str) -> bool {
    output.contains(cli_name) || VERSION_RE.is_match(output)
}

/// Derive a tunnel id from its public URL: the first host label, e.g.
/// `https://abc123-3000.usw2.devtunnels.ms/` gives `abc123-3000`.
pub fn tunnel_id_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let host = rest.split(['/', ':', '?', '#']).next()?;
    let label = host.split('.').next()?;
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}
