//! Latest-release lookups against a GitHub-compatible release registry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::version::normalize_tag;

pub const DEFAULT_REGISTRY_URL: &str = "https://api.github.com";
pub const DEFAULT_ACCEPT: &str = "application/vnd.github.v3+json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Which repository to ask, and with what credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
    pub auth_token: Option<String>,
}

impl RepoTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
}

/// One published release as the updater needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// The raw tag, possibly with a leading `v`.
    pub version: String,
    pub published_at: Option<DateTime<Utc>>,
    /// The package archive to install: a `.zip` asset when the release has
    /// one, otherwise the source zipball.
    pub download_url: String,
    pub notes: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ReleaseMetadata {
    #[must_use]
    pub fn normalized_version(&self) -> &str {
        normalize_tag(&self.version)
    }
}

/// Rate-limit headers from the last registry response. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        Self {
            limit: number("x-ratelimit-limit"),
            remaining: number("x-ratelimit-remaining"),
            reset_at: number("x-ratelimit-reset")
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRelease {
    pub release: ReleaseMetadata,
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("registry request failed: {details}")]
    Network { details: String, timed_out: bool },

    #[error("registry returned HTTP {status}{body_snippet}")]
    Api {
        status: u16,
        rate_limit: RateLimit,
        body_snippet: String,
    },

    #[error("registry response is malformed: {details}")]
    Malformed { details: String },
}

impl FetchError {
    fn network(error: &reqwest::Error) -> Self {
        Self::Network {
            details: error.to_string(),
            timed_out: error.is_timeout(),
        }
    }

    fn malformed(details: impl Into<String>) -> Self {
        Self::Malformed {
            details: details.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Api { .. } => ErrorKind::Api,
            Self::Malformed { .. } => ErrorKind::Malformed,
        }
    }

    /// Stable diagnostic label for operators and host UIs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Api { status: 404, .. } => "not_found",
            Self::Api { status: 429, .. } => "rate_limited",
            Self::Api {
                status: 403,
                rate_limit,
                ..
            } if rate_limit.is_exhausted() => "rate_limited",
            Self::Api {
                status: 401 | 403, ..
            } => "unauthorized",
            Self::Api { .. } => "api_error",
            Self::Malformed { .. } => "malformed",
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimit> {
        match self {
            Self::Api { rate_limit, .. } => Some(*rate_limit),
            _ => None,
        }
    }
}

/// Anything that can answer "what is the latest release?".
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_latest(&self, target: &RepoTarget) -> Result<FetchedRelease, FetchError>;
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    accept: String,
    user_agent: String,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            user_agent: user_agent.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn latest_release_url(&self, target: &RepoTarget) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.base_url, target.owner, target.repo
        )
    }
}

#[async_trait]
impl ReleaseSource for RegistryClient {
    async fn fetch_latest(&self, target: &RepoTarget) -> Result<FetchedRelease, FetchError> {
        let url = self.latest_release_url(target);
        debug!("Fetching latest release from {url}");

        let mut request = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .header(ACCEPT, &self.accept)
            .header(USER_AGENT, &self.user_agent);
        if let Some(token) = &target.auth_token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await.map_err(|error| {
            warn!("Release check for {}/{} failed: {error}", target.owner, target.repo);
            FetchError::network(&error)
        })?;

        let status = response.status();
        let rate_limit = RateLimit::from_headers(response.headers());
        let body = response
            .text()
            .await
            .map_err(|error| FetchError::network(&error))?;

        if status != StatusCode::OK {
            let error = FetchError::Api {
                status: status.as_u16(),
                rate_limit,
                body_snippet: response_snippet(&body, 160),
            };
            warn!(
                "Release check for {}/{} failed ({}): {error}; rate limit {:?}/{:?}, resets {:?}",
                target.owner,
                target.repo,
                error.reason(),
                rate_limit.remaining,
                rate_limit.limit,
                rate_limit.reset_at,
            );
            return Err(error);
        }

        let release = parse_release(&body)?;
        debug!(
            "Latest release for {}/{} is {}",
            target.owner, target.repo, release.version
        );
        Ok(FetchedRelease {
            release,
            rate_limit,
        })
    }
}

#[derive(Deserialize)]
struct RawAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Deserialize)]
struct RawRelease {
    tag_name: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    zipball_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

/// Map a successful registry body into release metadata.
///
/// # Errors
/// Returns `FetchError::Malformed` when the body is not JSON, lacks a
/// `tag_name`, or offers nothing to download.
pub fn parse_release(body: &str) -> Result<ReleaseMetadata, FetchError> {
    let raw: RawRelease = serde_json::from_str(body)
        .map_err(|error| FetchError::malformed(format!("invalid release JSON: {error}")))?;

    if raw.tag_name.trim().is_empty() {
        return Err(FetchError::malformed("release has an empty tag_name"));
    }

    let assets: Vec<ReleaseAsset> = raw
        .assets
        .into_iter()
        .map(|asset| ReleaseAsset {
            name: asset.name,
            url: asset.browser_download_url,
        })
        .collect();

    let download_url = assets
        .iter()
        .find(|asset| {
            std::path::Path::new(&asset.name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        })
        .map(|asset| asset.url.clone())
        .or(raw.zipball_url.filter(|url| !url.is_empty()))
        .ok_or_else(|| FetchError::malformed("release has no zip asset or zipball_url"))?;

    Ok(ReleaseMetadata {
        version: raw.tag_name.trim().to_string(),
        published_at: raw.published_at,
        download_url,
        notes: raw.body.unwrap_or_default(),
        assets,
        html_url: raw.html_url,
    })
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    const RELEASE_JSON: &str = r#"{
        "tag_name": "v2.5.10",
        "published_at": "2025-03-04T10:00:00Z",
        "zipball_url": "https://api.github.com/repos/acme/clothing-form/zipball/v2.5.10",
        "html_url": "https://github.com/acme/clothing-form/releases/tag/v2.5.10",
        "body": "* Fixed size table",
        "assets": []
    }"#;

    #[test]
    fn parse_release_uses_zipball_without_zip_asset() {
        let release = parse_release(RELEASE_JSON).expect("release should parse");

        assert_eq!(release.version, "v2.5.10");
        assert_eq!(release.normalized_version(), "2.5.10");
        assert_eq!(
            release.download_url,
            "https://api.github.com/repos/acme/clothing-form/zipball/v2.5.10"
        );
        assert_eq!(release.notes, "* Fixed size table");
        assert!(release.published_at.is_some());
    }

    #[test]
    fn parse_release_prefers_zip_asset() {
        let body = r#"{
            "tag_name": "2.6.0",
            "zipball_url": "https://example.com/zipball",
            "assets": [
                {"name": "checksums.txt", "browser_download_url": "https://example.com/sums"},
                {"name": "Clothing_Form.ZIP", "browser_download_url": "https://example.com/pkg.zip"}
            ]
        }"#;

        let release = parse_release(body).expect("release should parse");

        assert_eq!(release.download_url, "https://example.com/pkg.zip");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.notes, "");
    }

    #[test]
    fn parse_release_rejects_missing_tag_and_bad_json() {
        let missing = parse_release(r#"{"zipball_url": "https://example.com/z"}"#);
        assert!(matches!(missing, Err(FetchError::Malformed { .. })));

        let empty = parse_release(r#"{"tag_name": " ", "zipball_url": "https://example.com/z"}"#);
        assert!(matches!(empty, Err(FetchError::Malformed { .. })));

        let garbage = parse_release("<html>rate limited</html>");
        assert!(matches!(garbage, Err(ref e) if e.reason() == "malformed"));
    }

    #[test]
    fn rate_limit_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("60"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let rate_limit = RateLimit::from_headers(&headers);

        assert_eq!(rate_limit.limit, Some(60));
        assert_eq!(rate_limit.remaining, Some(0));
        assert_eq!(
            rate_limit.reset_at.map(|at| at.timestamp()),
            Some(1_700_000_000)
        );
        assert!(rate_limit.is_exhausted());
        assert_eq!(RateLimit::from_headers(&HeaderMap::new()), RateLimit::default());
    }

    #[test]
    fn api_errors_map_to_distinct_reasons() {
        let api = |status, remaining| FetchError::Api {
            status,
            rate_limit: RateLimit {
                remaining,
                ..RateLimit::default()
            },
            body_snippet: String::new(),
        };

        assert_eq!(api(404, None).reason(), "not_found");
        assert_eq!(api(401, None).reason(), "unauthorized");
        assert_eq!(api(403, Some(12)).reason(), "unauthorized");
        assert_eq!(api(403, Some(0)).reason(), "rate_limited");
        assert_eq!(api(429, None).reason(), "rate_limited");
        assert_eq!(api(502, None).reason(), "api_error");
        assert_eq!(api(502, None).kind(), ErrorKind::Api);
        assert_eq!(api(404, None).status(), Some(404));
    }

    #[test]
    fn target_ignores_blank_tokens() {
        let target = RepoTarget::new("acme", "clothing-form").with_token(Some("  ".to_string()));
        assert!(target.auth_token.is_none());

        let client = RegistryClient::new(reqwest::Client::new(), "host/1.0")
            .with_base_url("https://registry.example.com/");
        assert_eq!(
            client.latest_release_url(&target),
            "https://registry.example.com/repos/acme/clothing-form/releases/latest"
        );
    }
}
