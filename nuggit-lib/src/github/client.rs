//! GitHub REST API client
//!
//! Thin wrapper over `reqwest` that turns every non-success response into a
//! [`GitHubError`] the retry engine can classify, and reads quota information
//! from response headers.

use super::error::GitHubError;
use super::rate_limit::{QuotaKind, QuotaSource, RateLimitInfo};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::IntoAppError;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use url::Url;

const LOG_TARGET: &str = "    github";

/// Public GitHub API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Repository payload with only the fields we need.
#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub topics: Option<Vec<String>>,
    pub license: Option<License>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct License {
    pub name: Option<String>,
    pub spdx_id: Option<String>,
}

impl License {
    /// Human-readable license name, falling back to the SPDX identifier.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.spdx_id.clone()).filter(|n| !n.is_empty())
    }
}

/// Body of `GET /repos/{owner}/{repo}/license`.
#[derive(Debug, Deserialize)]
pub struct LicenseContent {
    pub license: Option<License>,
}

/// Body of `GET /repos/{owner}/{repo}/topics`.
#[derive(Debug, Deserialize)]
pub struct Topics {
    #[serde(default)]
    pub names: Vec<String>,
}

/// Body of `GET /repos/{owner}/{repo}/releases/latest`.
#[derive(Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: HashMap<String, RawQuota>,
}

#[derive(Debug, Deserialize)]
struct RawQuota {
    limit: u64,
    remaining: u64,
    reset: i64,
    #[serde(default)]
    used: Option<u64>,
}

/// A decoded response along with the quota it reported.
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub value: T,
    pub quota: Option<(QuotaKind, RateLimitInfo)>,
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client with an optional bearer token.
    pub fn new(token: Option<&str>, base_url: impl Into<String>, request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("Bearer {t}")).into_app_err("invalid characters in GitHub token")?;
            auth_val.set_sensitive(true);
            let _ = headers.insert(AUTHORIZATION, auth_val);
        }

        let client = reqwest::Client::builder()
            .user_agent("nuggit")
            .default_headers(headers)
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .into_app_err("creating HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, GitHubError> {
        let resp = self.send(path).await?;
        let quota = extract_quota_from_headers(resp.headers());
        let value = resp.json().await.map_err(GitHubError::Decode)?;
        Ok(ApiResponse { value, quota })
    }

    /// Counts the items of a list endpoint requested with `per_page=1`.
    ///
    /// The count is the page number of the `rel="last"` link when present, otherwise
    /// the length of the returned array. An empty `204` response counts as zero.
    pub async fn count_items(&self, path: &str) -> Result<ApiResponse<u64>, GitHubError> {
        let resp = self.send(path).await?;
        let quota = extract_quota_from_headers(resp.headers());

        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(ApiResponse { value: 0, quota });
        }

        let last_page = resp
            .headers()
            .get(LINK)
            .and_then(|h| h.to_str().ok())
            .and_then(last_page_from_link);

        let value = if let Some(last) = last_page {
            last
        } else {
            let items: Vec<serde_json::Value> = resp.json().await.map_err(GitHubError::Decode)?;
            items.len() as u64
        };

        Ok(ApiResponse { value, quota })
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response, GitHubError> {
        let url = format!("{}{path}", self.base_url);
        log::trace!(target: LOG_TARGET, "GET {url}");

        let resp = self.client.get(&url).send().await.map_err(GitHubError::Transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        let error = classify_response(status, &headers, &body, Utc::now());
        log::debug!(target: LOG_TARGET, "GET {url} failed: {error}");
        Err(error)
    }
}

#[async_trait]
impl QuotaSource for ApiClient {
    async fn fetch_quotas(&self) -> Result<Vec<(QuotaKind, RateLimitInfo)>, GitHubError> {
        let resp: ApiResponse<RateLimitResponse> = self.get_json("/rate_limit").await?;

        Ok(resp
            .value
            .resources
            .into_iter()
            .filter_map(|(name, raw)| {
                let kind = name.parse::<QuotaKind>().ok()?;
                let reset_time = DateTime::from_timestamp(raw.reset, 0)?;
                Some((
                    kind,
                    RateLimitInfo {
                        limit: raw.limit,
                        remaining: raw.remaining,
                        reset_time,
                        used: raw.used.unwrap_or_else(|| raw.limit.saturating_sub(raw.remaining)),
                    },
                ))
            })
            .collect())
    }
}

/// Turns a non-success response into the matching error.
fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str, now: DateTime<Utc>) -> GitHubError {
    let code = status.as_u16();

    if status == StatusCode::NOT_FOUND {
        return GitHubError::NotFound;
    }

    let retry_after = header_u64(headers, RETRY_AFTER.as_str());
    let exhausted = header_u64(headers, "x-ratelimit-remaining") == Some(0);
    let mentions_rate_limit = body.to_ascii_lowercase().contains("rate limit");

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some() || mentions_rate_limit))
    {
        // Out-of-range header values are ignored rather than trusted.
        let reset_at = retry_after
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .or_else(|| header_i64(headers, "x-ratelimit-reset").and_then(|ts| DateTime::from_timestamp(ts, 0)));

        return GitHubError::RateLimited { status: code, reset_at };
    }

    if status.is_server_error() {
        return GitHubError::Server { status: code };
    }

    GitHubError::Status {
        status: code,
        message: error_message(body, status),
    }
}

/// Pulls the `message` field out of a GitHub error body.
fn error_message(body: &str, status: StatusCode) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body).map_or_else(
        |_| status.canonical_reason().unwrap_or("unknown error").to_string(),
        |b| b.message,
    )
}

/// Extract quota information from API response headers
fn extract_quota_from_headers(headers: &HeaderMap) -> Option<(QuotaKind, RateLimitInfo)> {
    let limit = header_u64(headers, "x-ratelimit-limit")?;
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset_time = DateTime::from_timestamp(header_i64(headers, "x-ratelimit-reset")?, 0)?;
    let used = header_u64(headers, "x-ratelimit-used").unwrap_or_else(|| limit.saturating_sub(remaining));

    let kind = match headers.get("x-ratelimit-resource").and_then(|h| h.to_str().ok()) {
        Some(resource) => resource.parse().ok()?,
        None => QuotaKind::Core,
    };

    Some((
        kind,
        RateLimitInfo {
            limit,
            remaining,
            reset_time,
            used,
        },
    ))
}

/// Finds the page number of the `rel="last"` entry of a `Link` header.
fn last_page_from_link(link: &str) -> Option<u64> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="last""#) {
            return None;
        }

        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        let url = Url::parse(target).ok()?;
        url.query_pairs().find(|(k, _)| k == "page").and_then(|(_, v)| v.parse().ok())
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
