use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ftl_broker::{
    AccountId, Quota, RateLimiter, Snapshot, SnapshotSource, SourceError, SourceResult,
};
use futures::future::try_join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::types::{ApiResponse, NicknameDetails, UserBaseInfo, UserPositionData};

pub const DEFAULT_BASE_URL: &str = "https://www.binance.com/bapi/futures";
const LEADERBOARD_V1: &str = "v1/public/future/leaderboard";
const LEADERBOARD_V2: &str = "v2/public/future/leaderboard";
const TRADE_TYPE: &str = "PERPETUAL";
const SUCCESS_CODE: &str = "000000";

/// Headers the public leaderboard expects from a browser session.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("authority", "www.binance.com"),
    ("accept", "*/*"),
    ("accept-language", "en-US,en;q=0.8"),
    ("cache-control", "no-cache"),
    ("clienttype", "web"),
    ("content-type", "application/json"),
    ("lang", "en"),
    ("origin", "https://www.binance.com"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("sec-gpc", "1"),
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36",
    ),
];

/// Settings for [`LeaderboardClient`].
#[derive(Clone, Debug)]
pub struct LeaderboardConfig {
    pub base_url: String,
    /// Full header set sent with every request.
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Request budget shared by every account served by the client.
    pub quota: Option<Quota>,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: DEFAULT_HEADERS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            timeout: Duration::from_secs(10),
            quota: None,
        }
    }
}

impl LeaderboardConfig {
    /// Merge `headers` over the current set; matching names are replaced.
    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers
                .insert(name.into().to_ascii_lowercase(), value.into());
        }
        self
    }
}

/// HTTP client for the Binance futures leaderboard.
#[derive(Clone)]
pub struct LeaderboardClient {
    client: Client,
    base_url: String,
    limiter: Option<RateLimiter>,
}

impl LeaderboardClient {
    /// Build a client, rejecting malformed URLs or headers up front.
    pub fn new(config: LeaderboardConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(anyhow!("leaderboard base url must be http(s): {base_url}"));
        }
        if config.timeout.is_zero() {
            return Err(anyhow!("leaderboard request timeout must be non-zero"));
        }
        let mut headers = HeaderMap::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?;
            headers.insert(header_name, header_value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .context("failed to build leaderboard HTTP client")?;
        Ok(Self {
            client,
            base_url,
            limiter: config.quota.map(RateLimiter::direct),
        })
    }

    /// Share an existing request budget with this client.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, section: &str, path: &str) -> String {
        format!("{}/{section}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Currently open positions of `uid`.
    pub async fn get_other_position(&self, uid: &str) -> SourceResult<Snapshot> {
        let body = json!({ "encryptedUid": uid, "tradeType": TRADE_TYPE });
        let data: UserPositionData = self
            .post(LEADERBOARD_V1, "getOtherPosition", &body)
            .await?
            .ok_or_else(|| SourceError::Decode("position response carried no data".into()))?;
        Ok(data.into_snapshot())
    }

    /// Public profile of `uid`.
    pub async fn get_base_info(&self, uid: &str) -> SourceResult<UserBaseInfo> {
        let body = json!({ "encryptedUid": uid, "tradeType": TRADE_TYPE });
        self.post(LEADERBOARD_V2, "getOtherLeaderboardBaseInfo", &body)
            .await?
            .ok_or_else(|| SourceError::Decode("profile response carried no data".into()))
    }

    /// Leaderboard users whose nickname matches `nickname`.
    pub async fn search_nickname(&self, nickname: &str) -> SourceResult<Vec<NicknameDetails>> {
        let body = json!({ "nickname": nickname });
        Ok(self
            .post(LEADERBOARD_V1, "searchNickname", &body)
            .await?
            .unwrap_or_default())
    }

    /// Resolve every nickname to the uids it matches, searching concurrently.
    ///
    /// Fails as a whole when any single lookup fails.
    pub async fn nicknames_to_uids<S>(&self, nicknames: &[S]) -> SourceResult<HashMap<String, Vec<String>>>
    where
        S: AsRef<str>,
    {
        let lookups = nicknames.iter().map(|nickname| async move {
            let nickname = nickname.as_ref();
            let hits = self.search_nickname(nickname).await?;
            let uids = hits.into_iter().map(|hit| hit.encrypted_uid).collect();
            Ok::<_, SourceError>((nickname.to_string(), uids))
        });
        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    async fn post<T>(&self, section: &str, path: &str, body: &serde_json::Value) -> SourceResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let url = self.endpoint(section, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        debug!(%url, status = %status, body = %truncate(&text, 512), "leaderboard response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%url, "leaderboard is throttling requests");
            return Err(SourceError::RateLimited);
        }
        if status != StatusCode::OK {
            warn!(%url, status = %status, "leaderboard responded with unexpected status");
            return Err(SourceError::BadStatus {
                status: status.as_u16(),
                body: truncate(&text, 256).to_string(),
            });
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&text).map_err(|err| {
            SourceError::Decode(format!("{err} (body snippet: {})", truncate(&text, 256)))
        })?;
        if !envelope.success {
            return Err(SourceError::Rejected {
                code: envelope.code.unwrap_or_default(),
                message: envelope.message.unwrap_or_default(),
            });
        }
        if let Some(code) = envelope.code.as_deref() {
            if code != SUCCESS_CODE {
                debug!(%url, code, "leaderboard reported success with a non-default code");
            }
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl SnapshotSource for LeaderboardClient {
    fn name(&self) -> &str {
        "binance-leaderboard"
    }

    async fn fetch_snapshot(&self, account: &AccountId) -> SourceResult<Snapshot> {
        self.get_other_position(account.as_str()).await
    }
}

fn truncate(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_browser_headers() {
        let config = LeaderboardConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.headers["clienttype"], "web");
        assert_eq!(config.headers.len(), DEFAULT_HEADERS.len());
    }

    #[test]
    fn header_overrides_replace_defaults() {
        let config = LeaderboardConfig::default().with_headers([("User-Agent", "ftl"), ("x-extra", "1")]);
        assert_eq!(config.headers["user-agent"], "ftl");
        assert_eq!(config.headers["x-extra"], "1");
        assert_eq!(config.headers.len(), DEFAULT_HEADERS.len() + 1);
    }

    #[test]
    fn rejects_bad_configuration() {
        let config = LeaderboardConfig {
            base_url: "ftp://example.com".into(),
            ..LeaderboardConfig::default()
        };
        assert!(LeaderboardClient::new(config).is_err());

        let config = LeaderboardConfig::default().with_headers([("bad header", "x")]);
        assert!(LeaderboardClient::new(config).is_err());
    }

    #[test]
    fn builds_versioned_endpoints() {
        let config = LeaderboardConfig {
            base_url: "http://127.0.0.1:9000/bapi/futures/".into(),
            ..LeaderboardConfig::default()
        };
        let client = LeaderboardClient::new(config).unwrap();
        assert_eq!(
            client.endpoint(LEADERBOARD_V2, "/getOtherLeaderboardBaseInfo"),
            "http://127.0.0.1:9000/bapi/futures/v2/public/future/leaderboard/getOtherLeaderboardBaseInfo"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 10), "short");
    }
}
