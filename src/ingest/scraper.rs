// Upstream match-data provider: wire types, source contract, HTTP client.
//
// The provider is opaque to the rest of the engine; everything downstream of
// `MatchSource` works the same against the HTTP client or an in-process fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    #[error("upstream returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        source: reqwest::Error,
    },
}

impl ScrapeError {
    /// Whether a retry could plausibly succeed. Timeouts, connection drops,
    /// and upstream 5xx/429 are transient; malformed payloads and client
    /// errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Transport { .. } => true,
            ScrapeError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            ScrapeError::Decode { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One row of a club's recent-matches listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchSummary {
    pub match_id: String,
    pub played_at: DateTime<Utc>,
    pub home_club: String,
    pub away_club: String,
    /// Grade/tier hint, e.g. "ACC 1". Used to seed `rl_team` for players
    /// first seen in this match.
    #[serde(default)]
    pub grade: Option<String>,
}

/// A batting-card row. Omitted entirely for players who did not bat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BattingRow {
    pub name: String,
    pub runs: u32,
    pub balls_faced: u32,
    pub dismissed: bool,
}

/// A bowling-card row. Overs arrive as a ball count so partial overs are
/// exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BowlingRow {
    pub name: String,
    pub balls: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
}

/// A single fielding credit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Catch,
    Stumping,
    Runout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldingCredit {
    pub name: String,
    pub kind: CreditKind,
}

/// One innings: the batting side's card plus the fielding side's bowling and
/// fielding credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Innings {
    pub batting_club: String,
    pub bowling_club: String,
    pub batting: Vec<BattingRow>,
    pub bowling: Vec<BowlingRow>,
    #[serde(default)]
    pub fielding: Vec<FieldingCredit>,
}

/// A complete match scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scorecard {
    pub match_id: String,
    pub innings: Vec<Innings>,
}

// ---------------------------------------------------------------------------
// Source contract
// ---------------------------------------------------------------------------

/// The upstream provider contract. Calls are idempotent from the caller's
/// viewpoint; repeated calls return equivalent data.
#[async_trait]
pub trait MatchSource: Send + Sync {
    async fn list_recent_matches(
        &self,
        club: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MatchSummary>, ScrapeError>;

    async fn fetch_scorecard(&self, match_id: &str) -> Result<Scorecard, ScrapeError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `MatchSource` over the provider's JSON API.
pub struct HttpMatchSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMatchSource {
    /// Build a client with a per-request deadline.
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, ScrapeError> {
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|source| ScrapeError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status { url, status });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ScrapeError::Decode { url, source })
    }
}

#[async_trait]
impl MatchSource for HttpMatchSource {
    async fn list_recent_matches(
        &self,
        club: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MatchSummary>, ScrapeError> {
        let url = format!("{}/clubs/{}/matches", self.base_url, club);
        self.get_json(url, &[("since", since.to_rfc3339())]).await
    }

    async fn fetch_scorecard(&self, match_id: &str) -> Result<Scorecard, ScrapeError> {
        let url = format!("{}/matches/{}/scorecard", self.base_url, match_id);
        self.get_json(url, &[]).await
    }
}
