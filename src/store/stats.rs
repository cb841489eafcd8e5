//! HTTP client for the stats/persistence backend
//!
//! User records, per-user win/loss totals and match history live in an
//! external service; this core only proxies read queries and appends
//! concluded matches.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::ws::protocol::PlayerId;

/// Client for the stats backend REST API
#[derive(Clone)]
pub struct StatsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StatsClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.stats_backend_url.trim_end_matches('/').to_string(),
            api_key: config.stats_api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make an authenticated GET request
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StatsError> {
        let response = self
            .client
            .get(self.url(path))
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(StatsError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StatsError::NotFound);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StatsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(StatsError::Parse)
    }

    /// All known users
    pub async fn list_users(&self) -> Result<Vec<UserRecord>, StatsError> {
        self.get("/users").await
    }

    /// Single user lookup by account id
    pub async fn user_by_id(&self, id: i64) -> Result<Option<UserRecord>, StatsError> {
        match self.get(&format!("/users/{}", id)).await {
            Ok(user) => Ok(Some(user)),
            Err(StatsError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Win/loss totals for a user by display name
    pub async fn win_lose(&self, name: &str) -> Result<WinLoseRecord, StatsError> {
        self.get(&format!("/stats/{}/winlose", name)).await
    }

    /// Full match history for a user by display name
    pub async fn match_history(&self, name: &str) -> Result<Vec<MatchRecord>, StatsError> {
        self.get(&format!("/stats/{}/matches", name)).await
    }

    /// Append a concluded match
    pub async fn record_match(&self, record: &NewMatchRecord) -> Result<(), StatsError> {
        let response = self
            .client
            .post(self.url("/matches"))
            .header("x-api-key", &self.api_key)
            .json(record)
            .send()
            .await
            .map_err(StatsError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StatsError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// User record as stored by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Win/loss totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinLoseRecord {
    pub wins: u32,
    pub losses: u32,
}

/// One row of a user's match history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub winner_name: String,
    pub loser_name: String,
    pub by_forfeit: bool,
    pub tournament: bool,
    pub duration_secs: u32,
    pub recorded_at: DateTime<Utc>,
}

/// A concluded match to append
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatchRecord {
    pub winner_id: PlayerId,
    pub winner_name: String,
    pub loser_id: PlayerId,
    pub loser_name: String,
    pub by_forfeit: bool,
    pub tournament: bool,
    pub duration_secs: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Stats backend errors
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("Not found")]
    NotFound,
}
