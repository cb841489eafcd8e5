//! Recording concluded matches into the persistence layer

use chrono::Utc;
use tracing::error;

use crate::ws::protocol::PlayerId;

use super::stats::{NewMatchRecord, StatsClient};

/// A match conclusion to persist
#[derive(Debug, Clone)]
pub struct ConcludedMatch {
    pub winner_id: PlayerId,
    pub winner_name: String,
    pub loser_id: PlayerId,
    pub loser_name: String,
    pub by_forfeit: bool,
    pub tournament: bool,
    pub duration_secs: u32,
}

/// Store operations for match outcomes
#[derive(Clone)]
pub struct MatchHistoryStore {
    client: StatsClient,
}

impl MatchHistoryStore {
    pub fn new(client: StatsClient) -> Self {
        Self { client }
    }

    /// Record a conclusion. Initiated before the terminal broadcast but
    /// completed off the tick path: persistence failures are logged and must
    /// never disturb a running loop.
    pub fn record_conclusion(&self, concluded: ConcludedMatch) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let record = NewMatchRecord {
                winner_id: concluded.winner_id,
                winner_name: concluded.winner_name,
                loser_id: concluded.loser_id,
                loser_name: concluded.loser_name,
                by_forfeit: concluded.by_forfeit,
                tournament: concluded.tournament,
                duration_secs: concluded.duration_secs,
                recorded_at: Utc::now(),
            };
            if let Err(e) = client.record_match(&record).await {
                error!(
                    winner = %record.winner_name,
                    loser = %record.loser_name,
                    error = %e,
                    "failed to record match outcome"
                );
            }
        });
    }
}
