//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{MatchRegistry, TournamentRegistry};
use crate::matchmaking::MatchmakingService;
use crate::store::{MatchHistoryStore, StatsClient};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stats: StatsClient,
    pub matchmaking: Arc<MatchmakingService>,
    pub matches: Arc<MatchRegistry>,
    pub tournaments: Arc<TournamentRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Stats backend client and the conclusion-recording store over it
        let stats = StatsClient::new(&config);
        let history = MatchHistoryStore::new(stats.clone());

        // Registries own the active match/bracket sets; they are passed
        // explicitly rather than living in ambient globals
        let matches = Arc::new(MatchRegistry::new());
        let tournaments = Arc::new(TournamentRegistry::new());

        let matchmaking = Arc::new(MatchmakingService::new(
            matches.clone(),
            tournaments.clone(),
            Some(history),
        ));

        Self {
            config,
            stats,
            matchmaking,
            matches,
            tournaments,
        }
    }
}
