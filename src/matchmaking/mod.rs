//! Matchmaking: waiting pools and pairing

pub mod queue;
pub mod service;

pub use service::{JoinOutcome, MatchmakingService, Paired};
