//! External persistence integration

pub mod history;
pub mod stats;

pub use history::MatchHistoryStore;
pub use stats::StatsClient;
