//! Application assembly

pub mod state;

pub use state::AppState;
