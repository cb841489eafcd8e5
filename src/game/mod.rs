//! Match and tournament orchestration

pub mod r#match;
pub mod physics;
pub mod tournament;

pub use r#match::{GameMatch, MatchCmd, MatchHandle, MatchOutcome, MatchRegistry};
pub use tournament::{Tournament, TournamentHandle, TournamentRegistry};

use crate::ws::protocol::PlayerId;
use crate::ws::PlayerConn;

/// A participant entering a match: identity plus transport handle.
///
/// `conn` is None for a player that has already disconnected; the seat is
/// still created so the match can apply forfeit semantics and report a
/// winner into history.
#[derive(Debug, Clone)]
pub struct MatchSeat {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub conn: Option<PlayerConn>,
}

/// Key event forwarded verbatim to the physics collaborator
#[derive(Debug, Clone)]
pub struct InputEvent {
    pub key: String,
    /// true on key-down, false on key-up
    pub pressed: bool,
}

/// Paddle bound to one player for the whole match
#[derive(Debug, Clone)]
pub struct Paddle {
    pub id: PlayerId,
    pub player_name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Ball state, mutated in place by the physics engine every tick
#[derive(Debug, Clone, Copy)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub radius: f32,
}
