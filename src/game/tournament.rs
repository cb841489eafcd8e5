//! 4-player single-elimination bracket
//!
//! Two semifinals run concurrently, their winners meet in a final. The
//! bracket is a coordination layer over match tasks: it creates them,
//! consumes their outcome channels, and owns the seat records that survive
//! across rounds.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::store::history::MatchHistoryStore;
use crate::ws::protocol::{PlayerId, ServerMsg};
use crate::ws::PlayerConn;

use super::r#match::{GameMatch, MatchCmd, MatchOutcome, MatchRegistry};
use super::MatchSeat;

/// Seconds clients get to render the roster before the semifinals start
pub const ROSTER_RENDER_SECS: u64 = 7;
/// Seconds between the second semifinal conclusion and final creation,
/// giving in-flight forfeit broadcasts time to land
pub const FINAL_CREATE_DELAY_SECS: u64 = 5;
/// Seconds finalists get before they are force-readied
pub const FINAL_GRACE_SECS: u64 = 5;

/// Bracket phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TournamentPhase {
    Formed,
    Semifinals,
    Final,
    Concluded,
}

/// Bracket-level participant record. The connection here is bookkeeping
/// visible independently of whichever child match currently holds the
/// player; the close handler nulls it while a match may still be running.
#[derive(Debug, Clone)]
pub struct TournamentSeat {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub conn: Option<PlayerConn>,
}

impl TournamentSeat {
    fn match_seat(&self) -> MatchSeat {
        MatchSeat {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            conn: self.conn.clone(),
        }
    }
}

/// Handle to a running bracket
#[derive(Clone)]
pub struct TournamentHandle {
    pub id: Uuid,
    seats: Arc<Mutex<Vec<TournamentSeat>>>,
}

impl TournamentHandle {
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.seats.lock().iter().map(|s| s.id.clone()).collect()
    }

    /// Null the seat's connection. Bookkeeping only: forfeiting the
    /// currently active child match is the match's own removal path.
    pub fn mark_disconnected(&self, player_id: &PlayerId) {
        let mut seats = self.seats.lock();
        if let Some(seat) = seats.iter_mut().find(|s| &s.id == player_id) {
            seat.conn = None;
        }
    }
}

/// Registry of all active brackets, indexed by bracket id and participant
pub struct TournamentRegistry {
    tournaments: DashMap<Uuid, TournamentHandle>,
    by_player: DashMap<PlayerId, Uuid>,
}

impl TournamentRegistry {
    pub fn new() -> Self {
        Self {
            tournaments: DashMap::new(),
            by_player: DashMap::new(),
        }
    }

    pub fn find_by_player(&self, player_id: &PlayerId) -> Option<TournamentHandle> {
        let id = self.by_player.get(player_id).map(|r| *r.value())?;
        self.tournaments.get(&id).map(|t| t.value().clone())
    }

    pub fn insert(&self, handle: TournamentHandle) {
        for pid in handle.player_ids() {
            self.by_player.insert(pid, handle.id);
        }
        self.tournaments.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<TournamentHandle> {
        let handle = self.tournaments.remove(id).map(|(_, h)| h)?;
        for pid in handle.player_ids() {
            self.by_player.remove_if(&pid, |_, tid| tid == id);
        }
        Some(handle)
    }

    pub fn active_tournaments(&self) -> usize {
        self.tournaments.len()
    }

    /// Register the bracket and run its task to completion, removing it from
    /// the registry afterwards
    pub fn launch(self: &Arc<Self>, tournament: Tournament, handle: TournamentHandle) {
        self.insert(handle.clone());
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let id = handle.id;
            tournament.run().await;
            registry.remove(&id);
            debug!(tournament_id = %id, "tournament removed from registry");
        });
    }
}

impl Default for TournamentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The bracket coordinator task
pub struct Tournament {
    id: Uuid,
    phase: TournamentPhase,
    seats: Arc<Mutex<Vec<TournamentSeat>>>,
    matches: Arc<MatchRegistry>,
    history: Option<MatchHistoryStore>,
}

impl Tournament {
    /// Seats pair up 0-vs-1 and 2-vs-3 in the semifinals
    pub fn new(
        entrants: Vec<MatchSeat>,
        matches: Arc<MatchRegistry>,
        history: Option<MatchHistoryStore>,
    ) -> (Self, TournamentHandle) {
        debug_assert_eq!(entrants.len(), 4);
        let id = Uuid::new_v4();
        let seats: Vec<TournamentSeat> = entrants
            .into_iter()
            .map(|s| TournamentSeat {
                id: s.id,
                name: s.name,
                avatar: s.avatar,
                conn: s.conn,
            })
            .collect();
        let seats = Arc::new(Mutex::new(seats));

        let handle = TournamentHandle {
            id,
            seats: Arc::clone(&seats),
        };

        (
            Self {
                id,
                phase: TournamentPhase::Formed,
                seats,
                matches,
                history,
            },
            handle,
        )
    }

    /// Drive the bracket to its conclusion
    pub async fn run(mut self) {
        info!(tournament_id = %self.id, "tournament formed");

        self.broadcast_roster();
        sleep(Duration::from_secs(ROSTER_RENDER_SECS)).await;

        self.phase = TournamentPhase::Semifinals;
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let semi1 = self.create_semifinal(0, 1, outcome_tx.clone());
        let semi2 = self.create_semifinal(2, 3, outcome_tx);
        info!(
            tournament_id = %self.id,
            semifinal1 = %semi1,
            semifinal2 = %semi2,
            "semifinals started"
        );

        let Some(first) = outcome_rx.recv().await else {
            return self.stall("first semifinal ended without reporting a winner");
        };
        let Some(second) = outcome_rx.recv().await else {
            return self.stall("second semifinal ended without reporting a winner");
        };
        sleep(Duration::from_secs(FINAL_CREATE_DELAY_SECS)).await;

        // Seat the final in semifinal order regardless of conclusion order
        let (upper, lower) = if first.match_id == semi1 {
            (first.winner, second.winner)
        } else {
            (second.winner, first.winner)
        };

        self.run_final(upper, lower).await;
    }

    fn broadcast_roster(&self) {
        let seats = self.seats.lock();
        let waiting_players: Vec<String> = seats.iter().map(|s| s.name.clone()).collect();
        for seat in seats.iter() {
            if let Some(conn) = &seat.conn {
                let _ = conn.send(ServerMsg::Names {
                    waiting_players: waiting_players.clone(),
                });
            }
        }
    }

    /// Create, register and start one semifinal. An entrant already
    /// disconnected at creation time forfeits immediately so its semifinal
    /// cannot stall.
    fn create_semifinal(
        &self,
        a: usize,
        b: usize,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Uuid {
        let (seat_a, seat_b) = {
            let seats = self.seats.lock();
            (seats[a].match_seat(), seats[b].match_seat())
        };
        let absent: Vec<PlayerId> = [&seat_a, &seat_b]
            .into_iter()
            .filter(|s| s.conn.is_none())
            .map(|s| s.id.clone())
            .collect();

        let (game, handle) = GameMatch::new(
            seat_a,
            seat_b,
            rand::random(),
            true,
            Some(outcome_tx),
            self.history.clone(),
        );
        let id = handle.id;
        self.matches.launch(game, handle.clone());
        handle.command(MatchCmd::Start);
        for player_id in absent {
            handle.command(MatchCmd::Forfeit(player_id));
        }
        id
    }

    async fn run_final(&mut self, upper: MatchSeat, lower: MatchSeat) {
        self.phase = TournamentPhase::Final;

        // Refresh connections from bracket-level bookkeeping: a winner may
        // have disconnected while the other semifinal was still running
        let (f1, f2) = {
            let seats = self.seats.lock();
            let refresh = |winner: MatchSeat| -> MatchSeat {
                let conn = seats
                    .iter()
                    .find(|s| s.id == winner.id)
                    .and_then(|s| s.conn.clone());
                MatchSeat { conn, ..winner }
            };
            (refresh(upper), refresh(lower))
        };
        let finalists = [f1.clone(), f2.clone()];

        // The final is an ordinary match: its conclusion emits win/lose
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (game, handle) = GameMatch::new(
            f1,
            f2,
            rand::random(),
            false,
            Some(outcome_tx),
            self.history.clone(),
        );
        info!(
            tournament_id = %self.id,
            match_id = %handle.id,
            finalist1 = %finalists[0].name,
            finalist2 = %finalists[1].name,
            "final created"
        );
        self.matches.launch(game, handle.clone());
        handle.command(MatchCmd::Start);

        sleep(Duration::from_secs(FINAL_GRACE_SECS)).await;
        for finalist in &finalists {
            handle.command(MatchCmd::Ready(finalist.id.clone()));
        }
        for finalist in &finalists {
            let connected = {
                let seats = self.seats.lock();
                seats
                    .iter()
                    .find(|s| s.id == finalist.id)
                    .is_some_and(|s| s.conn.is_some())
            };
            if !connected {
                handle.command(MatchCmd::Forfeit(finalist.id.clone()));
            }
        }

        match outcome_rx.recv().await {
            Some(outcome) => {
                self.phase = TournamentPhase::Concluded;
                info!(
                    tournament_id = %self.id,
                    winner = %outcome.winner.name,
                    "tournament concluded"
                );
            }
            None => self.stall("final ended without reporting a winner"),
        }
    }

    /// Defensive bail-out for a bracket that cannot progress; logged rather
    /// than crashed, and the bracket is reclaimed instead of left dangling
    fn stall(&mut self, reason: &str) {
        error!(
            tournament_id = %self.id,
            phase = ?self.phase,
            reason,
            "tournament stalled"
        );
        self.phase = TournamentPhase::Concluded;
    }
}
