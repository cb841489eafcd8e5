//! Match state and authoritative tick loop

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::history::{ConcludedMatch, MatchHistoryStore};
use crate::util::time::{tick_delta, TICK_DURATION_MICROS};
use crate::ws::protocol::{
    BallState, PaddleState, PlayerId, PlayerPublic, ScoreState, ServerMsg, StartPlayers,
};
use crate::ws::PlayerConn;

use super::physics::{PhysicsConfig, PhysicsEngine};
use super::{Ball, InputEvent, MatchSeat, Paddle};

/// Score recorded for a player that forfeits
pub const FORFEIT_SCORE: i32 = -1;

/// Seconds before an unanswered `ready` is forced, bounding the worst-case
/// wait when a client never sends its ready signal
pub const FORCE_START_SECS: f32 = 15.0;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Constructed, loop ticking, `start` not yet broadcast
    Created,
    /// `start` broadcast, waiting for ready signals under the force-start timer
    Countdown,
    /// Both players ready, physics live
    Active,
    /// Terminal; every further operation is a no-op
    Finished,
}

/// One participant's authoritative record.
///
/// A disconnected player keeps its slot with `conn` set to None so the match
/// can still compute a winner and report the outcome into history.
#[derive(Debug, Clone)]
pub struct MatchPlayer {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub conn: Option<PlayerConn>,
    pub score: i32,
}

impl MatchPlayer {
    fn public(&self) -> PlayerPublic {
        PlayerPublic {
            name: self.name.clone(),
            id: self.id.clone(),
            avatar: self.avatar.clone(),
        }
    }

    fn seat(&self) -> MatchSeat {
        MatchSeat {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            conn: self.conn.clone(),
        }
    }
}

/// Match state, owned exclusively by the match task
pub struct MatchState {
    pub id: Uuid,
    pub phase: MatchPhase,
    pub tick: u64,
    pub players: [MatchPlayer; 2],
    pub paddles: [Paddle; 2],
    pub ball: Ball,
    pub elapsed: f32,
    pub ready: [bool; 2],
    pub countdown_remaining: f32,
}

impl MatchState {
    fn new(id: Uuid, seats: [MatchSeat; 2], config: &PhysicsConfig) -> Self {
        let [s1, s2] = seats;
        let players = [
            MatchPlayer {
                id: s1.id.clone(),
                name: s1.name.clone(),
                avatar: s1.avatar,
                conn: s1.conn,
                score: 0,
            },
            MatchPlayer {
                id: s2.id.clone(),
                name: s2.name.clone(),
                avatar: s2.avatar,
                conn: s2.conn,
                score: 0,
            },
        ];
        let paddle_y = (config.field_height - config.paddle_height) / 2.0;
        let paddles = [
            Paddle {
                id: s1.id,
                player_name: s1.name,
                x: config.paddle_margin,
                y: paddle_y,
                width: config.paddle_width,
                height: config.paddle_height,
            },
            Paddle {
                id: s2.id,
                player_name: s2.name,
                x: config.field_width - config.paddle_margin - config.paddle_width,
                y: paddle_y,
                width: config.paddle_width,
                height: config.paddle_height,
            },
        ];
        let ball = Ball {
            x: config.field_width / 2.0,
            y: config.field_height / 2.0,
            vx: 0.0,
            vy: 0.0,
            radius: config.ball_radius,
        };
        Self {
            id,
            phase: MatchPhase::Created,
            tick: 0,
            players,
            paddles,
            ball,
            elapsed: 0.0,
            ready: [false, false],
            countdown_remaining: FORCE_START_SECS,
        }
    }

    fn player_index(&self, id: &PlayerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == id)
    }

    /// Index of the winning player. On an exact tie this resolves to
    /// player 2 — the historically observed behavior, kept pending a
    /// product decision.
    pub fn winner_index(&self) -> usize {
        if self.players[0].score > self.players[1].score {
            0
        } else {
            1
        }
    }

    /// Defined only once the match is finished
    pub fn winner(&self) -> Option<&MatchPlayer> {
        (self.phase == MatchPhase::Finished).then(|| &self.players[self.winner_index()])
    }
}

/// Commands accepted by a running match
#[derive(Debug)]
pub enum MatchCmd {
    /// Broadcast `start` and arm the force-start countdown
    Start,
    /// Mark the player ready; physics goes live once both are
    Ready(PlayerId),
    /// Forward a key event to the physics collaborator
    Input(PlayerId, InputEvent),
    /// Forfeit path: connection closed or bracket-applied forfeit
    Forfeit(PlayerId),
}

/// Terminal outcome, published exactly once when a match finishes
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_id: Uuid,
    pub winner: MatchSeat,
}

/// Handle to a running match
#[derive(Debug, Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub player_ids: [PlayerId; 2],
    cmd_tx: mpsc::UnboundedSender<MatchCmd>,
}

impl MatchHandle {
    /// Send a command; a command racing match completion is dropped
    pub fn command(&self, cmd: MatchCmd) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!(match_id = %self.id, "command for already-completed match dropped");
        }
    }
}

/// Registry of all active matches, indexed by match id and by participant
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    by_player: DashMap<PlayerId, Uuid>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
            by_player: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn find_by_player(&self, player_id: &PlayerId) -> Option<MatchHandle> {
        let match_id = self.by_player.get(player_id).map(|r| *r.value())?;
        self.get(&match_id)
    }

    pub fn insert(&self, handle: MatchHandle) {
        for pid in &handle.player_ids {
            self.by_player.insert(pid.clone(), handle.id);
        }
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        let handle = self.matches.remove(id).map(|(_, h)| h)?;
        for pid in &handle.player_ids {
            // A winner may already be re-indexed to its next bracket match
            self.by_player.remove_if(pid, |_, mid| mid == id);
        }
        Some(handle)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    /// Register the match and run its task to completion, removing it from
    /// the registry afterwards
    pub fn launch(self: &Arc<Self>, game: GameMatch, handle: MatchHandle) {
        self.insert(handle.clone());
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let match_id = handle.id;
            game.run().await;
            registry.remove(&match_id);
            debug!(match_id = %match_id, "match removed from registry");
        });
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative match: owns its state and its fixed-rate tick loop
pub struct GameMatch {
    state: MatchState,
    physics: PhysicsEngine,
    cmd_rx: mpsc::UnboundedReceiver<MatchCmd>,
    is_tournament: bool,
    outcome_tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
    history: Option<MatchHistoryStore>,
}

impl GameMatch {
    pub fn new(
        seat1: MatchSeat,
        seat2: MatchSeat,
        seed: u64,
        is_tournament: bool,
        outcome_tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
        history: Option<MatchHistoryStore>,
    ) -> (Self, MatchHandle) {
        let id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let physics = PhysicsEngine::new(PhysicsConfig::default(), seed);
        let player_ids = [seat1.id.clone(), seat2.id.clone()];
        let state = MatchState::new(id, [seat1, seat2], physics.config());

        let handle = MatchHandle {
            id,
            player_ids,
            cmd_tx,
        };

        (
            Self {
                state,
                physics,
                cmd_rx,
                is_tournament,
                outcome_tx,
                history,
            },
            handle,
        )
    }

    /// Run the fixed-rate simulation loop. Frames broadcast from the first
    /// tick, before the match has started, so clients see a constant-rate
    /// stream from creation time.
    pub async fn run(mut self) {
        info!(
            match_id = %self.state.id,
            player1 = %self.state.players[0].id,
            player2 = %self.state.players[1].id,
            tournament = self.is_tournament,
            "match created"
        );

        let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while self.state.phase != MatchPhase::Finished {
            ticker.tick().await;
            self.drain_commands();
            if self.state.phase == MatchPhase::Finished {
                break;
            }
            self.run_tick();
        }

        info!(match_id = %self.state.id, "match finished");
    }

    /// Apply all pending commands before the tick so no tick observes a
    /// half-applied input
    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                MatchCmd::Start => self.start_game(),
                MatchCmd::Ready(id) => self.add_player_ready(&id),
                MatchCmd::Input(id, event) => self.handle_player_input(&id, &event),
                MatchCmd::Forfeit(id) => self.remove_player(&id),
            }
        }
    }

    fn start_game(&mut self) {
        if self.state.phase != MatchPhase::Created {
            return;
        }
        let start = ServerMsg::Start {
            players: StartPlayers {
                player1: self.state.players[0].public(),
                player2: self.state.players[1].public(),
            },
        };
        self.broadcast(start);
        self.state.phase = MatchPhase::Countdown;
        self.state.countdown_remaining = FORCE_START_SECS;
        info!(match_id = %self.state.id, "start broadcast, awaiting ready signals");
    }

    fn add_player_ready(&mut self, id: &PlayerId) {
        if matches!(self.state.phase, MatchPhase::Active | MatchPhase::Finished) {
            return;
        }
        // Stale or unknown player references are ignored
        let Some(idx) = self.state.player_index(id) else {
            return;
        };
        self.state.ready[idx] = true;
        if self.state.ready.iter().all(|r| *r) {
            self.state.phase = MatchPhase::Active;
            self.physics.start(&mut self.state.ball);
            info!(match_id = %self.state.id, "both players ready, physics live");
        }
    }

    fn handle_player_input(&mut self, id: &PlayerId, event: &InputEvent) {
        if self.state.phase == MatchPhase::Finished {
            return;
        }
        let Some(idx) = self.state.player_index(id) else {
            return;
        };
        self.physics.handle_input(idx, &event.key, event.pressed);
    }

    /// Forfeit path: the leaving player keeps its slot with a null
    /// connection and the forfeit score sentinel
    fn remove_player(&mut self, id: &PlayerId) {
        if self.state.phase == MatchPhase::Finished {
            return;
        }
        let Some(idx) = self.state.player_index(id) else {
            return;
        };

        self.state.players[idx].conn = None;
        self.state.players[idx].score = FORFEIT_SCORE;

        let other = 1 - idx;
        if self.state.players[other].conn.is_some() {
            self.conclude(other, idx, true);
        } else {
            info!(
                match_id = %self.state.id,
                player_id = %id,
                "player disconnected with no remaining connected players, ending match"
            );
            self.game_over();
        }
    }

    /// Conclusion handler: records the outcome for statistics, notifies the
    /// participants, then finishes the match
    fn conclude(&mut self, winner_idx: usize, loser_idx: usize, by_forfeit: bool) {
        if self.state.phase == MatchPhase::Finished {
            return;
        }

        let winner = &self.state.players[winner_idx];
        let loser = &self.state.players[loser_idx];

        if let Some(history) = &self.history {
            history.record_conclusion(ConcludedMatch {
                winner_id: winner.id.clone(),
                winner_name: winner.name.clone(),
                loser_id: loser.id.clone(),
                loser_name: loser.name.clone(),
                by_forfeit,
                tournament: self.is_tournament,
                duration_secs: self.state.elapsed as u32,
            });
        }

        if by_forfeit {
            let message = Some(format!("{} left the game! You win by forfeit.", loser.name));
            let msg = if self.is_tournament {
                ServerMsg::Wait { message }
            } else {
                ServerMsg::Win { message }
            };
            self.send_to(winner_idx, msg);
        } else {
            let winner_msg = if self.is_tournament {
                ServerMsg::Wait {
                    message: Some("You win! Waiting for the next round.".to_string()),
                }
            } else {
                ServerMsg::Win { message: None }
            };
            self.send_to(winner_idx, winner_msg);
            self.send_to(loser_idx, ServerMsg::Lose { message: None });
        }

        self.game_over();
    }

    /// Idempotent terminal transition; publishes the outcome exactly once
    fn game_over(&mut self) {
        if self.state.phase == MatchPhase::Finished {
            return;
        }
        self.state.phase = MatchPhase::Finished;

        if let (Some(tx), Some(winner)) = (self.outcome_tx.take(), self.state.winner()) {
            let outcome = MatchOutcome {
                match_id: self.state.id,
                winner: winner.seat(),
            };
            if tx.send(outcome).is_err() {
                warn!(match_id = %self.state.id, "match outcome had no receiver");
            }
        }
    }

    fn run_tick(&mut self) {
        self.state.tick += 1;

        if self.state.phase == MatchPhase::Countdown {
            self.state.countdown_remaining -= tick_delta();
            if self.state.countdown_remaining <= 0.0 {
                self.force_start();
            }
        }

        if let Some(scorer) = self
            .physics
            .step(&mut self.state.paddles, &mut self.state.ball)
        {
            self.state.players[scorer].score += 1;
            self.physics.serve(&mut self.state.ball, 1 - scorer);
            if self.state.players[scorer].score >= self.physics.config().win_score {
                self.conclude(scorer, 1 - scorer, false);
                return;
            }
        }

        self.state.elapsed += tick_delta();
        self.broadcast_update();
    }

    /// Countdown expired without both ready signals
    fn force_start(&mut self) {
        info!(match_id = %self.state.id, "countdown expired, force-starting match");
        let ids = [
            self.state.players[0].id.clone(),
            self.state.players[1].id.clone(),
        ];
        for id in ids {
            self.add_player_ready(&id);
        }
    }

    fn broadcast_update(&self) {
        let paddles = self
            .state
            .paddles
            .iter()
            .map(|p| PaddleState {
                id: p.id.clone(),
                player_name: p.player_name.clone(),
                x: p.x,
                y: p.y,
                width: p.width,
                height: p.height,
            })
            .collect();
        let ball = BallState {
            x: self.state.ball.x,
            y: self.state.ball.y,
            radius: self.state.ball.radius,
        };
        let players = self
            .state
            .players
            .iter()
            .map(|p| ScoreState { score: p.score })
            .collect();

        self.broadcast(ServerMsg::Update {
            paddles,
            ball,
            players,
            time: self.state.elapsed,
        });
    }

    fn broadcast(&self, msg: ServerMsg) {
        for idx in 0..self.state.players.len() {
            self.send_to(idx, msg.clone());
        }
    }

    /// Send failures are logged and isolated to that participant; they never
    /// abort the tick or affect the other player
    fn send_to(&self, idx: usize, msg: ServerMsg) {
        let player = &self.state.players[idx];
        if let Some(conn) = &player.conn {
            if conn.send(msg).is_err() {
                warn!(
                    match_id = %self.state.id,
                    player_id = %player.id,
                    "failed to queue message for player"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn seat(account: i64, name: &str) -> (MatchSeat, UnboundedReceiver<ServerMsg>) {
        let (conn, rx) = PlayerConn::new();
        (
            MatchSeat {
                id: PlayerId::resolve(Some(account)),
                name: name.to_string(),
                avatar: String::new(),
                conn: Some(conn),
            },
            rx,
        )
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[test]
    fn winner_is_undefined_before_finished() {
        let (s1, _rx1) = seat(1, "a");
        let (s2, _rx2) = seat(2, "b");
        let mut state = MatchState::new(Uuid::new_v4(), [s1, s2], &PhysicsConfig::default());

        state.players[0].score = 3;
        assert!(state.winner().is_none());

        state.phase = MatchPhase::Finished;
        assert_eq!(state.winner().unwrap().name, "a");
    }

    #[test]
    fn tie_resolves_to_player_two() {
        let (s1, _rx1) = seat(1, "a");
        let (s2, _rx2) = seat(2, "b");
        let mut state = MatchState::new(Uuid::new_v4(), [s1, s2], &PhysicsConfig::default());

        state.players[0].score = 4;
        state.players[1].score = 4;
        state.phase = MatchPhase::Finished;
        assert_eq!(state.winner().unwrap().name, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn forfeit_declares_remaining_player_winner() {
        let (s1, _rx1) = seat(1, "alice");
        let (s2, mut rx2) = seat(2, "bob");
        let alice = s1.id.clone();

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (game, handle) = GameMatch::new(s1, s2, 1, false, Some(outcome_tx), None);
        tokio::spawn(game.run());

        handle.command(MatchCmd::Start);
        handle.command(MatchCmd::Forfeit(alice));

        let outcome = outcome_rx.recv().await.expect("match should conclude");
        assert_eq!(outcome.winner.name, "bob");

        let msgs = drain(&mut rx2);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::Win { message: Some(text) } if text.contains("alice")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn tournament_forfeit_sends_wait_instead_of_win() {
        let (s1, _rx1) = seat(1, "alice");
        let (s2, mut rx2) = seat(2, "bob");
        let alice = s1.id.clone();

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (game, handle) = GameMatch::new(s1, s2, 1, true, Some(outcome_tx), None);
        tokio::spawn(game.run());

        handle.command(MatchCmd::Start);
        handle.command(MatchCmd::Forfeit(alice));

        outcome_rx.recv().await.expect("match should conclude");
        let msgs = drain(&mut rx2);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::Wait { message: Some(_) })));
        assert!(!msgs.iter().any(|m| matches!(m, ServerMsg::Win { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_forfeit_publishes_one_outcome() {
        let (s1, _rx1) = seat(1, "alice");
        let (s2, _rx2) = seat(2, "bob");
        let alice = s1.id.clone();
        let bob = s2.id.clone();

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (game, handle) = GameMatch::new(s1, s2, 1, false, Some(outcome_tx), None);
        tokio::spawn(game.run());

        handle.command(MatchCmd::Start);
        handle.command(MatchCmd::Forfeit(alice.clone()));
        handle.command(MatchCmd::Forfeit(alice));
        handle.command(MatchCmd::Forfeit(bob));

        let outcome = outcome_rx.recv().await.expect("match should conclude");
        assert_eq!(outcome.winner.name, "bob");
        assert!(outcome_rx.recv().await.is_none(), "outcome must be published once");
    }

    #[tokio::test(start_paused = true)]
    async fn updates_broadcast_at_tick_rate() {
        let (s1, mut rx1) = seat(1, "alice");
        let (s2, _rx2) = seat(2, "bob");

        let (game, handle) = GameMatch::new(s1, s2, 1, false, None, None);
        tokio::spawn(game.run());
        handle.command(MatchCmd::Start);

        // Let the loop settle, then measure one simulated second
        tokio::time::sleep(Duration::from_millis(100)).await;
        drain(&mut rx1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let updates = drain(&mut rx1)
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::Update { .. }))
            .count();
        assert!(
            (29..=31).contains(&updates),
            "expected ~30 updates, got {}",
            updates
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_force_starts_physics_without_ready_signals() {
        let (s1, mut rx1) = seat(1, "alice");
        let (s2, _rx2) = seat(2, "bob");

        let (game, handle) = GameMatch::new(s1, s2, 1, false, None, None);
        tokio::spawn(game.run());
        handle.command(MatchCmd::Start);

        // Before the force-start timer the ball sits at field center
        tokio::time::sleep(Duration::from_secs(2)).await;
        let config = PhysicsConfig::default();
        let moving_before = drain(&mut rx1).iter().any(|m| match m {
            ServerMsg::Update { ball, .. } => ball.x != config.field_width / 2.0,
            _ => false,
        });
        assert!(!moving_before, "physics must stay inert during countdown");

        tokio::time::sleep(Duration::from_secs_f32(FORCE_START_SECS)).await;
        let moving_after = drain(&mut rx1).iter().any(|m| match m {
            ServerMsg::Update { ball, .. } => ball.x != config.field_width / 2.0,
            _ => false,
        });
        assert!(moving_after, "force start must set physics live");
    }
}
