//! Matchmaking service - pool filling and match/bracket creation

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::game::{GameMatch, MatchCmd, MatchRegistry, Tournament, TournamentRegistry};
use crate::store::history::MatchHistoryStore;
use crate::ws::protocol::{PlayerId, PlayerInfo};
use crate::ws::PlayerConn;

use super::queue::{WaitingPlayer, WaitingPool};

/// Quick-match pool pairs at this size
const QUICK_MATCH_SIZE: usize = 2;
/// Tournament pool forms a bracket at this size
const TOURNAMENT_SIZE: usize = 4;

/// Both waiting pools behind one lock: a single mutation discipline for all
/// pool state
#[derive(Default)]
struct Pools {
    quick: WaitingPool,
    tournament: WaitingPool,
}

impl Pools {
    fn find_by_conn(&self, conn_id: Uuid) -> Option<&WaitingPlayer> {
        self.quick
            .find_by_conn(conn_id)
            .or_else(|| self.tournament.find_by_conn(conn_id))
    }
}

/// What a join produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paired {
    Match(Uuid),
    Tournament(Uuid),
}

/// Result of `add_player`
#[derive(Debug)]
pub struct JoinOutcome {
    pub player_id: PlayerId,
    pub paired: Option<Paired>,
}

enum Ripe {
    Quick(Vec<WaitingPlayer>),
    Tournament(Vec<WaitingPlayer>),
}

/// The matchmaking entry point: deduplicates reconnecting players, fills the
/// waiting pools, and creates a match at 2 or a bracket at 4
pub struct MatchmakingService {
    pools: Mutex<Pools>,
    matches: Arc<MatchRegistry>,
    tournaments: Arc<TournamentRegistry>,
    history: Option<MatchHistoryStore>,
}

impl MatchmakingService {
    pub fn new(
        matches: Arc<MatchRegistry>,
        tournaments: Arc<TournamentRegistry>,
        history: Option<MatchHistoryStore>,
    ) -> Self {
        Self {
            pools: Mutex::new(Pools::default()),
            matches,
            tournaments,
            history,
        }
    }

    /// Add a player to the relevant pool, pairing when it reaches its
    /// threshold.
    ///
    /// Re-adding an id already waiting in the relevant pool is a
    /// reconnect-safe no-op, and a connection already occupying any pool slot
    /// cannot claim a second one.
    pub fn add_player(&self, conn: PlayerConn, info: PlayerInfo, tournament: bool) -> JoinOutcome {
        let player_id = PlayerId::resolve(info.id);

        let ripe = {
            let mut pools = self.pools.lock();
            let pool = if tournament {
                &mut pools.tournament
            } else {
                &mut pools.quick
            };
            if pool.get(&player_id).is_some() {
                return JoinOutcome {
                    player_id,
                    paired: None,
                };
            }
            // A connection already occupying a slot gets its existing entry
            // back rather than claiming a second one
            if let Some(existing) = pools.find_by_conn(conn.conn_id()) {
                return JoinOutcome {
                    player_id: existing.id.clone(),
                    paired: None,
                };
            }

            if tournament {
                pools.tournament.push(WaitingPlayer::new(
                    player_id.clone(),
                    info.name,
                    info.avatar,
                    conn,
                ));
                pools.tournament.pop_oldest(TOURNAMENT_SIZE).map(Ripe::Tournament)
            } else {
                pools.quick.push(WaitingPlayer::new(
                    player_id.clone(),
                    info.name,
                    info.avatar,
                    conn,
                ));
                pools.quick.pop_oldest(QUICK_MATCH_SIZE).map(Ripe::Quick)
            }
        };

        let paired = match ripe {
            Some(Ripe::Quick(players)) => Some(Paired::Match(self.create_match(players))),
            Some(Ripe::Tournament(players)) => {
                Some(Paired::Tournament(self.create_tournament(players)))
            }
            None => None,
        };

        JoinOutcome { player_id, paired }
    }

    /// Delete the id from whichever pool holds it; players already promoted
    /// into a match or bracket are untouched
    pub fn remove_player(&self, id: &PlayerId) {
        let mut pools = self.pools.lock();
        if pools.quick.remove(id).is_some() || pools.tournament.remove(id).is_some() {
            info!(player_id = %id, "player removed from waiting pool");
        }
    }

    pub fn queue_sizes(&self) -> (usize, usize) {
        let pools = self.pools.lock();
        (pools.quick.len(), pools.tournament.len())
    }

    fn create_match(&self, players: Vec<WaitingPlayer>) -> Uuid {
        let mut players = players.into_iter();
        let (Some(p1), Some(p2)) = (players.next(), players.next()) else {
            unreachable!("pop_oldest hands out exactly the pairing threshold");
        };

        let (game, handle) = GameMatch::new(
            p1.into_seat(),
            p2.into_seat(),
            rand::random(),
            false,
            None,
            self.history.clone(),
        );
        let id = handle.id;
        info!(
            match_id = %id,
            player1 = %handle.player_ids[0],
            player2 = %handle.player_ids[1],
            "quick match paired"
        );
        self.matches.launch(game, handle.clone());
        handle.command(MatchCmd::Start);
        id
    }

    fn create_tournament(&self, players: Vec<WaitingPlayer>) -> Uuid {
        let entrants: Vec<_> = players.into_iter().map(WaitingPlayer::into_seat).collect();
        let (tournament, handle) = Tournament::new(
            entrants,
            Arc::clone(&self.matches),
            self.history.clone(),
        );
        let id = handle.id;
        info!(tournament_id = %id, "tournament bracket formed");
        self.tournaments.launch(tournament, handle);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MatchmakingService {
        MatchmakingService::new(
            Arc::new(MatchRegistry::new()),
            Arc::new(TournamentRegistry::new()),
            None,
        )
    }

    fn info(account: Option<i64>, name: &str) -> PlayerInfo {
        PlayerInfo {
            name: name.to_string(),
            id: account,
            avatar: String::new(),
        }
    }

    #[tokio::test]
    async fn quick_match_pairs_first_two_joiners() {
        let service = service();
        let (conn_a, _rx_a) = PlayerConn::new();
        let (conn_b, _rx_b) = PlayerConn::new();
        let (conn_c, _rx_c) = PlayerConn::new();

        let a = service.add_player(conn_a, info(Some(1), "a"), false);
        assert!(a.paired.is_none());

        let b = service.add_player(conn_b, info(Some(2), "b"), false);
        let Some(Paired::Match(match_id)) = b.paired else {
            panic!("second joiner must pair");
        };

        // First-come-first-served: the match pairs exactly {a, b}
        let handle = service.matches.get(&match_id).expect("match registered");
        assert_eq!(handle.player_ids[0], a.player_id);
        assert_eq!(handle.player_ids[1], b.player_id);

        // c starts a fresh pairing round
        let c = service.add_player(conn_c, info(Some(3), "c"), false);
        assert!(c.paired.is_none());
        assert_eq!(service.queue_sizes(), (1, 0));
    }

    #[tokio::test]
    async fn rejoining_id_is_a_noop() {
        let service = service();
        let (conn1, _rx1) = PlayerConn::new();
        let (conn2, _rx2) = PlayerConn::new();

        let first = service.add_player(conn1, info(Some(1), "a"), false);
        let second = service.add_player(conn2, info(Some(1), "a"), false);

        assert_eq!(first.player_id, second.player_id);
        assert!(second.paired.is_none(), "duplicate id must not pair with itself");
        assert_eq!(service.queue_sizes(), (1, 0));
    }

    #[tokio::test]
    async fn one_connection_cannot_occupy_two_slots() {
        let service = service();
        let (conn, _rx) = PlayerConn::new();

        service.add_player(conn.clone(), info(Some(1), "a"), false);
        // Same socket, different identity, other pool
        let second = service.add_player(conn, info(Some(2), "b"), true);

        assert!(second.paired.is_none());
        assert_eq!(service.queue_sizes(), (1, 0));
    }

    #[tokio::test]
    async fn anonymous_players_get_distinct_ids_and_pair() {
        let service = service();
        let (conn_a, _rx_a) = PlayerConn::new();
        let (conn_b, _rx_b) = PlayerConn::new();

        let a = service.add_player(conn_a, info(None, "a"), false);
        let b = service.add_player(conn_b, info(None, "b"), false);

        assert_ne!(a.player_id, b.player_id);
        assert!(matches!(b.paired, Some(Paired::Match(_))));
    }

    #[tokio::test]
    async fn tournament_pool_forms_bracket_at_four() {
        let service = service();
        let mut rxs = Vec::new();
        for account in 1..=3 {
            let (conn, rx) = PlayerConn::new();
            rxs.push(rx);
            let outcome =
                service.add_player(conn, info(Some(account), &format!("p{account}")), true);
            assert!(outcome.paired.is_none());
        }
        assert_eq!(service.queue_sizes(), (0, 3));

        let (conn, rx) = PlayerConn::new();
        rxs.push(rx);
        let outcome = service.add_player(conn, info(Some(4), "p4"), true);
        assert!(matches!(outcome.paired, Some(Paired::Tournament(_))));
        assert_eq!(service.queue_sizes(), (0, 0));
        assert_eq!(service.tournaments.active_tournaments(), 1);
    }

    #[tokio::test]
    async fn disconnect_while_waiting_removes_pool_entry() {
        let service = service();
        let (conn_a, _rx_a) = PlayerConn::new();
        let (conn_b, _rx_b) = PlayerConn::new();
        let (conn_c, _rx_c) = PlayerConn::new();

        let a = service.add_player(conn_a, info(Some(1), "a"), false);
        service.remove_player(&a.player_id);
        assert_eq!(service.queue_sizes(), (0, 0));

        // a never appears in a subsequently created match
        let b = service.add_player(conn_b, info(Some(2), "b"), false);
        assert!(b.paired.is_none());
        let c = service.add_player(conn_c, info(Some(3), "c"), false);
        let Some(Paired::Match(match_id)) = c.paired else {
            panic!("b and c must pair");
        };
        let handle = service.matches.get(&match_id).unwrap();
        assert!(!handle.player_ids.contains(&a.player_id));
    }
}
