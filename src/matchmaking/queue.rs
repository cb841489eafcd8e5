//! Waiting pool implementation

use std::collections::VecDeque;
use std::time::Instant;

use uuid::Uuid;

use crate::game::MatchSeat;
use crate::ws::protocol::PlayerId;
use crate::ws::PlayerConn;

/// Player in a waiting pool
#[derive(Debug, Clone)]
pub struct WaitingPlayer {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub conn: PlayerConn,
    pub queued_at: Instant,
}

impl WaitingPlayer {
    pub fn new(id: PlayerId, name: String, avatar: String, conn: PlayerConn) -> Self {
        Self {
            id,
            name,
            avatar,
            conn,
            queued_at: Instant::now(),
        }
    }

    pub fn into_seat(self) -> MatchSeat {
        MatchSeat {
            id: self.id,
            name: self.name,
            avatar: self.avatar,
            conn: Some(self.conn),
        }
    }
}

/// Insertion-ordered holding area for players not yet paired.
///
/// Pairing is first-come-first-served: `pop_oldest` takes exactly the
/// threshold count from the front so excess joiners wait for the next
/// pairing round.
#[derive(Debug, Default)]
pub struct WaitingPool {
    queue: VecDeque<WaitingPlayer>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn get(&self, id: &PlayerId) -> Option<&WaitingPlayer> {
        self.queue.iter().find(|p| &p.id == id)
    }

    pub fn find_by_conn(&self, conn_id: Uuid) -> Option<&WaitingPlayer> {
        self.queue.iter().find(|p| p.conn.conn_id() == conn_id)
    }

    /// Append a player. The caller is responsible for the id/connection
    /// dedupe checks; entries here are assumed unique.
    pub fn push(&mut self, player: WaitingPlayer) {
        self.queue.push_back(player);
    }

    /// Remove a waiting player by id; None if absent
    pub fn remove(&mut self, id: &PlayerId) -> Option<WaitingPlayer> {
        let pos = self.queue.iter().position(|p| &p.id == id)?;
        self.queue.remove(pos)
    }

    /// Pop exactly `count` oldest-inserted entries once the pool holds that
    /// many, or None while the pool is still filling
    pub fn pop_oldest(&mut self, count: usize) -> Option<Vec<WaitingPlayer>> {
        if self.queue.len() < count {
            return None;
        }
        Some(self.queue.drain(..count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(account: i64, name: &str) -> WaitingPlayer {
        let (conn, _rx) = PlayerConn::new();
        WaitingPlayer::new(
            PlayerId::resolve(Some(account)),
            name.to_string(),
            String::new(),
            conn,
        )
    }

    #[test]
    fn pop_oldest_is_fifo_and_leaves_excess_waiting() {
        let mut pool = WaitingPool::new();
        for (account, name) in [(1, "a"), (2, "b"), (3, "c")] {
            pool.push(waiting(account, name));
        }

        let pair = pool.pop_oldest(2).expect("pool holds enough players");
        assert_eq!(pair[0].name, "a");
        assert_eq!(pair[1].name, "b");
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&PlayerId::resolve(Some(3))).is_some());
    }

    #[test]
    fn pop_oldest_short_pool_returns_none() {
        let mut pool = WaitingPool::new();
        pool.push(waiting(1, "a"));
        assert!(pool.pop_oldest(2).is_none());
        assert_eq!(pool.len(), 1, "a short pool must not be drained");
    }

    #[test]
    fn remove_is_noop_for_absent_id() {
        let mut pool = WaitingPool::new();
        pool.push(waiting(1, "a"));
        assert!(pool.remove(&PlayerId::resolve(Some(2))).is_none());
        assert!(pool.remove(&PlayerId::resolve(Some(1))).is_some());
        assert!(pool.is_empty());
    }

    #[test]
    fn find_by_conn_matches_underlying_connection() {
        let mut pool = WaitingPool::new();
        let player = waiting(1, "a");
        let conn_id = player.conn.conn_id();
        pool.push(player);

        assert_eq!(pool.find_by_conn(conn_id).map(|p| p.name.as_str()), Some("a"));
        assert!(pool.find_by_conn(Uuid::new_v4()).is_none());
    }
}
