//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable player identity.
///
/// Logged-in players keep their numeric account id; anonymous players get a
/// freshly generated opaque token so they are still addressable for forfeit
/// and ranking bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Resolve the stable id from an optional account id
    pub fn resolve(account_id: Option<i64>) -> Self {
        match account_id {
            Some(id) => Self(id.to_string()),
            None => Self(Uuid::new_v4().to_string()),
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player identity as announced by the client on join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    /// Account id when logged in, null for anonymous play
    pub id: Option<i64>,
    pub avatar: String,
}

/// Public identity of a match participant, as broadcast in `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPublic {
    pub name: String,
    pub id: PlayerId,
    pub avatar: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Enter the quick-match waiting pool
    #[serde(rename_all = "camelCase")]
    Join { info_player: PlayerInfo },

    /// Enter the tournament waiting pool
    #[serde(rename_all = "camelCase")]
    JoinTournament { info_player: PlayerInfo },

    /// Key-down / key-up event, forwarded to the owning match
    Input {
        key: String,
        /// true on key-down, false on key-up
        #[serde(rename = "type")]
        pressed: bool,
    },

    /// Sender is ready to play in its owning match
    Ready,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sender is pooled or awaiting bracket progress
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Bracket roster announcement
    #[serde(rename_all = "camelCase")]
    Names { waiting_players: Vec<String> },

    /// Match begins
    Start { players: StartPlayers },

    /// Per-tick authoritative state
    Update {
        paddles: Vec<PaddleState>,
        ball: BallState,
        players: Vec<ScoreState>,
        time: f32,
    },

    /// Terminal outcome for a non-bracket match
    Win {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Lose {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Both participants' public identity for the `start` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPlayers {
    pub player1: PlayerPublic,
    pub player2: PlayerPublic,
}

/// Paddle state on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleState {
    pub id: PlayerId,
    pub player_name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Ball state on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Per-player score entry in an `update` frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreState {
    pub score: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_envelope_matches_wire_format() {
        let raw = json!({
            "type": "join",
            "data": { "infoPlayer": { "name": "alice", "id": 42, "avatar": "cat.png" } }
        });

        let msg: ClientMsg = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMsg::Join { info_player } => {
                assert_eq!(info_player.name, "alice");
                assert_eq!(info_player.id, Some(42));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn join_tournament_accepts_anonymous_player() {
        let raw = json!({
            "type": "joinTournament",
            "data": { "infoPlayer": { "name": "bob", "id": null, "avatar": "" } }
        });

        let msg: ClientMsg = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            msg,
            ClientMsg::JoinTournament { ref info_player } if info_player.id.is_none()
        ));
    }

    #[test]
    fn input_uses_type_field_for_key_state() {
        let raw = json!({
            "type": "input",
            "data": { "key": "ArrowUp", "type": true }
        });

        let msg: ClientMsg = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMsg::Input { key, pressed } => {
                assert_eq!(key, "ArrowUp");
                assert!(pressed);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn ready_has_no_data_payload() {
        let msg: ClientMsg = serde_json::from_value(json!({ "type": "ready" })).unwrap();
        assert!(matches!(msg, ClientMsg::Ready));
    }

    #[test]
    fn names_serializes_waiting_players_camel_case() {
        let msg = ServerMsg::Names {
            waiting_players: vec!["a".into(), "b".into()],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({ "type": "names", "data": { "waitingPlayers": ["a", "b"] } })
        );
    }

    #[test]
    fn win_omits_absent_message() {
        let value = serde_json::to_value(&ServerMsg::Win { message: None }).unwrap();
        assert_eq!(value, json!({ "type": "win", "data": {} }));

        let value = serde_json::to_value(&ServerMsg::Win {
            message: Some("forfeit".into()),
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "win", "data": { "message": "forfeit" } }));
    }

    #[test]
    fn resolved_ids_are_stable_for_accounts_and_unique_for_anonymous() {
        assert_eq!(PlayerId::resolve(Some(7)), PlayerId::resolve(Some(7)));
        assert_ne!(PlayerId::resolve(None), PlayerId::resolve(None));
    }
}
