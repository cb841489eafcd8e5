//! WebSocket upgrade and session handling

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{InputEvent, MatchCmd};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, PlayerId, ServerMsg};
use crate::ws::PlayerConn;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let (conn, outbox_rx) = PlayerConn::new();

    info!(conn_id = %conn.conn_id(), "new WebSocket connection");

    // Writer task: outbound queue -> socket
    let writer_handle = tokio::spawn(write_outbox(ws_sink, outbox_rx, conn.conn_id()));

    let player_id = read_session(ws_stream, &conn, &state).await;

    // Connection closure is the forfeit trigger: look the player up across
    // the pools, active matches and brackets. Absence anywhere is a no-op.
    if let Some(id) = player_id {
        state.matchmaking.remove_player(&id);
        if let Some(handle) = state.matches.find_by_player(&id) {
            handle.command(MatchCmd::Forfeit(id.clone()));
        }
        if let Some(handle) = state.tournaments.find_by_player(&id) {
            handle.mark_disconnected(&id);
        }
        info!(conn_id = %conn.conn_id(), player_id = %id, "connection closed");
    } else {
        info!(conn_id = %conn.conn_id(), "connection closed before joining");
    }

    writer_handle.abort();
}

/// Drain the connection's outbound queue onto the socket
async fn write_outbox(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::UnboundedReceiver<ServerMsg>,
    conn_id: Uuid,
) {
    while let Some(msg) = outbox_rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "failed to serialize message");
                continue;
            }
        };
        if let Err(e) = ws_sink.send(Message::Text(json)).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Reader loop: socket -> matchmaker / owning match. Returns the identity
/// the connection joined as, if any.
async fn read_session(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    conn: &PlayerConn,
    state: &AppState,
) -> Option<PlayerId> {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut player_id: Option<PlayerId> = None;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(msg) => dispatch(msg, conn, state, &mut player_id, &rate_limiter),
                Err(e) => {
                    // Malformed messages are dropped; the connection stays open
                    warn!(conn_id = %conn.conn_id(), error = %e, "failed to parse client message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn.conn_id(), "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn.conn_id(), "client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn.conn_id(), error = %e, "WebSocket error");
                break;
            }
        }
    }

    player_id
}

fn dispatch(
    msg: ClientMsg,
    conn: &PlayerConn,
    state: &AppState,
    player_id: &mut Option<PlayerId>,
    rate_limiter: &ConnectionRateLimiter,
) {
    match msg {
        ClientMsg::Join { info_player } => {
            let outcome = state.matchmaking.add_player(conn.clone(), info_player, false);
            *player_id = Some(outcome.player_id);
            if outcome.paired.is_none() {
                let _ = conn.send(ServerMsg::Wait { message: None });
            }
        }
        ClientMsg::JoinTournament { info_player } => {
            let outcome = state.matchmaking.add_player(conn.clone(), info_player, true);
            *player_id = Some(outcome.player_id);
            // Every tournament joiner waits, the bracket-completing one included
            let _ = conn.send(ServerMsg::Wait { message: None });
        }
        ClientMsg::Input { key, pressed } => {
            if !rate_limiter.check_input() {
                warn!(conn_id = %conn.conn_id(), "rate limited input message");
                return;
            }
            // Messages before a join, or from a player with no live match,
            // are stale and silently ignored
            let Some(id) = player_id.as_ref() else {
                return;
            };
            if let Some(handle) = state.matches.find_by_player(id) {
                handle.command(MatchCmd::Input(id.clone(), InputEvent { key, pressed }));
            }
        }
        ClientMsg::Ready => {
            let Some(id) = player_id.as_ref() else {
                return;
            };
            if let Some(handle) = state.matches.find_by_player(id) {
                handle.command(MatchCmd::Ready(id.clone()));
            }
        }
    }
}
