//! WebSocket transport: connection handle, session handling, wire protocol

pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;
use uuid::Uuid;

use protocol::ServerMsg;

/// Error returned when queueing a message for a connection that has gone away
#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnClosed;

/// Handle to one live client connection.
///
/// Wraps the connection's outbound queue; the writer task spawned by the
/// session drains it onto the socket. Clones of this handle travel into
/// waiting pools, matches and brackets. The connection id identifies the
/// underlying socket so one socket can never occupy two pool slots.
#[derive(Debug, Clone)]
pub struct PlayerConn {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerMsg>,
}

impl PlayerConn {
    /// Create a connection handle and the receiving end of its outbound queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a message for delivery
    pub fn send(&self, msg: ServerMsg) -> Result<(), ConnClosed> {
        self.tx.send(msg).map_err(|_| ConnClosed)
    }
}
