use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use palaver_core::identity::ParticipantIdentity;
use palaver_core::ids::ConnectionId;

use crate::relay::{ConnState, Relay};

/// One frame queued for a connection's writer task.
#[derive(Clone, Debug)]
pub enum OutboundFrame {
    /// A serialized event, shared across recipients of one broadcast.
    Text(Arc<String>),
    /// Heartbeat probe, queued by the sweep.
    Ping,
}

/// A live transport session. The identity binding lives in the registry,
/// not here; an unauthenticated connection is just an entry with no
/// binding pointing at it.
pub struct Connection {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<OutboundFrame>,
    /// Cleared by each heartbeat sweep, set by any inbound traffic. A
    /// connection still cleared at the next sweep is terminated.
    pub alive: AtomicBool,
}

/// Registry of live connections plus the identity→connection binding.
/// At most one connection is bound to a given identity; a newer auth
/// displaces the older binding.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    bindings: DashMap<ParticipantIdentity, ConnectionId>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            bindings: DashMap::new(),
            max_send_queue,
        }
    }

    /// Admit a new connection and return its id + the writer's receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(Connection {
            id: id.clone(),
            tx,
            alive: AtomicBool::new(true),
        });
        self.connections.insert(id.clone(), conn);
        (id, rx)
    }

    /// Drop a connection. Closes its outbound channel, which ends the
    /// writer task and through it the whole connection handler.
    pub fn remove(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Bind an identity to a connection. Returns the previously bound
    /// connection id when this auth displaces an older one.
    pub fn bind(&self, identity: ParticipantIdentity, id: &ConnectionId) -> Option<ConnectionId> {
        self.bindings
            .insert(identity, id.clone())
            .filter(|prev| prev != id)
    }

    /// Remove the identity binding, but only if it still points at this
    /// connection. Returns false when a newer connection has taken over
    /// the identity, in which case the caller must not run identity-level
    /// cleanup (presence, subscriptions).
    pub fn unbind_if_current(&self, identity: &ParticipantIdentity, id: &ConnectionId) -> bool {
        self.bindings
            .remove_if(identity, |_, bound| bound == id)
            .is_some()
    }

    pub fn connection_for(&self, identity: &ParticipantIdentity) -> Option<ConnectionId> {
        self.bindings.get(identity).map(|entry| entry.value().clone())
    }

    /// Queue a frame for one connection. Returns false when the
    /// connection is gone or its queue is full (the frame is dropped).
    pub fn send_to(&self, id: &ConnectionId, frame: OutboundFrame) -> bool {
        let Some(conn) = self.connections.get(id) else {
            return false;
        };
        match conn.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "Send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn mark_alive(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.alive.store(true, Ordering::Relaxed);
        }
    }

    /// One heartbeat pass. Connections whose liveness flag was never set
    /// since the previous pass are returned for termination; the rest get
    /// their flag cleared and a ping queued, so a silent peer is caught on
    /// the second pass.
    pub fn heartbeat_sweep(&self) -> Vec<ConnectionId> {
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if !conn.alive.swap(false, Ordering::Relaxed) {
                dead.push(conn.id.clone());
            } else if conn.tx.try_send(OutboundFrame::Ping).is_err() {
                dead.push(conn.id.clone());
            }
        }
        dead
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

/// Drive one WebSocket: a spawned writer draining the outbound queue and
/// an inline reader feeding frames to the relay. Each inbound event is
/// handled to completion before the next one on this connection, so a
/// single sender's messages broadcast in send order. When either side
/// ends, disconnect cleanup runs exactly once.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn_id: ConnectionId,
    mut rx: mpsc::Receiver<OutboundFrame>,
    relay: Arc<Relay>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                OutboundFrame::Text(text) => WsMessage::Text(text.as_str().to_owned().into()),
                OutboundFrame::Ping => WsMessage::Ping(vec![].into()),
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        tracing::debug!(connection_id = %writer_cid, "Writer stopped");
    });

    let mut state = ConnState::default();
    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    relay.connections().mark_alive(&conn_id);
                    relay.handle_frame(&conn_id, &mut state, text.as_str());
                }
                WsMessage::Pong(_) => {
                    relay.connections().mark_alive(&conn_id);
                }
                WsMessage::Close(_) => break,
                // axum answers pings itself; the ping still counts as
                // inbound traffic for liveness.
                WsMessage::Ping(_) => {
                    relay.connections().mark_alive(&conn_id);
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut writer => {}
        _ = reader => {
            writer.abort();
        }
    }

    relay.handle_disconnect(&conn_id, &state);
}
