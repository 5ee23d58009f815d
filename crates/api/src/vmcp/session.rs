//! Client Session Management
//!
//! Tracks the SSE sessions of clients connected to one virtual server. Each
//! session is an opaque uuid handed out in the `endpoint` event plus an
//! unbounded channel feeding the client's SSE stream; dropping the sender
//! side ends the stream.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::mcp::types::JsonRpcMessage;

/// An active client session
struct ClientSession {
    sender: mpsc::UnboundedSender<JsonRpcMessage>,
}

/// All active sessions of one virtual-server instance, keyed by session id.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<Uuid, ClientSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session. Returns its id and the receiving end of its
    /// message channel.
    pub fn create(&self) -> (Uuid, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .unwrap()
            .insert(id, ClientSession { sender: tx });
        (id, rx)
    }

    /// Whether the session exists.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.lock().unwrap().contains_key(id)
    }

    /// Deliver a message to a session's SSE stream.
    ///
    /// Returns false when the session is unknown or its client has gone
    /// away; a dead session is dropped from the table.
    pub fn send_to(&self, id: &Uuid, message: JsonRpcMessage) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(id) {
            Some(session) => {
                if session.sender.send(message).is_ok() {
                    true
                } else {
                    sessions.remove(id);
                    false
                }
            }
            None => false,
        }
    }

    /// Drop one session; its stream observes end-of-stream.
    pub fn remove(&self, id: &Uuid) {
        self.sessions.lock().unwrap().remove(id);
    }

    /// Drop every session. Used on instance shutdown.
    pub fn close_all(&self) {
        self.sessions.lock().unwrap().clear();
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
