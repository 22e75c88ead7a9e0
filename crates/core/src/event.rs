//! Session event bus: decoupled observation of the agent loop.
//!
//! Every persisted change the loop makes (new message, part update, settlement)
//! is also published here so UIs can render incrementally without polling the
//! store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::{MessageError, MessageInfo, Part};
use crate::session::Session;

/// All observable events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionUpdated { session: Session },

    SessionDeleted { session_id: String },

    /// A message header was created or changed (including settlement).
    MessageUpdated { info: MessageInfo },

    /// A part was created or changed. `delta` carries the appended text for
    /// streaming text/reasoning updates.
    PartUpdated {
        part: Part,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    /// A loop step is about to call the model.
    StepStarted { session_id: String, step: u32 },

    SessionError {
        session_id: String,
        error: MessageError,
    },

    /// The loop for this session returned.
    SessionIdle { session_id: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionUpdated { session } => &session.id,
            Self::MessageUpdated { info } => info.session_id(),
            Self::PartUpdated { part, .. } => &part.session_id,
            Self::SessionDeleted { session_id }
            | Self::StepStarted { session_id, .. }
            | Self::SessionError { session_id, .. }
            | Self::SessionIdle { session_id } => session_id,
        }
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and miss events; the store stays the source of truth.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
