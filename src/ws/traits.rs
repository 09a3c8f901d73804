//! Seams between the connection manager and the protocol session it drives.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::config::Config;
use crate::Result;
use crate::stomp::Message;

/// Callback invoked for every message routed to a subscription.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// Lifecycle notifications a session reports to its owner.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// `CONNECTED` received; the session accepts subscriptions
    Established,
    /// Server sent an `ERROR` frame or violated the protocol
    ProtocolError(String),
    /// The transport failed to open or broke
    TransportError(String),
    /// The transport closed without error
    Closed,
}

/// A [`SessionEventKind`] tagged with the generation of the session that raised it.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    pub kind: SessionEventKind,
}

/// Sending half handed to each session so it can report lifecycle events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the owner is gone.
    pub fn emit(&self, kind: SessionEventKind) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// A live protocol session multiplexing subscriptions over one transport.
///
/// Implementations must not block: `activate` starts work in the background and reports
/// progress through the [`EventSink`] the session was created with.
pub trait Session: Send + Sync + 'static {
    /// Start connecting. Calling it on an active session is a no-op.
    fn activate(&self) -> Result<()>;

    /// Stop the session and release the transport. Idempotent.
    fn deactivate(&self);

    /// Whether the session is activated and not yet deactivated.
    fn is_active(&self) -> bool;

    /// Attach `handler` to `destination`, returning the session-level subscription id.
    fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<String>;

    /// Detach the subscription identified by `receipt`.
    fn unsubscribe(&self, receipt: &str) -> Result<()>;
}

/// Factory opening a new transport and binding a [`Session`] to it.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, config: &Config, events: EventSink) -> Result<Arc<dyn Session>>;
}
