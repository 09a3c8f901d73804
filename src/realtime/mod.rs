//! Connection manager: the shared session, its state machine and the subscription registry.
//!
//! One [`Client`] owns at most one [`crate::ws::Session`] at a time. Subscriptions are
//! keyed by id, survive session restarts and are re-attached every time the session is
//! established.

pub mod client;
pub mod state;
pub mod subscription;
pub mod types;

pub use client::Client;
pub use state::ConnectionState;
pub use subscription::SubscriptionManager;
pub use types::{
    Channel, ConnectOutcome, ConnectionCheck, ConnectionStatus, RestoreReport, SubscriptionHandle,
    SubscriptionInfo,
};
