//! WebSocket transport and the STOMP session riding on it.
//!
//! # Architecture
//!
//! - [`Connector`]: opens a transport and binds a [`Session`] to it
//! - [`StompSession`]: STOMP 1.2 over `tokio-tungstenite` with heart-beats and automatic
//!   low-level reconnect
//! - [`SessionEvent`]: typed lifecycle notifications consumed by the connection manager
//!
//! # Example
//!
//! ```ignore
//! let (tx, rx) = mpsc::unbounded_channel();
//! let session = WsConnector.connect(&config, EventSink::new(1, tx))?;
//! session.activate()?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{StompSession, WsConnector};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
