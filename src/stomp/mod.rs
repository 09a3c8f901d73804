//! STOMP 1.2 wire format.
//!
//! Only the pieces a subscribing client needs: frame encoding/decoding, header escaping,
//! heart-beat negotiation and the `MESSAGE` view handed to subscription handlers.

pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod message;

#[expect(
    clippy::module_name_repetitions,
    reason = "StompError includes module name for clarity when used outside this module"
)]
pub use error::StompError;
pub use frame::{Command, Frame, HEARTBEAT_EOL, STOMP_VERSION, parse_frames};
pub use heartbeat::HeartBeat;
pub use message::Message;
