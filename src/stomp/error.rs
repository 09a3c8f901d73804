#![expect(
    clippy::module_name_repetitions,
    reason = "StompError includes module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;

/// STOMP framing and protocol error variants.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    /// Frame started with a command this client does not know
    UnknownCommand(String),
    /// Frame structure is broken (missing header separator, NUL terminator, ...)
    Malformed(String),
    /// Header contained an escape sequence not defined by STOMP 1.2
    InvalidEscape(String),
    /// `heart-beat` header could not be parsed
    InvalidHeartBeat(String),
    /// `MESSAGE` frame lacked a header the client relies on
    MissingHeader(&'static str),
    /// Server sent an `ERROR` frame
    Server {
        /// Value of the `message` header, if present
        message: Option<String>,
        /// Frame body
        body: String,
    },
}

impl fmt::Display for StompError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(command) => write!(f, "Unknown STOMP command: {command}"),
            Self::Malformed(reason) => write!(f, "Malformed STOMP frame: {reason}"),
            Self::InvalidEscape(sequence) => {
                write!(f, "Invalid STOMP header escape sequence: {sequence}")
            }
            Self::InvalidHeartBeat(value) => write!(f, "Invalid heart-beat header: {value}"),
            Self::MissingHeader(name) => write!(f, "STOMP frame missing `{name}` header"),
            Self::Server { message, body } => match message {
                Some(message) if body.is_empty() => write!(f, "STOMP server error: {message}"),
                Some(message) => write!(f, "STOMP server error: {message} ({body})"),
                None => write!(f, "STOMP server error: {body}"),
            },
        }
    }
}

impl StdError for StompError {}

impl From<StompError> for crate::error::Error {
    fn from(e: StompError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Protocol, e)
    }
}
