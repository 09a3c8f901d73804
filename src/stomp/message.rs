use serde::de::DeserializeOwned;

use super::error::StompError;
use super::frame::{Command, Frame};
use crate::Result;

/// A `MESSAGE` frame delivered to a subscription handler.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination the message was published to
    pub destination: String,
    /// Session-level subscription id the server routed this message through
    pub subscription: String,
    /// Server assigned `message-id`
    pub message_id: Option<String>,
    /// All headers of the underlying frame
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Message {
    #[must_use]
    pub fn new<D: Into<String>, S: Into<String>, B: Into<String>>(
        destination: D,
        subscription: S,
        body: B,
    ) -> Self {
        Self {
            destination: destination.into(),
            subscription: subscription.into(),
            message_id: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

impl TryFrom<Frame> for Message {
    type Error = StompError;

    fn try_from(frame: Frame) -> std::result::Result<Self, Self::Error> {
        if frame.command != Command::Message {
            return Err(StompError::Malformed(format!(
                "expected MESSAGE frame, got {}",
                frame.command
            )));
        }

        let destination = frame
            .header("destination")
            .ok_or(StompError::MissingHeader("destination"))?
            .to_owned();
        let subscription = frame
            .header("subscription")
            .ok_or(StompError::MissingHeader("subscription"))?
            .to_owned();
        let message_id = frame.header("message-id").map(str::to_owned);

        Ok(Self {
            destination,
            subscription,
            message_id,
            headers: frame.headers,
            body: frame.body,
        })
    }
}
