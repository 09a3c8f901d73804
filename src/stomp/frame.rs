//! STOMP 1.2 text frames.
//!
//! A frame is `COMMAND EOL (header EOL)* EOL body NUL`. Bare EOLs between frames are
//! heart-beats and carry no frame.

use std::fmt::Write as _;
use std::str::FromStr;

use super::error::StompError;
use super::heartbeat::HeartBeat;

/// Protocol version advertised in `accept-version`.
pub const STOMP_VERSION: &str = "1.2";

/// A heart-beat is a single end-of-line sent in place of a frame.
pub const HEARTBEAT_EOL: &str = "\n";

const NUL: char = '\0';

/// STOMP frame command.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// `CONNECT` and `CONNECTED` headers are transmitted verbatim.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(StompError::UnknownCommand(other.to_owned())),
        };
        Ok(command)
    }
}

/// A single STOMP frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated headers are kept; the first occurrence wins on lookup.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `CONNECT` frame opening a session against `host`.
    #[must_use]
    pub fn connect(host: &str, heart_beat: HeartBeat, extra_headers: &[(String, String)]) -> Self {
        let mut frame = Self::new(Command::Connect)
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.to_string());
        frame.headers.extend(extra_headers.iter().cloned());
        frame
    }

    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to wire format. A `content-length` header is added for non-empty bodies.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        let _ = writeln!(out, "{}", self.command);
        for (name, value) in &self.headers {
            if escape {
                escape_into(&mut out, name);
                out.push(':');
                escape_into(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }
}

/// Decode every frame contained in one transport message.
///
/// Heart-beat EOLs before, between and after frames are skipped, so a pure heart-beat
/// message yields an empty vec.
pub fn parse_frames(data: &str) -> Result<Vec<Frame>, StompError> {
    let mut frames = Vec::new();
    let mut rest = data;

    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }

        let (frame, remaining) = decode_frame(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn next_line(input: &str) -> Result<(&str, &str), StompError> {
    let (line, rest) = input
        .split_once('\n')
        .ok_or_else(|| StompError::Malformed("unterminated header block".to_owned()))?;
    Ok((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn decode_frame(input: &str) -> Result<(Frame, &str), StompError> {
    let (command_line, mut rest) = next_line(input)?;
    let command: Command = command_line.parse()?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = next_line(rest)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            StompError::Malformed(format!("header without ':' separator: {line}"))
        })?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .parse::<usize>()
                .map_err(|e| StompError::Malformed(format!("invalid content-length {value}: {e}")))
        })
        .transpose()?;

    let (body, rest) = match content_length {
        Some(len) => {
            let body = rest.get(..len).ok_or_else(|| {
                StompError::Malformed("body shorter than content-length".to_owned())
            })?;
            let after = rest
                .get(len..)
                .and_then(|tail| tail.strip_prefix(NUL))
                .ok_or_else(|| {
                    StompError::Malformed("missing NUL after content-length body".to_owned())
                })?;
            (body, after)
        }
        None => rest
            .split_once(NUL)
            .ok_or_else(|| StompError::Malformed("missing NUL terminator".to_owned()))?,
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_owned(),
        },
        rest,
    ))
}

fn unescape(raw: &str) -> Result<String, StompError> {
    if !raw.contains('\\') {
        return Ok(raw.to_owned());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(StompError::InvalidEscape(format!("\\{other}"))),
            None => return Err(StompError::InvalidEscape("\\".to_owned())),
        }
    }
    Ok(out)
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}
