//! STOMP Frame Codec
//!
//! Stateless translation between STOMP text frames and [`StompFrame`].
//!
//! # Frame Layout
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! key:value\n
//! \n
//! body\0
//! ```
//!
//! A payload made only of EOLs and NULs is a heart-beat, not a frame.

use std::fmt;

use serde::de::DeserializeOwned;

/// STOMP frame terminator.
pub const NUL: char = '\0';

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No valid command line was found.
    #[error("missing STOMP command, got: {0}")]
    MissingCommand(String),

    /// Frame body is not the expected JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Commands
// =============================================================================

/// STOMP command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StompCommand {
    /// Client session request.
    Connect,
    /// Server session acknowledgement.
    Connected,
    /// Client subscription request.
    Subscribe,
    /// Client subscription release.
    Unsubscribe,
    /// Server message for a subscription.
    Message,
    /// Client message to a destination.
    Send,
    /// Client session teardown.
    Disconnect,
    /// Server error.
    Error,
    /// Any other command.
    Unknown(String),
}

impl StompCommand {
    /// Parse a command line.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::MissingCommand` if the line is not a run of
    /// ASCII letters.
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        if line.is_empty() || !line.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(CodecError::MissingCommand(preview(line)));
        }

        Ok(match line {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "MESSAGE" => Self::Message,
            "SEND" => Self::Send,
            "DISCONNECT" => Self::Disconnect,
            "ERROR" => Self::Error,
            other => Self::Unknown(other.to_string()),
        })
    }

    /// Get the wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Send => "SEND",
            Self::Disconnect => "DISCONNECT",
            Self::Error => "ERROR",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Ordered frame headers. Re-inserting a key overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StompHeaders {
    entries: Vec<(String, String)>,
}

impl StompHeaders {
    /// Insert a header, last write wins.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Get a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A decoded or to-be-encoded STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command.
    pub command: StompCommand,
    /// Frame headers.
    pub headers: StompHeaders,
    /// Frame body, trailing whitespace trimmed on decode.
    pub body: String,
}

impl StompFrame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: StompHeaders::default(),
            body: String::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Encode to wire text, NUL-terminated.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut wire = String::with_capacity(64 + self.body.len());
        wire.push_str(self.command.as_str());
        wire.push('\n');

        for (key, value) in self.headers.iter() {
            wire.push_str(key);
            wire.push(':');
            wire.push_str(value);
            wire.push('\n');
        }

        wire.push('\n');
        wire.push_str(&self.body);
        wire.push(NUL);
        wire
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a CONNECT frame.
#[must_use]
pub fn encode_connect(accept_versions: &str, heartbeat: &str) -> String {
    StompFrame::new(StompCommand::Connect)
        .with_header("accept-version", accept_versions)
        .with_header("heart-beat", heartbeat)
        .encode()
}

/// Encode a SUBSCRIBE frame.
#[must_use]
pub fn encode_subscribe(destination: &str, subscription_id: &str) -> String {
    StompFrame::new(StompCommand::Subscribe)
        .with_header("id", subscription_id)
        .with_header("destination", destination)
        .encode()
}

/// Encode an UNSUBSCRIBE frame.
#[must_use]
pub fn encode_unsubscribe(subscription_id: &str) -> String {
    StompFrame::new(StompCommand::Unsubscribe)
        .with_header("id", subscription_id)
        .encode()
}

/// Encode a DISCONNECT frame.
#[must_use]
pub fn encode_disconnect() -> String {
    StompFrame::new(StompCommand::Disconnect).encode()
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode wire text into a frame.
///
/// Returns `Ok(None)` for heart-beats (empty or whitespace-only payloads).
///
/// # Errors
///
/// Returns `CodecError::MissingCommand` if no command line can be found.
pub fn decode_frame(raw: &str) -> Result<Option<StompFrame>, CodecError> {
    let clean = raw.replace(NUL, "");
    if clean.trim().is_empty() {
        return Ok(None);
    }

    let mut lines = clean
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .skip_while(|line| line.is_empty());

    let command = StompCommand::parse(lines.next().unwrap_or_default())?;

    let mut headers = StompHeaders::default();
    let mut body_lines = Vec::new();
    let mut in_body = false;

    for line in lines {
        if in_body {
            body_lines.push(line);
        } else if line.is_empty() {
            in_body = true;
        } else if let Some((key, value)) = line.split_once(':')
            && !key.is_empty()
        {
            headers.insert(key, value);
        }
    }

    let body = body_lines.join("\n").trim_end().to_string();

    Ok(Some(StompFrame {
        command,
        headers,
        body,
    }))
}

fn preview(line: &str) -> String {
    line.chars().take(50).collect()
}
