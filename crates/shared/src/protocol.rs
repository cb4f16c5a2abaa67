//! STOMP 1.2 frame codec and heart-beat negotiation.
//!
//! The broker speaks STOMP over WebSocket text messages. A frame is
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! A message consisting only of end-of-line characters is a heart-beat.

use std::fmt;
use std::time::Duration;

use crate::error::FrameError;

/// STOMP protocol version negotiated with the broker.
pub const STOMP_VERSION: &str = "1.2";

pub const HEADER_ACCEPT_VERSION: &str = "accept-version";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_CONTENT_LENGTH: &str = "content-length";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_HEART_BEAT: &str = "heart-beat";
pub const HEADER_HOST: &str = "host";
pub const HEADER_ID: &str = "id";
pub const HEADER_MESSAGE: &str = "message";
pub const HEADER_RECEIPT: &str = "receipt";
pub const HEADER_SUBSCRIPTION: &str = "subscription";

/// Wire representation of a heart-beat.
pub const HEARTBEAT_FRAME: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED headers are never escaped (STOMP 1.2 section "Value Encoding").
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame. Headers keep their wire order; on repeats the first one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(HEADER_DESTINATION)
    }

    pub fn subscription(&self) -> Option<&str> {
        self.get(HEADER_SUBSCRIPTION)
    }

    /// CONNECT frame carrying the session credential as a bearer header.
    pub fn connect(host: &str, credential: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header(HEADER_ACCEPT_VERSION, STOMP_VERSION)
            .header(HEADER_HOST, host)
            .header(HEADER_AUTHORIZATION, format!("Bearer {credential}"))
            .header(HEADER_HEART_BEAT, heart_beat.to_string())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header(HEADER_ID, id)
            .header(HEADER_DESTINATION, destination)
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header(HEADER_ID, id)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header(HEADER_RECEIPT, receipt)
    }

    /// MESSAGE frame as the broker would deliver it.
    pub fn message(subscription: &str, destination: &str, body: impl Into<String>) -> Self {
        Frame::new(Command::Message)
            .header(HEADER_SUBSCRIPTION, subscription)
            .header(HEADER_DESTINATION, destination)
            .header(HEADER_CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    /// Serialize to wire text, NUL terminated.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get(HEADER_CONTENT_LENGTH).is_none() {
            out.push_str(HEADER_CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame from a WebSocket text message.
    ///
    /// Returns `Ok(None)` for a heart-beat.
    pub fn decode(text: &str) -> Result<Option<Frame>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match text.find("\n\n") {
            Some(idx) => (&text[..idx], &text[idx + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(idx) => (&text[..idx], &text[idx + 4..]),
                None => return Err(FrameError::MissingTerminator),
            },
        };

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = Command::parse(lines.next().unwrap_or_default())?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        let body = match frame.get(HEADER_CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()) {
            Some(len) => rest.get(..len).ok_or(FrameError::ContentLength {
                declared: len,
                actual: rest.len(),
            })?,
            None => {
                let end = rest.find('\0').ok_or(FrameError::MissingTerminator)?;
                &rest[..end]
            }
        };
        frame.body = body.to_string();
        Ok(Some(frame))
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// `heart-beat` header value: `<can send every ms>,<wants to receive every ms>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub recv_ms: u64,
}

impl HeartBeat {
    pub fn new(send_ms: u64, recv_ms: u64) -> Self {
        Self { send_ms, recv_ms }
    }

    /// Parse a header value; malformed values mean "no heart-beating".
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(',').map(|p| p.trim().parse::<u64>().ok());
        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(send_ms), Some(recv_ms)) => Self { send_ms, recv_ms },
            _ => Self::default(),
        }
    }

    /// Intervals agreed between this (client) side and the server's CONNECTED header.
    pub fn negotiate(&self, server: HeartBeat) -> Negotiated {
        let outgoing = if self.send_ms == 0 || server.recv_ms == 0 {
            0
        } else {
            self.send_ms.max(server.recv_ms)
        };
        let incoming = if self.recv_ms == 0 || server.send_ms == 0 {
            0
        } else {
            self.recv_ms.max(server.send_ms)
        };
        Negotiated {
            outgoing: (outgoing > 0).then(|| Duration::from_millis(outgoing)),
            incoming: (incoming > 0).then(|| Duration::from_millis(incoming)),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.recv_ms)
    }
}

/// Heart-beat intervals in effect for a link. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}
