// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Control-plane wire protocol.
//!
//! Back-ends talk to the controller in bare JSON objects over TCP,
//! one object per message, with no mandated delimiter. The decoder
//! therefore consumes the byte stream object by object: both
//! newline-delimited and back-to-back objects decode identically.
//! Messages are modeled as tagged variants so that unknown shapes are
//! rejected at decode time, not at field access.

use bytes::{Buf, BytesMut};
use pylon_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Transport protocol of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP data path with per-connection proxying.
    Tcp,
    /// UDP. Registration is accepted, relaying is not implemented.
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A command sent over the control channel.
///
/// The `port` stays a raw JSON number until [`parse_port`] validates
/// it: the wire format allows any number, but only integral values in
/// `[1, 65535]` name a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    /// Register the dialing back-end for `(protocol, port)`.
    Register {
        /// Transport protocol of the service.
        protocol: Protocol,
        /// Public port of the service.
        port: serde_json::Number,
    },
    /// Unregister a back-end. Recognized but not supported; eviction
    /// is health-check driven.
    Unregister {
        /// Transport protocol of the service.
        protocol: Protocol,
        /// Public port of the service.
        port: serde_json::Number,
    },
    /// Health probe, sent by the controller to the back-end.
    Hello,
}

/// An acknowledgment on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "lowercase")]
pub enum Ack {
    /// Reply a back-end must give to a [`Command::Hello`] probe.
    Hello,
    /// A management command was accepted.
    Successful,
    /// A management command was rejected.
    Failed {
        /// Human-readable rejection reason.
        msg: String,
    },
}

/// Any frame that can arrive on a control connection.
///
/// Commands and probe acknowledgments share the socket, so the read
/// loop classifies each decoded object before routing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A management command or inbound probe.
    Command(Command),
    /// A probe or command acknowledgment.
    Ack(Ack),
}

/// Validates a wire-level port number.
///
/// # Errors
///
/// Returns a protocol error unless the number is an integer in
/// `[1, 65535]`.
pub fn parse_port(port: &serde_json::Number) -> Result<u16> {
    port.as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .filter(|v| *v != 0)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "invalid port {port}, must be a positive integer in the range [1, 65535]"
            ))
        })
}

/// Serializes a frame payload as a single JSON object.
pub fn encode<T: Serialize>(payload: &T) -> Vec<u8> {
    // Command and Ack shapes cannot fail to serialize.
    serde_json::to_vec(payload).unwrap_or_default()
}

/// Incremental decoder over the control-channel byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the decode buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete frame from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete object
    /// yet. A malformed object clears the buffer so the connection
    /// can resynchronize on the next message.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for malformed JSON or a JSON value
    /// that is neither a known command nor a known acknowledgment.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        while self.buf.first().is_some_and(u8::is_ascii_whitespace) {
            self.buf.advance(1);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut stream =
            serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buf.advance(consumed);
                classify(value).map(Some)
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                self.buf.clear();
                Err(Error::Protocol(format!("malformed control message: {e}")))
            }
            None => Ok(None),
        }
    }
}

/// Routes a decoded JSON object to its frame type.
///
/// The `cmd` discriminator is matched case-insensitively.
fn classify(mut value: serde_json::Value) -> Result<Frame> {
    if !value.is_object() {
        return Err(Error::Protocol(format!("expected a JSON object, got: {value}")));
    }

    if value.get("cmd").is_some() {
        if let Some(serde_json::Value::String(cmd)) = value.get_mut("cmd") {
            *cmd = cmd.to_lowercase();
        }
        return serde_json::from_value(value)
            .map(Frame::Command)
            .map_err(|e| Error::Protocol(format!("unknown command shape: {e}")));
    }

    if value.get("ack").is_some() {
        return serde_json::from_value(value)
            .map(Frame::Ack)
            .map_err(|e| Error::Protocol(format!("unknown ack shape: {e}")));
    }

    Err(Error::Protocol(format!("message carries neither \"cmd\" nor \"ack\": {value}")))
}
