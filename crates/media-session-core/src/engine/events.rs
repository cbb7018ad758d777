//! Events delivered by streaming engines
//!
//! Engines run on their own schedule. Every event they emit goes through an
//! [`EngineEventSink`] that stamps it with the stream index and generation it
//! was created for, and lands on the session's queue until the session drains
//! it.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{Generation, StreamIndex};

/// Why an engine reported a transport-level failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransportErrorReason {
    /// Socket creation, bind or send failure
    SocketFailure(String),
    HandshakeTimeout,
    AuthenticationFailed,
    /// DTLS certificate does not match the signalled fingerprint
    FingerprintMismatch,
}

impl TransportErrorReason {
    /// Error raised by the security handshake rather than by the socket
    pub fn is_security(&self) -> bool {
        !matches!(self, TransportErrorReason::SocketFailure(_))
    }
}

impl fmt::Display for TransportErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorReason::SocketFailure(reason) => write!(f, "socket failure: {}", reason),
            TransportErrorReason::HandshakeTimeout => f.write_str("handshake timeout"),
            TransportErrorReason::AuthenticationFailed => f.write_str("authentication failed"),
            TransportErrorReason::FingerprintMismatch => f.write_str("fingerprint mismatch"),
        }
    }
}

/// Event emitted by a streaming engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EngineEvent {
    EncryptionChanged { encrypted: bool },
    SasReady { sas: String, verified: bool },
    /// RFC 4733 event code
    TelephoneEvent { code: u8 },
    TransportError { reason: TransportErrorReason },
}

/// Engine event stamped with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEngineEvent {
    pub stream_index: StreamIndex,
    pub generation: Generation,
    pub event: EngineEvent,
}

pub type EngineEventSender = mpsc::UnboundedSender<TaggedEngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<TaggedEngineEvent>;

/// Create the queue engines report into
pub fn event_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Handle an engine uses to report events for one stream lifecycle
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    stream_index: StreamIndex,
    generation: Generation,
    tx: EngineEventSender,
}

impl EngineEventSink {
    pub fn new(stream_index: StreamIndex, generation: Generation, tx: EngineEventSender) -> Self {
        Self {
            stream_index,
            generation,
            tx,
        }
    }

    pub fn stream_index(&self) -> StreamIndex {
        self.stream_index
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue an event; dropped if the session is gone
    pub fn emit(&self, event: EngineEvent) {
        let tagged = TaggedEngineEvent {
            stream_index: self.stream_index,
            generation: self.generation,
            event,
        };
        if self.tx.send(tagged).is_err() {
            debug!("Session gone, dropping engine event for stream {}", self.stream_index);
        }
    }
}

/// DTMF character of an RFC 4733 event code
pub fn dtmf_char(code: u8) -> Option<char> {
    match code {
        0..=9 => char::from_digit(code as u32, 10),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + (code - 12)) as char),
        _ => None,
    }
}
