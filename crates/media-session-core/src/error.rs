//! Error handling for the media session core
//!
//! Every failure a stream can hit is expressed as a [`MediaError`]. Errors that
//! concern a single stream never abort sibling streams; they are reported to the
//! call-session listener and the stream lands in a declared state.

use thiserror::Error;

use crate::engine::TransportErrorReason;
use crate::types::{Generation, StreamIndex};

/// Result type alias for media session operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error type for media session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The negotiated stream carries no payload type we can use
    #[error("No usable payload type for stream {index}")]
    NoUsablePayload { index: StreamIndex },

    /// A required capture or playback device is missing
    #[error("Required device missing for stream {index}: {device}")]
    DeviceMissing { index: StreamIndex, device: String },

    /// Socket creation or bind failure on a candidate port
    #[error("Transport bind failed for stream {index} on port {port}: {reason}")]
    TransportBind {
        index: StreamIndex,
        port: u16,
        reason: String,
    },

    /// Port allocation gave up after the bounded number of candidates
    #[error("Port allocation failed for stream {index} after {attempts} attempts")]
    PortAllocation { index: StreamIndex, attempts: u32 },

    /// Handshake timeout, authentication failure or fingerprint mismatch
    #[error("Security handshake failed on stream {index}: {reason}")]
    SecurityHandshake {
        index: StreamIndex,
        reason: TransportErrorReason,
    },

    /// Offered keying material could not be matched and policy forbids plaintext
    #[error("Security negotiation failed on stream {index}: {reason}")]
    SecurityNegotiation { index: StreamIndex, reason: String },

    /// Event referencing a superseded stream generation
    #[error("Stale event for stream {index}: generation {event_generation} (current {current_generation})")]
    StaleEvent {
        index: StreamIndex,
        event_generation: Generation,
        current_generation: Generation,
    },

    /// No endpoint exists at this index
    #[error("Stream not found: {index}")]
    StreamNotFound { index: StreamIndex },

    /// Operation not allowed in the current stream state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The streaming engine rejected an operation
    #[error("Engine error on stream {index}: {message}")]
    Engine { index: StreamIndex, message: String },

    /// The main (or only) stream of the call failed to start
    #[error("Main stream {index} failed: {reason}")]
    MainStreamFailed { index: StreamIndex, reason: String },
}

impl MediaError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an engine error
    pub fn engine(index: StreamIndex, message: impl Into<String>) -> Self {
        Self::Engine {
            index,
            message: message.into(),
        }
    }

    /// Create a transport bind error
    pub fn transport_bind(index: StreamIndex, port: u16, reason: impl Into<String>) -> Self {
        Self::TransportBind {
            index,
            port,
            reason: reason.into(),
        }
    }

    /// Create a security negotiation error
    pub fn security_negotiation(index: StreamIndex, reason: impl Into<String>) -> Self {
        Self::SecurityNegotiation {
            index,
            reason: reason.into(),
        }
    }

    /// Whether this error only concerns a superseded generation
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleEvent { .. })
    }

    /// Whether a retry on another port candidate may succeed
    pub fn is_bind_failure(&self) -> bool {
        matches!(self, Self::TransportBind { .. })
    }
}
