//! Core types shared by every layer of the media session

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a media line inside a session description
pub type StreamIndex = usize;

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Text,
}

impl MediaKind {
    /// All kinds, in start order
    pub const ALL: [MediaKind; 3] = [MediaKind::Audio, MediaKind::Video, MediaKind::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Text => "text",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media direction attribute of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl StreamDirection {
    /// Whether local media is sent in this direction
    pub fn sends(&self) -> bool {
        matches!(self, StreamDirection::SendRecv | StreamDirection::SendOnly)
    }

    /// Whether remote media is received in this direction
    pub fn receives(&self) -> bool {
        matches!(self, StreamDirection::SendRecv | StreamDirection::RecvOnly)
    }
}

impl Default for StreamDirection {
    fn default() -> Self {
        StreamDirection::SendRecv
    }
}

/// Lifecycle state of one stream
///
/// `Unconfigured → Starting → Running ⇄ Paused → Stopped`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    Unconfigured,
    Starting,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl StreamState {
    /// Running or paused: transport is bound and owns its ports
    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::Running | StreamState::Paused)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Security sub-state of one stream
///
/// `Idle → Negotiating → Active → Verified`; `Verified` only exists for ZRTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityState {
    Idle,
    Negotiating,
    Active,
    Verified,
    Failed,
}

impl SecurityState {
    /// Media on the stream is protected
    pub fn is_secure(&self) -> bool {
        matches!(self, SecurityState::Active | SecurityState::Verified)
    }
}

/// Call-session state a stream operation is heading to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Early media before the call is answered
    EarlyMedia,
    /// Call answered, media flowing
    StreamsRunning,
    /// Locally put on hold
    Paused,
    /// Remote party put us on hold
    PausedByRemote,
    /// Call is over
    End,
}

/// Lifecycle counter of one stream index
///
/// Incremented every time the index gets a fresh port configuration, so events
/// from a previous lifecycle can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
