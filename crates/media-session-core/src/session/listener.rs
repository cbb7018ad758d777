//! Notifications from the media session to the call session

use async_trait::async_trait;
use serde::Serialize;

use crate::error::MediaError;
use crate::types::StreamIndex;

/// Security events raised to signaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityEventKind {
    /// Session encryption went from on to off
    SecurityLevelDowngraded,
    /// A previously verified authentication token was revoked
    ManInTheMiddleDetected,
    /// Handshake failed and policy does not allow plain RTP; the stream was stopped
    EncryptionFailed,
}

/// Receiver of media session events
///
/// Every method has a default that does nothing, so a call session only
/// implements what it cares about.
#[async_trait]
pub trait CallSessionListener: Send + Sync {
    /// Audio is about to run inside a conference; `mute` when receive-only
    async fn on_streams_starting(&self, _mute: bool) {}

    /// The call is about to claim the sound devices
    async fn on_sound_resources_needed(&self) {}

    async fn on_sound_resources_released(&self) {}

    /// Session-level encryption verdict changed
    async fn on_encryption_changed(&self, _encrypted: bool) {}

    /// ZRTP short authentication string of the main audio stream
    async fn on_auth_token_ready(&self, _token: &str, _verified: bool) {}

    async fn on_security_event_detected(&self, _participant: &str, _kind: SecurityEventKind) {}

    /// DTMF received in-band
    async fn on_telephone_event(&self, _index: StreamIndex, _dtmf: char) {}

    /// A stream failed or degraded; siblings keep running
    async fn on_stream_error(&self, _index: StreamIndex, _error: &MediaError) {}

    /// Ringback tone is being played to the user
    fn is_playing_ringback_tone(&self) -> bool {
        false
    }
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl CallSessionListener for NoopListener {}
