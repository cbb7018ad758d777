//! Per media kind behavior of a stream endpoint

use crate::types::MediaKind;

/// What differs between audio, video and text streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindStrategy {
    pub kind: MediaKind,
    /// Lower starts first; audio seeds the ZRTP auxiliary secret for the rest
    pub start_order: u8,
    /// Claims playback/capture devices from the arbiter
    pub uses_sound_devices: bool,
    /// Takes part in the session-level encryption verdict
    pub encryption_capable: bool,
    /// May run the full ZRTP exchange other streams join in multistream mode
    pub can_be_zrtp_primary: bool,
    /// Receives audio processing settings on prepare
    pub audio_processing: bool,
}

static STRATEGIES: [KindStrategy; 3] = [
    KindStrategy {
        kind: MediaKind::Audio,
        start_order: 0,
        uses_sound_devices: true,
        encryption_capable: true,
        can_be_zrtp_primary: true,
        audio_processing: true,
    },
    KindStrategy {
        kind: MediaKind::Video,
        start_order: 1,
        uses_sound_devices: false,
        encryption_capable: true,
        can_be_zrtp_primary: false,
        audio_processing: false,
    },
    KindStrategy {
        kind: MediaKind::Text,
        start_order: 2,
        uses_sound_devices: false,
        encryption_capable: true,
        can_be_zrtp_primary: false,
        audio_processing: false,
    },
];

pub fn strategy(kind: MediaKind) -> &'static KindStrategy {
    match kind {
        MediaKind::Audio => &STRATEGIES[0],
        MediaKind::Video => &STRATEGIES[1],
        MediaKind::Text => &STRATEGIES[2],
    }
}
