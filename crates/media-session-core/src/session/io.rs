//! Choice of input and output resources for a stream

use crate::config::{RtpLoopbackMode, SoundConfig};
use crate::description::{MulticastRole, StreamDescription};
use crate::engine::{IoDescriptor, IoResource};
use crate::types::{CallState, StreamDirection};

/// Call-level facts the I/O choice depends on
pub(crate) struct IoContext<'a> {
    pub sound: &'a SoundConfig,
    pub target: CallState,
    pub in_conference: bool,
    pub playing_ringback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IoPlan {
    pub io: IoDescriptor,
    /// The sound devices were claimed for this stream
    pub claimed_devices: bool,
    /// Set when the stream runs inside a conference
    pub conference_mute: Option<bool>,
    pub use_echo_canceller: bool,
}

/// Resolve audio I/O
///
/// `claim(playback, capture)` is asked for the sound cards the stream would
/// like; when it refuses, the stream falls back to file I/O.
pub(crate) fn resolve_audio_io(
    ctx: &IoContext<'_>,
    sd: &StreamDescription,
    claim: impl FnOnce(bool, bool) -> bool,
) -> IoPlan {
    let sound = ctx.sound;

    if ctx.in_conference {
        return IoPlan {
            io: IoDescriptor::new(IoResource::Mixer, IoResource::Mixer),
            claimed_devices: false,
            conference_mute: Some(sd.direction == StreamDirection::RecvOnly),
            use_echo_canceller: false,
        };
    }

    let receive_only = !sd.direction.sends() || sd.multicast_role == MulticastRole::Receiver;
    let paused = ctx.target == CallState::Paused;

    if paused {
        let input = match (&sound.hold_file, sound.keep_hold_file_playing) {
            (Some(file), true) if !receive_only => IoResource::File(Some(file.clone())),
            _ => IoResource::Disabled,
        };
        return IoPlan {
            io: IoDescriptor::new(input, IoResource::Disabled),
            claimed_devices: false,
            conference_mute: None,
            use_echo_canceller: false,
        };
    }

    let mut capture = !receive_only && sound.rtp_loopback == RtpLoopbackMode::Off;
    let mut playback = sd.direction.receives() && sound.rtp_loopback != RtpLoopbackMode::Full;
    if ctx.playing_ringback {
        capture = false;
        if sound.send_ringback_without_playback {
            playback = false;
        }
    }

    let use_cards = !sound.use_files && sound.rtp_loopback != RtpLoopbackMode::Full;
    let claimed = use_cards && (capture || playback) && claim(playback, capture);

    let input = if sound.rtp_loopback != RtpLoopbackMode::Off {
        IoResource::RtpLoopback
    } else if receive_only {
        IoResource::Disabled
    } else if claimed && capture {
        IoResource::Soundcard(sound.capture_device.clone().unwrap_or_default())
    } else if ctx.playing_ringback {
        // the engine injects the ringback tone
        IoResource::File(None)
    } else {
        IoResource::File(sound.play_file.clone())
    };

    let output = if sound.rtp_loopback == RtpLoopbackMode::Full {
        IoResource::RtpLoopback
    } else if !sd.direction.receives() {
        IoResource::Disabled
    } else if claimed && playback {
        IoResource::Soundcard(sound.playback_device.clone().unwrap_or_default())
    } else {
        IoResource::File(sound.record_file.clone())
    };

    let use_echo_canceller = input.is_soundcard() && sound.echo_cancellation.enabled;
    IoPlan {
        io: IoDescriptor::new(input, output),
        claimed_devices: claimed,
        conference_mute: None,
        use_echo_canceller,
    }
}

/// Video and text streams use the engine's own devices
pub(crate) fn resolve_default_io(sd: &StreamDescription, target: CallState) -> IoDescriptor {
    if target == CallState::Paused {
        return IoDescriptor::disabled();
    }
    let input = if sd.direction.sends() && sd.multicast_role != MulticastRole::Receiver {
        IoResource::EngineDefault
    } else {
        IoResource::Disabled
    };
    let output = if sd.direction.receives() {
        IoResource::EngineDefault
    } else {
        IoResource::Disabled
    };
    IoDescriptor::new(input, output)
}
