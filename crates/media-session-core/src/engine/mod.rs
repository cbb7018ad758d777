//! Streaming engine contract
//!
//! The actual RTP transport, codecs and DSP live outside this crate. Each
//! stream drives one [`StreamEngine`] created by a [`StreamEngineFactory`]
//! for a given port configuration; the engine reports back through the
//! [`EngineEventSink`] it was created with.

pub mod events;

use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{EchoCancellationConfig, EchoLimiterMode, EqualizerLocation, SoundConfig};
use crate::description::PayloadType;
use crate::error::Result;
use crate::ports::PortConfig;
use crate::security::EncryptionParams;
use crate::types::{MediaKind, StreamDirection};

pub use events::{
    dtmf_char, event_channel, EngineEvent, EngineEventReceiver, EngineEventSender, EngineEventSink,
    TaggedEngineEvent, TransportErrorReason,
};

/// Source or sink of media for one direction of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IoResource {
    /// Nothing is captured or rendered
    Disabled,
    /// Named sound card; empty name selects the default device
    Soundcard(String),
    /// Play from or record to a file; `None` plays silence or discards
    File(Option<PathBuf>),
    /// Media is looped back over RTP
    RtpLoopback,
    /// Conference mixer
    Mixer,
    /// Whatever the engine uses for this media kind (camera, display, text buffer)
    EngineDefault,
}

impl IoResource {
    pub fn is_soundcard(&self) -> bool {
        matches!(self, IoResource::Soundcard(_))
    }
}

/// Input and output resources of a stream, chosen independently
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoDescriptor {
    pub input: IoResource,
    pub output: IoResource,
}

impl IoDescriptor {
    pub fn new(input: IoResource, output: IoResource) -> Self {
        Self { input, output }
    }

    pub fn disabled() -> Self {
        Self::new(IoResource::Disabled, IoResource::Disabled)
    }

    pub fn uses_soundcard(&self) -> bool {
        self.input.is_soundcard() || self.output.is_soundcard()
    }
}

/// Audio processing settings passed through to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProcessing {
    pub echo_cancellation: EchoCancellationConfig,
    pub echo_limiter: EchoLimiterMode,
    pub equalizer_location: EqualizerLocation,
    pub noise_gate: bool,
    pub automatic_gain_control: bool,
    /// Echo canceller state saved by a previous stream of the call
    pub echo_canceller_state: Option<String>,
}

impl AudioProcessing {
    pub fn from_config(sound: &SoundConfig) -> Self {
        Self {
            echo_cancellation: sound.echo_cancellation,
            echo_limiter: sound.echo_limiter,
            equalizer_location: sound.equalizer_location,
            noise_gate: sound.noise_gate,
            automatic_gain_control: sound.automatic_gain_control,
            echo_canceller_state: None,
        }
    }
}

/// Everything an engine needs to bring a stream up
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStartParams {
    /// Negotiated payload types, in preference order
    pub profile: Vec<PayloadType>,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub local_rtcp_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub remote_rtcp_addr: String,
    /// Zero disables RTCP
    pub remote_rtcp_port: u16,
    /// Payload type number used for sending
    pub payload_type: u8,
    pub direction: StreamDirection,
    pub io: IoDescriptor,
    pub multicast: bool,
    /// Upload bandwidth cap in kbit/s
    pub bandwidth: Option<u32>,
    /// Only true when a capture sound card feeds the stream
    pub use_echo_canceller: bool,
}

/// Counters reported by an engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStatistics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_lost: u64,
    pub jitter_ms: f64,
    pub round_trip_ms: Option<f64>,
}

/// One running media transport
#[async_trait]
pub trait StreamEngine: Send {
    /// Get ready before start; audio engines receive their processing setup
    async fn prepare(&mut self, processing: Option<&AudioProcessing>) -> Result<()>;

    /// Bind I/O and start sending and receiving
    async fn start(&mut self, params: &EngineStartParams) -> Result<()>;

    /// Apply new codec or bitrate settings without touching the transport
    async fn reconfigure(&mut self, params: &EngineStartParams) -> Result<()>;

    /// Swap the I/O resources of a running stream
    async fn set_io(&mut self, io: &IoDescriptor) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Configure keys and start the security handshake, if the scheme has one
    async fn enable_encryption(&mut self, params: &EncryptionParams) -> Result<()>;

    /// Whether media currently leaves the engine encrypted
    fn encryption_state(&self) -> bool;

    fn statistics(&self) -> StreamStatistics;

    fn set_muted(&mut self, _muted: bool) {}

    /// Mark the ZRTP short authentication string as checked by the user
    fn set_auth_token_verified(&mut self, _verified: bool) {}

    /// Echo canceller state to carry over to the next stream of the call
    fn echo_canceller_state(&self) -> Option<String> {
        None
    }
}

/// Creates engines bound to a port configuration
pub trait StreamEngineFactory: Send + Sync {
    /// Bind the transport for `ports`; a bind failure must be reported as
    /// `MediaError::TransportBind` so another candidate can be tried
    fn create(
        &self,
        kind: MediaKind,
        bind_ip: IpAddr,
        ports: &PortConfig,
        events: EngineEventSink,
    ) -> Result<Box<dyn StreamEngine>>;
}
