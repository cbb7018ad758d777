//! Per-call media negotiation and stream lifecycle for SIP endpoints.
//!
//! A [`MediaSessionCore`] sits between a call's signaling state machine and
//! its streaming engines. From negotiated session descriptions it decides
//! which audio, video and text streams run, on which ports, with which I/O,
//! and under which encryption scheme (SRTP, ZRTP or DTLS-SRTP). It keeps
//! those streams consistent through re-INVITEs, hold and resume, transfer and
//! hangup, and turns asynchronous engine reports into call-session
//! notifications.
//!
//! The RTP transport itself is not implemented here: streams drive a
//! [`StreamEngine`] created by the application's [`StreamEngineFactory`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_session_core::prelude::*;
//!
//! # async fn run(factory: Arc<dyn StreamEngineFactory>, answer: MediaDescription) -> Result<()> {
//! let mut session = MediaSessionCore::builder("call-1")
//!     .config(MediaSessionConfig::default())
//!     .engine_factory(factory)
//!     .build()?;
//!
//! session.initialize_streams().await?;
//! session.start_streams(answer, CallState::StreamsRunning).await?;
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Shared types
pub mod types;

// Configuration
pub mod config;

// Session descriptions and their diff
pub mod description;

// Port allocation
pub mod ports;

// Encryption negotiation
pub mod security;

// Sound device ownership
pub mod device;

// Streaming engine contract
pub mod engine;

// Stream endpoints
pub mod stream;

// Stream sequencing
pub mod orchestrator;

// Call-level media session
pub mod session;

#[cfg(test)]
mod testing;

// Public exports
pub use config::{
    EchoCancellationConfig, EchoLimiterMode, EncryptionConfig, EqualizerLocation, MediaSessionConfig, NetworkConfig,
    RtpLoopbackMode, SoundConfig, StreamTypeConfig,
};
pub use description::{
    CryptoAttribute, DescriptionSet, DescriptionSnapshot, DtlsSetup, MediaDescription, MulticastRole, PayloadType,
    StreamAction, StreamDescription,
};
pub use device::DeviceArbiter;
pub use engine::{
    AudioProcessing, EngineEvent, EngineEventSink, EngineStartParams, IoDescriptor, IoResource, StreamEngine,
    StreamEngineFactory, StreamStatistics, TaggedEngineEvent, TransportErrorReason,
};
pub use error::{MediaError, Result};
pub use orchestrator::StreamsOrchestrator;
pub use ports::{BindCheck, PortAllocator, PortConfig, PortPolicy, PortRange, UdpBindCheck};
pub use security::{
    AuthToken, EncryptionParams, EncryptionScheme, HandshakeStart, LocalSecurityCapabilities, SecurityContext,
    SecurityNegotiator,
};
pub use session::{CallSessionListener, MediaSessionCore, MediaSessionCoreBuilder, NoopListener, SecurityEventKind};
pub use stream::StreamEndpoint;
pub use types::{CallState, Generation, MediaKind, SecurityState, StreamDirection, StreamIndex, StreamState};

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        CallSessionListener, CallState, EncryptionScheme, EngineEvent, EngineEventSink, EngineStartParams,
        IoDescriptor, MediaDescription, MediaError, MediaKind, MediaSessionConfig, MediaSessionCore, PayloadType,
        Result, SecurityEventKind, StreamDescription, StreamDirection, StreamEngine, StreamEngineFactory,
        StreamState,
    };
}
