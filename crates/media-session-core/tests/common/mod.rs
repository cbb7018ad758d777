//! Shared mocks for the media session scenario tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use media_session_core::config::MediaSessionConfig;
use media_session_core::description::{MediaDescription, PayloadType, StreamDescription};
use media_session_core::engine::{
    AudioProcessing, EngineEvent, EngineEventSink, EngineStartParams, IoDescriptor, StreamEngine,
    StreamEngineFactory, StreamStatistics,
};
use media_session_core::error::{MediaError, Result};
use media_session_core::ports::{PortConfig, BindCheck};
use media_session_core::security::EncryptionParams;
use media_session_core::session::{CallSessionListener, MediaSessionCore, SecurityEventKind};
use media_session_core::types::{MediaKind, StreamIndex};

/// Bind check that accepts every port
pub struct OpenPorts;

impl BindCheck for OpenPorts {
    fn try_bind(&self, _ip: IpAddr, _port: u16) -> io::Result<()> {
        Ok(())
    }
}

/// Bind check refusing a number of candidates before accepting
#[derive(Default)]
pub struct FlakyPorts {
    pub failures_left: Mutex<u32>,
    pub tried: Mutex<Vec<u16>>,
}

impl FlakyPorts {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: Mutex::new(times),
            tried: Mutex::new(Vec::new()),
        }
    }
}

impl BindCheck for FlakyPorts {
    fn try_bind(&self, _ip: IpAddr, port: u16) -> io::Result<()> {
        self.tried.lock().push(port);
        let mut left = self.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        }
        Ok(())
    }
}

/// What engines were asked to do, shared by every mock engine of a test
#[derive(Default)]
pub struct EngineLog {
    pub calls: Mutex<Vec<String>>,
    /// Latest event sink handed out per stream index
    pub sinks: Mutex<HashMap<StreamIndex, EngineEventSink>>,
    pub io: Mutex<HashMap<StreamIndex, IoDescriptor>>,
    pub processing: Mutex<HashMap<StreamIndex, AudioProcessing>>,
    pub muted: Mutex<HashMap<StreamIndex, bool>>,
}

impl EngineLog {
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c.starts_with(call))
    }

    pub fn sink(&self, index: StreamIndex) -> EngineEventSink {
        self.sinks.lock().get(&index).cloned().expect("no engine created for stream")
    }

    pub fn emit(&self, index: StreamIndex, event: EngineEvent) {
        self.sink(index).emit(event);
    }
}

pub struct MockEngine {
    index: StreamIndex,
    log: Arc<EngineLog>,
    fail_start: bool,
    fail_encryption: bool,
    encrypted: bool,
}

#[async_trait]
impl StreamEngine for MockEngine {
    async fn prepare(&mut self, processing: Option<&AudioProcessing>) -> Result<()> {
        self.log.calls.lock().push(format!("prepare:{}", self.index));
        if let Some(processing) = processing {
            self.log.processing.lock().insert(self.index, processing.clone());
        }
        Ok(())
    }

    async fn start(&mut self, params: &EngineStartParams) -> Result<()> {
        self.log
            .calls
            .lock()
            .push(format!("start:{}:{}:pt{}", self.index, params.local_port, params.payload_type));
        if self.fail_start {
            return Err(MediaError::engine(self.index, "could not open I/O"));
        }
        self.log.io.lock().insert(self.index, params.io.clone());
        Ok(())
    }

    async fn reconfigure(&mut self, params: &EngineStartParams) -> Result<()> {
        self.log
            .calls
            .lock()
            .push(format!("reconfigure:{}:pt{}", self.index, params.payload_type));
        Ok(())
    }

    async fn set_io(&mut self, io: &IoDescriptor) -> Result<()> {
        self.log.calls.lock().push(format!("set_io:{}", self.index));
        self.log.io.lock().insert(self.index, io.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.calls.lock().push(format!("stop:{}", self.index));
        Ok(())
    }

    async fn enable_encryption(&mut self, params: &EncryptionParams) -> Result<()> {
        self.log
            .calls
            .lock()
            .push(format!("encrypt:{}:{}", self.index, params.scheme()));
        if self.fail_encryption {
            return Err(MediaError::engine(self.index, "keys rejected"));
        }
        self.encrypted = true;
        Ok(())
    }

    fn encryption_state(&self) -> bool {
        self.encrypted
    }

    fn statistics(&self) -> StreamStatistics {
        StreamStatistics {
            packets_sent: 50,
            packets_received: 48,
            ..Default::default()
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.log.muted.lock().insert(self.index, muted);
    }

    fn echo_canceller_state(&self) -> Option<String> {
        (self.index == 0).then(|| "ec-state-1".to_string())
    }
}

/// Engine factory with scriptable failures
#[derive(Default)]
pub struct MockFactory {
    pub log: Arc<EngineLog>,
    /// Bind failures to report before creating engines again
    pub bind_failures: Mutex<u32>,
    pub fail_start: Mutex<Vec<MediaKind>>,
    pub fail_encryption: Mutex<bool>,
}

impl StreamEngineFactory for MockFactory {
    fn create(
        &self,
        kind: MediaKind,
        _bind_ip: IpAddr,
        ports: &PortConfig,
        events: EngineEventSink,
    ) -> Result<Box<dyn StreamEngine>> {
        let index = events.stream_index();
        self.log
            .calls
            .lock()
            .push(format!("create:{}:{}:g{}", index, ports.rtp_port, ports.generation));
        {
            let mut failures = self.bind_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(MediaError::transport_bind(index, ports.rtp_port, "address in use"));
            }
        }
        self.log.sinks.lock().insert(index, events);
        Ok(Box::new(MockEngine {
            index,
            log: self.log.clone(),
            fail_start: self.fail_start.lock().contains(&kind),
            fail_encryption: *self.fail_encryption.lock(),
            encrypted: false,
        }))
    }
}

/// Notification seen by the recording listener
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StreamsStarting(bool),
    SoundNeeded,
    SoundReleased,
    EncryptionChanged(bool),
    AuthToken(String, bool),
    SecurityEvent(String, SecurityEventKind),
    Dtmf(StreamIndex, char),
    StreamError(StreamIndex, String),
}

#[derive(Default)]
pub struct RecordingListener {
    pub seen: Mutex<Vec<Notification>>,
    pub ringback: Mutex<bool>,
}

impl RecordingListener {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen.lock())
    }

    pub fn contains(&self, notification: &Notification) -> bool {
        self.seen.lock().contains(notification)
    }

    pub fn stream_errors(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::StreamError(..)))
            .count()
    }

    fn push(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

#[async_trait]
impl CallSessionListener for RecordingListener {
    async fn on_streams_starting(&self, mute: bool) {
        self.push(Notification::StreamsStarting(mute));
    }

    async fn on_sound_resources_needed(&self) {
        self.push(Notification::SoundNeeded);
    }

    async fn on_sound_resources_released(&self) {
        self.push(Notification::SoundReleased);
    }

    async fn on_encryption_changed(&self, encrypted: bool) {
        self.push(Notification::EncryptionChanged(encrypted));
    }

    async fn on_auth_token_ready(&self, token: &str, verified: bool) {
        self.push(Notification::AuthToken(token.to_string(), verified));
    }

    async fn on_security_event_detected(&self, participant: &str, kind: SecurityEventKind) {
        self.push(Notification::SecurityEvent(participant.to_string(), kind));
    }

    async fn on_telephone_event(&self, index: StreamIndex, dtmf: char) {
        self.push(Notification::Dtmf(index, dtmf));
    }

    async fn on_stream_error(&self, index: StreamIndex, error: &MediaError) {
        self.push(Notification::StreamError(index, error.to_string()));
    }

    fn is_playing_ringback_tone(&self) -> bool {
        *self.ringback.lock()
    }
}

/// Everything a scenario needs to drive and observe one call
pub struct Harness {
    pub session: MediaSessionCore,
    pub factory: Arc<MockFactory>,
    pub listener: Arc<RecordingListener>,
}

impl Harness {
    pub fn log(&self) -> &EngineLog {
        &self.factory.log
    }
}

pub fn harness(config: MediaSessionConfig) -> Harness {
    harness_with(config, Arc::new(MockFactory::default()))
}

pub fn harness_with(config: MediaSessionConfig, factory: Arc<MockFactory>) -> Harness {
    let listener = Arc::new(RecordingListener::default());
    let session = MediaSessionCore::builder("call-1")
        .peer("sip:bob@example.com")
        .config(config)
        .engine_factory(factory.clone())
        .listener(listener.clone())
        .bind_check(Arc::new(OpenPorts))
        .build()
        .expect("valid configuration");
    Harness {
        session,
        factory,
        listener,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn pcmu() -> PayloadType {
    PayloadType::new(0, "PCMU", 8000)
}

pub fn vp8() -> PayloadType {
    PayloadType::new(96, "VP8", 90000)
}

pub fn audio_line(port: u16) -> StreamDescription {
    StreamDescription::new(MediaKind::Audio, port).with_payload(pcmu())
}

pub fn video_line(port: u16) -> StreamDescription {
    StreamDescription::new(MediaKind::Video, port).with_payload(vp8())
}

/// Plain audio + video answer on 7078/9078
pub fn audio_video_answer() -> MediaDescription {
    MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7078))
        .with_stream(video_line(9078))
}
