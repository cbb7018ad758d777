//! Media session of one call
//!
//! [`MediaSessionCore`] turns negotiated descriptions into running streams and
//! keeps them consistent across call-session transitions and engine events.
//! Every entry point takes `&mut self`: transitions and the draining of queued
//! engine events are serialized by construction, never re-entrant.

pub mod events;
pub(crate) mod io;
pub mod listener;
pub mod transitions;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::MediaSessionConfig;
use crate::description::{diff_descriptions, is_multicast, DescriptionSet, MediaDescription, StreamAction, StreamDescription};
use crate::device::DeviceArbiter;
use crate::engine::{
    event_channel, AudioProcessing, EngineEventReceiver, EngineStartParams, IoDescriptor, StreamEngineFactory,
    StreamStatistics,
};
use crate::error::{MediaError, Result};
use crate::orchestrator::{StartPlan, StreamsOrchestrator};
use crate::ports::{BindCheck, PortAllocator, PortConfig, UdpBindCheck};
use crate::security::{
    AuthToken, EncryptionScheme, HandshakeStart, LocalSecurityCapabilities, SecurityContext, SecurityNegotiator,
};
use crate::stream::{strategy, StreamEndpoint};
use crate::types::{CallState, Generation, MediaKind, SecurityState, StreamIndex, StreamState};

use self::io::{resolve_audio_io, resolve_default_io, IoContext, IoPlan};
pub use self::listener::{CallSessionListener, NoopListener, SecurityEventKind};

/// Builder for [`MediaSessionCore`]
pub struct MediaSessionCoreBuilder {
    call_id: String,
    peer: String,
    config: MediaSessionConfig,
    factory: Option<Arc<dyn StreamEngineFactory>>,
    listener: Arc<dyn CallSessionListener>,
    devices: Option<DeviceArbiter>,
    bind_check: Arc<dyn BindCheck>,
}

impl MediaSessionCoreBuilder {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            peer: String::new(),
            config: MediaSessionConfig::default(),
            factory: None,
            listener: Arc::new(NoopListener),
            devices: None,
            bind_check: Arc::new(UdpBindCheck),
        }
    }

    /// Remote participant named in security events
    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn config(mut self, config: MediaSessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine_factory(mut self, factory: Arc<dyn StreamEngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CallSessionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Share sound device ownership with the other calls of the process
    pub fn device_arbiter(mut self, devices: DeviceArbiter) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn bind_check(mut self, bind_check: Arc<dyn BindCheck>) -> Self {
        self.bind_check = bind_check;
        self
    }

    pub fn build(self) -> Result<MediaSessionCore> {
        self.config.validate()?;
        let factory = self
            .factory
            .ok_or_else(|| MediaError::config("an engine factory is required"))?;

        let network = &self.config.network;
        let bind_ip: IpAddr = network.bind_address;
        let allocator = PortAllocator::new(bind_ip, network.port_bind_attempts, self.bind_check);
        let (events_tx, events_rx) = event_channel();
        let orchestrator =
            StreamsOrchestrator::new(allocator, factory, events_tx, bind_ip, network.port_bind_attempts);

        info!("🎬 Media session created for call {}", self.call_id);
        Ok(MediaSessionCore {
            call_id: self.call_id,
            peer: self.peer,
            config: self.config,
            listener: self.listener,
            devices: self.devices.unwrap_or_default(),
            orchestrator,
            descriptions: DescriptionSet::new(),
            events_rx,
            local_is_offerer: false,
            initialized: false,
            main_indices: HashMap::new(),
            start_counts: HashMap::new(),
            call_state: None,
            encrypted: false,
            in_conference: false,
            microphone_muted: false,
            holds_sound_devices: false,
            echo_canceller_state: None,
            terminated: false,
        })
    }
}

/// Media negotiation and stream lifecycle of one call
///
/// Call [`MediaSessionCore::terminate`] to stop the engines. Dropping the
/// session without it still hands the sound devices back to the arbiter.
pub struct MediaSessionCore {
    call_id: String,
    peer: String,
    config: MediaSessionConfig,
    listener: Arc<dyn CallSessionListener>,
    devices: DeviceArbiter,
    orchestrator: StreamsOrchestrator,
    descriptions: DescriptionSet,
    events_rx: EngineEventReceiver,
    local_is_offerer: bool,
    initialized: bool,
    main_indices: HashMap<MediaKind, StreamIndex>,
    start_counts: HashMap<MediaKind, u32>,
    call_state: Option<CallState>,
    encrypted: bool,
    in_conference: bool,
    microphone_muted: bool,
    holds_sound_devices: bool,
    echo_canceller_state: Option<String>,
    terminated: bool,
}

impl MediaSessionCore {
    pub fn builder(call_id: impl Into<String>) -> MediaSessionCoreBuilder {
        MediaSessionCoreBuilder::new(call_id)
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn config(&self) -> &MediaSessionConfig {
        &self.config
    }

    pub fn descriptions(&self) -> &DescriptionSet {
        &self.descriptions
    }

    pub fn call_state(&self) -> Option<CallState> {
        self.call_state
    }

    /// Record the description we sent; sets the offerer role if no remote one is known yet
    pub fn set_local_description(&mut self, description: MediaDescription) {
        if self.descriptions.remote().is_none() {
            self.local_is_offerer = true;
        }
        self.descriptions.set_local(description);
    }

    pub fn set_remote_description(&mut self, description: MediaDescription) {
        if self.descriptions.local().is_none() {
            self.local_is_offerer = false;
        }
        self.descriptions.set_remote(description);
    }

    pub fn set_local_is_offerer(&mut self, offerer: bool) {
        self.local_is_offerer = offerer;
    }

    pub fn local_is_offerer(&self) -> bool {
        self.local_is_offerer
    }

    /// Audio runs through the conference mixer from the next start on
    pub fn set_in_conference(&mut self, in_conference: bool) {
        self.in_conference = in_conference;
    }

    // ---- queries ----

    pub fn stream(&self, index: StreamIndex) -> Option<&StreamEndpoint> {
        self.orchestrator.get(index)
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamEndpoint> {
        self.orchestrator.endpoints()
    }

    pub fn stream_indices(&self) -> Vec<StreamIndex> {
        self.orchestrator.endpoints().map(|e| e.index()).collect()
    }

    pub fn stream_state(&self, index: StreamIndex) -> Option<StreamState> {
        self.orchestrator.get(index).map(|e| e.state())
    }

    pub fn security_context(&self, index: StreamIndex) -> Option<&SecurityContext> {
        self.orchestrator.get(index).map(|e| e.security())
    }

    pub fn port_config(&self, index: StreamIndex) -> Option<PortConfig> {
        self.orchestrator.port_config(index).copied()
    }

    pub fn generation(&self, index: StreamIndex) -> Option<Generation> {
        self.orchestrator.get(index).map(|e| e.generation())
    }

    /// Every active stream is protected
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// ZRTP authentication token of the main audio stream
    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.main_stream(MediaKind::Audio)
            .and_then(|e| e.security().auth_token.as_ref())
    }

    pub fn main_stream_index(&self, kind: MediaKind) -> Option<StreamIndex> {
        self.main_indices.get(&kind).copied()
    }

    fn main_stream(&self, kind: MediaKind) -> Option<&StreamEndpoint> {
        self.main_stream_index(kind).and_then(|i| self.orchestrator.get(i))
    }

    /// Successful transport starts of a kind during this call
    pub fn start_count(&self, kind: MediaKind) -> u32 {
        self.start_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Engine statistics of the main stream of a kind
    pub fn statistics(&self, kind: MediaKind) -> Option<StreamStatistics> {
        self.main_stream(kind).and_then(|e| e.statistics())
    }

    pub fn holds_sound_devices(&self) -> bool {
        self.holds_sound_devices
    }

    /// Echo canceller state saved from the last stopped audio stream
    pub fn echo_canceller_state(&self) -> Option<&str> {
        self.echo_canceller_state.as_deref()
    }

    // ---- stream set ----

    fn pin_main_indices(&mut self, md: &MediaDescription) {
        for kind in MediaKind::ALL {
            if self.main_indices.contains_key(&kind) {
                continue;
            }
            if let Some(index) = md.first_stream_of(kind) {
                debug!("Main {} stream of call {} is index {}", kind, self.call_id, index);
                self.main_indices.insert(kind, index);
            }
        }
    }

    /// Bind one endpoint per stream kind so its ports can be advertised
    async fn bind_streams(&mut self, kinds: &[MediaKind]) -> Result<()> {
        let local = self.descriptions.local().map(|s| s.description.clone());
        if let Some(local) = &local {
            self.pin_main_indices(local);
        }

        for (position, kind) in kinds.iter().copied().enumerate() {
            let index = self.main_stream_index(kind).unwrap_or(position);
            if self.orchestrator.get(index).map_or(false, |e| e.kind() != kind) {
                debug!("Index {} already holds another kind, not binding {}", index, kind);
                continue;
            }
            self.orchestrator.ensure_endpoint(index, kind).await;
            let policy = self.config.port_policy(kind);
            if let Err(e) = self.orchestrator.provision(index, &policy) {
                error!("Could not bind {} stream {} of call {}: {}", kind, index, self.call_id, e);
                self.orchestrator.fail_at(index, e.clone()).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Create and bind one endpoint per enabled stream type; no-op when done already
    pub async fn initialize_streams(&mut self) -> Result<()> {
        if self.initialized {
            debug!("Streams of call {} already initialized", self.call_id);
            return Ok(());
        }
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        let kinds: Vec<_> = MediaKind::ALL
            .into_iter()
            .filter(|k| self.config.stream(*k).enabled)
            .collect();
        self.bind_streams(&kinds).await?;
        self.initialized = true;
        info!("🧩 Initialized {} stream(s) for call {}", kinds.len(), self.call_id);
        Ok(())
    }

    /// Indices of a description in start order: audio first
    fn start_order(md: &MediaDescription) -> Vec<StreamIndex> {
        let mut indices: Vec<_> = (0..md.len()).collect();
        indices.sort_by_key(|i| {
            let order = md.streams[*i].kind.map_or(u8::MAX, |k| strategy(k).start_order);
            (order, *i)
        });
        indices
    }

    /// Start every enabled stream of a negotiated description
    ///
    /// Per-stream failures are reported to the listener and leave that stream
    /// Failed; siblings still start. The error returned is
    /// [`MediaError::MainStreamFailed`] when the main audio stream or the only
    /// stream of the call could not start.
    pub async fn start_streams(&mut self, result: MediaDescription, target: CallState) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        let md = self.descriptions.set_result(result).description;
        self.call_state = Some(target);
        self.pin_main_indices(&md);
        info!("🚀 Starting streams of call {} toward {:?}", self.call_id, target);

        let caps = LocalSecurityCapabilities::from_config(&self.config.encryption, self.local_is_offerer)?;
        let mut fatal = None;

        for index in Self::start_order(&md) {
            let sd = &md.streams[index];
            let Some(kind) = sd.kind else {
                debug!("Skipping stream {} of unknown kind", index);
                continue;
            };
            if !sd.is_enabled() {
                self.orchestrator.ensure_endpoint(index, kind).await;
                if self.stream_active(index) {
                    self.stop_stream(index).await;
                }
                continue;
            }
            if let Err(e) = self.start_stream(&md, index, &caps, false).await {
                self.report_stream_failure(&md, index, e, &mut fatal).await;
            }
        }

        self.drop_streams_beyond(md.len()).await;
        self.release_sound_devices_if_idle().await;
        self.update_encryption_status().await;
        fatal.map_or(Ok(()), Err)
    }

    /// Apply a renegotiated description
    ///
    /// Each stream is diffed against the previous result: unchanged streams
    /// keep running on their ports, codec or bitrate changes are applied in
    /// place, anything else restarts the stream on a fresh generation.
    pub async fn update_streams(&mut self, result: MediaDescription, target: CallState) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        let previous = match self.descriptions.result() {
            Some(snapshot) => snapshot.description.clone(),
            None => return self.start_streams(result, target).await,
        };
        let md = self.descriptions.set_result(result).description;
        self.call_state = Some(target);
        self.pin_main_indices(&md);

        let caps = LocalSecurityCapabilities::from_config(&self.config.encryption, self.local_is_offerer)?;
        let mut actions = diff_descriptions(&previous, &md);
        actions.sort_by_key(|(i, _)| {
            let kind = md.stream(*i).and_then(|s| s.kind).or_else(|| previous.stream(*i).and_then(|s| s.kind));
            (kind.map_or(u8::MAX, |k| strategy(k).start_order), *i)
        });

        let mut fatal = None;
        for (index, action) in actions {
            if action != StreamAction::Unchanged {
                info!("🔀 Call {} stream {}: {:?}", self.call_id, index, action);
            }
            let outcome = match action {
                StreamAction::Unchanged => Ok(()),
                StreamAction::Reconfigure => self.reconfigure_stream(&md, index, &caps).await,
                StreamAction::Restart => self.start_stream(&md, index, &caps, true).await,
                StreamAction::Start => self.start_stream(&md, index, &caps, false).await,
                StreamAction::Stop => {
                    self.stop_stream(index).await;
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                self.report_stream_failure(&md, index, e, &mut fatal).await;
            }
        }

        self.drop_streams_beyond(md.len()).await;
        self.release_sound_devices_if_idle().await;
        self.update_encryption_status().await;
        fatal.map_or(Ok(()), Err)
    }

    fn stream_active(&self, index: StreamIndex) -> bool {
        self.orchestrator.get(index).map_or(false, |e| e.state().is_active())
    }

    fn is_main(&self, kind: MediaKind, index: StreamIndex) -> bool {
        self.main_indices.get(&kind) == Some(&index)
    }

    /// Start (or restart) one stream of a description
    async fn start_stream(
        &mut self,
        md: &MediaDescription,
        index: StreamIndex,
        caps: &LocalSecurityCapabilities,
        restart: bool,
    ) -> Result<()> {
        let sd = md.stream(index).ok_or(MediaError::StreamNotFound { index })?;
        let kind = sd
            .kind
            .ok_or_else(|| MediaError::config(format!("stream {} has no media kind", index)))?;

        self.orchestrator.ensure_endpoint(index, kind).await;
        if !restart && self.stream_active(index) {
            debug!("Stream {} already running", index);
            return Ok(());
        }

        let payload_type = match sd.first_usable_payload() {
            Some(pt) => pt.number,
            None => {
                let e = MediaError::NoUsablePayload { index };
                self.orchestrator.fail_at(index, e.clone()).await;
                return Err(e);
            }
        };

        let is_primary = strategy(kind).can_be_zrtp_primary && self.is_main(kind, index);
        let security = match SecurityNegotiator::derive_scheme_and_params(caps, sd, index, is_primary) {
            Ok(security) => security,
            Err(e) => {
                self.orchestrator.fail_at(index, e.clone()).await;
                return Err(e);
            }
        };

        let plan = self.resolve_io(kind, sd).await;
        let params = self.engine_params(md, sd, payload_type, plan.io, plan.use_echo_canceller);
        let processing = strategy(kind).audio_processing.then(|| {
            let mut processing = AudioProcessing::from_config(&self.config.sound);
            processing.echo_canceller_state = self.echo_canceller_state.clone();
            processing.echo_cancellation.enabled = plan.use_echo_canceller;
            processing
        });
        let policy = self.config.port_policy(kind);
        let start_plan = StartPlan {
            params,
            processing,
            security,
        };

        if restart {
            if let Some(state) = self.orchestrator.restart_at(index, &policy, start_plan).await? {
                self.echo_canceller_state = Some(state);
            }
        } else {
            self.orchestrator.start_at(index, &policy, start_plan).await?;
        }

        *self.start_counts.entry(kind).or_insert(0) += 1;
        if kind == MediaKind::Audio && self.microphone_muted {
            if let Some(endpoint) = self.orchestrator.get_mut(index) {
                endpoint.set_muted(true);
            }
        }
        self.start_multistream_if_keyed(index).await;
        self.check_security_after_start(index).await;
        Ok(())
    }

    /// The main audio ZRTP session is up and can key other streams
    fn primary_zrtp_secure(&self) -> bool {
        self.main_stream(MediaKind::Audio).map_or(false, |e| {
            e.state().is_active() && e.security().scheme == EncryptionScheme::Zrtp && e.security().is_secure()
        })
    }

    /// A secondary ZRTP stream (re)started after the primary went secure gets
    /// no further primary event, so its handshake starts right away
    async fn start_multistream_if_keyed(&mut self, index: StreamIndex) {
        let waits_for_primary = self
            .orchestrator
            .get(index)
            .map_or(false, |e| {
                e.security().start == HandshakeStart::AfterPrimary && e.security().is_pending() && !e.handshake_started()
            });
        if !waits_for_primary || !self.primary_zrtp_secure() {
            return;
        }
        debug!("Primary ZRTP of call {} already secure, keying stream {}", self.call_id, index);
        // a refused handshake leaves the endpoint Failed for check_security_after_start
        if let Err(e) = self.orchestrator.enable_handshake_at(index).await {
            debug!("Multistream handshake of stream {} refused: {}", index, e);
        }
    }

    async fn reconfigure_stream(
        &mut self,
        md: &MediaDescription,
        index: StreamIndex,
        caps: &LocalSecurityCapabilities,
    ) -> Result<()> {
        let current = match self.orchestrator.get(index).filter(|e| e.state().is_active()) {
            Some(endpoint) => endpoint.params().cloned(),
            None => return self.start_stream(md, index, caps, false).await,
        };
        let current = current.ok_or_else(|| MediaError::invalid_state(format!("stream {} has no parameters", index)))?;
        let sd = md.stream(index).ok_or(MediaError::StreamNotFound { index })?;

        let payload_type = match sd.first_usable_payload() {
            Some(pt) => pt.number,
            None => {
                let e = MediaError::NoUsablePayload { index };
                self.orchestrator.fail_at(index, e.clone()).await;
                return Err(e);
            }
        };

        let params = self.engine_params(md, sd, payload_type, current.io, current.use_echo_canceller);
        if let Err(e) = self.orchestrator.reconfigure_at(index, params).await {
            warn!("Stream {} could not be reconfigured in place ({}), restarting", index, e);
            return self.start_stream(md, index, caps, true).await;
        }
        Ok(())
    }

    pub(crate) async fn stop_stream(&mut self, index: StreamIndex) {
        if let Some(state) = self.orchestrator.stop_at(index).await {
            self.echo_canceller_state = Some(state);
        }
    }

    /// Endpoints past the end of the description left the negotiated set
    async fn drop_streams_beyond(&mut self, len: usize) {
        let stale: Vec<_> = self.stream_indices().into_iter().filter(|i| *i >= len).collect();
        for index in stale {
            info!("🗑️ Stream {} removed from call {}", index, self.call_id);
            self.stop_stream(index).await;
            self.orchestrator.remove(index);
        }
    }

    fn engine_params(
        &self,
        md: &MediaDescription,
        sd: &StreamDescription,
        payload_type: u8,
        io: IoDescriptor,
        use_echo_canceller: bool,
    ) -> EngineStartParams {
        let remote_addr = md.rtp_addr_of(sd);
        let multicast = is_multicast(remote_addr);
        let remote_rtcp_port = if self.config.network.rtcp_enabled && !multicast {
            if sd.rtcp_port != 0 {
                sd.rtcp_port
            } else {
                sd.rtp_port.saturating_add(1)
            }
        } else {
            0
        };

        EngineStartParams {
            profile: sd.payloads.clone(),
            local_addr: self.config.network.bind_address,
            local_port: 0,
            local_rtcp_port: 0,
            remote_addr: remote_addr.to_string(),
            remote_port: sd.rtp_port,
            remote_rtcp_addr: md.rtcp_addr_of(sd).to_string(),
            remote_rtcp_port,
            payload_type,
            direction: sd.direction,
            io,
            multicast,
            bandwidth: sd.bandwidth,
            use_echo_canceller,
        }
    }

    /// Pick the stream's I/O, claiming sound devices when it gets them
    async fn resolve_io(&mut self, kind: MediaKind, sd: &StreamDescription) -> IoPlan {
        let target = self.call_state.unwrap_or(CallState::StreamsRunning);
        if !strategy(kind).uses_sound_devices {
            return IoPlan {
                io: resolve_default_io(sd, target),
                claimed_devices: false,
                conference_mute: None,
                use_echo_canceller: false,
            };
        }

        let ctx = IoContext {
            sound: &self.config.sound,
            target,
            in_conference: self.in_conference,
            playing_ringback: self.listener.is_playing_ringback_tone(),
        };
        let devices = &self.devices;
        let owner = self.call_id.as_str();
        let plan = resolve_audio_io(&ctx, sd, |playback, capture| {
            if !devices.is_available(owner, playback, capture) {
                debug!("Sound devices owned by another call, {} uses non-device I/O", owner);
                return false;
            }
            devices.acquire(owner, playback, capture)
        });

        if plan.claimed_devices && !self.holds_sound_devices {
            self.holds_sound_devices = true;
            self.listener.on_sound_resources_needed().await;
        }
        if let Some(mute) = plan.conference_mute {
            self.listener.on_streams_starting(mute).await;
        }
        plan
    }

    /// Give the sound devices back once no active stream uses them
    pub(crate) async fn release_sound_devices_if_idle(&mut self) {
        if !self.holds_sound_devices {
            return;
        }
        let in_use = self.orchestrator.endpoints().any(|e| {
            e.state().is_active() && e.params().map_or(false, |p| p.io.uses_soundcard())
        });
        if in_use {
            return;
        }
        self.devices.release(&self.call_id);
        self.holds_sound_devices = false;
        debug!("Call {} released the sound devices", self.call_id);
        self.listener.on_sound_resources_released().await;
    }

    async fn report_stream_failure(
        &mut self,
        md: &MediaDescription,
        index: StreamIndex,
        e: MediaError,
        fatal: &mut Option<MediaError>,
    ) {
        let enabled = md.streams.iter().filter(|s| s.is_enabled()).count();
        let is_fatal = self.is_main(MediaKind::Audio, index) || enabled == 1;
        if is_fatal {
            error!("❌ Main stream {} of call {} failed: {}", index, self.call_id, e);
        } else {
            warn!("Stream {} of call {} failed, siblings continue: {}", index, self.call_id, e);
        }
        self.listener.on_stream_error(index, &e).await;
        if is_fatal && fatal.is_none() {
            *fatal = Some(MediaError::MainStreamFailed {
                index,
                reason: e.to_string(),
            });
        }
    }

    async fn check_security_after_start(&mut self, index: StreamIndex) {
        let failure = match self.orchestrator.get(index) {
            Some(endpoint) if endpoint.security().state == SecurityState::Failed => endpoint
                .last_error()
                .cloned()
                .unwrap_or_else(|| MediaError::security_negotiation(index, "encryption could not be enabled")),
            _ => return,
        };
        self.handle_security_failure(index, failure).await;
    }

    /// Apply the encryption policy to a stream whose security failed
    ///
    /// Plain RTP goes on when policy allows it; otherwise the stream is stopped
    /// and a security event is raised.
    pub(crate) async fn handle_security_failure(&mut self, index: StreamIndex, failure: MediaError) {
        if let Some(endpoint) = self.orchestrator.get_mut(index) {
            endpoint.on_security_failure(failure.clone());
        }
        self.listener.on_stream_error(index, &failure).await;

        if self.config.encryption.mandatory {
            error!("🔓 Stream {} of call {} stopped: encryption is mandatory", index, self.call_id);
            self.stop_stream(index).await;
            self.listener
                .on_security_event_detected(&self.peer, SecurityEventKind::EncryptionFailed)
                .await;
            self.release_sound_devices_if_idle().await;
        } else {
            warn!("Stream {} of call {} continues unencrypted", index, self.call_id);
        }
    }

    /// Session verdict from the active encryption-capable streams
    ///
    /// `None` while some stream is still negotiating and none is plain or
    /// failed: a renegotiated stream keeps the previous verdict until its
    /// handshake reports.
    fn encryption_verdict(&self) -> Option<bool> {
        let mut seen = false;
        let mut pending = false;
        for endpoint in self
            .orchestrator
            .endpoints()
            .filter(|e| e.state().is_active() && e.strategy().encryption_capable)
        {
            seen = true;
            let security = endpoint.security();
            if security.is_pending() {
                pending = true;
            } else if !security.is_secure() {
                return Some(false);
            }
        }
        match (seen, pending) {
            (false, _) => Some(false),
            (true, true) => None,
            (true, false) => Some(true),
        }
    }

    /// Recompute the session-level encryption verdict and report changes
    pub(crate) async fn update_encryption_status(&mut self) {
        let Some(encrypted) = self.encryption_verdict() else {
            debug!("Call {} keeps its encryption verdict while streams negotiate", self.call_id);
            return;
        };
        if encrypted == self.encrypted {
            return;
        }
        self.encrypted = encrypted;
        info!(
            "🔐 Call {} media is now {}",
            self.call_id,
            if encrypted { "encrypted" } else { "unencrypted" }
        );
        self.listener.on_encryption_changed(encrypted).await;
        if !encrypted {
            warn!("Security level of call {} downgraded", self.call_id);
            self.listener
                .on_security_event_detected(&self.peer, SecurityEventKind::SecurityLevelDowngraded)
                .await;
        }
    }
}

impl Drop for MediaSessionCore {
    fn drop(&mut self) {
        // engine stop is async; only the shared device claim can be undone here
        if self.devices.holds_any(&self.call_id) {
            self.devices.release(&self.call_id);
            warn!("Call {} dropped without terminate, sound devices released", self.call_id);
        }
    }
}
