//! Stream endpoints
//!
//! A [`StreamEndpoint`] wraps the engine of one media line. It is generic over
//! the media kind; what differs between audio, video and text comes from the
//! [`kind`] strategy table. Each port configuration attached to an endpoint
//! starts a new lifecycle (`Unconfigured → Starting → Running ⇄ Paused →
//! Stopped`, or `Failed`), identified by its generation.

pub mod kind;

use tracing::{debug, error, info, warn};

use crate::engine::{AudioProcessing, EngineStartParams, IoDescriptor, StreamEngine, StreamStatistics};
use crate::error::{MediaError, Result};
use crate::ports::PortConfig;
use crate::security::{AuthToken, EncryptionParams, EncryptionScheme, SecurityContext};
use crate::types::{Generation, MediaKind, SecurityState, StreamDirection, StreamIndex, StreamState};

pub use kind::{strategy, KindStrategy};

/// One media line of the call and the engine serving it
pub struct StreamEndpoint {
    index: StreamIndex,
    kind: MediaKind,
    direction: StreamDirection,
    state: StreamState,
    security: SecurityContext,
    ports: Option<PortConfig>,
    generation: Generation,
    engine: Option<Box<dyn StreamEngine>>,
    params: Option<EngineStartParams>,
    handshake_started: bool,
    last_error: Option<MediaError>,
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("security", &self.security)
            .field("ports", &self.ports)
            .field("generation", &self.generation)
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}

impl StreamEndpoint {
    pub fn new(index: StreamIndex, kind: MediaKind) -> Self {
        Self {
            index,
            kind,
            direction: StreamDirection::SendRecv,
            state: StreamState::Unconfigured,
            security: SecurityContext::none(),
            ports: None,
            generation: Generation::default(),
            engine: None,
            params: None,
            handshake_started: false,
            last_error: None,
        }
    }

    pub fn index(&self) -> StreamIndex {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn strategy(&self) -> &'static KindStrategy {
        strategy(self.kind)
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn ports(&self) -> Option<&PortConfig> {
        self.ports.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Parameters the running transport was started or reconfigured with
    pub fn params(&self) -> Option<&EngineStartParams> {
        self.params.as_ref()
    }

    /// Security parameters were handed to the current engine
    pub fn handshake_started(&self) -> bool {
        self.handshake_started
    }

    pub fn last_error(&self) -> Option<&MediaError> {
        self.last_error.as_ref()
    }

    /// The line carries a different kind after renegotiation
    pub(crate) fn set_kind(&mut self, kind: MediaKind) {
        self.kind = kind;
    }

    pub(crate) fn set_security(&mut self, security: SecurityContext) {
        self.security = security;
        self.handshake_started = false;
    }

    /// Bind a freshly created engine; starts a new lifecycle
    pub(crate) fn attach(&mut self, engine: Box<dyn StreamEngine>, ports: PortConfig) {
        debug!(
            "Stream {} attached engine on ports {}/{} (generation {})",
            self.index, ports.rtp_port, ports.rtcp_port, ports.generation
        );
        self.engine = Some(engine);
        self.generation = ports.generation;
        self.ports = Some(ports);
        self.state = StreamState::Unconfigured;
        self.params = None;
        self.handshake_started = false;
        self.last_error = None;
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn StreamEngine>> {
        let index = self.index;
        self.engine
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state(format!("stream {} has no engine", index)))
    }

    pub(crate) async fn prepare(&mut self, processing: Option<&AudioProcessing>) -> Result<()> {
        self.engine_mut()?.prepare(processing).await
    }

    /// Start the transport; Running only once the engine confirmed its I/O binding
    pub(crate) async fn start_transport(&mut self, params: EngineStartParams) -> Result<()> {
        if self.state != StreamState::Unconfigured {
            return Err(MediaError::invalid_state(format!(
                "stream {} cannot start from {}",
                self.index, self.state
            )));
        }

        self.state = StreamState::Starting;
        self.direction = params.direction;
        let result = self.engine_mut()?.start(&params).await;

        match result {
            Ok(()) => {
                info!(
                    "▶️ Stream {} ({}) running: {}:{} → {}:{} pt {}",
                    self.index,
                    self.kind,
                    params.local_addr,
                    params.local_port,
                    params.remote_addr,
                    params.remote_port,
                    params.payload_type
                );
                self.state = StreamState::Running;
                self.params = Some(params);
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Hand the security parameters to the engine
    ///
    /// Refused until the transport runs. SRTP is protected as soon as the
    /// engine accepts the keys; ZRTP and DTLS wait for the handshake to report.
    pub(crate) async fn enable_security(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(MediaError::invalid_state(format!(
                "stream {} handshake requested while {}",
                self.index, self.state
            )));
        }
        if !self.security.is_pending() || self.handshake_started {
            return Ok(());
        }
        let params = match self.security.params.clone() {
            Some(params) => params,
            None => return Ok(()),
        };

        let result = self.engine_mut()?.enable_encryption(&params).await;
        match result {
            Ok(()) => {
                self.handshake_started = true;
                // SDES keys need no handshake once the engine confirms them
                if matches!(params, EncryptionParams::Srtp(_)) && self.engine_encrypted() {
                    self.security.state = SecurityState::Active;
                }
                info!("🔐 Stream {} {} handshake started", self.index, self.security.scheme);
                Ok(())
            }
            Err(e) => {
                warn!("Stream {} could not enable {}: {}", self.index, self.security.scheme, e);
                self.security.state = SecurityState::Failed;
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    pub(crate) async fn reconfigure(&mut self, params: EngineStartParams) -> Result<()> {
        if !self.state.is_active() {
            return Err(MediaError::invalid_state(format!(
                "stream {} cannot be reconfigured while {}",
                self.index, self.state
            )));
        }
        self.engine_mut()?.reconfigure(&params).await?;
        debug!("Stream {} reconfigured, pt {}", self.index, params.payload_type);
        self.params = Some(params);
        Ok(())
    }

    /// Swap the I/O of an active stream without changing its state
    pub(crate) async fn set_io(&mut self, io: IoDescriptor) -> Result<()> {
        self.engine_mut()?.set_io(&io).await?;
        if let Some(params) = self.params.as_mut() {
            params.io = io;
        }
        Ok(())
    }

    /// Running → Paused with the I/O of the hold policy
    pub(crate) async fn pause(&mut self, io: IoDescriptor) -> Result<()> {
        match self.state {
            StreamState::Paused => return Ok(()),
            StreamState::Running => {}
            other => {
                return Err(MediaError::invalid_state(format!(
                    "stream {} cannot pause while {}",
                    self.index, other
                )))
            }
        }
        self.set_io(io).await?;
        self.state = StreamState::Paused;
        info!("⏸️ Stream {} paused", self.index);
        Ok(())
    }

    /// Paused → Running with re-resolved I/O
    pub(crate) async fn resume(&mut self, io: IoDescriptor) -> Result<()> {
        match self.state {
            StreamState::Running => return Ok(()),
            StreamState::Paused => {}
            other => {
                return Err(MediaError::invalid_state(format!(
                    "stream {} cannot resume while {}",
                    self.index, other
                )))
            }
        }
        self.set_io(io).await?;
        self.state = StreamState::Running;
        info!("▶️ Stream {} resumed", self.index);
        Ok(())
    }

    /// Stop the engine and give up its ports
    ///
    /// Returns the echo canceller state the engine had, if any.
    pub(crate) async fn stop(&mut self) -> Option<String> {
        let engine = self.engine.take();
        let ec_state = match engine {
            Some(mut engine) => {
                let ec_state = engine.echo_canceller_state();
                if let Err(e) = engine.stop().await {
                    warn!("Stream {} engine stop failed: {}", self.index, e);
                }
                ec_state
            }
            None => None,
        };

        self.ports = None;
        if self.state != StreamState::Failed {
            self.state = StreamState::Stopped;
        }
        if self.security.is_encrypted() && self.security.state != SecurityState::Failed {
            self.security.state = SecurityState::Idle;
        }
        info!("⏹️ Stream {} ({}) stopped", self.index, self.kind);
        ec_state
    }

    /// Land in Failed and release the engine
    pub(crate) async fn fail(&mut self, error: MediaError) {
        error!("❌ Stream {} ({}) failed: {}", self.index, self.kind, error);
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.stop().await {
                debug!("Stream {} engine stop after failure: {}", self.index, e);
            }
        }
        self.ports = None;
        self.state = StreamState::Failed;
        if self.security.is_pending() {
            self.security.state = SecurityState::Failed;
        }
        self.last_error = Some(error);
    }

    /// Apply an encryption-changed report; returns whether the security state changed
    pub(crate) fn on_encryption_changed(&mut self, encrypted: bool) -> bool {
        let before = self.security.state;
        self.security.state = match (encrypted, self.security.scheme) {
            (_, EncryptionScheme::None) => {
                debug!("Stream {} reported encryption change without a scheme", self.index);
                before
            }
            (true, EncryptionScheme::DtlsSrtp) => {
                let fingerprint_known = matches!(
                    &self.security.params,
                    Some(EncryptionParams::DtlsSrtp(p)) if p.remote_fingerprint.is_some()
                );
                if fingerprint_known {
                    SecurityState::Active
                } else {
                    warn!("Stream {} DTLS up without a signalled fingerprint", self.index);
                    SecurityState::Failed
                }
            }
            (true, _) if before == SecurityState::Verified => SecurityState::Verified,
            (true, _) => {
                if self.security.auth_token.as_ref().map_or(false, |t| t.verified) {
                    SecurityState::Verified
                } else {
                    SecurityState::Active
                }
            }
            (false, _) => SecurityState::Idle,
        };
        before != self.security.state
    }

    /// Record the short authentication string reported by ZRTP
    pub(crate) fn on_auth_token(&mut self, sas: String, verified: bool) {
        self.security.auth_token = Some(AuthToken { sas, verified });
        if verified && self.security.state == SecurityState::Active {
            self.security.state = SecurityState::Verified;
        }
    }

    /// Set the verified flag of the token; returns the previous flag
    pub(crate) fn set_auth_token_verified(&mut self, verified: bool) -> Result<bool> {
        let index = self.index;
        let token = self
            .security
            .auth_token
            .as_mut()
            .ok_or_else(|| MediaError::invalid_state(format!("stream {} has no authentication token", index)))?;
        let previous = token.verified;
        token.verified = verified;

        match (verified, self.security.state) {
            (true, SecurityState::Active) => self.security.state = SecurityState::Verified,
            (false, SecurityState::Verified) => self.security.state = SecurityState::Active,
            _ => {}
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.set_auth_token_verified(verified);
        }
        Ok(previous)
    }

    pub(crate) fn on_security_failure(&mut self, error: MediaError) {
        warn!("🔓 Stream {} security failed: {}", self.index, error);
        self.security.state = SecurityState::Failed;
        self.last_error = Some(error);
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_muted(muted);
        }
    }

    pub fn statistics(&self) -> Option<StreamStatistics> {
        self.engine.as_ref().map(|engine| engine.statistics())
    }

    /// Engine view of whether media leaves encrypted
    pub fn engine_encrypted(&self) -> bool {
        self.engine.as_ref().map_or(false, |engine| engine.encryption_state())
    }
}
