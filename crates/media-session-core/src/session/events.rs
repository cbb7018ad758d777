//! Engine events routed back into the session
//!
//! Engines report through their [`EngineEventSink`](crate::engine::EngineEventSink);
//! every event carries the generation the engine was created for. Events from
//! a generation the endpoint has moved past are dropped here, so a restarted
//! stream never sees its predecessor's reports.

use tracing::{debug, info, warn};

use super::{MediaSessionCore, SecurityEventKind};
use crate::engine::{dtmf_char, EngineEvent, TaggedEngineEvent, TransportErrorReason};
use crate::error::{MediaError, Result};
use crate::security::{EncryptionScheme, HandshakeStart};
use crate::types::{MediaKind, SecurityState, StreamIndex};

impl MediaSessionCore {
    /// Check that an event belongs to the current lifecycle of its stream
    fn validate_event(&self, event: &TaggedEngineEvent) -> Result<()> {
        let index = event.stream_index;
        let endpoint = self
            .orchestrator
            .get(index)
            .ok_or(MediaError::StreamNotFound { index })?;
        if !endpoint.has_engine() || endpoint.generation() != event.generation {
            return Err(MediaError::StaleEvent {
                index,
                event_generation: event.generation,
                current_generation: endpoint.generation(),
            });
        }
        Ok(())
    }

    /// Apply one engine event
    ///
    /// Stale events are logged and ignored; they are not an error for the caller.
    pub async fn handle_transport_event(&mut self, event: TaggedEngineEvent) -> Result<()> {
        if let Err(e) = self.validate_event(&event) {
            if e.is_stale() {
                debug!("Dropping stale engine event {:?}: {}", event.event, e);
            } else {
                debug!("Dropping engine event {:?} of call {}: {}", event.event, self.call_id, e);
            }
            return Ok(());
        }
        let index = event.stream_index;

        match event.event {
            EngineEvent::EncryptionChanged { encrypted } => self.on_engine_encryption_changed(index, encrypted).await,
            EngineEvent::SasReady { sas, verified } => self.on_engine_sas_ready(index, sas, verified).await,
            EngineEvent::TelephoneEvent { code } => match dtmf_char(code) {
                Some(dtmf) => {
                    debug!("Stream {} received DTMF {}", index, dtmf);
                    self.listener.on_telephone_event(index, dtmf).await;
                }
                None => warn!("Stream {} reported unknown telephone event {}", index, code),
            },
            EngineEvent::TransportError { reason } => self.on_engine_transport_error(index, reason).await,
        }
        Ok(())
    }

    /// Apply every event already queued; returns how many were taken
    pub async fn drain_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            count += 1;
            if let Err(e) = self.handle_transport_event(event).await {
                warn!("Engine event failed on call {}: {}", self.call_id, e);
            }
        }
        count
    }

    /// Wait for the next engine event and apply it
    ///
    /// Returns `false` once no engine can send anymore.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                if let Err(e) = self.handle_transport_event(event).await {
                    warn!("Engine event failed on call {}: {}", self.call_id, e);
                }
                true
            }
            None => false,
        }
    }

    async fn on_engine_encryption_changed(&mut self, index: StreamIndex, encrypted: bool) {
        let Some(endpoint) = self.orchestrator.get_mut(index) else {
            return;
        };
        if !endpoint.on_encryption_changed(encrypted) {
            return;
        }
        let scheme = endpoint.security().scheme;
        let state = endpoint.security().state;
        info!("🔐 Stream {} {} encryption {:?}", index, scheme, state);

        if state == SecurityState::Failed && scheme == EncryptionScheme::DtlsSrtp {
            let failure = MediaError::SecurityHandshake {
                index,
                reason: TransportErrorReason::FingerprintMismatch,
            };
            self.handle_security_failure(index, failure).await;
        } else if encrypted && scheme == EncryptionScheme::Zrtp && self.is_main(MediaKind::Audio, index) {
            // the primary ZRTP session keys the other streams
            for (secondary, result) in self.orchestrator.enable_pending_handshakes(HandshakeStart::AfterPrimary).await {
                if let Err(e) = result {
                    self.handle_security_failure(secondary, e).await;
                }
            }
        }
        self.update_encryption_status().await;
    }

    async fn on_engine_sas_ready(&mut self, index: StreamIndex, sas: String, verified: bool) {
        let Some(endpoint) = self.orchestrator.get_mut(index) else {
            return;
        };
        endpoint.on_auth_token(sas.clone(), verified);
        info!("🔑 Stream {} authentication token ready (verified: {})", index, verified);
        if self.is_main(MediaKind::Audio, index) {
            self.listener.on_auth_token_ready(&sas, verified).await;
        }
        self.update_encryption_status().await;
    }

    async fn on_engine_transport_error(&mut self, index: StreamIndex, reason: TransportErrorReason) {
        if reason.is_security() {
            self.handle_security_failure(index, MediaError::SecurityHandshake { index, reason })
                .await;
        } else {
            let failure = MediaError::engine(index, reason.to_string());
            self.orchestrator.fail_at(index, failure.clone()).await;
            self.listener.on_stream_error(index, &failure).await;
            self.release_sound_devices_if_idle().await;
        }
        self.update_encryption_status().await;
    }

    /// Mark the ZRTP authentication token of the main audio stream as checked
    ///
    /// Revoking a verification that was given before is reported as a possible
    /// man-in-the-middle.
    pub async fn set_auth_token_verified(&mut self, verified: bool) -> Result<()> {
        let index = self
            .main_stream_index(MediaKind::Audio)
            .ok_or_else(|| MediaError::invalid_state("no main audio stream"))?;
        let endpoint = self
            .orchestrator
            .get_mut(index)
            .ok_or(MediaError::StreamNotFound { index })?;
        let previous = endpoint.set_auth_token_verified(verified)?;

        if previous && !verified {
            warn!("⚠️ Authentication token of call {} revoked", self.call_id);
            self.listener
                .on_security_event_detected(&self.peer, SecurityEventKind::ManInTheMiddleDetected)
                .await;
        }
        self.update_encryption_status().await;
        Ok(())
    }
}
