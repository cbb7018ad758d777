//! Call-session transitions
//!
//! Each method maps one signaling event onto the streams: accept, ACK, hold
//! and resume in both directions, transfer, ICE gathering and termination.

use tracing::{debug, info, warn};

use super::io::resolve_default_io;
use super::MediaSessionCore;
use crate::description::MediaDescription;
use crate::engine::{IoDescriptor, IoResource};
use crate::error::{MediaError, Result};
use crate::security::HandshakeStart;
use crate::stream::strategy;
use crate::types::{CallState, MediaKind, StreamIndex, StreamState};

impl MediaSessionCore {
    /// The call was answered with `result` as the negotiated description
    pub async fn accept(&mut self, result: MediaDescription) -> Result<()> {
        info!("✅ Call {} accepted", self.call_id);
        let outcome = self.update_streams(result, CallState::StreamsRunning).await;
        // early media may have left streams on ringback or file I/O
        self.refresh_io().await;
        outcome
    }

    /// The ACK of the call setup arrived; deferred handshakes may start
    pub async fn ack_received(&mut self) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        debug!("ACK received on call {}", self.call_id);
        for (index, result) in self.orchestrator.enable_pending_handshakes(HandshakeStart::DeferredToAck).await {
            if let Err(e) = result {
                self.handle_security_failure(index, e).await;
            }
        }
        self.update_encryption_status().await;
        Ok(())
    }

    /// Local hold: streams keep their transport, sound devices are given back
    pub async fn pause(&mut self) -> Result<()> {
        info!("⏸️ Call {} put on hold", self.call_id);
        self.pause_streams(true).await
    }

    /// Hold for a call transfer; never plays the hold file
    pub async fn pause_for_transfer(&mut self) -> Result<()> {
        info!("⏸️ Call {} paused for transfer", self.call_id);
        self.pause_streams(false).await
    }

    async fn pause_streams(&mut self, allow_hold_file: bool) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        self.call_state = Some(CallState::Paused);

        let hold_io = {
            let sound = &self.config.sound;
            match (&sound.hold_file, sound.keep_hold_file_playing && allow_hold_file) {
                (Some(file), true) => IoDescriptor::new(IoResource::File(Some(file.clone())), IoResource::Disabled),
                _ => IoDescriptor::disabled(),
            }
        };

        for index in self.orchestrator.ordered_indices() {
            let Some(endpoint) = self.orchestrator.get_mut(index) else {
                continue;
            };
            if endpoint.state() != StreamState::Running {
                continue;
            }
            let sends = endpoint.direction().sends();
            let io = if endpoint.kind() == MediaKind::Audio && sends {
                hold_io.clone()
            } else {
                IoDescriptor::disabled()
            };
            if let Err(e) = endpoint.pause(io).await {
                warn!("Stream {} could not be paused: {}", index, e);
                self.listener.on_stream_error(index, &e).await;
            }
        }
        self.release_sound_devices_if_idle().await;
        Ok(())
    }

    /// The remote party put us on hold with a new description
    pub async fn paused_by_remote(&mut self, result: MediaDescription) -> Result<()> {
        info!("⏸️ Call {} paused by remote", self.call_id);
        let outcome = self.update_streams(result, CallState::PausedByRemote).await;
        self.refresh_io().await;
        outcome
    }

    /// Local resume with the renegotiated description
    pub async fn resume(&mut self, result: MediaDescription) -> Result<()> {
        info!("▶️ Call {} resumed", self.call_id);
        let outcome = self.update_streams(result, CallState::StreamsRunning).await;
        self.refresh_io().await;
        outcome
    }

    /// The remote party resumed without changing the description
    pub async fn resumed(&mut self) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        info!("▶️ Call {} resumed by remote", self.call_id);
        self.call_state = Some(CallState::StreamsRunning);
        self.refresh_io().await;
        Ok(())
    }

    /// Re-resolve the I/O of every active stream against the current call state
    pub(crate) async fn refresh_io(&mut self) {
        let Some(md) = self.descriptions.result().map(|s| s.description.clone()) else {
            return;
        };
        let target = self.call_state.unwrap_or(CallState::StreamsRunning);

        for index in self.orchestrator.ordered_indices() {
            let Some(endpoint) = self.orchestrator.get(index) else {
                continue;
            };
            let state = endpoint.state();
            if !state.is_active() {
                continue;
            }
            let Some(sd) = md.stream(index) else {
                continue;
            };
            let kind = endpoint.kind();
            let current = endpoint.params().map(|p| p.io.clone());

            let io = if strategy(kind).uses_sound_devices {
                self.resolve_io(kind, sd).await.io
            } else {
                resolve_default_io(sd, target)
            };

            let Some(endpoint) = self.orchestrator.get_mut(index) else {
                continue;
            };
            let outcome = if state == StreamState::Paused && target != CallState::Paused {
                endpoint.resume(io).await
            } else if current.as_ref() != Some(&io) {
                debug!("Stream {} switches I/O to {:?}", index, io);
                endpoint.set_io(io).await
            } else {
                Ok(())
            };
            if let Err(e) = outcome {
                warn!("Stream {} I/O update failed: {}", index, e);
                self.listener.on_stream_error(index, &e).await;
            }
        }
        self.release_sound_devices_if_idle().await;
    }

    /// Give the streams up; safe to call more than once
    pub async fn terminate(&mut self) {
        if self.terminated {
            debug!("Call {} already terminated", self.call_id);
            return;
        }
        info!("🛑 Terminating media of call {}", self.call_id);
        self.terminated = true;

        for (_, state) in self.orchestrator.stop_all().await {
            self.echo_canceller_state = Some(state);
        }
        self.orchestrator.clear();
        self.release_sound_devices_if_idle().await;
        self.descriptions.clear();
        self.main_indices.clear();
        // no downgrade event on hangup
        self.encrypted = false;
        self.call_state = Some(CallState::End);
        self.initialized = false;

        let mut dropped = 0;
        while self.events_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} engine event(s) of call {}", dropped, self.call_id);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bind the streams whose ports the ICE agent needs to gather candidates
    pub async fn prepare_for_ice_gathering(&mut self, has_video: bool) -> Result<()> {
        if self.terminated {
            return Err(MediaError::invalid_state("call already terminated"));
        }
        let mut kinds = vec![MediaKind::Audio];
        if has_video && self.config.video.enabled {
            kinds.push(MediaKind::Video);
        }
        if self.config.text.enabled {
            kinds.push(MediaKind::Text);
        }
        debug!("Binding {:?} for ICE gathering on call {}", kinds, self.call_id);
        self.bind_streams(&kinds).await
    }

    /// Release streams bound only for gathering; started streams are kept
    pub async fn stop_streams_for_ice_gathering(&mut self) {
        let idle: Vec<StreamIndex> = self
            .orchestrator
            .endpoints()
            .filter(|e| e.has_engine() && e.state() == StreamState::Unconfigured)
            .map(|e| e.index())
            .collect();
        for index in idle {
            debug!("Releasing gathering-only stream {}", index);
            self.stop_stream(index).await;
        }
    }

    /// Mute the capture side of every audio stream
    pub fn set_microphone_muted(&mut self, muted: bool) {
        self.microphone_muted = muted;
        for endpoint in self.orchestrator.endpoints_mut() {
            if endpoint.kind() == MediaKind::Audio {
                endpoint.set_muted(muted);
            }
        }
    }

    pub fn is_microphone_muted(&self) -> bool {
        self.microphone_muted
    }
}
