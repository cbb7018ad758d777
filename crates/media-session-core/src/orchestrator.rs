//! Stream sequencing
//!
//! [`StreamsOrchestrator`] owns the endpoints of one call, keyed by stream
//! index, and the port allocator they draw from. It guarantees two orderings:
//! a stream's ports are released before a restart claims new ones, and a
//! security handshake is only handed to an engine whose transport runs.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{AudioProcessing, EngineEventSender, EngineEventSink, EngineStartParams, StreamEngineFactory};
use crate::error::{MediaError, Result};
use crate::ports::{PortAllocator, PortConfig, PortPolicy};
use crate::security::{HandshakeStart, SecurityContext};
use crate::stream::{strategy, StreamEndpoint};
use crate::types::{MediaKind, StreamIndex};

/// Everything needed to start one stream
///
/// Local ports in `params` are filled in from the provisioned [`PortConfig`].
#[derive(Debug, Clone)]
pub struct StartPlan {
    pub params: EngineStartParams,
    pub processing: Option<AudioProcessing>,
    pub security: SecurityContext,
}

pub struct StreamsOrchestrator {
    endpoints: BTreeMap<StreamIndex, StreamEndpoint>,
    allocator: PortAllocator,
    factory: Arc<dyn StreamEngineFactory>,
    events: EngineEventSender,
    bind_ip: IpAddr,
    bind_attempts: u32,
}

impl StreamsOrchestrator {
    pub fn new(
        allocator: PortAllocator,
        factory: Arc<dyn StreamEngineFactory>,
        events: EngineEventSender,
        bind_ip: IpAddr,
        bind_attempts: u32,
    ) -> Self {
        Self {
            endpoints: BTreeMap::new(),
            allocator,
            factory,
            events,
            bind_ip,
            bind_attempts: bind_attempts.max(1),
        }
    }

    pub fn get(&self, index: StreamIndex) -> Option<&StreamEndpoint> {
        self.endpoints.get(&index)
    }

    pub(crate) fn get_mut(&mut self, index: StreamIndex) -> Option<&mut StreamEndpoint> {
        self.endpoints.get_mut(&index)
    }

    fn endpoint_mut(&mut self, index: StreamIndex) -> Result<&mut StreamEndpoint> {
        self.endpoints
            .get_mut(&index)
            .ok_or(MediaError::StreamNotFound { index })
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &StreamEndpoint> {
        self.endpoints.values()
    }

    pub(crate) fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut StreamEndpoint> {
        self.endpoints.values_mut()
    }

    /// Indices in start order: audio first, then by index
    pub fn ordered_indices(&self) -> Vec<StreamIndex> {
        let mut indices: Vec<_> = self.endpoints.keys().copied().collect();
        indices.sort_by_key(|i| (strategy(self.endpoints[i].kind()).start_order, *i));
        indices
    }

    /// Create the endpoint of an index if it does not exist yet
    ///
    /// An existing endpoint of another kind is stopped and converted.
    /// Returns whether the endpoint was created.
    pub async fn ensure_endpoint(&mut self, index: StreamIndex, kind: MediaKind) -> bool {
        match self.endpoints.get(&index).map(|e| e.kind()) {
            Some(existing) if existing == kind => false,
            Some(existing) => {
                info!("🔄 Stream {} changes kind {} → {}", index, existing, kind);
                self.stop_at(index).await;
                if let Some(endpoint) = self.endpoints.get_mut(&index) {
                    endpoint.set_kind(kind);
                }
                false
            }
            None => {
                debug!("Creating {} endpoint at index {}", kind, index);
                self.endpoints.insert(index, StreamEndpoint::new(index, kind));
                true
            }
        }
    }

    /// Bind an engine for the endpoint, retrying bind conflicts on fresh ports
    ///
    /// Keeps the current engine and ports when the endpoint already has them.
    pub fn provision(&mut self, index: StreamIndex, policy: &PortPolicy) -> Result<PortConfig> {
        let endpoint = self
            .endpoints
            .get_mut(&index)
            .ok_or(MediaError::StreamNotFound { index })?;
        if endpoint.has_engine() {
            if let Some(ports) = endpoint.ports() {
                return Ok(*ports);
            }
        }
        let kind = endpoint.kind();

        let mut ports = self.allocator.assign(index, policy)?;
        let mut attempt = 1;
        loop {
            let sink = EngineEventSink::new(index, ports.generation, self.events.clone());
            match self.factory.create(kind, self.bind_ip, &ports, sink) {
                Ok(engine) => {
                    endpoint.attach(engine, ports);
                    return Ok(ports);
                }
                Err(e) if e.is_bind_failure() && attempt < self.bind_attempts => {
                    warn!("Stream {} bind attempt {} failed: {}", index, attempt, e);
                    attempt += 1;
                    ports = self.allocator.reassign(index, policy)?;
                }
                Err(e) => {
                    self.allocator.release(index);
                    return Err(e);
                }
            }
        }
    }

    /// Provision and start one stream, then hand it an immediate handshake
    ///
    /// A transport failure leaves the stream Failed and is returned. A
    /// handshake failure leaves the transport running and shows up as a
    /// Failed security state on the endpoint.
    pub async fn start_at(&mut self, index: StreamIndex, policy: &PortPolicy, plan: StartPlan) -> Result<()> {
        let ports = match self.provision(index, policy) {
            Ok(ports) => ports,
            Err(e) => {
                self.fail_at(index, e.clone()).await;
                return Err(e);
            }
        };

        let StartPlan {
            mut params,
            processing,
            security,
        } = plan;
        params.local_addr = self.bind_ip;
        params.local_port = ports.rtp_port;
        params.local_rtcp_port = ports.rtcp_port;

        let endpoint = self
            .endpoints
            .get_mut(&index)
            .ok_or(MediaError::StreamNotFound { index })?;
        endpoint.set_security(security);

        if let Err(e) = endpoint.prepare(processing.as_ref()).await {
            endpoint.fail(e.clone()).await;
            self.allocator.release(index);
            return Err(e);
        }
        if let Err(e) = endpoint.start_transport(params).await {
            self.allocator.release(index);
            return Err(e);
        }

        if endpoint.security().start == HandshakeStart::Immediate {
            // failure is recorded in the endpoint's security state
            let _ = endpoint.enable_security().await;
        }
        Ok(())
    }

    /// Start the handshake of one running stream
    pub async fn enable_handshake_at(&mut self, index: StreamIndex) -> Result<()> {
        self.endpoint_mut(index)?.enable_security().await
    }

    /// Start every pending handshake waiting for `start`
    pub async fn enable_pending_handshakes(&mut self, start: HandshakeStart) -> Vec<(StreamIndex, Result<()>)> {
        let waiting: Vec<_> = self
            .ordered_indices()
            .into_iter()
            .filter(|i| {
                let endpoint = &self.endpoints[i];
                endpoint.state().is_active()
                    && endpoint.security().is_pending()
                    && endpoint.security().start == start
                    && !endpoint.handshake_started()
            })
            .collect();

        let mut results = Vec::with_capacity(waiting.len());
        for index in waiting {
            results.push((index, self.enable_handshake_at(index).await));
        }
        results
    }

    /// Apply codec or bitrate changes to a running stream
    pub async fn reconfigure_at(&mut self, index: StreamIndex, mut params: EngineStartParams) -> Result<()> {
        let endpoint = self.endpoint_mut(index)?;
        if let Some(current) = endpoint.params() {
            params.local_addr = current.local_addr;
            params.local_port = current.local_port;
            params.local_rtcp_port = current.local_rtcp_port;
        }
        endpoint.reconfigure(params).await
    }

    /// Stop one stream and give its ports back; the endpoint is kept as Stopped
    ///
    /// Returns the echo canceller state of the engine, if any.
    pub async fn stop_at(&mut self, index: StreamIndex) -> Option<String> {
        let endpoint = self.endpoints.get_mut(&index)?;
        let ec_state = endpoint.stop().await;
        self.allocator.release(index);
        ec_state
    }

    /// Stop then start again on a fresh generation
    ///
    /// The echo canceller state of the stopped engine seeds the new one.
    pub async fn restart_at(&mut self, index: StreamIndex, policy: &PortPolicy, mut plan: StartPlan) -> Result<Option<String>> {
        info!("🔁 Restarting stream {}", index);
        let ec_state = self.stop_at(index).await;
        if let (Some(state), Some(processing)) = (&ec_state, plan.processing.as_mut()) {
            processing.echo_canceller_state = Some(state.clone());
        }
        self.start_at(index, policy, plan).await?;
        Ok(ec_state)
    }

    /// Mark a stream Failed and release its ports
    pub async fn fail_at(&mut self, index: StreamIndex, error: MediaError) {
        if let Some(endpoint) = self.endpoints.get_mut(&index) {
            endpoint.fail(error).await;
        }
        self.allocator.release(index);
    }

    /// Stop every stream, releasing every port; returns echo canceller states
    pub async fn stop_all(&mut self) -> Vec<(StreamIndex, String)> {
        let mut states = Vec::new();
        for index in self.ordered_indices() {
            if let Some(state) = self.stop_at(index).await {
                states.push((index, state));
            }
        }
        self.allocator.release_all();
        states
    }

    /// Forget a stream that left the negotiated set; its ports go back first
    pub fn remove(&mut self, index: StreamIndex) -> Option<StreamEndpoint> {
        self.allocator.release(index);
        self.endpoints.remove(&index)
    }

    /// Drop every endpoint; call after `stop_all`
    pub fn clear(&mut self) {
        self.endpoints.clear();
    }

    pub fn port_config(&self, index: StreamIndex) -> Option<&PortConfig> {
        self.allocator.current(index)
    }
}
