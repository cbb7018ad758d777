//! RTP/RTCP port allocation
//!
//! Each stream index owns at most one [`PortConfig`] at a time. A config is
//! handed back unchanged on every `assign` until the stream is restarted or
//! released; each fresh config carries the next [`Generation`] of its index.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::types::{Generation, StreamIndex};

/// Default number of candidates tried before giving up
pub const DEFAULT_BIND_ATTEMPTS: u32 = 100;

/// Configured port range of a stream type
///
/// `min == max` pins a fixed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub const fn fixed(port: u16) -> Self {
        Self { min: port, max: port }
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn validate(&self) -> Result<()> {
        if self.min == 0 || self.min > self.max {
            return Err(MediaError::config(format!(
                "invalid port range {}-{}",
                self.min, self.max
            )));
        }
        if !self.is_fixed() && (self.min.saturating_add(1) & !1) > self.max.saturating_sub(1) {
            return Err(MediaError::config(format!(
                "port range {}-{} holds no even RTP/RTCP pair",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// How a stream's RTP port is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPolicy {
    /// Use exactly this port; optionally fall back to a random one on conflict
    Fixed { port: u16, fallback: Option<PortRange> },
    /// Even RTP port picked at random inside the range, RTCP = RTP + 1
    Random { range: PortRange },
}

impl PortPolicy {
    /// Policy implied by a configured range
    pub fn from_range(range: PortRange) -> Self {
        if range.is_fixed() {
            PortPolicy::Fixed {
                port: range.min,
                fallback: None,
            }
        } else {
            PortPolicy::Random { range }
        }
    }
}

/// Port pair bound to one lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortConfig {
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub generation: Generation,
}

/// Checks whether a port can currently be bound
pub trait BindCheck: Send + Sync {
    fn try_bind(&self, ip: IpAddr, port: u16) -> io::Result<()>;
}

/// Bind check that opens and immediately drops a UDP socket
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpBindCheck;

impl BindCheck for UdpBindCheck {
    fn try_bind(&self, ip: IpAddr, port: u16) -> io::Result<()> {
        UdpSocket::bind(SocketAddr::new(ip, port)).map(|_| ())
    }
}

/// Per-call port allocator
pub struct PortAllocator {
    bind_ip: IpAddr,
    max_attempts: u32,
    bind_check: Arc<dyn BindCheck>,
    assigned: HashMap<StreamIndex, PortConfig>,
    generations: HashMap<StreamIndex, Generation>,
}

impl PortAllocator {
    pub fn new(bind_ip: IpAddr, max_attempts: u32, bind_check: Arc<dyn BindCheck>) -> Self {
        Self {
            bind_ip,
            max_attempts: max_attempts.max(1),
            bind_check,
            assigned: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    /// Current config of a stream, if it holds one
    pub fn current(&self, index: StreamIndex) -> Option<&PortConfig> {
        self.assigned.get(&index)
    }

    /// Return the stream's current config, or allocate one
    pub fn assign(&mut self, index: StreamIndex, policy: &PortPolicy) -> Result<PortConfig> {
        if let Some(existing) = self.assigned.get(&index) {
            debug!("Reusing ports {}/{} for stream {}", existing.rtp_port, existing.rtcp_port, index);
            return Ok(*existing);
        }
        self.allocate(index, policy)
    }

    /// Drop the current config and allocate a fresh one with the next generation
    pub fn reassign(&mut self, index: StreamIndex, policy: &PortPolicy) -> Result<PortConfig> {
        self.release(index);
        self.allocate(index, policy)
    }

    /// Give the stream's ports back; the generation counter is kept
    pub fn release(&mut self, index: StreamIndex) -> Option<PortConfig> {
        let released = self.assigned.remove(&index);
        if let Some(config) = &released {
            debug!(
                "Released ports {}/{} of stream {} (generation {})",
                config.rtp_port, config.rtcp_port, index, config.generation
            );
        }
        released
    }

    pub fn release_all(&mut self) {
        self.assigned.clear();
    }

    fn allocate(&mut self, index: StreamIndex, policy: &PortPolicy) -> Result<PortConfig> {
        let rtp_port = match *policy {
            PortPolicy::Fixed { port, fallback } => match self.select_fixed(index, port) {
                Ok(port) => port,
                Err(e) => match fallback {
                    Some(range) => {
                        warn!("Fixed port {} unavailable for stream {} ({}), falling back to random", port, index, e);
                        self.select_random(index, range)?
                    }
                    None => return Err(e),
                },
            },
            PortPolicy::Random { range } => self.select_random(index, range)?,
        };

        let generation = self.generations.get(&index).copied().unwrap_or_default().next();
        self.generations.insert(index, generation);

        let config = PortConfig {
            rtp_port,
            rtcp_port: rtp_port + 1,
            generation,
        };
        self.assigned.insert(index, config);
        info!("🔌 Stream {} assigned RTP {} / RTCP {} (generation {})", index, config.rtp_port, config.rtcp_port, generation);
        Ok(config)
    }

    fn used_by_sibling(&self, index: StreamIndex, port: u16) -> bool {
        self.assigned
            .iter()
            .any(|(i, c)| *i != index && (c.rtp_port == port || c.rtcp_port == port || c.rtp_port == port + 1))
    }

    fn check_pair(&self, index: StreamIndex, rtp_port: u16) -> Result<()> {
        self.bind_check
            .try_bind(self.bind_ip, rtp_port)
            .and_then(|_| self.bind_check.try_bind(self.bind_ip, rtp_port + 1))
            .map_err(|e| MediaError::transport_bind(index, rtp_port, e.to_string()))
    }

    fn select_fixed(&self, index: StreamIndex, port: u16) -> Result<u16> {
        if port == u16::MAX {
            return Err(MediaError::config("fixed RTP port leaves no room for RTCP"));
        }
        if self.used_by_sibling(index, port) {
            return Err(MediaError::transport_bind(index, port, "already used by another stream of this call"));
        }
        self.check_pair(index, port)?;
        Ok(port)
    }

    fn select_random(&self, index: StreamIndex, range: PortRange) -> Result<u16> {
        range.validate()?;
        if range.is_fixed() {
            return Err(MediaError::config(format!(
                "random port policy of stream {} needs more than the single port {}",
                index, range.min
            )));
        }
        // Even candidates only, leaving room for RTCP inside the range
        let low = (range.min + 1) & !1;
        let high = (range.max - 1) & !1;

        let mut rng = rand::thread_rng();
        for attempt in 1..=self.max_attempts {
            let candidate = rng.gen_range(low / 2..=high / 2) * 2;
            if self.used_by_sibling(index, candidate) {
                debug!("Candidate {} for stream {} already used in this call", candidate, index);
                continue;
            }
            match self.check_pair(index, candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) => debug!("Bind attempt {} for stream {} failed: {}", attempt, index, e),
            }
        }

        Err(MediaError::PortAllocation {
            index,
            attempts: self.max_attempts,
        })
    }
}
