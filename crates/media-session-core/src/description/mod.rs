//! Structured session descriptions
//!
//! Descriptions arrive already parsed from SDP. A description is never edited
//! once it has been handed to the core: renegotiation produces a new
//! [`MediaDescription`], and [`DescriptionSet`] swaps the snapshot it holds.

pub mod diff;

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::security::srtp::SrtpSuite;
use crate::types::{MediaKind, StreamDirection, StreamIndex};

pub use diff::{diff_descriptions, diff_stream, StreamAction, StreamChanges};

/// One `a=crypto` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAttribute {
    pub tag: u32,
    pub suite: SrtpSuite,
    /// Base64 inline key material
    pub key: String,
}

impl CryptoAttribute {
    pub fn new(tag: u32, suite: SrtpSuite, key: String) -> Self {
        Self { tag, suite, key }
    }
}

/// DTLS `a=setup` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsSetup {
    Active,
    Passive,
    ActPass,
}

/// Role of this endpoint in a multicast stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MulticastRole {
    #[default]
    None,
    Sender,
    Receiver,
}

/// Codec entry of a media line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadType {
    pub number: u8,
    pub encoding: String,
    pub clock_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default)]
    pub fmtp: Option<String>,
}

fn default_channels() -> u8 {
    1
}

impl PayloadType {
    pub fn new(number: u8, encoding: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            number,
            encoding: encoding.into(),
            clock_rate,
            channels: 1,
            fmtp: None,
        }
    }

    /// RFC 4733 telephone-event payloads never carry media
    pub fn is_telephone_event(&self) -> bool {
        self.encoding.eq_ignore_ascii_case("telephone-event")
    }
}

/// ICE credentials and candidates of a media line
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceParams {
    pub ufrag: String,
    pub pwd: String,
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// One media line
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamDescription {
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub direction: StreamDirection,
    /// Connection address of this line; empty means use the session address
    #[serde(default)]
    pub rtp_addr: String,
    pub rtp_port: u16,
    #[serde(default)]
    pub rtcp_addr: String,
    /// Explicit `a=rtcp` port; zero means `rtp_port + 1`
    #[serde(default)]
    pub rtcp_port: u16,
    #[serde(default)]
    pub payloads: Vec<PayloadType>,
    /// `b=AS` in kbit/s
    #[serde(default)]
    pub bandwidth: Option<u32>,
    /// Highest clock rate among the payloads, used as preferred device rate
    #[serde(default)]
    pub max_rate: Option<u32>,
    #[serde(default)]
    pub crypto: Vec<CryptoAttribute>,
    #[serde(default)]
    pub dtls_fingerprint: Option<String>,
    #[serde(default)]
    pub dtls_setup: Option<DtlsSetup>,
    #[serde(default)]
    pub zrtp_hash: Option<String>,
    #[serde(default)]
    pub multicast_role: MulticastRole,
    #[serde(default)]
    pub ice: Option<IceParams>,
}

impl StreamDescription {
    /// Create a send/recv media line of the given kind on a port
    pub fn new(kind: MediaKind, rtp_port: u16) -> Self {
        Self {
            kind: Some(kind),
            rtp_port,
            ..Default::default()
        }
    }

    pub fn with_direction(mut self, direction: StreamDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_payload(mut self, payload: PayloadType) -> Self {
        self.payloads.push(payload);
        self
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.rtp_addr = addr.into();
        self
    }

    pub fn with_crypto(mut self, crypto: CryptoAttribute) -> Self {
        self.crypto.push(crypto);
        self
    }

    pub fn with_zrtp_hash(mut self, hash: impl Into<String>) -> Self {
        self.zrtp_hash = Some(hash.into());
        self
    }

    pub fn with_dtls(mut self, fingerprint: impl Into<String>, setup: DtlsSetup) -> Self {
        self.dtls_fingerprint = Some(fingerprint.into());
        self.dtls_setup = Some(setup);
        self
    }

    pub fn with_bandwidth(mut self, kbps: u32) -> Self {
        self.bandwidth = Some(kbps);
        self
    }

    /// Nonzero port and not inactive: the line asks for a running stream
    pub fn is_enabled(&self) -> bool {
        self.rtp_port != 0 && self.direction != StreamDirection::Inactive
    }

    /// First payload that can carry media
    pub fn first_usable_payload(&self) -> Option<&PayloadType> {
        self.payloads.iter().find(|pt| !pt.is_telephone_event())
    }
}

/// A complete session description: session-level data plus ordered media lines
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Session-level connection address
    pub addr: String,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub session_version: u64,
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

impl MediaDescription {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, stream: StreamDescription) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn stream(&self, index: StreamIndex) -> Option<&StreamDescription> {
        self.streams.get(index)
    }

    /// Index of the first line of a kind
    pub fn first_stream_of(&self, kind: MediaKind) -> Option<StreamIndex> {
        self.streams.iter().position(|s| s.kind == Some(kind))
    }

    /// Connection address of a line, falling back to the session address
    pub fn rtp_addr_of<'a>(&'a self, stream: &'a StreamDescription) -> &'a str {
        if stream.rtp_addr.is_empty() {
            &self.addr
        } else {
            &stream.rtp_addr
        }
    }

    /// RTCP address of a line, falling back to the session address
    pub fn rtcp_addr_of<'a>(&'a self, stream: &'a StreamDescription) -> &'a str {
        if stream.rtcp_addr.is_empty() {
            &self.addr
        } else {
            &stream.rtcp_addr
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }
}

/// Whether a textual address is a multicast IP
pub fn is_multicast(addr: &str) -> bool {
    addr.parse::<IpAddr>().map(|ip| ip.is_multicast()).unwrap_or(false)
}

/// Immutable, versioned view of a description
#[derive(Debug, Clone)]
pub struct DescriptionSnapshot {
    pub version: u64,
    pub description: Arc<MediaDescription>,
}

/// The local, remote and result descriptions of one call
///
/// Each slot holds a shared snapshot; installing a new description replaces the
/// slot in one step, so a transition that cloned a snapshot keeps reading a
/// consistent view for its whole duration.
#[derive(Debug, Default)]
pub struct DescriptionSet {
    local: Option<DescriptionSnapshot>,
    remote: Option<DescriptionSnapshot>,
    result: Option<DescriptionSnapshot>,
    version: u64,
}

impl DescriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&mut self, description: MediaDescription) -> DescriptionSnapshot {
        self.version += 1;
        DescriptionSnapshot {
            version: self.version,
            description: Arc::new(description),
        }
    }

    /// Regenerated local description
    pub fn set_local(&mut self, description: MediaDescription) -> DescriptionSnapshot {
        let snapshot = self.snapshot(description);
        self.local = Some(snapshot.clone());
        snapshot
    }

    pub fn set_remote(&mut self, description: MediaDescription) -> DescriptionSnapshot {
        let snapshot = self.snapshot(description);
        self.remote = Some(snapshot.clone());
        snapshot
    }

    /// Result of a completed offer/answer round
    pub fn set_result(&mut self, description: MediaDescription) -> DescriptionSnapshot {
        let snapshot = self.snapshot(description);
        self.result = Some(snapshot.clone());
        snapshot
    }

    pub fn local(&self) -> Option<&DescriptionSnapshot> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&DescriptionSnapshot> {
        self.remote.as_ref()
    }

    pub fn result(&self) -> Option<&DescriptionSnapshot> {
        self.result.as_ref()
    }

    pub fn clear(&mut self) {
        self.local = None;
        self.remote = None;
        self.result = None;
    }
}
