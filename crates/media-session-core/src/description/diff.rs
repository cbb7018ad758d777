//! Renegotiation diffing
//!
//! Compares two result descriptions line by line and decides what each stream
//! must do. Whenever a change cannot be applied in place the answer is
//! `Restart`.

use std::net::IpAddr;

use super::{MediaDescription, StreamDescription};
use crate::security::dtls::fingerprints_match;
use crate::types::StreamIndex;

/// What changed between two versions of one media line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamChanges {
    /// Remote address or port moved
    pub network: bool,
    /// IPv4 ↔ IPv6 switch
    pub address_family: bool,
    /// Keys, fingerprint, setup role or zrtp-hash changed
    pub crypto: bool,
    /// Payload list changed
    pub codec: bool,
    pub bandwidth: bool,
    pub direction: bool,
    /// ICE credentials changed
    pub ice_restart: bool,
    /// The line now carries a different media kind
    pub kind: bool,
}

impl StreamChanges {
    pub fn is_empty(&self) -> bool {
        *self == StreamChanges::default()
    }

    /// Changes that cannot be applied to a running transport
    pub fn requires_restart(&self) -> bool {
        self.network
            || self.address_family
            || self.crypto
            || self.direction
            || self.ice_restart
            || self.kind
    }
}

/// Per-stream decision taken by a renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Unchanged,
    /// Codec or bitrate only: apply without touching the transport
    Reconfigure,
    /// New generation and fresh ports
    Restart,
    /// Line newly enabled
    Start,
    /// Line removed, disabled or made inactive
    Stop,
}

fn address_family(addr: &str) -> Option<bool> {
    addr.parse::<IpAddr>().ok().map(|ip| ip.is_ipv6())
}

/// Case or spacing differences in `a=fingerprint` do not count
fn fingerprint_changed(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (Some(a), Some(b)) => a != b && !fingerprints_match(a, b),
        (None, None) => false,
        _ => true,
    }
}

/// Compute the changes between two versions of a line
pub fn stream_changes(
    old_md: &MediaDescription,
    old: &StreamDescription,
    new_md: &MediaDescription,
    new: &StreamDescription,
) -> StreamChanges {
    let old_addr = old_md.rtp_addr_of(old);
    let new_addr = new_md.rtp_addr_of(new);

    let address_family = match (address_family(old_addr), address_family(new_addr)) {
        (Some(a), Some(b)) => a != b,
        // Unparseable host names: cannot tell, assume the family moved with the name
        _ => old_addr != new_addr,
    };

    StreamChanges {
        network: old_addr != new_addr
            || old.rtp_port != new.rtp_port
            || old_md.rtcp_addr_of(old) != new_md.rtcp_addr_of(new)
            || old.rtcp_port != new.rtcp_port
            || old.multicast_role != new.multicast_role,
        address_family,
        crypto: old.crypto != new.crypto
            || fingerprint_changed(old.dtls_fingerprint.as_deref(), new.dtls_fingerprint.as_deref())
            || old.dtls_setup != new.dtls_setup
            || old.zrtp_hash != new.zrtp_hash,
        codec: old.payloads != new.payloads,
        bandwidth: old.bandwidth != new.bandwidth || old.max_rate != new.max_rate,
        direction: old.direction != new.direction,
        ice_restart: match (&old.ice, &new.ice) {
            (Some(a), Some(b)) => a.ufrag != b.ufrag || a.pwd != b.pwd,
            (None, None) => false,
            _ => true,
        },
        kind: old.kind != new.kind,
    }
}

/// Decide the action for one stream index
pub fn diff_stream(
    old_md: &MediaDescription,
    new_md: &MediaDescription,
    index: StreamIndex,
) -> StreamAction {
    let old = old_md.stream(index).filter(|s| s.is_enabled());
    let new = new_md.stream(index).filter(|s| s.is_enabled());

    match (old, new) {
        (None, None) => StreamAction::Unchanged,
        (Some(_), None) => StreamAction::Stop,
        (None, Some(_)) => StreamAction::Start,
        (Some(old), Some(new)) => {
            let changes = stream_changes(old_md, old, new_md, new);
            if changes.requires_restart() {
                StreamAction::Restart
            } else if changes.codec || changes.bandwidth {
                StreamAction::Reconfigure
            } else {
                StreamAction::Unchanged
            }
        }
    }
}

/// Decide the action for every index present in either description
pub fn diff_descriptions(
    old_md: &MediaDescription,
    new_md: &MediaDescription,
) -> Vec<(StreamIndex, StreamAction)> {
    let count = old_md.len().max(new_md.len());
    (0..count)
        .map(|index| (index, diff_stream(old_md, new_md, index)))
        .collect()
}
