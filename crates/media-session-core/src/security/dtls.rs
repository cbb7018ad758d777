//! DTLS-SRTP role and fingerprint handling

use serde::{Deserialize, Serialize};

use crate::description::DtlsSetup;

/// Side of the DTLS handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtlsRole {
    Client,
    Server,
}

/// Parameters handed to the engine when DTLS-SRTP is enabled on a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsParams {
    pub role: DtlsRole,
    pub local_fingerprint: Option<String>,
    /// Fingerprint the remote certificate must match
    pub remote_fingerprint: Option<String>,
}

/// Role implied by the remote `a=setup` attribute
///
/// Without a remote attribute the offerer waits as server.
pub fn role_for(remote_setup: Option<DtlsSetup>, local_is_offerer: bool) -> DtlsRole {
    match remote_setup {
        Some(DtlsSetup::Active) => DtlsRole::Server,
        Some(DtlsSetup::Passive) | Some(DtlsSetup::ActPass) => DtlsRole::Client,
        None if local_is_offerer => DtlsRole::Server,
        None => DtlsRole::Client,
    }
}

/// Canonical form of an `a=fingerprint` value: `"<hash> <HEX:HEX:..>"`
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    let mut parts = fingerprint.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(hash), Some(value)) => format!("{} {}", hash.to_ascii_lowercase(), value.to_ascii_uppercase()),
        (Some(value), None) => value.to_ascii_uppercase(),
        _ => String::new(),
    }
}

/// Compare two fingerprints ignoring case and spacing
pub fn fingerprints_match(expected: &str, presented: &str) -> bool {
    let expected = normalize_fingerprint(expected);
    !expected.is_empty() && expected == normalize_fingerprint(presented)
}
