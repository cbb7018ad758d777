//! ZRTP key-agreement parameters
//!
//! The cipher and auth-tag lists are derived from the SRTP suites the call is
//! configured with. An explicit override list replaces the derived list for
//! its category; it is never merged with it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::srtp::SrtpSuite;

/// ZRTP block ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZrtpCipher {
    /// AES-128
    Aes1,
    /// AES-192
    Aes2,
    /// AES-256
    Aes3,
}

/// ZRTP SRTP authentication tag types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZrtpAuthTag {
    Hs32,
    Hs80,
    Sk32,
    Sk64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZrtpHash {
    S256,
    S384,
    N256,
    N384,
}

/// Short authentication string rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZrtpSasType {
    /// Base-32, four characters
    B32,
    /// PGP word list
    B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZrtpKeyAgreement {
    Dh2k,
    Dh3k,
    Ec25,
    Ec38,
    X255,
    X448,
}

/// Explicit per-category lists from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZrtpSuiteOverrides {
    pub ciphers: Option<Vec<ZrtpCipher>>,
    pub auth_tags: Option<Vec<ZrtpAuthTag>>,
    pub hashes: Option<Vec<ZrtpHash>>,
    pub sas_types: Option<Vec<ZrtpSasType>>,
    pub key_agreements: Option<Vec<ZrtpKeyAgreement>>,
}

/// Parameters handed to the engine when ZRTP is enabled on a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZrtpParams {
    pub ciphers: Vec<ZrtpCipher>,
    pub auth_tags: Vec<ZrtpAuthTag>,
    pub hashes: Vec<ZrtpHash>,
    pub sas_types: Vec<ZrtpSasType>,
    pub key_agreements: Vec<ZrtpKeyAgreement>,
    /// Validity of cached retained secrets; `None` keeps them forever
    pub key_validity: Option<Duration>,
    /// `a=zrtp-hash` announced by the peer
    pub peer_hash: Option<String>,
    /// Stream keyed from the primary session instead of its own DH exchange
    pub multistream: bool,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Cipher and auth-tag lists implied by a set of SRTP suites
pub fn crypto_types_from_suites(suites: &[SrtpSuite]) -> (Vec<ZrtpCipher>, Vec<ZrtpAuthTag>) {
    let mut ciphers = Vec::new();
    let mut auth_tags = Vec::new();

    for suite in suites {
        match suite {
            SrtpSuite::Aes128Sha1_32 => {
                push_unique(&mut ciphers, ZrtpCipher::Aes1);
                push_unique(&mut auth_tags, ZrtpAuthTag::Hs32);
            }
            SrtpSuite::Aes128NoAuth => push_unique(&mut ciphers, ZrtpCipher::Aes1),
            SrtpSuite::NoCipherSha1_80 => push_unique(&mut auth_tags, ZrtpAuthTag::Hs80),
            SrtpSuite::Aes128Sha1_80 => {
                push_unique(&mut ciphers, ZrtpCipher::Aes1);
                push_unique(&mut auth_tags, ZrtpAuthTag::Hs80);
            }
            SrtpSuite::Aes256Sha1_80 | SrtpSuite::AesCm256Sha1_80 => {
                push_unique(&mut ciphers, ZrtpCipher::Aes3);
                push_unique(&mut auth_tags, ZrtpAuthTag::Hs80);
            }
            SrtpSuite::Aes256Sha1_32 => {
                push_unique(&mut ciphers, ZrtpCipher::Aes3);
                push_unique(&mut auth_tags, ZrtpAuthTag::Hs32);
            }
        }
    }

    (ciphers, auth_tags)
}

impl ZrtpParams {
    /// Build parameters from the configured SRTP suites and overrides
    pub fn derive(
        suites: &[SrtpSuite],
        overrides: &ZrtpSuiteOverrides,
        key_validity: Option<Duration>,
    ) -> Self {
        let (ciphers, auth_tags) = crypto_types_from_suites(suites);

        Self {
            ciphers: overrides.ciphers.clone().unwrap_or(ciphers),
            auth_tags: overrides.auth_tags.clone().unwrap_or(auth_tags),
            hashes: overrides.hashes.clone().unwrap_or_else(|| vec![ZrtpHash::S256]),
            sas_types: overrides.sas_types.clone().unwrap_or_else(|| vec![ZrtpSasType::B32]),
            key_agreements: overrides
                .key_agreements
                .clone()
                .unwrap_or_else(|| vec![ZrtpKeyAgreement::X255, ZrtpKeyAgreement::Dh3k]),
            key_validity,
            peer_hash: None,
            multistream: false,
        }
    }
}
