//! SRTP crypto suites and SDES keying material
//!
//! Keys follow RFC 4568 inline form: master key and master salt concatenated
//! and base64 encoded.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::description::CryptoAttribute;
use crate::error::{MediaError, Result};

/// Length of the SRTP master salt in bytes
const MASTER_SALT_LEN: usize = 14;

/// SRTP crypto suites understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SrtpSuite {
    #[serde(rename = "AES_CM_128_HMAC_SHA1_80")]
    Aes128Sha1_80,
    #[serde(rename = "AES_CM_128_HMAC_SHA1_32")]
    Aes128Sha1_32,
    /// AES-128 encryption without authentication (UNAUTHENTICATED_SRTP)
    #[serde(rename = "AES_CM_128_NO_AUTH")]
    Aes128NoAuth,
    /// Authentication only (UNENCRYPTED_SRTP)
    #[serde(rename = "NO_CIPHER_HMAC_SHA1_80")]
    NoCipherSha1_80,
    #[serde(rename = "AES_256_CM_HMAC_SHA1_80")]
    Aes256Sha1_80,
    #[serde(rename = "AES_256_CM_HMAC_SHA1_32")]
    Aes256Sha1_32,
    /// Deprecated spelling of AES-256/80, kept for interop
    #[serde(rename = "AES_CM_256_HMAC_SHA1_80")]
    AesCm256Sha1_80,
}

impl SrtpSuite {
    /// Default offer list
    pub const DEFAULT: [SrtpSuite; 4] = [
        SrtpSuite::Aes128Sha1_80,
        SrtpSuite::Aes128Sha1_32,
        SrtpSuite::Aes256Sha1_80,
        SrtpSuite::Aes256Sha1_32,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SrtpSuite::Aes128Sha1_80 => "AES_CM_128_HMAC_SHA1_80",
            SrtpSuite::Aes128Sha1_32 => "AES_CM_128_HMAC_SHA1_32",
            SrtpSuite::Aes128NoAuth => "AES_CM_128_NO_AUTH",
            SrtpSuite::NoCipherSha1_80 => "NO_CIPHER_HMAC_SHA1_80",
            SrtpSuite::Aes256Sha1_80 => "AES_256_CM_HMAC_SHA1_80",
            SrtpSuite::Aes256Sha1_32 => "AES_256_CM_HMAC_SHA1_32",
            SrtpSuite::AesCm256Sha1_80 => "AES_CM_256_HMAC_SHA1_80",
        }
    }

    /// Master key length in bytes
    pub fn master_key_len(&self) -> usize {
        match self {
            SrtpSuite::Aes256Sha1_80 | SrtpSuite::Aes256Sha1_32 | SrtpSuite::AesCm256Sha1_80 => 32,
            _ => 16,
        }
    }

    /// Length of the inline key material (key + salt) in bytes
    pub fn key_material_len(&self) -> usize {
        self.master_key_len() + MASTER_SALT_LEN
    }
}

impl fmt::Display for SrtpSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SrtpSuite {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "AES_CM_128_HMAC_SHA1_80" => Ok(SrtpSuite::Aes128Sha1_80),
            "AES_CM_128_HMAC_SHA1_32" => Ok(SrtpSuite::Aes128Sha1_32),
            "AES_CM_128_NO_AUTH" => Ok(SrtpSuite::Aes128NoAuth),
            "NO_CIPHER_HMAC_SHA1_80" => Ok(SrtpSuite::NoCipherSha1_80),
            "AES_256_CM_HMAC_SHA1_80" => Ok(SrtpSuite::Aes256Sha1_80),
            "AES_256_CM_HMAC_SHA1_32" => Ok(SrtpSuite::Aes256Sha1_32),
            "AES_CM_256_HMAC_SHA1_80" => Ok(SrtpSuite::AesCm256Sha1_80),
            other => Err(MediaError::config(format!("unknown SRTP crypto suite '{}'", other))),
        }
    }
}

/// Negotiated SDES parameters for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpParams {
    pub suite: SrtpSuite,
    /// Crypto attribute tag that was matched
    pub tag: u32,
    /// Base64 inline key we send with
    pub local_key: String,
    /// Base64 inline key the peer sends with
    pub remote_key: String,
}

/// Generate fresh inline key material for a suite
pub fn generate_key(suite: SrtpSuite) -> String {
    let mut material = vec![0u8; suite.key_material_len()];
    rand::thread_rng().fill_bytes(&mut material);
    BASE64.encode(material)
}

/// Check that an inline key decodes to the length the suite requires
pub fn key_is_valid(suite: SrtpSuite, key: &str) -> bool {
    BASE64
        .decode(key.trim())
        .map(|raw| raw.len() == suite.key_material_len())
        .unwrap_or(false)
}

/// Pick the first remote crypto attribute whose suite we support
///
/// Remote preference order wins; a remote attribute with malformed key
/// material is skipped.
pub fn select_remote_crypto<'a>(
    local_suites: &[SrtpSuite],
    remote: &'a [CryptoAttribute],
) -> Option<&'a CryptoAttribute> {
    remote
        .iter()
        .find(|attr| local_suites.contains(&attr.suite) && key_is_valid(attr.suite, &attr.key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_have_suite_length() {
        let key = generate_key(SrtpSuite::Aes128Sha1_80);
        assert_eq!(BASE64.decode(&key).unwrap().len(), 30);
        assert!(key_is_valid(SrtpSuite::Aes128Sha1_80, &key));

        let key = generate_key(SrtpSuite::Aes256Sha1_32);
        assert_eq!(BASE64.decode(&key).unwrap().len(), 46);
        assert!(!key_is_valid(SrtpSuite::Aes128Sha1_32, &key));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(
            generate_key(SrtpSuite::Aes128Sha1_80),
            generate_key(SrtpSuite::Aes128Sha1_80)
        );
    }

    #[test]
    fn test_select_remote_crypto_follows_remote_order() {
        let remote = vec![
            CryptoAttribute::new(1, SrtpSuite::Aes256Sha1_80, generate_key(SrtpSuite::Aes256Sha1_80)),
            CryptoAttribute::new(2, SrtpSuite::Aes128Sha1_80, generate_key(SrtpSuite::Aes128Sha1_80)),
        ];

        let picked = select_remote_crypto(&SrtpSuite::DEFAULT, &remote).unwrap();
        assert_eq!(picked.tag, 1);

        let picked = select_remote_crypto(&[SrtpSuite::Aes128Sha1_80], &remote).unwrap();
        assert_eq!(picked.tag, 2);

        assert!(select_remote_crypto(&[SrtpSuite::Aes128Sha1_32], &remote).is_none());
    }

    #[test]
    fn test_select_remote_crypto_skips_bad_keys() {
        let remote = vec![
            CryptoAttribute::new(1, SrtpSuite::Aes128Sha1_80, "not-base64!".to_string()),
            CryptoAttribute::new(2, SrtpSuite::Aes128Sha1_32, generate_key(SrtpSuite::Aes128Sha1_32)),
        ];
        assert_eq!(select_remote_crypto(&SrtpSuite::DEFAULT, &remote).unwrap().tag, 2);
    }

    #[test]
    fn test_suite_names_round_trip() {
        for suite in SrtpSuite::DEFAULT {
            assert_eq!(suite.as_str().parse::<SrtpSuite>().unwrap(), suite);
        }
        assert!("AES_CM_512".parse::<SrtpSuite>().is_err());
    }
}
