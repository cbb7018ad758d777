//! Media encryption negotiation
//!
//! [`SecurityNegotiator`] looks at the negotiated media line of one stream and
//! the local capabilities and produces a [`SecurityContext`]: which scheme the
//! stream runs, the parameters the engine needs, and when the handshake may
//! begin.
//!
//! - SRTP (SDES): keys come from the description, the stream is protected as
//!   soon as the engine accepts them
//! - ZRTP: in-band key agreement with a short authentication string
//! - DTLS-SRTP: in-band handshake checked against the signalled fingerprint

pub mod dtls;
pub mod srtp;
pub mod zrtp;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EncryptionConfig;
use crate::description::StreamDescription;
use crate::error::{MediaError, Result};
use crate::types::{SecurityState, StreamIndex};

use self::dtls::{normalize_fingerprint, role_for, DtlsParams};
use self::srtp::{generate_key, select_remote_crypto, SrtpParams, SrtpSuite};
use self::zrtp::{ZrtpParams, ZrtpSuiteOverrides};

/// Encryption scheme of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionScheme {
    #[default]
    None,
    Srtp,
    Zrtp,
    DtlsSrtp,
}

impl fmt::Display for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionScheme::None => "none",
            EncryptionScheme::Srtp => "SRTP",
            EncryptionScheme::Zrtp => "ZRTP",
            EncryptionScheme::DtlsSrtp => "DTLS-SRTP",
        };
        f.write_str(name)
    }
}

/// When the security handshake of a stream may be started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStart {
    /// As soon as the transport is bound
    Immediate,
    /// Once the call-setup ACK has been received
    DeferredToAck,
    /// After the primary stream of the call reports encryption (ZRTP multistream)
    AfterPrimary,
}

/// Scheme-specific parameters handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionParams {
    Srtp(SrtpParams),
    Zrtp(ZrtpParams),
    DtlsSrtp(DtlsParams),
}

impl EncryptionParams {
    pub fn scheme(&self) -> EncryptionScheme {
        match self {
            EncryptionParams::Srtp(_) => EncryptionScheme::Srtp,
            EncryptionParams::Zrtp(_) => EncryptionScheme::Zrtp,
            EncryptionParams::DtlsSrtp(_) => EncryptionScheme::DtlsSrtp,
        }
    }
}

/// ZRTP short authentication string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthToken {
    pub sas: String,
    pub verified: bool,
}

/// Security state of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    pub scheme: EncryptionScheme,
    pub state: SecurityState,
    pub start: HandshakeStart,
    pub params: Option<EncryptionParams>,
    pub auth_token: Option<AuthToken>,
    /// ZRTP was selected because the peer announced a zrtp-hash
    pub upgraded_by_peer: bool,
}

impl SecurityContext {
    /// Plain RTP
    pub fn none() -> Self {
        Self {
            scheme: EncryptionScheme::None,
            state: SecurityState::Idle,
            start: HandshakeStart::Immediate,
            params: None,
            auth_token: None,
            upgraded_by_peer: false,
        }
    }

    fn with_params(params: EncryptionParams, start: HandshakeStart) -> Self {
        Self {
            scheme: params.scheme(),
            state: SecurityState::Negotiating,
            start,
            params: Some(params),
            auth_token: None,
            upgraded_by_peer: false,
        }
    }

    /// The engine may start the handshake without waiting for call setup
    pub fn auto_start(&self) -> bool {
        self.start == HandshakeStart::Immediate
    }

    pub fn is_encrypted(&self) -> bool {
        self.scheme != EncryptionScheme::None
    }

    pub fn is_secure(&self) -> bool {
        self.state.is_secure()
    }

    /// A handshake is owed to the engine but has not produced a result yet
    pub fn is_pending(&self) -> bool {
        self.is_encrypted() && self.state == SecurityState::Negotiating
    }
}

/// What this endpoint can and wants to do for one call
#[derive(Debug, Clone)]
pub struct LocalSecurityCapabilities {
    pub configured: EncryptionScheme,
    pub supported: Vec<EncryptionScheme>,
    pub mandatory: bool,
    pub srtp_suites: Vec<SrtpSuite>,
    pub zrtp_overrides: ZrtpSuiteOverrides,
    pub zrtp_key_validity: Option<Duration>,
    pub allow_peer_zrtp_upgrade: bool,
    pub dtls_fingerprint: Option<String>,
    pub local_is_offerer: bool,
}

impl LocalSecurityCapabilities {
    pub fn from_config(config: &EncryptionConfig, local_is_offerer: bool) -> Result<Self> {
        Ok(Self {
            configured: config.media_encryption,
            supported: config.supported.clone(),
            mandatory: config.mandatory,
            srtp_suites: config.srtp_suites.clone(),
            zrtp_overrides: config.zrtp.clone(),
            zrtp_key_validity: config.key_validity()?,
            allow_peer_zrtp_upgrade: config.allow_peer_zrtp_upgrade,
            dtls_fingerprint: config.dtls_fingerprint.clone(),
            local_is_offerer,
        })
    }

    pub fn supports(&self, scheme: EncryptionScheme) -> bool {
        scheme == EncryptionScheme::None || self.supported.contains(&scheme)
    }
}

/// Stateless scheme selection and parameter derivation
pub struct SecurityNegotiator;

impl SecurityNegotiator {
    /// Derive the security context of one stream from its negotiated line
    ///
    /// `is_primary` marks the main audio stream, the only one allowed to run
    /// a full ZRTP exchange; others join it in multistream mode.
    pub fn derive_scheme_and_params(
        local: &LocalSecurityCapabilities,
        remote: &StreamDescription,
        index: StreamIndex,
        is_primary: bool,
    ) -> Result<SecurityContext> {
        let peer_zrtp = remote.zrtp_hash.is_some() && local.supports(EncryptionScheme::Zrtp);

        if peer_zrtp && local.configured != EncryptionScheme::Zrtp {
            if local.allow_peer_zrtp_upgrade {
                warn!(
                    "Stream {}: peer announced zrtp-hash, switching from {} to ZRTP",
                    index, local.configured
                );
                let mut context = Self::zrtp(local, remote, is_primary);
                context.upgraded_by_peer = true;
                return Ok(context);
            }
            debug!("Stream {}: ignoring peer zrtp-hash, upgrade disabled", index);
        } else if peer_zrtp || local.configured == EncryptionScheme::Zrtp {
            return Ok(Self::zrtp(local, remote, is_primary));
        }

        match local.configured {
            EncryptionScheme::Srtp => match Self::srtp(local, remote) {
                Some(context) => Ok(context),
                None => Self::mismatch(local, index, "no common SRTP crypto suite"),
            },
            EncryptionScheme::DtlsSrtp => match Self::dtls(local, remote) {
                Some(context) => Ok(context),
                None => Self::mismatch(local, index, "remote description carries no DTLS fingerprint"),
            },
            // Peer offered keys we accepted even though we did not ask for them
            EncryptionScheme::None | EncryptionScheme::Zrtp => {
                if !remote.crypto.is_empty() && local.supports(EncryptionScheme::Srtp) {
                    if let Some(context) = Self::srtp(local, remote) {
                        return Ok(context);
                    }
                }
                if local.supports(EncryptionScheme::DtlsSrtp) {
                    if let Some(context) = Self::dtls(local, remote) {
                        return Ok(context);
                    }
                }
                Ok(SecurityContext::none())
            }
        }
    }

    fn zrtp(local: &LocalSecurityCapabilities, remote: &StreamDescription, is_primary: bool) -> SecurityContext {
        let mut params = ZrtpParams::derive(&local.srtp_suites, &local.zrtp_overrides, local.zrtp_key_validity);
        params.peer_hash = remote.zrtp_hash.clone();
        params.multistream = !is_primary;

        let start = if !is_primary {
            HandshakeStart::AfterPrimary
        } else if remote.zrtp_hash.is_some()
            || (local.local_is_offerer && local.configured == EncryptionScheme::Zrtp)
        {
            HandshakeStart::Immediate
        } else {
            HandshakeStart::DeferredToAck
        };

        SecurityContext::with_params(EncryptionParams::Zrtp(params), start)
    }

    fn srtp(local: &LocalSecurityCapabilities, remote: &StreamDescription) -> Option<SecurityContext> {
        let matched = select_remote_crypto(&local.srtp_suites, &remote.crypto)?;
        let params = SrtpParams {
            suite: matched.suite,
            tag: matched.tag,
            local_key: generate_key(matched.suite),
            remote_key: matched.key.clone(),
        };
        Some(SecurityContext::with_params(EncryptionParams::Srtp(params), HandshakeStart::Immediate))
    }

    fn dtls(local: &LocalSecurityCapabilities, remote: &StreamDescription) -> Option<SecurityContext> {
        let remote_fingerprint = normalize_fingerprint(remote.dtls_fingerprint.as_deref()?);
        if remote_fingerprint.is_empty() {
            return None;
        }
        let params = DtlsParams {
            role: role_for(remote.dtls_setup, local.local_is_offerer),
            local_fingerprint: local.dtls_fingerprint.clone(),
            remote_fingerprint: Some(remote_fingerprint),
        };
        Some(SecurityContext::with_params(EncryptionParams::DtlsSrtp(params), HandshakeStart::Immediate))
    }

    fn mismatch(local: &LocalSecurityCapabilities, index: StreamIndex, reason: &str) -> Result<SecurityContext> {
        if local.mandatory {
            return Err(MediaError::security_negotiation(index, reason));
        }
        warn!("Stream {}: {}, continuing unencrypted", index, reason);
        Ok(SecurityContext::none())
    }
}
