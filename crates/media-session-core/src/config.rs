//! Media session configuration
//!
//! Every section deserializes with serde and falls back to defaults for
//! missing fields, so a partial document is a valid configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};
use crate::ports::{PortPolicy, PortRange, DEFAULT_BIND_ATTEMPTS};
use crate::security::srtp::SrtpSuite;
use crate::security::zrtp::ZrtpSuiteOverrides;
use crate::security::EncryptionScheme;
use crate::types::MediaKind;

/// Complete configuration of the media layer of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSessionConfig {
    pub audio: StreamTypeConfig,
    pub video: StreamTypeConfig,
    pub text: StreamTypeConfig,
    pub sound: SoundConfig,
    pub encryption: EncryptionConfig,
    pub network: NetworkConfig,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            audio: StreamTypeConfig::new(true, PortRange::fixed(7078)),
            video: StreamTypeConfig::new(true, PortRange::fixed(9078)),
            text: StreamTypeConfig::new(false, PortRange::fixed(11078)),
            sound: SoundConfig::default(),
            encryption: EncryptionConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl MediaSessionConfig {
    pub fn stream(&self, kind: MediaKind) -> &StreamTypeConfig {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
            MediaKind::Text => &self.text,
        }
    }

    /// Port policy of a stream type
    pub fn port_policy(&self, kind: MediaKind) -> PortPolicy {
        let range = self.stream(kind).port_range;
        match PortPolicy::from_range(range) {
            PortPolicy::Fixed { port, .. } if self.network.fixed_port_fallback => PortPolicy::Fixed {
                port,
                fallback: Some(self.network.fallback_range),
            },
            policy => policy,
        }
    }

    /// Check the configuration for values the core cannot work with
    pub fn validate(&self) -> Result<()> {
        for kind in MediaKind::ALL {
            self.stream(kind)
                .port_range
                .validate()
                .map_err(|e| MediaError::config(format!("{} port range: {}", kind, e)))?;
        }
        if self.network.fixed_port_fallback {
            self.network.fallback_range.validate()?;
        }
        if self.network.port_bind_attempts == 0 {
            return Err(MediaError::config("port_bind_attempts must be at least 1"));
        }
        if self.encryption.mandatory && self.encryption.media_encryption == EncryptionScheme::None {
            return Err(MediaError::config("encryption is mandatory but no scheme is configured"));
        }
        if self.encryption.media_encryption == EncryptionScheme::Srtp && self.encryption.srtp_suites.is_empty() {
            return Err(MediaError::config("SRTP selected without any crypto suite"));
        }
        self.encryption.key_validity()?;
        Ok(())
    }
}

/// Per stream type settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTypeConfig {
    pub enabled: bool,
    pub port_range: PortRange,
}

impl StreamTypeConfig {
    pub fn new(enabled: bool, port_range: PortRange) -> Self {
        Self { enabled, port_range }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoLimiterMode {
    #[default]
    Off,
    Mic,
    Full,
}

/// Graph the equalizer is inserted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualizerLocation {
    #[default]
    Output,
    Mic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtpLoopbackMode {
    #[default]
    Off,
    /// Media is looped back over RTP, no local devices at all
    Full,
    /// Looped back over RTP while still rendered locally
    WithLocalOutput,
}

/// Echo canceller parameters; zero leaves the engine default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoCancellationConfig {
    pub enabled: bool,
    pub tail_length_ms: u32,
    pub delay_ms: u32,
    pub frame_size: u32,
}

impl Default for EchoCancellationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tail_length_ms: 0,
            delay_ms: 0,
            frame_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub playback_device: Option<String>,
    pub capture_device: Option<String>,
    /// File played instead of the microphone when sound cards are not used
    pub play_file: Option<PathBuf>,
    /// File received audio is recorded to
    pub record_file: Option<PathBuf>,
    /// Use files instead of sound cards
    pub use_files: bool,
    pub echo_cancellation: EchoCancellationConfig,
    pub echo_limiter: EchoLimiterMode,
    pub equalizer_location: EqualizerLocation,
    pub noise_gate: bool,
    pub automatic_gain_control: bool,
    pub rtp_loopback: RtpLoopbackMode,
    /// Skip local playback while a ringback tone is sent
    pub send_ringback_without_playback: bool,
    /// File played to the peer while the call is paused
    pub hold_file: Option<PathBuf>,
    pub keep_hold_file_playing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Scheme this endpoint offers
    pub media_encryption: EncryptionScheme,
    /// Schemes the engine can run
    pub supported: Vec<EncryptionScheme>,
    /// Refuse to fall back to plain RTP
    pub mandatory: bool,
    pub srtp_suites: Vec<SrtpSuite>,
    pub zrtp: ZrtpSuiteOverrides,
    /// Validity of ZRTP retained secrets, e.g. `"90d"`; `"0"` keeps them forever
    pub zrtp_key_validity: String,
    /// Switch to ZRTP when the peer announces a zrtp-hash even if not configured
    pub allow_peer_zrtp_upgrade: bool,
    /// Fingerprint of the local DTLS certificate
    pub dtls_fingerprint: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            media_encryption: EncryptionScheme::None,
            supported: vec![
                EncryptionScheme::None,
                EncryptionScheme::Srtp,
                EncryptionScheme::Zrtp,
                EncryptionScheme::DtlsSrtp,
            ],
            mandatory: false,
            srtp_suites: SrtpSuite::DEFAULT.to_vec(),
            zrtp: ZrtpSuiteOverrides::default(),
            zrtp_key_validity: "0".to_string(),
            allow_peer_zrtp_upgrade: true,
            dtls_fingerprint: None,
        }
    }
}

impl EncryptionConfig {
    pub fn supports(&self, scheme: EncryptionScheme) -> bool {
        self.supported.contains(&scheme)
    }

    pub fn key_validity(&self) -> Result<Option<Duration>> {
        parse_time_span(&self.zrtp_key_validity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub rtcp_enabled: bool,
    /// Candidates tried per allocation before giving up
    pub port_bind_attempts: u32,
    /// Pick a random port from `fallback_range` when a fixed port is busy
    pub fixed_port_fallback: bool,
    pub fallback_range: PortRange,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rtcp_enabled: true,
            port_bind_attempts: DEFAULT_BIND_ATTEMPTS,
            fixed_port_fallback: false,
            fallback_range: PortRange::new(1024, 65535),
        }
    }
}

/// Parse a time span such as `"30d"`, `"12h"` or `"1y"`
///
/// A bare number counts seconds. `"0"` means no limit and yields `None`.
/// Units: `s`, `m` (minutes), `h`, `d`, `w`, `M` (30 days), `y` (365 days).
pub fn parse_time_span(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    let digits_end = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (number, unit) = value.split_at(digits_end);

    let amount: u64 = number
        .parse()
        .map_err(|_| MediaError::config(format!("invalid time span '{}'", value)))?;

    let unit_secs = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 7 * 86_400,
        "M" => 30 * 86_400,
        "y" => 365 * 86_400,
        other => {
            return Err(MediaError::config(format!(
                "invalid time span unit '{}' in '{}'",
                other, value
            )))
        }
    };

    if amount == 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs(amount.saturating_mul(unit_secs))))
}
