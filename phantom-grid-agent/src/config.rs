//! Agent configuration: TOML file → validated typed struct.
//!
//! Secret material is hex-encoded in the file and decoded into fixed-size
//! arrays up front so a malformed secret is a startup error, not a silent
//! authentication failure at 3am.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use phantom_grid_ebpf_common::spa::SpaMode;

use crate::error::{AgentError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seconds between counter-snapshot log lines.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    #[serde(default)]
    pub spa: SpaSection,

    #[serde(default)]
    pub egress: EgressSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaSection {
    #[serde(default)]
    pub mode: SpaModeConfig,

    /// Lifetime of whitelist grants written by this agent (dynamic modes).
    #[serde(default = "default_whitelist_ttl")]
    pub whitelist_ttl_secs: u32,

    #[serde(default = "default_totp_step")]
    pub totp_step_secs: u32,

    #[serde(default = "default_totp_tolerance")]
    pub totp_tolerance: u32,

    #[serde(default = "default_replay_window")]
    pub replay_window_secs: u32,

    /// 32-byte TOTP secret, hex. Required for dynamic and asymmetric modes.
    pub totp_secret_hex: Option<String>,

    /// 32-byte HMAC-SHA256 key, hex. Required for dynamic mode.
    pub hmac_secret_hex: Option<String>,

    /// 32-byte Ed25519 public key, hex. Required for asymmetric mode.
    pub ed25519_public_key_hex: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EgressSection {
    /// true: leaking packets are shot. false: observe-only counting.
    #[serde(default)]
    pub enforce: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpaModeConfig {
    #[default]
    Static,
    Dynamic,
    Asymmetric,
}

impl From<SpaModeConfig> for SpaMode {
    fn from(mode: SpaModeConfig) -> Self {
        match mode {
            SpaModeConfig::Static => SpaMode::Static,
            SpaModeConfig::Dynamic => SpaMode::Dynamic,
            SpaModeConfig::Asymmetric => SpaMode::Asymmetric,
        }
    }
}

impl Default for SpaSection {
    fn default() -> Self {
        Self {
            mode: SpaModeConfig::Static,
            whitelist_ttl_secs: default_whitelist_ttl(),
            totp_step_secs: default_totp_step(),
            totp_tolerance: default_totp_tolerance(),
            replay_window_secs: default_replay_window(),
            totp_secret_hex: None,
            hmac_secret_hex: None,
            ed25519_public_key_hex: None,
        }
    }
}

fn default_stats_interval() -> u64 {
    60
}

fn default_whitelist_ttl() -> u32 {
    30
}

fn default_totp_step() -> u32 {
    30
}

fn default_totp_tolerance() -> u32 {
    1
}

fn default_replay_window() -> u32 {
    60
}

/// Decoded secret material for the active mode.
#[derive(Debug)]
pub struct SpaSecrets {
    pub totp: Option<[u8; 32]>,
    pub hmac: Option<[u8; 32]>,
    pub ed25519_public: Option<[u8; 32]>,
}

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| AgentError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| AgentError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.spa.totp_step_secs == 0 {
        return Err(AgentError::Config("totp_step_secs must be non-zero".into()));
    }
    if cfg.spa.whitelist_ttl_secs == 0 {
        return Err(AgentError::Config("whitelist_ttl_secs must be non-zero".into()));
    }

    match cfg.spa.mode {
        SpaModeConfig::Static => {}
        SpaModeConfig::Dynamic => {
            if cfg.spa.totp_secret_hex.is_none() || cfg.spa.hmac_secret_hex.is_none() {
                return Err(AgentError::Config(
                    "dynamic mode requires totp_secret_hex and hmac_secret_hex".into(),
                ));
            }
        }
        SpaModeConfig::Asymmetric => {
            if cfg.spa.totp_secret_hex.is_none() || cfg.spa.ed25519_public_key_hex.is_none() {
                return Err(AgentError::Config(
                    "asymmetric mode requires totp_secret_hex and ed25519_public_key_hex".into(),
                ));
            }
        }
    }

    // Decode eagerly so bad material fails at load time.
    secrets(cfg)?;
    Ok(())
}

/// Decode the hex-encoded secrets configured for the active mode.
pub fn secrets(cfg: &Config) -> Result<SpaSecrets> {
    Ok(SpaSecrets {
        totp: decode_key(cfg.spa.totp_secret_hex.as_deref(), "totp_secret_hex")?,
        hmac: decode_key(cfg.spa.hmac_secret_hex.as_deref(), "hmac_secret_hex")?,
        ed25519_public: decode_key(
            cfg.spa.ed25519_public_key_hex.as_deref(),
            "ed25519_public_key_hex",
        )?,
    })
}

fn decode_key(hex_str: Option<&str>, field: &str) -> Result<Option<[u8; 32]>> {
    let Some(hex_str) = hex_str else {
        return Ok(None);
    };
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| AgentError::Config(format!("{field}: invalid hex: {e}")))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AgentError::Config(format!("{field}: expected 32 bytes")))?;
    Ok(Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        file
    }

    #[test]
    fn empty_config_defaults_to_static_mode() {
        let file = write_config("");
        let cfg = load_from_path(file.path()).expect("load");
        assert_eq!(cfg.spa.mode, SpaModeConfig::Static);
        assert_eq!(cfg.spa.whitelist_ttl_secs, 30);
        assert_eq!(cfg.spa.totp_step_secs, 30);
        assert_eq!(cfg.spa.replay_window_secs, 60);
        assert!(!cfg.egress.enforce);
    }

    #[test]
    fn dynamic_mode_requires_secrets() {
        let file = write_config("[spa]\nmode = \"dynamic\"\n");
        assert!(load_from_path(file.path()).is_err());

        let file = write_config(&format!(
            "[spa]\nmode = \"dynamic\"\ntotp_secret_hex = \"{0}\"\nhmac_secret_hex = \"{0}\"\n",
            "11".repeat(32)
        ));
        let cfg = load_from_path(file.path()).expect("load");
        let secrets = secrets(&cfg).expect("secrets");
        assert_eq!(secrets.totp, Some([0x11; 32]));
        assert_eq!(secrets.hmac, Some([0x11; 32]));
    }

    #[test]
    fn asymmetric_mode_requires_public_key() {
        let file = write_config("[spa]\nmode = \"asymmetric\"\n");
        assert!(load_from_path(file.path()).is_err());
    }

    #[test]
    fn truncated_secret_is_rejected() {
        let file = write_config(&format!(
            "[spa]\nmode = \"dynamic\"\ntotp_secret_hex = \"{}\"\nhmac_secret_hex = \"{}\"\n",
            "22".repeat(16),
            "22".repeat(32)
        ));
        let err = load_from_path(file.path()).expect_err("short secret must fail");
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_config("[spa]\nmoed = \"static\"\n");
        assert!(load_from_path(file.path()).is_err());
    }

    #[test]
    fn zero_totp_step_is_rejected() {
        let file = write_config("[spa]\ntotp_step_secs = 0\n");
        assert!(load_from_path(file.path()).is_err());
    }
}
