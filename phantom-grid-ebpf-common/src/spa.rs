//! Single Packet Authorization wire format.
//!
//! The kernel validates *structure* only. Static mode is an exact token
//! match; dynamic and asymmetric modes carry a fixed binary header whose
//! cryptographic material (TOTP + HMAC-SHA256 or Ed25519) is verified by the
//! control plane after the kernel's anti-replay admission.
//!
//! ```text
//! offset 0  : version   (1 byte, must be 1)
//! offset 1  : mode      (1 byte: 1 = HMAC-SHA256, 2 = Ed25519)
//! offset 2  : timestamp (8 bytes, seconds since epoch, big-endian)
//! offset 10 : totp      (4 bytes, big-endian)
//! offset 14 : signature (32 bytes for HMAC, 64 for Ed25519)
//! ```

use crate::ports::SPA_STATIC_TOKEN;

pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 14;
pub const HMAC_SIG_LEN: usize = 32;
pub const ED25519_SIG_LEN: usize = 64;

/// Replay window used when the config slot has not been populated yet.
pub const DEFAULT_REPLAY_WINDOW_SECS: u32 = 60;

/// Active SPA mode, from the `spa_config` mode slot. Unknown values fall
/// back to static so a half-configured deployment stays closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpaMode {
    Static,
    Dynamic,
    Asymmetric,
}

impl SpaMode {
    pub const fn config_value(self) -> u32 {
        match self {
            SpaMode::Static => 0,
            SpaMode::Dynamic => 1,
            SpaMode::Asymmetric => 2,
        }
    }

    pub fn from_config(value: Option<u32>) -> Self {
        match value {
            Some(1) => SpaMode::Dynamic,
            Some(2) => SpaMode::Asymmetric,
            _ => SpaMode::Static,
        }
    }
}

/// Signature scheme named by the wire mode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireMode {
    Hmac,
    Ed25519,
}

impl WireMode {
    pub const fn sig_len(self) -> usize {
        match self {
            WireMode::Hmac => HMAC_SIG_LEN,
            WireMode::Ed25519 => ED25519_SIG_LEN,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(WireMode::Hmac),
            2 => Some(WireMode::Ed25519),
            _ => None,
        }
    }
}

/// Structurally valid dynamic/asymmetric magic packet.
#[derive(Clone, Copy, Debug)]
pub struct DynamicPacket<'a> {
    pub mode: WireMode,
    /// Sender's wall-clock seconds since epoch.
    pub timestamp: u64,
    pub totp: u32,
    pub signature: &'a [u8],
}

impl DynamicPacket<'_> {
    /// First 8 signature bytes as a big-endian u64, the anti-replay key.
    pub fn sig_prefix(&self) -> u64 {
        let mut prefix = 0u64;
        let mut i = 0;
        while i < 8 {
            prefix = (prefix << 8) | u64::from(self.signature[i]);
            i += 1;
        }
        prefix
    }
}

/// Structural validation of a dynamic-mode payload. Length must be exactly
/// header + signature for the named mode.
pub fn parse_dynamic(payload: &[u8]) -> Option<DynamicPacket<'_>> {
    if payload.len() < HEADER_LEN {
        return None;
    }
    if payload[0] != VERSION {
        return None;
    }
    let mode = WireMode::from_byte(payload[1])?;
    if payload.len() != HEADER_LEN + mode.sig_len() {
        return None;
    }

    let mut timestamp = 0u64;
    let mut i = 0;
    while i < 8 {
        timestamp = (timestamp << 8) | u64::from(payload[2 + i]);
        i += 1;
    }
    let totp = u32::from_be_bytes([payload[10], payload[11], payload[12], payload[13]]);

    Some(DynamicPacket { mode, timestamp, totp, signature: &payload[HEADER_LEN..] })
}

/// Static-mode check: exact length, exact bytes.
pub fn static_token_matches(payload: &[u8]) -> bool {
    if payload.len() != SPA_STATIC_TOKEN.len() {
        return false;
    }
    let mut i = 0;
    while i < SPA_STATIC_TOKEN.len() {
        if payload[i] != SPA_STATIC_TOKEN[i] {
            return false;
        }
        i += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_payload(mode: u8, sig_len: usize) -> [u8; 78] {
        let mut p = [0u8; 78];
        p[0] = VERSION;
        p[1] = mode;
        p[2..10].copy_from_slice(&1_700_000_000u64.to_be_bytes());
        p[10..14].copy_from_slice(&123_456u32.to_be_bytes());
        let mut i = 0;
        while i < sig_len {
            p[HEADER_LEN + i] = (i as u8).wrapping_mul(7).wrapping_add(1);
            i += 1;
        }
        p
    }

    #[test]
    fn parses_hmac_packet() {
        let p = dynamic_payload(1, HMAC_SIG_LEN);
        let pkt = parse_dynamic(&p[..HEADER_LEN + HMAC_SIG_LEN]).unwrap();
        assert_eq!(pkt.mode, WireMode::Hmac);
        assert_eq!(pkt.timestamp, 1_700_000_000);
        assert_eq!(pkt.totp, 123_456);
        assert_eq!(pkt.signature.len(), HMAC_SIG_LEN);
    }

    #[test]
    fn parses_ed25519_packet() {
        let p = dynamic_payload(2, ED25519_SIG_LEN);
        let pkt = parse_dynamic(&p).unwrap();
        assert_eq!(pkt.mode, WireMode::Ed25519);
        assert_eq!(pkt.signature.len(), ED25519_SIG_LEN);
    }

    #[test]
    fn rejects_bad_version_mode_and_length() {
        let mut p = dynamic_payload(1, HMAC_SIG_LEN);
        let hmac_len = HEADER_LEN + HMAC_SIG_LEN;

        p[0] = 2;
        assert!(parse_dynamic(&p[..hmac_len]).is_none());
        p[0] = VERSION;

        p[1] = 3;
        assert!(parse_dynamic(&p[..hmac_len]).is_none());
        p[1] = 1;

        // truncated and oversized payloads
        assert!(parse_dynamic(&p[..hmac_len - 1]).is_none());
        assert!(parse_dynamic(&p[..hmac_len + 1]).is_none());
        assert!(parse_dynamic(&p[..HEADER_LEN - 1]).is_none());
    }

    #[test]
    fn sig_prefix_is_big_endian_over_first_eight_bytes() {
        let p = dynamic_payload(1, HMAC_SIG_LEN);
        let pkt = parse_dynamic(&p[..HEADER_LEN + HMAC_SIG_LEN]).unwrap();
        let expect = u64::from_be_bytes([
            p[14], p[15], p[16], p[17], p[18], p[19], p[20], p[21],
        ]);
        assert_eq!(pkt.sig_prefix(), expect);
    }

    #[test]
    fn static_token_requires_exact_match() {
        assert!(static_token_matches(b"PHANTOM_GRID_SPA_2025"));
        assert!(!static_token_matches(b"PHANTOM_GRID_SPA_2024"));
        assert!(!static_token_matches(b"PHANTOM_GRID_SPA_202"));
        assert!(!static_token_matches(b"PHANTOM_GRID_SPA_2025x"));
        assert!(!static_token_matches(b""));
    }

    #[test]
    fn mode_from_config_defaults_to_static() {
        assert_eq!(SpaMode::from_config(None), SpaMode::Static);
        assert_eq!(SpaMode::from_config(Some(0)), SpaMode::Static);
        assert_eq!(SpaMode::from_config(Some(1)), SpaMode::Dynamic);
        assert_eq!(SpaMode::from_config(Some(2)), SpaMode::Asymmetric);
        assert_eq!(SpaMode::from_config(Some(9)), SpaMode::Static);
    }
}
