//! Userspace half of dynamic SPA: the cryptography the kernel refuses to do.
//!
//! The ingress program has already checked packet structure and admitted the
//! signature prefix through the anti-replay table; everything here operates
//! on the payload bytes delivered over the magic-port UDP socket.
//!
//! The signed message is the 14-byte packet header (version, mode,
//! timestamp, TOTP). TOTP is RFC 6238 with HMAC-SHA256 and the full 31-bit
//! truncated value, validated against the sender's timestamp within the
//! configured step tolerance.

use ed25519_dalek::{Signature, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use phantom_grid_ebpf_common::spa::{self, SpaMode, WireMode};

use crate::error::AgentError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaRejection {
    #[error("payload does not parse as a dynamic magic packet")]
    Shape,
    #[error("wire mode does not match the configured SPA mode")]
    WrongMode,
    #[error("TOTP outside tolerance")]
    Totp,
    #[error("signature verification failed")]
    Signature,
}

pub struct SpaVerifier {
    mode: SpaMode,
    totp_secret: [u8; 32],
    totp_step_secs: u64,
    totp_tolerance: u32,
    hmac_secret: Option<[u8; 32]>,
    verifying_key: Option<VerifyingKey>,
}

impl SpaVerifier {
    pub fn new(
        mode: SpaMode,
        totp_secret: [u8; 32],
        totp_step_secs: u32,
        totp_tolerance: u32,
        hmac_secret: Option<[u8; 32]>,
        ed25519_public: Option<[u8; 32]>,
    ) -> Result<Self, AgentError> {
        let verifying_key = match ed25519_public {
            Some(bytes) => Some(VerifyingKey::from_bytes(&bytes).map_err(|e| {
                AgentError::Config(format!("ed25519_public_key_hex: invalid point: {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            mode,
            totp_secret,
            totp_step_secs: u64::from(totp_step_secs),
            totp_tolerance,
            hmac_secret,
            verifying_key,
        })
    }

    pub fn verify(&self, payload: &[u8]) -> Result<(), SpaRejection> {
        let packet = spa::parse_dynamic(payload).ok_or(SpaRejection::Shape)?;

        match (self.mode, packet.mode) {
            (SpaMode::Dynamic, WireMode::Hmac) | (SpaMode::Asymmetric, WireMode::Ed25519) => {}
            _ => return Err(SpaRejection::WrongMode),
        }

        if !self.totp_matches(packet.timestamp, packet.totp) {
            return Err(SpaRejection::Totp);
        }

        let message = &payload[..spa::HEADER_LEN];
        match packet.mode {
            WireMode::Hmac => self.verify_hmac(message, packet.signature),
            WireMode::Ed25519 => self.verify_ed25519(message, packet.signature),
        }
    }

    fn totp_matches(&self, timestamp: u64, presented: u32) -> bool {
        if self.totp_step_secs == 0 {
            return false;
        }
        let step = timestamp / self.totp_step_secs;
        let tolerance = i64::from(self.totp_tolerance);
        for offset in -tolerance..=tolerance {
            let Some(counter) = step.checked_add_signed(offset) else {
                continue;
            };
            if let Some(code) = totp_code(&self.totp_secret, counter) {
                if code == presented {
                    return true;
                }
            }
        }
        false
    }

    fn verify_hmac(&self, message: &[u8], signature: &[u8]) -> Result<(), SpaRejection> {
        let Some(key) = self.hmac_secret.as_ref() else {
            return Err(SpaRejection::Signature);
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
            return Err(SpaRejection::Signature);
        };
        mac.update(message);
        let tag = mac.finalize().into_bytes();
        if bool::from(tag.as_slice().ct_eq(signature)) {
            Ok(())
        } else {
            Err(SpaRejection::Signature)
        }
    }

    fn verify_ed25519(&self, message: &[u8], signature: &[u8]) -> Result<(), SpaRejection> {
        let Some(key) = self.verifying_key.as_ref() else {
            return Err(SpaRejection::Signature);
        };
        let signature = Signature::from_slice(signature).map_err(|_| SpaRejection::Signature)?;
        key.verify_strict(message, &signature).map_err(|_| SpaRejection::Signature)
    }
}

/// RFC 6238 value for one counter step: HMAC-SHA256 with RFC 4226 dynamic
/// truncation, without decimal reduction (the wire carries the full 31-bit
/// value).
fn totp_code(secret: &[u8], counter: u64) -> Option<u32> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = usize::from(digest[digest.len() - 1] & 0x0F);
    let code = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7FFF_FFFF;
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const TOTP_SECRET: [u8; 32] = [0xA5; 32];
    const HMAC_SECRET: [u8; 32] = [0x5A; 32];
    const STEP: u32 = 30;
    const NOW: u64 = 1_700_000_000;

    fn header(mode: u8, timestamp: u64, totp: u32) -> [u8; spa::HEADER_LEN] {
        let mut h = [0u8; spa::HEADER_LEN];
        h[0] = spa::VERSION;
        h[1] = mode;
        h[2..10].copy_from_slice(&timestamp.to_be_bytes());
        h[10..14].copy_from_slice(&totp.to_be_bytes());
        h
    }

    fn hmac_packet(timestamp: u64, totp: u32) -> Vec<u8> {
        let mut payload = header(1, timestamp, totp).to_vec();
        let mut mac = HmacSha256::new_from_slice(&HMAC_SECRET).expect("hmac key");
        mac.update(&payload);
        payload.extend_from_slice(&mac.finalize().into_bytes());
        payload
    }

    fn dynamic_verifier() -> SpaVerifier {
        SpaVerifier::new(SpaMode::Dynamic, TOTP_SECRET, STEP, 1, Some(HMAC_SECRET), None)
            .expect("verifier")
    }

    fn code_at(counter: u64) -> u32 {
        totp_code(&TOTP_SECRET, counter).expect("totp code")
    }

    #[test]
    fn valid_hmac_packet_is_accepted() {
        let totp = code_at(NOW / u64::from(STEP));
        let payload = hmac_packet(NOW, totp);
        assert_eq!(dynamic_verifier().verify(&payload), Ok(()));
    }

    #[test]
    fn totp_from_adjacent_step_is_within_tolerance() {
        let totp = code_at(NOW / u64::from(STEP) - 1);
        let payload = hmac_packet(NOW, totp);
        assert_eq!(dynamic_verifier().verify(&payload), Ok(()));

        let totp = code_at(NOW / u64::from(STEP) - 2);
        let payload = hmac_packet(NOW, totp);
        assert_eq!(dynamic_verifier().verify(&payload), Err(SpaRejection::Totp));
    }

    #[test]
    fn tampered_header_fails_signature_check() {
        let totp = code_at(NOW / u64::from(STEP));
        let mut payload = hmac_packet(NOW, totp);
        // Flip a totp bit that keeps the value within tolerance of nothing:
        // the signature check must reject before anything else leaks.
        payload[13] ^= 0x01;
        let verdict = dynamic_verifier().verify(&payload);
        assert!(matches!(verdict, Err(SpaRejection::Totp) | Err(SpaRejection::Signature)));

        // Tamper the signature itself with a valid totp.
        let mut payload = hmac_packet(NOW, totp);
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        assert_eq!(dynamic_verifier().verify(&payload), Err(SpaRejection::Signature));
    }

    #[test]
    fn wire_mode_must_match_configured_mode() {
        let totp = code_at(NOW / u64::from(STEP));
        let mut payload = header(2, NOW, totp).to_vec();
        payload.extend_from_slice(&[0u8; spa::ED25519_SIG_LEN]);
        assert_eq!(dynamic_verifier().verify(&payload), Err(SpaRejection::WrongMode));
    }

    #[test]
    fn malformed_payload_is_a_shape_rejection() {
        assert_eq!(dynamic_verifier().verify(b"PHANTOM_GRID_SPA_2025"), Err(SpaRejection::Shape));
        assert_eq!(dynamic_verifier().verify(&[]), Err(SpaRejection::Shape));
    }

    #[test]
    fn valid_ed25519_packet_is_accepted() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = SpaVerifier::new(
            SpaMode::Asymmetric,
            TOTP_SECRET,
            STEP,
            1,
            None,
            Some(signing_key.verifying_key().to_bytes()),
        )
        .expect("verifier");

        let totp = code_at(NOW / u64::from(STEP));
        let mut payload = header(2, NOW, totp).to_vec();
        let signature = signing_key.sign(&payload);
        payload.extend_from_slice(&signature.to_bytes());

        assert_eq!(verifier.verify(&payload), Ok(()));

        // A different signer must fail.
        let other = SigningKey::from_bytes(&[8u8; 32]);
        let mut forged = header(2, NOW, totp).to_vec();
        forged.extend_from_slice(&other.sign(&forged).to_bytes());
        assert_eq!(verifier.verify(&forged), Err(SpaRejection::Signature));
    }

    #[test]
    fn totp_codes_are_deterministic_per_step() {
        assert_eq!(code_at(123), code_at(123));
        assert_ne!(code_at(123), code_at(124));
    }
}
