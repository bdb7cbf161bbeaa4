//! AES-256-GCM sealing of cookie payloads.
//!
//! A sealed value is `base64url(nonce || ciphertext)`. The purpose string is
//! bound as associated data so a value sealed for one cookie cannot be
//! replayed as another.

use crate::config::SessionConfig;
use crate::errors::{AuthError, Result};
use crate::security::SecureRandomGen;
use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;

/// What a sealed value is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealPurpose {
    Session,
    AuthContext,
}

impl SealPurpose {
    fn aad(self) -> &'static [u8] {
        match self {
            SealPurpose::Session => b"session",
            SealPurpose::AuthContext => b"auth-context",
        }
    }
}

/// Cookie encryption using AES-256-GCM
pub struct CookieSealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CookieSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CookieSealer { .. }")
    }
}

impl CookieSealer {
    /// Create a sealer from a raw 256-bit key
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| AuthError::configuration("Encryption key must be 32 bytes (256 bits)"))?;
        Ok(Self { cipher })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let key = Zeroizing::new(config.key_bytes()?);
        Self::new(&key)
    }

    /// Encrypt and encode a payload
    pub fn seal(&self, purpose: SealPurpose, plaintext: &[u8]) -> Result<String> {
        let nonce_bytes = SecureRandomGen::generate_bytes(NONCE_LEN)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: purpose.aad(),
                },
            )
            .map_err(|e| AuthError::internal(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decode and decrypt a sealed value
    pub fn open(&self, purpose: SealPurpose, sealed: &str) -> Result<Vec<u8>> {
        let raw = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| AuthError::internal("Invalid base64 in sealed value"))?;

        if raw.len() <= NONCE_LEN {
            return Err(AuthError::internal("Sealed value too short"));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: purpose.aad(),
                },
            )
            .map_err(|_| AuthError::internal("Decryption failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> CookieSealer {
        CookieSealer::new(&[42u8; 32]).unwrap()
    }

    #[test]
    fn test_seal_and_open() {
        let sealer = sealer();
        let sealed = sealer.seal(SealPurpose::Session, b"payload").unwrap();
        assert!(!sealed.contains("payload"));
        assert_eq!(sealer.open(SealPurpose::Session, &sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let sealer = sealer();
        let a = sealer.seal(SealPurpose::Session, b"same").unwrap();
        let b = sealer.seal(SealPurpose::Session, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_purpose_is_bound() {
        let sealer = sealer();
        let sealed = sealer.seal(SealPurpose::AuthContext, b"ctx").unwrap();
        assert!(sealer.open(SealPurpose::Session, &sealed).is_err());
    }

    #[test]
    fn test_tampering_detected() {
        let sealer = sealer();
        let sealed = sealer.seal(SealPurpose::Session, b"payload").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert!(sealer.open(SealPurpose::Session, &tampered).is_err());
        assert!(sealer.open(SealPurpose::Session, "not base64!").is_err());
        assert!(sealer.open(SealPurpose::Session, "AAAA").is_err());
    }

    #[test]
    fn test_other_key_cannot_open() {
        let sealed = sealer().seal(SealPurpose::Session, b"payload").unwrap();
        let other = CookieSealer::new(&[7u8; 32]).unwrap();
        assert!(other.open(SealPurpose::Session, &sealed).is_err());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(CookieSealer::new(&[0u8; 16]).is_err());
    }
}
