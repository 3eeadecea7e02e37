use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use super::CryptoEngine;
use crate::error::{ArgusError, Result};

/// ChaCha20-Poly1305 authenticated encryption engine.
pub struct ChaCha20Poly1305Engine {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Poly1305Engine {
    pub fn new(encryption_key: &[u8; 32]) -> Self {
        let cipher = ChaCha20Poly1305::new_from_slice(encryption_key)
            .expect("valid 32-byte key for ChaCha20-Poly1305");
        Self { cipher }
    }
}

impl CryptoEngine for ChaCha20Poly1305Engine {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut nonce_bytes = [0u8; 12];
        rng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|e| ArgusError::Other(format!("ChaCha20-Poly1305 encrypt: {e}")))?;

        // Wire format: [12-byte nonce][ciphertext with appended 16-byte tag]
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 12 + 16 {
            return Err(ArgusError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        self.cipher
            .decrypt(nonce, payload)
            .map_err(|_| ArgusError::DecryptionFailed)
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> ChaCha20Poly1305Engine {
        ChaCha20Poly1305Engine::new(&[0x42; 32])
    }

    #[test]
    fn roundtrip() {
        let engine = test_engine();
        let encrypted = engine.encrypt(b"secret data", b"context").unwrap();
        assert_ne!(&encrypted[12..], b"secret data");
        let decrypted = engine.decrypt(&encrypted, b"context").unwrap();
        assert_eq!(decrypted, b"secret data");
    }

    #[test]
    fn wrong_aad_fails() {
        let engine = test_engine();
        let encrypted = engine.encrypt(b"secret data", b"context").unwrap();
        let err = engine.decrypt(&encrypted, b"other context").unwrap_err();
        assert!(matches!(err, ArgusError::DecryptionFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let engine = test_engine();
        let mut encrypted = engine.encrypt(b"secret data", b"context").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert!(engine.decrypt(&encrypted, b"context").is_err());
    }

    #[test]
    fn truncated_input_fails() {
        let engine = test_engine();
        let err = engine.decrypt(&[0u8; 11], b"context").unwrap_err();
        assert!(matches!(err, ArgusError::DecryptionFailed));
    }
}
