use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ArgusError, Result};

/// The master key material, never stored in plaintext on disk.
/// Automatically zeroized on drop to prevent key material from lingering in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    pub encryption_key: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

/// Serialized payload inside the encrypted key blob.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct MasterKeyPayload {
    encryption_key: Vec<u8>,
}

/// KDF parameters stored alongside the encrypted key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

/// On-disk format stored at `keys/repokey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub kdf: KdfParams,
    pub nonce: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
}

// KDF parameter bounds to reject maliciously crafted key blobs.
const MAX_TIME_COST: u32 = 10;
const MAX_PARALLELISM: u32 = 16;
const MAX_MEMORY_KIB: u32 = 524_288; // 512 MiB
const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

/// Validate KDF parameters are within safe bounds.
fn validate_kdf_params(kdf: &KdfParams) -> Result<()> {
    if kdf.algorithm != "argon2id" {
        return Err(ArgusError::DecryptionFailed);
    }
    if kdf.time_cost == 0 || kdf.time_cost > MAX_TIME_COST {
        return Err(ArgusError::DecryptionFailed);
    }
    if kdf.parallelism == 0 || kdf.parallelism > MAX_PARALLELISM {
        return Err(ArgusError::DecryptionFailed);
    }
    if kdf.memory_cost == 0 || kdf.memory_cost > MAX_MEMORY_KIB {
        return Err(ArgusError::DecryptionFailed);
    }
    if kdf.salt.len() < MIN_SALT_LEN || kdf.salt.len() > MAX_SALT_LEN {
        return Err(ArgusError::DecryptionFailed);
    }
    Ok(())
}

/// AAD binding the KDF parameters to the key blob, preventing parameter
/// substitution attacks.
fn kdf_params_aad(kdf: &KdfParams) -> Vec<u8> {
    let mut aad = Vec::with_capacity(64);
    aad.extend_from_slice(b"argus-key-v1\0");
    aad.extend_from_slice(kdf.algorithm.as_bytes());
    aad.push(0);
    aad.extend_from_slice(&kdf.time_cost.to_le_bytes());
    aad.extend_from_slice(&kdf.memory_cost.to_le_bytes());
    aad.extend_from_slice(&kdf.parallelism.to_le_bytes());
    aad.extend_from_slice(&kdf.salt);
    aad
}

fn derive_key_from_passphrase(passphrase: &str, kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| ArgusError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
    let argon = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut out = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase.as_bytes(), &kdf.salt, &mut out[..])
        .map_err(|e| ArgusError::KeyDerivation(format!("argon2: {e}")))?;
    Ok(out)
}

impl MasterKey {
    /// Generate a new random master key using OS entropy.
    pub fn generate() -> Self {
        let mut encryption_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut encryption_key);
        Self { encryption_key }
    }

    /// Encrypt the master key with a passphrase using Argon2id + ChaCha20-Poly1305.
    pub fn to_encrypted(&self, passphrase: &str) -> Result<EncryptedKey> {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let kdf = KdfParams {
            algorithm: "argon2id".to_string(),
            time_cost: 3,
            memory_cost: 65536, // 64 MiB
            parallelism: 4,
            salt,
        };
        let wrapping_key = derive_key_from_passphrase(passphrase, &kdf)?;

        let payload = MasterKeyPayload {
            encryption_key: self.encryption_key.to_vec(),
        };
        let plaintext = Zeroizing::new(rmp_serde::to_vec(&payload)?);

        let cipher = ChaCha20Poly1305::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| ArgusError::KeyDerivation(format!("cipher init: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = kdf_params_aad(&kdf);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_ref(),
                    aad: &aad,
                },
            )
            .map_err(|e| ArgusError::KeyDerivation(format!("encrypt: {e}")))?;

        Ok(EncryptedKey {
            kdf,
            nonce: nonce_bytes.to_vec(),
            encrypted_payload: ciphertext,
        })
    }

    /// Decrypt a master key from its on-disk form using a passphrase.
    pub fn from_encrypted(enc: &EncryptedKey, passphrase: &str) -> Result<Self> {
        validate_kdf_params(&enc.kdf)?;
        if enc.nonce.len() != 12 {
            return Err(ArgusError::DecryptionFailed);
        }

        let wrapping_key = derive_key_from_passphrase(passphrase, &enc.kdf)?;
        let cipher = ChaCha20Poly1305::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| ArgusError::KeyDerivation(format!("cipher init: {e}")))?;
        let nonce = Nonce::from_slice(&enc.nonce);
        let aad = kdf_params_aad(&enc.kdf);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    nonce,
                    Payload {
                        msg: enc.encrypted_payload.as_slice(),
                        aad: &aad,
                    },
                )
                .map_err(|_| ArgusError::DecryptionFailed)?,
        );

        let payload: MasterKeyPayload = rmp_serde::from_slice(&plaintext)?;
        if payload.encryption_key.len() != 32 {
            return Err(ArgusError::DecryptionFailed);
        }
        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&payload.encryption_key);
        Ok(Self { encryption_key })
    }
}
