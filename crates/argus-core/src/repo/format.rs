use crate::crypto::CryptoEngine;
use crate::error::{ArgusError, Result};

/// Object type tags for the repo envelope format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Snapshot = 0,
    Blob = 1,
    Index = 2,
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Snapshot),
            1 => Ok(Self::Blob),
            2 => Ok(Self::Index),
            _ => Err(ArgusError::UnknownObjectType(v)),
        }
    }
}

/// Serialize a typed payload into an encrypted repo object.
///
/// Wire format (encrypted): `[1-byte type_tag][nonce][ciphertext + tag]`
/// Wire format (plaintext): `[1-byte type_tag][plaintext]`
///
/// `context` is bound as additional authenticated data together with the
/// type tag. For content-addressed objects it is the object's id bytes, so
/// a blob cannot be silently substituted for another.
pub fn pack_object(
    obj_type: ObjectType,
    context: &[u8],
    plaintext: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let tag = obj_type as u8;
    let mut aad = Vec::with_capacity(1 + context.len());
    aad.push(tag);
    aad.extend_from_slice(context);
    let encrypted = crypto.encrypt(plaintext, &aad)?;

    let mut out = Vec::with_capacity(1 + encrypted.len());
    out.push(tag);
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Deserialize and decrypt a repo object, requiring a specific type.
pub fn unpack_object(
    data: &[u8],
    expected: ObjectType,
    context: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(ArgusError::InvalidFormat("empty object".into()));
    }
    let obj_type = ObjectType::from_u8(data[0])?;
    if obj_type != expected {
        return Err(ArgusError::InvalidFormat(format!(
            "expected object type {expected:?}, found {obj_type:?}"
        )));
    }
    let mut aad = Vec::with_capacity(1 + context.len());
    aad.push(data[0]);
    aad.extend_from_slice(context);
    crypto.decrypt(&data[1..], &aad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::chacha20_poly1305::ChaCha20Poly1305Engine;
    use crate::crypto::PlaintextEngine;

    #[test]
    fn roundtrip_plaintext() {
        let crypto = PlaintextEngine::new();
        let packed = pack_object(ObjectType::Snapshot, b"ctx", b"payload", &crypto).unwrap();
        assert_eq!(packed[0], ObjectType::Snapshot as u8);
        let payload = unpack_object(&packed, ObjectType::Snapshot, b"ctx", &crypto).unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn type_mismatch_rejected() {
        let crypto = PlaintextEngine::new();
        let packed = pack_object(ObjectType::Blob, b"", b"payload", &crypto).unwrap();
        let err = unpack_object(&packed, ObjectType::Index, b"", &crypto).unwrap_err();
        assert!(matches!(err, ArgusError::InvalidFormat(_)));
    }

    #[test]
    fn unknown_tag_rejected() {
        let crypto = PlaintextEngine::new();
        let err = unpack_object(&[0xFF, 1, 2], ObjectType::Blob, b"", &crypto).unwrap_err();
        assert!(matches!(err, ArgusError::UnknownObjectType(0xFF)));
    }

    #[test]
    fn encrypted_context_is_authenticated() {
        let crypto = ChaCha20Poly1305Engine::new(&[7u8; 32]);
        let packed = pack_object(ObjectType::Blob, b"id-a", b"payload", &crypto).unwrap();
        assert!(unpack_object(&packed, ObjectType::Blob, b"id-b", &crypto).is_err());
        let payload = unpack_object(&packed, ObjectType::Blob, b"id-a", &crypto).unwrap();
        assert_eq!(payload, b"payload");
    }
}
