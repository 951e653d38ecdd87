//! Hashes and addresses.

use sha2::{Digest, Sha256};

use crate::TypesError;

/// Length of a [`Hash`] in bytes.
pub const HASH_LENGTH: usize = 32;

/// Length of an [`Address`] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&digest);
    Hash(out)
}

/// A 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl Hash {
    /// The all-zero hash, used for empty structures.
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != HASH_LENGTH {
            return Err(TypesError::InvalidLength {
                what: "hash",
                expected: HASH_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Hash(out))
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A 20-byte account or validator address: the first twenty bytes of the
/// SHA-256 of the public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != ADDRESS_LENGTH {
            return Err(TypesError::InvalidLength {
                what: "address",
                expected: ADDRESS_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Address(out))
    }

    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        let bytes = hex::decode(s).map_err(|_| TypesError::Invalid {
            what: "address",
            reason: "not hex".into(),
        })?;
        Self::from_slice(&bytes)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_from_slice_checks_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_err());
        assert!(Hash::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn address_hex_roundtrip() {
        let addr = Address([0xab; ADDRESS_LENGTH]);
        assert_eq!(Address::from_hex(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn zero_hash_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!sha256(b"x").is_zero());
    }
}
