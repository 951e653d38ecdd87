//! Ed25519 keys and signatures.
//!
//! The validator key type is fixed to ed25519. Addresses are derived from
//! the public key bytes, so a validator's identity is stable across
//! restarts as long as its key file survives.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::hash::{sha256, Address, ADDRESS_LENGTH};
use crate::TypesError;

/// Length of an ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of an ed25519 public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(TypesError::InvalidLength {
                what: "public key",
                expected: PUBLIC_KEY_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(bytes);
        Ok(PublicKey(out))
    }

    /// The address bound to this key: the first twenty bytes of
    /// SHA-256 over the raw key bytes.
    pub fn address(&self) -> Address {
        let digest = sha256(&self.0);
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&digest.as_bytes()[..ADDRESS_LENGTH]);
        Address(out)
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), TypesError> {
        let key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| TypesError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| TypesError::InvalidSignature)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// A detached ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(TypesError::InvalidLength {
                what: "signature",
                expected: SIGNATURE_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; SIGNATURE_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Signature(out))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

/// An ed25519 keypair used for signing votes and proposals.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from its 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, TypesError> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| TypesError::InvalidLength {
            what: "key seed",
            expected: 32,
            got: seed.len(),
        })?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// The 32-byte private seed.
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// The address of this keypair's public key.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
