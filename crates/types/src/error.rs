use thiserror::Error;

use crate::hash::Address;

/// Errors produced while constructing or validating consensus types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A byte slice had the wrong length for the target type.
    #[error("invalid length for {what}: expected {expected}, got {got}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A field failed basic validation.
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    /// A validator lookup failed.
    #[error("unknown validator {0}")]
    UnknownValidator(Address),

    /// An ed25519 signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// A Merkle proof did not reproduce the expected root.
    #[error("merkle proof verification failed: {0}")]
    InvalidProof(&'static str),

    /// Canonical encoding or decoding failed.
    #[error("codec: {0}")]
    Codec(#[from] basalt_codec::CodecError),

    /// An on-disk artifact could not be read or written.
    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for TypesError {
    fn from(e: std::io::Error) -> Self {
        TypesError::Io(e.to_string())
    }
}
