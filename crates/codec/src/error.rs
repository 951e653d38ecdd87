use thiserror::Error;

/// Errors raised while encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input violates an invariant of the encoding.
    #[error("corrupt input: {0}")]
    Corrupt(&'static str),

    /// The buffer ended before the value was fully decoded.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// NaN cannot be encoded or decoded as an ordered double.
    #[error("NaN is not orderable")]
    NotANumber,

    /// A wire field arrived with the wrong wire type for its tag.
    #[error("wire type mismatch for tag {tag}: got {got}")]
    WireTypeMismatch { tag: u32, got: u8 },

    /// Wire fields must be encoded in strictly ascending tag order.
    #[error("non-canonical field order at tag {0}")]
    NonCanonicalOrder(u32),

    /// A required wire field was absent.
    #[error("missing field with tag {0}")]
    MissingField(u32),

    /// A varint exceeded its maximum width.
    #[error("varint overflow")]
    VarintOverflow,

    /// A decoded value is outside the domain of the target type.
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
}
