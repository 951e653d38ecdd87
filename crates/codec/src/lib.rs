//! Binary codecs for Basalt.
//!
//! Two codecs live here:
//!
//! - [`orderedcode`]: an order-preserving serialization of tuples of
//!   scalars and byte strings. The lexicographic order of encoded keys
//!   equals the value order of the tuples, which makes the encoding usable
//!   directly as a state-index key.
//! - [`wire`]: a proto3-compatible wire format (uleb128 varints, zigzag
//!   signed ints, length-delimited fields) used for canonical sign bytes
//!   and block serialization. Field tags are declared explicitly next to
//!   each record; there is no reflection or derive layer.
//!
//! Both codecs reject malformed input with [`CodecError`] instead of
//! panicking: a corrupt message from a peer must never take the node down.

pub mod orderedcode;
pub mod wire;

mod error;

pub use error::CodecError;
