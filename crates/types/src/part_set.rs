//! Block parts.
//!
//! A serialized block is chunked into equally-sized parts for gossip.
//! Each part carries a Merkle proof against the part-set root so a peer
//! can validate fragments before the whole block has arrived.

use crate::bit_array::BitArray;
use crate::block::PartSetHeader;
use crate::hash::Hash;
use crate::merkle::{self, Proof};
use crate::TypesError;

/// Default part size for block gossip.
pub const BLOCK_PART_SIZE_BYTES: u32 = 65536;

/// One gossip fragment of a serialized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
    pub proof: Proof,
}

impl Part {
    pub fn validate_basic(&self) -> Result<(), TypesError> {
        if self.proof.index != self.index as u64 {
            return Err(TypesError::Invalid {
                what: "part",
                reason: "proof index mismatch".into(),
            });
        }
        if self.bytes.is_empty() {
            return Err(TypesError::Invalid {
                what: "part",
                reason: "empty part bytes".into(),
            });
        }
        Ok(())
    }
}

/// The set of parts of one block, collected out of order.
#[derive(Debug, Clone)]
pub struct PartSet {
    total: u32,
    hash: Hash,
    parts: Vec<Option<Part>>,
    parts_bit_array: BitArray,
    count: u32,
    byte_size: u64,
}

impl PartSet {
    /// Chunk `data` into proof-carrying parts of at most `part_size`
    /// bytes. The resulting set is complete.
    pub fn from_data(data: &[u8], part_size: u32) -> PartSet {
        let part_size = part_size.max(1) as usize;
        let total = data.len().div_ceil(part_size).max(1);
        let chunks: Vec<&[u8]> = (0..total)
            .map(|i| &data[i * part_size..data.len().min((i + 1) * part_size)])
            .collect();
        let (root, proofs) = merkle::proofs_from_byte_slices(&chunks);

        let mut parts_bit_array = BitArray::new(total);
        let parts = chunks
            .iter()
            .zip(proofs)
            .enumerate()
            .map(|(index, (chunk, proof))| {
                parts_bit_array.set(index, true);
                Some(Part {
                    index: index as u32,
                    bytes: chunk.to_vec(),
                    proof,
                })
            })
            .collect();

        PartSet {
            total: total as u32,
            hash: root,
            parts,
            parts_bit_array,
            count: total as u32,
            byte_size: data.len() as u64,
        }
    }

    /// An empty set expecting the parts a header advertises.
    pub fn from_header(header: &PartSetHeader) -> PartSet {
        PartSet {
            total: header.total,
            hash: header.hash,
            parts: vec![None; header.total as usize],
            parts_bit_array: BitArray::new(header.total as usize),
            count: 0,
            byte_size: 0,
        }
    }

    pub fn header(&self) -> PartSetHeader {
        PartSetHeader {
            total: self.total,
            hash: self.hash,
        }
    }

    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        self.header() == *header
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn bit_array(&self) -> &BitArray {
        &self.parts_bit_array
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.total
    }

    pub fn get_part(&self, index: u32) -> Option<&Part> {
        self.parts.get(index as usize).and_then(|p| p.as_ref())
    }

    /// Iterator over the parts present so far.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().flatten()
    }

    /// Add a part received from a peer.
    ///
    /// Returns `Ok(false)` for an already-filled slot (duplicates are
    /// dropped silently), an error for an out-of-range index or a proof
    /// that does not verify against the advertised root.
    pub fn add_part(&mut self, part: Part) -> Result<bool, TypesError> {
        if part.index >= self.total {
            return Err(TypesError::Invalid {
                what: "part",
                reason: format!("index {} out of range (total {})", part.index, self.total),
            });
        }
        if self.parts[part.index as usize].is_some() {
            return Ok(false);
        }
        part.validate_basic()?;
        part.proof.verify(&self.hash, &part.bytes)?;

        let index = part.index as usize;
        self.parts_bit_array.set(index, true);
        self.count += 1;
        self.byte_size += part.bytes.len() as u64;
        self.parts[index] = Some(part);
        Ok(true)
    }

    /// Concatenate all parts back into the serialized block. `None` until
    /// the set is complete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut data = Vec::with_capacity(self.byte_size as usize);
        for part in self.parts.iter().flatten() {
            data.extend_from_slice(&part.bytes);
        }
        Some(data)
    }
}
