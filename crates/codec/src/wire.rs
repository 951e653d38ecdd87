//! Canonical proto3-style wire codec.
//!
//! Records encode as a sequence of `(tag << 3) | wire_type` keys followed
//! by the field payload: uleb128 varints (wire type 0), zigzag varints for
//! signed fields, and length-delimited bytes or nested messages (wire type
//! 2). Tags are declared explicitly by the record's own `encode`/`decode`
//! functions; decoding enforces strictly ascending tag order so that every
//! value has exactly one encoding.
//!
//! Fields are written unconditionally, defaults included. Sign bytes must
//! be reproducible from the record alone, and skipping defaults would make
//! the encoding depend on which writer produced it.

use crate::CodecError;

/// Varint-encoded field.
pub const WIRE_VARINT: u8 = 0;
/// Length-delimited field (bytes, strings, nested messages).
pub const WIRE_BYTES: u8 = 2;

/// Appends wire fields to a buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn put_key(&mut self, tag: u32, wire_type: u8) {
        self.put_uvarint(((tag as u64) << 3) | wire_type as u64);
    }

    fn put_uvarint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Unsigned varint field.
    pub fn field_u64(&mut self, tag: u32, v: u64) {
        self.put_key(tag, WIRE_VARINT);
        self.put_uvarint(v);
    }

    /// Signed varint field, zigzag-encoded.
    pub fn field_i64(&mut self, tag: u32, v: i64) {
        self.put_key(tag, WIRE_VARINT);
        self.put_uvarint(((v << 1) ^ (v >> 63)) as u64);
    }

    /// Boolean varint field.
    pub fn field_bool(&mut self, tag: u32, v: bool) {
        self.field_u64(tag, v as u64);
    }

    /// Length-delimited byte field.
    pub fn field_bytes(&mut self, tag: u32, v: &[u8]) {
        self.put_key(tag, WIRE_BYTES);
        self.put_uvarint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    /// Length-delimited string field.
    pub fn field_str(&mut self, tag: u32, v: &str) {
        self.field_bytes(tag, v.as_bytes());
    }

    /// Nested message field: the closure writes the inner record.
    pub fn field_msg(&mut self, tag: u32, f: impl FnOnce(&mut WireWriter)) {
        let mut inner = WireWriter::new();
        f(&mut inner);
        self.field_bytes(tag, &inner.buf);
    }
}

/// Reads wire fields back in canonical order.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    last_tag: u32,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            last_tag: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn get(&mut self) -> Result<u8, CodecError> {
        let b = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn get_uvarint(&mut self) -> Result<u64, CodecError> {
        let mut v = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.get()?;
            v |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// Decode the key at the cursor without consuming it.
    fn peek_key(&self) -> Option<(u32, u8)> {
        let mut v = 0u64;
        let mut pos = self.pos;
        for shift in (0..64).step_by(7) {
            let b = *self.buf.get(pos)?;
            pos += 1;
            v |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Some(((v >> 3) as u32, (v & 0b111) as u8));
            }
        }
        None
    }

    /// Read the next field key, enforcing ascending tag order.
    fn next_key(&mut self, expected_tag: u32, expected_type: u8) -> Result<(), CodecError> {
        let key = self.get_uvarint()?;
        let tag = (key >> 3) as u32;
        let wire_type = (key & 0b111) as u8;
        if tag <= self.last_tag {
            return Err(CodecError::NonCanonicalOrder(tag));
        }
        self.last_tag = tag;
        if tag != expected_tag {
            return Err(CodecError::MissingField(expected_tag));
        }
        if wire_type != expected_type {
            return Err(CodecError::WireTypeMismatch {
                tag,
                got: wire_type,
            });
        }
        Ok(())
    }

    /// Unsigned varint field with the given tag.
    pub fn field_u64(&mut self, tag: u32) -> Result<u64, CodecError> {
        self.next_key(tag, WIRE_VARINT)?;
        self.get_uvarint()
    }

    /// Signed (zigzag) varint field with the given tag.
    pub fn field_i64(&mut self, tag: u32) -> Result<i64, CodecError> {
        self.next_key(tag, WIRE_VARINT)?;
        let v = self.get_uvarint()?;
        Ok(((v >> 1) as i64) ^ -((v & 1) as i64))
    }

    /// Boolean varint field with the given tag.
    pub fn field_bool(&mut self, tag: u32) -> Result<bool, CodecError> {
        match self.field_u64(tag)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::OutOfRange("bool")),
        }
    }

    /// Length-delimited byte field with the given tag.
    pub fn field_bytes(&mut self, tag: u32) -> Result<Vec<u8>, CodecError> {
        self.next_key(tag, WIRE_BYTES)?;
        let len = self.get_uvarint()? as usize;
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEnd);
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    /// String field with the given tag.
    pub fn field_str(&mut self, tag: u32) -> Result<String, CodecError> {
        String::from_utf8(self.field_bytes(tag)?).map_err(|_| CodecError::Corrupt("invalid utf-8"))
    }

    /// Nested message field: the closure reads the inner record.
    pub fn field_msg<T>(
        &mut self,
        tag: u32,
        f: impl FnOnce(&mut WireReader<'_>) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        self.next_key(tag, WIRE_BYTES)?;
        let len = self.get_uvarint()? as usize;
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEnd);
        }
        let mut inner = WireReader::new(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        let value = f(&mut inner)?;
        if !inner.is_empty() {
            return Err(CodecError::Corrupt("trailing bytes in nested message"));
        }
        Ok(value)
    }

    /// Optional nested message: `None` when the next field is not `tag`.
    pub fn field_opt_msg<T>(
        &mut self,
        tag: u32,
        f: impl FnOnce(&mut WireReader<'_>) -> Result<T, CodecError>,
    ) -> Result<Option<T>, CodecError> {
        match self.peek_key() {
            Some((t, _)) if t == tag => self.field_msg(tag, f).map(Some),
            _ => Ok(None),
        }
    }

    /// Repeated length-delimited byte field: zero or more consecutive
    /// occurrences of `tag`.
    pub fn field_repeated_bytes(&mut self, tag: u32) -> Result<Vec<Vec<u8>>, CodecError> {
        let mut out = Vec::new();
        while matches!(self.peek_key(), Some((t, _)) if t == tag) {
            self.last_tag = tag - 1;
            out.push(self.field_bytes(tag)?);
        }
        self.last_tag = self.last_tag.max(tag);
        Ok(out)
    }

    /// Repeated nested message field: zero or more consecutive
    /// occurrences of `tag`, each decoded by `f`.
    pub fn field_repeated_msg<T>(
        &mut self,
        tag: u32,
        mut f: impl FnMut(&mut WireReader<'_>) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        let mut out = Vec::new();
        while matches!(self.peek_key(), Some((t, _)) if t == tag) {
            self.last_tag = tag - 1;
            out.push(self.field_msg(tag, &mut f)?);
        }
        self.last_tag = self.last_tag.max(tag);
        Ok(out)
    }

    /// Decoding must consume the whole buffer.
    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Corrupt("trailing bytes"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut w = WireWriter::new();
        w.field_u64(1, 0);
        w.field_u64(2, u64::MAX);
        w.field_i64(3, -1);
        w.field_i64(4, i64::MIN);
        w.field_bool(5, true);
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.field_u64(1).unwrap(), 0);
        assert_eq!(r.field_u64(2).unwrap(), u64::MAX);
        assert_eq!(r.field_i64(3).unwrap(), -1);
        assert_eq!(r.field_i64(4).unwrap(), i64::MIN);
        assert!(r.field_bool(5).unwrap());
        r.expect_end().unwrap();
    }

    #[test]
    fn nested_message_roundtrip() {
        let mut w = WireWriter::new();
        w.field_str(1, "basalt");
        w.field_msg(2, |inner| {
            inner.field_u64(1, 7);
            inner.field_bytes(2, &[0xde, 0xad]);
        });
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.field_str(1).unwrap(), "basalt");
        let (a, b) = r
            .field_msg(2, |inner| {
                let a = inner.field_u64(1)?;
                let b = inner.field_bytes(2)?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a, 7);
        assert_eq!(b, vec![0xde, 0xad]);
    }

    #[test]
    fn rejects_out_of_order_tags() {
        let mut w = WireWriter::new();
        w.field_u64(2, 1);
        w.field_u64(1, 2);
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.field_u64(2).unwrap(), 1);
        assert!(matches!(
            r.field_u64(1),
            Err(CodecError::NonCanonicalOrder(1))
        ));
    }

    #[test]
    fn rejects_wrong_wire_type() {
        let mut w = WireWriter::new();
        w.field_bytes(1, b"x");
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert!(matches!(
            r.field_u64(1),
            Err(CodecError::WireTypeMismatch { tag: 1, got: 2 })
        ));
    }

    #[test]
    fn optional_and_repeated_fields() {
        let mut w = WireWriter::new();
        w.field_u64(1, 5);
        // Tag 2 (optional) absent.
        w.field_bytes(3, b"a");
        w.field_bytes(3, b"b");
        w.field_msg(4, |m| m.field_u64(1, 10));
        w.field_msg(4, |m| m.field_u64(1, 20));
        w.field_u64(5, 9);
        let buf = w.finish();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.field_u64(1).unwrap(), 5);
        assert_eq!(r.field_opt_msg(2, |m| m.field_u64(1)).unwrap(), None);
        assert_eq!(
            r.field_repeated_bytes(3).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(
            r.field_repeated_msg(4, |m| m.field_u64(1)).unwrap(),
            vec![10, 20]
        );
        assert_eq!(r.field_u64(5).unwrap(), 9);
        r.expect_end().unwrap();
    }

    #[test]
    fn rejects_truncated_length() {
        let mut w = WireWriter::new();
        w.field_bytes(1, &[0u8; 16]);
        let mut buf = w.finish();
        buf.truncate(buf.len() - 4);

        let mut r = WireReader::new(&buf);
        assert_eq!(r.field_bytes(1), Err(CodecError::UnexpectedEnd));
    }
}
