//! Varints and the protobuf subset used by dag-pb and UnixFS
//!
//! Only the wire types those formats use are supported: varint (0) and
//! length-delimited (2). Anything else is a decode error.

use crate::error::{ClientError, Result};

/// Protobuf wire type for varints
pub const WIRE_VARINT: u8 = 0;

/// Protobuf wire type for length-delimited fields
pub const WIRE_LEN: u8 = 2;

/// Append an unsigned LEB128 varint
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Encoded length of a varint
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read an unsigned LEB128 varint, returning the value and bytes consumed
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate().take(10) {
        let part = u64::from(byte & 0x7f);
        if i == 9 && part > 1 {
            return Err(ClientError::decode("varint overflows u64"));
        }
        value |= part << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && *byte == 0 {
                return Err(ClientError::decode("varint is not minimally encoded"));
            }
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= 10 {
        Err(ClientError::decode("varint longer than 10 bytes"))
    } else {
        Err(ClientError::decode("truncated varint"))
    }
}

/// Append a field key
pub fn put_key(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Append a varint field
pub fn put_uint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    put_key(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

/// Append a length-delimited field
pub fn put_bytes_field(buf: &mut Vec<u8>, field: u32, value: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

/// A decoded protobuf field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// Sequential reader over protobuf fields
pub struct ProtoReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, used) = read_varint(&self.buf[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    /// Next `(field number, value)` pair, or `None` at the end of the message
    pub fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| ClientError::decode(format!("field number {} out of range", key >> 3)))?;
        if field == 0 {
            return Err(ClientError::decode("field number 0"));
        }
        let value = match (key & 0x7) as u8 {
            WIRE_VARINT => FieldValue::Varint(self.varint()?),
            WIRE_LEN => {
                let len = usize::try_from(self.varint()?)
                    .map_err(|_| ClientError::decode("field length out of range"))?;
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|end| *end <= self.buf.len())
                    .ok_or_else(|| ClientError::decode("field length exceeds message"))?;
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                FieldValue::Bytes(bytes)
            }
            other => {
                return Err(ClientError::decode(format!(
                    "unsupported wire type {} for field {}",
                    other, field
                )))
            }
        };
        Ok(Some((field, value)))
    }
}
