//! Serialization primitives for the common structures.
//!
//! Variable-length integers use the table from the protocol
//! specification: one raw byte below `0xFD`, then `0xFD` + u16,
//! `0xFE` + u32, `0xFF` + u64, all big-endian. Writers always emit the
//! minimal form; readers accept non-minimal encodings, matching what
//! the network tolerates in practice.
//!
//! All fixed-width integers on the wire are big-endian.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use bitmsg_types::{BmError, Result};

/// Upper bound for any length-prefixed structure. Nothing legitimate
/// exceeds one maximum-size frame payload.
const MAX_VAR_LEN: u64 = 1_600_003;

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Appends a minimally encoded var-int.
pub fn write_var_int(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFD);
        let _ = out.write_u16::<BigEndian>(value as u16);
    } else if value <= 0xFFFF_FFFF {
        out.push(0xFE);
        let _ = out.write_u32::<BigEndian>(value as u32);
    } else {
        out.push(0xFF);
        let _ = out.write_u64::<BigEndian>(value);
    }
}

/// Appends a var-int length prefix followed by the bytes.
pub fn write_var_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_var_int(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// Appends a var-int length prefix followed by the UTF-8 bytes.
pub fn write_var_string(out: &mut Vec<u8>, value: &str) {
    write_var_bytes(out, value.as_bytes());
}

/// Appends a var-int count followed by each value as a var-int.
pub fn write_var_int_list(out: &mut Vec<u8>, values: &[u64]) {
    write_var_int(out, values.len() as u64);
    for &value in values {
        write_var_int(out, value);
    }
}

/// Appends a fixed big-endian u16.
pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    let _ = out.write_u16::<BigEndian>(value);
}

/// Appends a fixed big-endian u32.
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    let _ = out.write_u32::<BigEndian>(value);
}

/// Appends a fixed big-endian u64.
pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    let _ = out.write_u64::<BigEndian>(value);
}

/// Appends a fixed big-endian i64.
pub fn write_i64(out: &mut Vec<u8>, value: i64) {
    let _ = out.write_i64::<BigEndian>(value);
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn decode_err(e: std::io::Error) -> BmError {
    BmError::Decode {
        reason: format!("unexpected end of data: {e}"),
    }
}

/// Reads a var-int. Non-minimal encodings are accepted.
pub fn read_var_int(reader: &mut impl Read) -> Result<u64> {
    let first = reader.read_u8().map_err(decode_err)?;
    match first {
        0xFD => Ok(u64::from(reader.read_u16::<BigEndian>().map_err(decode_err)?)),
        0xFE => Ok(u64::from(reader.read_u32::<BigEndian>().map_err(decode_err)?)),
        0xFF => reader.read_u64::<BigEndian>().map_err(decode_err),
        b => Ok(u64::from(b)),
    }
}

/// Reads a var-int length prefix and that many bytes.
pub fn read_var_bytes(reader: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_var_int(reader)?;
    if len > MAX_VAR_LEN {
        return Err(BmError::Decode {
            reason: format!("length prefix {len} exceeds limit {MAX_VAR_LEN}"),
        });
    }
    read_bytes(reader, len as usize)
}

/// Reads a var-int length prefix and that many UTF-8 bytes.
pub fn read_var_string(reader: &mut impl Read) -> Result<String> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|_| BmError::Decode {
        reason: "var-string is not valid UTF-8".into(),
    })
}

/// Reads a var-int count and that many var-ints.
pub fn read_var_int_list(reader: &mut impl Read) -> Result<Vec<u64>> {
    let count = read_var_int(reader)?;
    if count > MAX_VAR_LEN {
        return Err(BmError::Decode {
            reason: format!("list count {count} exceeds limit {MAX_VAR_LEN}"),
        });
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(read_var_int(reader)?);
    }
    Ok(values)
}

/// Reads exactly `n` bytes.
pub fn read_bytes(reader: &mut impl Read, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).map_err(decode_err)?;
    Ok(buf)
}

/// Reads exactly `N` bytes into an array.
pub fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(decode_err)?;
    Ok(buf)
}

/// Reads a fixed big-endian u16.
pub fn read_u16(reader: &mut impl Read) -> Result<u16> {
    reader.read_u16::<BigEndian>().map_err(decode_err)
}

/// Reads a fixed big-endian u32.
pub fn read_u32(reader: &mut impl Read) -> Result<u32> {
    reader.read_u32::<BigEndian>().map_err(decode_err)
}

/// Reads a fixed big-endian u64.
pub fn read_u64(reader: &mut impl Read) -> Result<u64> {
    reader.read_u64::<BigEndian>().map_err(decode_err)
}

/// Reads a fixed big-endian i64.
pub fn read_i64(reader: &mut impl Read) -> Result<i64> {
    reader.read_i64::<BigEndian>().map_err(decode_err)
}

// ---------------------------------------------------------------------------
// CountingReader
// ---------------------------------------------------------------------------

/// A reader that tracks how many bytes have been consumed.
///
/// Length-prefixed substructures (the encrypted tail of a pubkey or
/// broadcast payload, for example) are bounded by subtracting the
/// consumed count from the enclosing length.
pub struct CountingReader<R> {
    inner: R,
    consumed: usize,
}

impl<R: Read> CountingReader<R> {
    /// Wraps a reader with a zeroed counter.
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Bytes consumed since construction.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
