//! Per-layer parameter records, read from any of four wire formats into one
//! logical key-indexed bag of scalars and arrays.
//!
//! Grounded on the teacher's layer `load_param` pattern (pull typed fields
//! out of an opaque config blob) generalized from JSON-via-`serde` to this
//! engine's domain-specific key=value grammar — not itself `serde_json` or
//! `bincode`, since the wire format predates both.

use std::collections::HashMap;
use std::io::Read;

use crate::error::{Error, Result};
use crate::option::NetOptions;

/// Historical sentinel marking an array-valued key and terminating a binary record.
pub const ARRAY_SENTINEL: i32 = -233;

#[derive(Debug, Clone)]
enum Value {
    Int(i32),
    Float(f32),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
    /// A binary-format scalar: the wire format carries no type tag, just a
    /// raw 32-bit pattern, so the bits are kept as-is and reinterpreted by
    /// whichever accessor (`get_int`/`get_float`) the caller reaches for.
    Raw(u32),
    /// A binary-format array, same untyped-bits reasoning as `Raw`.
    RawArray(Vec<u32>),
}

/// A parsed per-layer parameter record plus the ambient Net-wide context
/// (`original_source/src/net.cpp`'s `pd.set_net_opt`-shaped plumbing) layers
/// consult during `load_param`: optimization toggles and GPU workgroup limits.
#[derive(Debug, Clone)]
pub struct ParamDict {
    values: HashMap<i32, Value>,
    pub net_options: NetOptions,
    /// Maximum local workgroup size the GPU backend's device supports, consulted
    /// by a layer's `load_param` when it records specialization constants.
    pub max_workgroup_size: u32,
}

impl ParamDict {
    pub fn new(net_options: NetOptions) -> Self {
        Self {
            values: HashMap::new(),
            net_options,
            max_workgroup_size: 1024,
        }
    }

    pub fn get_int(&self, key: i32, default: i32) -> i32 {
        match self.values.get(&key) {
            Some(Value::Int(v)) => *v,
            Some(Value::Float(v)) => *v as i32,
            Some(Value::Raw(bits)) => *bits as i32,
            _ => default,
        }
    }

    pub fn get_float(&self, key: i32, default: f32) -> f32 {
        match self.values.get(&key) {
            Some(Value::Float(v)) => *v,
            Some(Value::Int(v)) => *v as f32,
            Some(Value::Raw(bits)) => f32::from_bits(*bits),
            _ => default,
        }
    }

    pub fn get_int_array(&self, key: i32, default: &[i32]) -> Vec<i32> {
        match self.values.get(&key) {
            Some(Value::IntArray(v)) => v.clone(),
            Some(Value::RawArray(bits)) => bits.iter().map(|b| *b as i32).collect(),
            _ => default.to_vec(),
        }
    }

    pub fn get_float_array(&self, key: i32, default: &[f32]) -> Vec<f32> {
        match self.values.get(&key) {
            Some(Value::FloatArray(v)) => v.clone(),
            Some(Value::RawArray(bits)) => bits.iter().map(|b| f32::from_bits(*b)).collect(),
            _ => default.to_vec(),
        }
    }

    /// Parses the trailing `key=value` tokens of an already-tokenized layer
    /// line (type, name, and bottom/top names stripped by the caller). Used
    /// by `Net::load_param`'s line-oriented reader, which needs the same
    /// grammar `parse_text_tokens` implements without owning a `Read`/cursor.
    pub(crate) fn from_text_tokens(tokens: &[&str]) -> Result<Self> {
        Self::parse_text_tokens(tokens)
    }

    /// Decodes a text-format `key=value` token stream, one record per call,
    /// terminated by a blank/newline-only line (the record boundary in the
    /// `.param` grammar). Shared by both the stream and memory-pointer variants.
    fn parse_text_tokens(tokens: &[&str]) -> Result<Self> {
        let mut pd = ParamDict::new(NetOptions::default());
        for tok in tokens {
            let (key_str, val_str) = tok.split_once('=').ok_or_else(|| {
                Error::BadParam(format!("token {tok:?} is missing '='"))
            })?;
            let raw_key: i32 = key_str
                .parse()
                .map_err(|_| Error::BadParam(format!("non-integer key in {tok:?}")))?;
            if raw_key <= ARRAY_SENTINEL {
                let key = -(raw_key - ARRAY_SENTINEL);
                pd.insert_array(key, val_str)?;
            } else {
                pd.insert_scalar(raw_key, val_str)?;
            }
        }
        Ok(pd)
    }

    fn insert_scalar(&mut self, key: i32, val_str: &str) -> Result<()> {
        if let Ok(i) = val_str.parse::<i32>() {
            self.values.insert(key, Value::Int(i));
        } else {
            let f: f32 = val_str
                .parse()
                .map_err(|_| Error::BadParam(format!("key {key}: {val_str:?} is not numeric")))?;
            self.values.insert(key, Value::Float(f));
        }
        Ok(())
    }

    fn insert_array(&mut self, key: i32, val_str: &str) -> Result<()> {
        let mut parts = val_str.split(',');
        let count: usize = parts
            .next()
            .ok_or_else(|| Error::BadParam(format!("key {key}: empty array record")))?
            .parse()
            .map_err(|_| Error::BadParam(format!("key {key}: bad array count")))?;
        let rest: Vec<&str> = parts.collect();
        if rest.len() != count {
            return Err(Error::BadParam(format!(
                "key {key}: array declares {count} elements, found {}",
                rest.len()
            )));
        }
        if rest.iter().all(|s| s.parse::<i32>().is_ok()) {
            self.values.insert(
                key,
                Value::IntArray(rest.iter().map(|s| s.parse().unwrap()).collect()),
            );
        } else {
            let floats: Result<Vec<f32>> = rest
                .iter()
                .map(|s| {
                    s.parse()
                        .map_err(|_| Error::BadParam(format!("key {key}: non-numeric array element")))
                })
                .collect();
            self.values.insert(key, Value::FloatArray(floats?));
        }
        Ok(())
    }

    /// Parses one record from a text-format stream, terminated by a newline
    /// whose line is blank once trailing whitespace is trimmed.
    pub fn from_text_stream(reader: &mut impl Read) -> Result<Self> {
        let mut line = String::new();
        read_line(reader, &mut line)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::parse_text_tokens(&tokens)
    }

    /// Parses one record from a text buffer starting at `*cursor`, advancing
    /// `*cursor` past the consumed line (and its terminating newline, if any).
    pub fn from_text_mem(buf: &[u8], cursor: &mut usize) -> Result<Self> {
        let start = *cursor;
        let mut end = start;
        while end < buf.len() && buf[end] != b'\n' {
            end += 1;
        }
        let line = std::str::from_utf8(&buf[start..end])
            .map_err(|_| Error::BadParam("text param record is not valid UTF-8".into()))?;
        *cursor = if end < buf.len() { end + 1 } else { end };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::parse_text_tokens(&tokens)
    }

    /// Parses one record of `(key: i32, value)` triples from a binary stream,
    /// terminated by [`ARRAY_SENTINEL`] used as a plain end-of-record key.
    pub fn from_binary_stream(reader: &mut impl Read) -> Result<Self> {
        let mut pd = ParamDict::new(NetOptions::default());
        loop {
            let key = read_i32(reader)?;
            if key == ARRAY_SENTINEL {
                break;
            }
            if key < 0 {
                let actual_key = -key;
                let count = read_i32(reader)? as usize;
                pd.read_binary_array(reader, actual_key, count)?;
            } else {
                pd.read_binary_scalar(reader, key)?;
            }
        }
        Ok(pd)
    }

    /// Identical grammar to `from_binary_stream`, but read from a 32-bit
    /// aligned byte cursor into `buf`, advancing `*cursor` in place.
    pub fn from_binary_mem(buf: &[u8], cursor: &mut usize) -> Result<Self> {
        debug_assert_eq!(*cursor % 4, 0, "binary paramdict cursor must be 4-byte aligned");
        let mut pd = ParamDict::new(NetOptions::default());
        loop {
            let key = read_i32_mem(buf, cursor)?;
            if key == ARRAY_SENTINEL {
                break;
            }
            if key < 0 {
                let actual_key = -key;
                let count = read_i32_mem(buf, cursor)? as usize;
                pd.read_binary_array_mem(buf, cursor, actual_key, count)?;
            } else {
                pd.read_binary_scalar_mem(buf, cursor, key)?;
            }
        }
        Ok(pd)
    }

    fn read_binary_scalar(&mut self, reader: &mut impl Read, key: i32) -> Result<()> {
        let bits = read_i32(reader)?;
        self.values.insert(key, Value::Raw(bits as u32));
        Ok(())
    }

    fn read_binary_array(&mut self, reader: &mut impl Read, key: i32, count: usize) -> Result<()> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_i32(reader)? as u32);
        }
        self.values.insert(key, Value::RawArray(out));
        Ok(())
    }

    fn read_binary_scalar_mem(&mut self, buf: &[u8], cursor: &mut usize, key: i32) -> Result<()> {
        let bits = read_i32_mem(buf, cursor)?;
        self.values.insert(key, Value::Raw(bits as u32));
        Ok(())
    }

    fn read_binary_array_mem(
        &mut self,
        buf: &[u8],
        cursor: &mut usize,
        key: i32,
        count: usize,
    ) -> Result<()> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_i32_mem(buf, cursor)? as u32);
        }
        self.values.insert(key, Value::RawArray(out));
        Ok(())
    }
}

fn read_line(reader: &mut impl Read, line: &mut String) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte)?;
        if n == 0 || byte[0] == b'\n' {
            break;
        }
        line.push(byte[0] as char);
    }
    Ok(())
}

/// Shared with `crate::net`'s binary-stream loader, which reads the same
/// little-endian `i32` header fields ahead of each record.
pub(crate) fn read_i32(reader: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Shared with `crate::net`'s aligned-memory loader.
pub(crate) fn read_i32_mem(buf: &[u8], cursor: &mut usize) -> Result<i32> {
    if *cursor + 4 > buf.len() {
        return Err(Error::BadParam("binary paramdict read past end of buffer".into()));
    }
    let bytes: [u8; 4] = buf[*cursor..*cursor + 4].try_into().unwrap();
    *cursor += 4;
    Ok(i32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_scalar_roundtrip() {
        let mut buf = b"0=1 1=2.5\n".as_slice();
        let pd = ParamDict::from_text_stream(&mut buf).unwrap();
        assert_eq!(pd.get_int(0, -1), 1);
        assert_eq!(pd.get_float(1, -1.0), 2.5);
        assert_eq!(pd.get_int(99, 7), 7);
    }

    #[test]
    fn text_array_roundtrip() {
        let key = -(0 - ARRAY_SENTINEL);
        let line = format!("{key}=3,1,2,3\n");
        let mut buf = line.as_bytes();
        let pd = ParamDict::from_text_stream(&mut buf).unwrap();
        assert_eq!(pd.get_int_array(0, &[]), vec![1, 2, 3]);
    }

    #[test]
    fn text_mem_advances_cursor() {
        let data = b"0=1\n1=2\n";
        let mut cursor = 0usize;
        let pd1 = ParamDict::from_text_mem(data, &mut cursor).unwrap();
        assert_eq!(pd1.get_int(0, -1), 1);
        let pd2 = ParamDict::from_text_mem(data, &mut cursor).unwrap();
        assert_eq!(pd2.get_int(1, -1), 2);
        assert_eq!(cursor, data.len());
    }

    #[test]
    fn binary_stream_scalar_and_sentinel() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_bits().to_le_bytes());
        bytes.extend_from_slice(&ARRAY_SENTINEL.to_le_bytes());
        let mut cursor = bytes.as_slice();
        let pd = ParamDict::from_binary_stream(&mut cursor).unwrap();
        assert_eq!(pd.get_float(0, -1.0), 1.5);
    }

    #[test]
    fn bad_param_on_malformed_token() {
        let mut buf = b"not_a_token\n".as_slice();
        assert!(ParamDict::from_text_stream(&mut buf).is_err());
    }

    /// A binary scalar is an untyped 32-bit pattern: an int-valued key must
    /// come back intact through `get_int`, not get mangled by a float
    /// round-trip (`f32::from_bits(2) as i32 == 0`, not `2`).
    #[test]
    fn binary_stream_int_scalar_survives_get_int() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&ARRAY_SENTINEL.to_le_bytes());
        let mut cursor = bytes.as_slice();
        let pd = ParamDict::from_binary_stream(&mut cursor).unwrap();
        assert_eq!(pd.get_int(0, -1), 2);
    }

    #[test]
    fn binary_mem_int_array_survives_get_int_array() {
        let mut bytes = Vec::new();
        let key = -(0 - ARRAY_SENTINEL);
        bytes.extend_from_slice(&key.to_le_bytes());
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&ARRAY_SENTINEL.to_le_bytes());
        let mut cursor = 0usize;
        let pd = ParamDict::from_binary_mem(&bytes, &mut cursor).unwrap();
        assert_eq!(pd.get_int_array(0, &[]), vec![1, 2, 3]);
    }
}
