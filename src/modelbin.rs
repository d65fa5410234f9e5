//! Concrete [`ModelBin`] sources for the `.bin` weight file format (spec.md
//! §6): a bare concatenation of tensors, each preceded by a 4-byte flag that
//! selects the element encoding — plain f32, f16, or int8-quantized against
//! a 256-entry dequantization table. Two readers, matching
//! `original_source`'s `ModelBinFromStdio`/`ModelBinFromMemory` split: one
//! over any `Read` (file, socket, anything buffered), one over an aligned
//! in-memory byte slice with an advancing cursor.

use std::io::Read;

use crate::error::Result;
use crate::layer::ModelBin;
use crate::tensor::Tensor;

const FLAG_FLOAT32: u32 = 0;
const FLAG_FLOAT16: u32 = 0x0130_6B47;
const QUANT_TABLE_LEN: usize = 256;

/// `flag == 0` and `flag == FLAG_FLOAT16` are the only two tags
/// `original_source` documents; every other value marks int8-quantized
/// data. The exact quantized header isn't in the retrieved source, so this
/// commits to the common ncnn layout: a 256-entry f32 dequantization table
/// immediately follows the flag, then one `u8` table index per element.
/// Recorded in DESIGN.md.
fn dequantize(table: &[f32; QUANT_TABLE_LEN], index: u8) -> f32 {
    table[index as usize]
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 1;
    let exponent = (bits >> 10) & 0x1f;
    let mantissa = bits & 0x3ff;

    let value = if exponent == 0 {
        if mantissa == 0 {
            0.0
        } else {
            // subnormal
            (mantissa as f32) * 2f32.powi(-24)
        }
    } else if exponent == 0x1f {
        if mantissa == 0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + mantissa as f32 / 1024.0) * 2f32.powi(exponent as i32 - 15)
    };

    if sign == 1 {
        -value
    } else {
        value
    }
}

/// Reads weight tensors from any buffered byte stream (a file handle, a
/// socket, an in-memory cursor wrapped in `Cursor<&[u8]>`).
pub struct ModelBinFromRead<R: Read> {
    reader: R,
}

impl<R: Read> ModelBinFromRead<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.reader.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl<R: Read> ModelBin for ModelBinFromRead<R> {
    fn read(&mut self, shape: &[usize]) -> Result<Tensor> {
        let count = shape.iter().product::<usize>().max(1);
        let flag = self.read_u32()?;
        let values = match flag {
            FLAG_FLOAT32 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(self.read_f32()?);
                }
                v
            }
            FLAG_FLOAT16 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(f16_to_f32(self.read_u16()?));
                }
                v
            }
            _ => {
                let mut table = [0f32; QUANT_TABLE_LEN];
                for slot in table.iter_mut() {
                    *slot = self.read_f32()?;
                }
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(dequantize(&table, self.read_u8()?));
                }
                v
            }
        };
        Tensor::from_data(shape, &values)
    }
}

/// Reads weight tensors from a 32-bit-aligned in-memory buffer, advancing an
/// explicit cursor rather than a `Read` impl — the mmap-friendly variant
/// spec.md §1 calls out as one of the four interchangeable formats.
pub struct ModelBinFromMemory<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> ModelBinFromMemory<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    pub fn bytes_consumed(&self) -> usize {
        self.cursor
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.cursor + n > self.buf.len() {
            return Err(crate::error::Error::BadModel(
                "model buffer truncated mid-tensor".into(),
            ));
        }
        let slice = &self.buf[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
}

impl<'a> ModelBin for ModelBinFromMemory<'a> {
    fn read(&mut self, shape: &[usize]) -> Result<Tensor> {
        let count = shape.iter().product::<usize>().max(1);
        let flag = self.read_u32()?;
        let values = match flag {
            FLAG_FLOAT32 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(self.read_f32()?);
                }
                v
            }
            FLAG_FLOAT16 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(f16_to_f32(self.read_u16()?));
                }
                v
            }
            _ => {
                let mut table = [0f32; QUANT_TABLE_LEN];
                for slot in table.iter_mut() {
                    *slot = self.read_f32()?;
                }
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(dequantize(&table, self.read_u8()?));
                }
                v
            }
        };
        Tensor::from_data(shape, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_plain_f32_tensor() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FLAG_FLOAT32.to_le_bytes());
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        let mut mb = ModelBinFromRead::new(bytes.as_slice());
        let t = mb.read(&[3]).unwrap();
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn reads_f16_tensor() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FLAG_FLOAT16.to_le_bytes());
        bytes.extend_from_slice(&0x3C00u16.to_le_bytes()); // 1.0 in f16
        let mut mb = ModelBinFromRead::new(bytes.as_slice());
        let t = mb.read(&[1]).unwrap();
        assert!((t.to_vec()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn memory_reader_advances_cursor() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FLAG_FLOAT32.to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_bits().to_le_bytes());
        let mut mb = ModelBinFromMemory::new(&bytes);
        let t = mb.read(&[1]).unwrap();
        assert_eq!(t.to_vec(), vec![1.5]);
        assert_eq!(mb.bytes_consumed(), bytes.len());
    }

    #[test]
    fn truncated_buffer_is_a_bad_model_error() {
        let bytes = FLAG_FLOAT32.to_le_bytes();
        let mut mb = ModelBinFromMemory::new(&bytes);
        assert!(mb.read(&[4]).is_err());
    }
}
