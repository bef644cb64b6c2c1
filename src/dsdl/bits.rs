//! UAVCAN v0 bit-level serialization primitives.
//!
//! Fields are packed back to back, most significant bit first. A scalar is
//! laid out as its little-endian bytes, with the last partial byte shifted so
//! its significant bits come first.

use alloc::vec::Vec;

use half::f16;

use crate::DecodeError;

fn mask(len: usize) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

/// Reads fields out of a received payload.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit
    }

    fn ensure(&self, len: usize) -> Result<(), DecodeError> {
        let available = self.remaining_bits();
        if len > available {
            return Err(DecodeError::Truncated {
                needed: len,
                available,
            });
        }
        Ok(())
    }

    /// Read up to 64 bits as an unsigned integer.
    pub fn read_unsigned(&mut self, len: usize) -> Result<u64, DecodeError> {
        debug_assert!(len <= 64);
        self.ensure(len)?;

        let mut storage = [0u8; 8];
        for i in 0..len {
            let src = self.bit + i;
            let bit = (self.data[src / 8] >> (7 - src % 8)) & 1;
            storage[i / 8] |= bit << (7 - i % 8);
        }
        if len % 8 != 0 {
            storage[len / 8] >>= 8 - len % 8;
        }
        self.bit += len;

        Ok(u64::from_le_bytes(storage))
    }

    /// Read up to 64 bits as a two's complement integer.
    pub fn read_signed(&mut self, len: usize) -> Result<i64, DecodeError> {
        let value = self.read_unsigned(len)?;
        if len > 0 && len < 64 && value & (1 << (len - 1)) != 0 {
            Ok((value | !mask(len)) as i64)
        } else {
            Ok(value as i64)
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_unsigned(1)? != 0)
    }

    pub fn read_u8(&mut self, len: usize) -> Result<u8, DecodeError> {
        Ok(self.read_unsigned(len)? as u8)
    }

    pub fn read_f16(&mut self) -> Result<f32, DecodeError> {
        Ok(f16::from_bits(self.read_unsigned(16)? as u16).to_f32())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_unsigned(32)? as u32))
    }

    /// Skip void fields.
    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.ensure(len)?;
        self.bit += len;
        Ok(())
    }

    /// Length prefix of a dynamic array, checked against its capacity.
    pub fn read_array_len(&mut self, len_bits: usize, max: usize) -> Result<usize, DecodeError> {
        let len = self.read_unsigned(len_bits)? as usize;
        if len > max {
            return Err(DecodeError::ArrayTooLong { len, max });
        }
        Ok(len)
    }

    /// Element count of the last dynamic array of a payload.
    ///
    /// With tail array optimization the length prefix is omitted and the
    /// array runs to the end of the payload. DroneCAN turns it off on CAN-FD,
    /// where zero padding follows the payload, so the prefix is read instead.
    pub fn tail_array_len(
        &mut self,
        tao: bool,
        len_bits: usize,
        element_bits: usize,
        max: usize,
    ) -> Result<usize, DecodeError> {
        if tao {
            Ok(core::cmp::min(self.remaining_bits() / element_bits, max))
        } else {
            self.read_array_len(len_bits, max)
        }
    }
}

/// Builds a payload field by field.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the low `len` bits of `value`.
    pub fn write_unsigned(&mut self, value: u64, len: usize) {
        debug_assert!(len <= 64);
        let mut storage = (value & mask(len)).to_le_bytes();
        if len % 8 != 0 {
            storage[len / 8] <<= 8 - len % 8;
        }

        for i in 0..len {
            let dst = self.bit + i;
            if dst / 8 == self.data.len() {
                self.data.push(0);
            }
            let bit = (storage[i / 8] >> (7 - i % 8)) & 1;
            self.data[dst / 8] |= bit << (7 - dst % 8);
        }
        self.bit += len;
    }

    pub fn write_signed(&mut self, value: i64, len: usize) {
        self.write_unsigned(value as u64, len);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_unsigned(value as u64, 1);
    }

    pub fn write_f16(&mut self, value: f32) {
        self.write_unsigned(f16::from_f32(value).to_bits() as u64, 16);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_unsigned(value.to_bits() as u64, 32);
    }

    /// Void fields.
    pub fn pad(&mut self, len: usize) {
        self.write_unsigned(0, len);
    }

    /// Length prefix of the last dynamic array, left out under tail array
    /// optimization.
    pub fn write_tail_array_len(&mut self, tao: bool, len: usize, len_bits: usize) {
        if !tao {
            self.write_unsigned(len as u64, len_bits);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
