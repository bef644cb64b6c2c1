//! `uavcan.protocol.NodeStatus`, the heartbeat every node publishes.

use alloc::vec::Vec;

use num_traits::FromPrimitive;

use super::bits::{BitReader, BitWriter};
use super::DataType;
use crate::types::DataTypeId;
use crate::DecodeError;

/// Abstract node health.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum Health {
    Ok = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

/// Operating mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum Mode {
    Operational = 0,
    Initialization = 1,
    Maintenance = 2,
    SoftwareUpdate = 3,
    Offline = 7,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub uptime_sec: u32,
    /// Raw 2-bit health, see [`NodeStatus::health`].
    pub health: u8,
    /// Raw 3-bit mode, see [`NodeStatus::mode`].
    pub mode: u8,
    pub sub_mode: u8,
    pub vendor_specific_status_code: u16,
}

impl NodeStatus {
    /// `None` can't happen for a decoded message since every 2-bit value is
    /// defined, but a hand-built one may be out of range.
    pub fn health(&self) -> Option<Health> {
        Health::from_u8(self.health)
    }

    /// `None` for the reserved mode values 4 to 6.
    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u8(self.mode)
    }
}

impl DataType for NodeStatus {
    const DATA_TYPE_ID: DataTypeId = 341;
    const SIGNATURE: u64 = 0x0F0868D0C1A7C6F1;
    const MAX_SIZE: usize = 7;

    fn decode(payload: &[u8], _tao: bool) -> Result<Self, DecodeError> {
        let mut reader = BitReader::new(payload);
        Ok(Self {
            uptime_sec: reader.read_unsigned(32)? as u32,
            health: reader.read_u8(2)?,
            mode: reader.read_u8(3)?,
            sub_mode: reader.read_u8(3)?,
            vendor_specific_status_code: reader.read_unsigned(16)? as u16,
        })
    }

    fn encode(&self, _tao: bool) -> Vec<u8> {
        let mut writer = BitWriter::new();
        writer.write_unsigned(self.uptime_sec as u64, 32);
        writer.write_unsigned(self.health as u64, 2);
        writer.write_unsigned(self.mode as u64, 3);
        writer.write_unsigned(self.sub_mode as u64, 3);
        writer.write_unsigned(self.vendor_specific_status_code as u64, 16);
        writer.into_bytes()
    }
}
