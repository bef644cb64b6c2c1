//! `uavcan.equipment.gnss` messages published by a GNSS receiver.
//!
//! Positions are fixed point with 1e-8 degree resolution in both `Fix` and
//! `Fix2`. Heights are in millimeters, velocities in m/s in the NED frame.

use alloc::vec::Vec;

use num_traits::{Float, FromPrimitive};

use super::bits::{BitReader, BitWriter};
use super::DataType;
use crate::types::DataTypeId;
use crate::DecodeError;

const DEG_SCALE: f64 = 1e8;

/// Time reference of `gnss_timestamp_usec`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum TimeStandard {
    None = 0,
    Tai = 1,
    Utc = 2,
    Gps = 3,
}

/// Fix status as reported by the receiver. Nothing beyond these codes is
/// implied by the value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum FixStatus {
    NoFix = 0,
    TimeOnly = 1,
    Fix2D = 2,
    Fix3D = 3,
}

/// Positioning mode, `Fix2` only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum FixMode {
    Single = 0,
    Dgps = 1,
    Rtk = 2,
    Ppp = 3,
}

fn read_f16_array<const N: usize>(
    reader: &mut BitReader,
    len: usize,
) -> Result<heapless::Vec<f32, N>, DecodeError> {
    let mut out = heapless::Vec::new();
    for _ in 0..len {
        out.push(reader.read_f16()?)
            .map_err(|_| DecodeError::ArrayTooLong { len, max: N })?;
    }
    Ok(out)
}

fn write_f16_array(writer: &mut BitWriter, values: &[f32]) {
    for value in values {
        writer.write_f16(*value);
    }
}

/// Accessors shared by both fix messages.
macro_rules! position_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn lat_deg(&self) -> f64 {
                self.latitude_deg_1e8 as f64 / DEG_SCALE
            }

            pub fn lon_deg(&self) -> f64 {
                self.longitude_deg_1e8 as f64 / DEG_SCALE
            }

            pub fn height_msl_m(&self) -> f64 {
                self.height_msl_mm as f64 / 1000.0
            }

            pub fn height_ellipsoid_m(&self) -> f64 {
                self.height_ellipsoid_mm as f64 / 1000.0
            }

            /// Horizontal speed over ground.
            pub fn speed_mps(&self) -> f32 {
                let [north, east, _] = self.ned_velocity;
                Float::sqrt(north * north + east * east)
            }

            pub fn fix_status(&self) -> Option<FixStatus> {
                FixStatus::from_u8(self.status)
            }

            pub fn time_standard(&self) -> Option<TimeStandard> {
                TimeStandard::from_u8(self.gnss_time_standard)
            }
        }
    };
}

/// `uavcan.equipment.gnss.Fix`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fix {
    pub timestamp_usec: u64,
    pub gnss_timestamp_usec: u64,
    pub gnss_time_standard: u8,
    pub num_leap_seconds: u8,
    pub longitude_deg_1e8: i64,
    pub latitude_deg_1e8: i64,
    pub height_ellipsoid_mm: i32,
    pub height_msl_mm: i32,
    pub ned_velocity: [f32; 3],
    pub sats_used: u8,
    pub status: u8,
    pub pdop: f32,
    pub position_covariance: heapless::Vec<f32, 9>,
    pub velocity_covariance: heapless::Vec<f32, 9>,
}

position_accessors!(Fix);

impl DataType for Fix {
    const DATA_TYPE_ID: DataTypeId = 1060;
    const SIGNATURE: u64 = 0x54C1572B9E07F297;
    const MAX_SIZE: usize = 79;

    fn decode(payload: &[u8], tao: bool) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(payload);
        let timestamp_usec = r.read_unsigned(56)?;
        let gnss_timestamp_usec = r.read_unsigned(56)?;
        let gnss_time_standard = r.read_u8(3)?;
        r.skip(5)?;
        let num_leap_seconds = r.read_u8(8)?;
        let longitude_deg_1e8 = r.read_signed(37)?;
        let latitude_deg_1e8 = r.read_signed(37)?;
        let height_ellipsoid_mm = r.read_signed(27)? as i32;
        let height_msl_mm = r.read_signed(27)? as i32;
        let ned_velocity = [r.read_f16()?, r.read_f16()?, r.read_f16()?];
        let sats_used = r.read_u8(6)?;
        let status = r.read_u8(2)?;
        let pdop = r.read_f16()?;
        r.skip(4)?;
        let len = r.read_array_len(4, 9)?;
        let position_covariance = read_f16_array(&mut r, len)?;
        let len = r.tail_array_len(tao, 4, 16, 9)?;
        let velocity_covariance = read_f16_array(&mut r, len)?;

        Ok(Self {
            timestamp_usec,
            gnss_timestamp_usec,
            gnss_time_standard,
            num_leap_seconds,
            longitude_deg_1e8,
            latitude_deg_1e8,
            height_ellipsoid_mm,
            height_msl_mm,
            ned_velocity,
            sats_used,
            status,
            pdop,
            position_covariance,
            velocity_covariance,
        })
    }

    fn encode(&self, tao: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_unsigned(self.timestamp_usec, 56);
        w.write_unsigned(self.gnss_timestamp_usec, 56);
        w.write_unsigned(self.gnss_time_standard as u64, 3);
        w.pad(5);
        w.write_unsigned(self.num_leap_seconds as u64, 8);
        w.write_signed(self.longitude_deg_1e8, 37);
        w.write_signed(self.latitude_deg_1e8, 37);
        w.write_signed(self.height_ellipsoid_mm as i64, 27);
        w.write_signed(self.height_msl_mm as i64, 27);
        write_f16_array(&mut w, &self.ned_velocity);
        w.write_unsigned(self.sats_used as u64, 6);
        w.write_unsigned(self.status as u64, 2);
        w.write_f16(self.pdop);
        w.pad(4);
        w.write_unsigned(self.position_covariance.len() as u64, 4);
        write_f16_array(&mut w, &self.position_covariance);
        w.write_tail_array_len(tao, self.velocity_covariance.len(), 4);
        write_f16_array(&mut w, &self.velocity_covariance);
        w.into_bytes()
    }
}

/// `uavcan.equipment.gnss.Fix2`
///
/// The trailing `ecef_position_velocity` array is not decoded, and is
/// always sent empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fix2 {
    pub timestamp_usec: u64,
    pub gnss_timestamp_usec: u64,
    pub gnss_time_standard: u8,
    pub num_leap_seconds: u8,
    pub longitude_deg_1e8: i64,
    pub latitude_deg_1e8: i64,
    pub height_ellipsoid_mm: i32,
    pub height_msl_mm: i32,
    pub ned_velocity: [f32; 3],
    pub sats_used: u8,
    pub status: u8,
    pub mode: u8,
    pub sub_mode: u8,
    pub covariance: heapless::Vec<f32, 36>,
    pub pdop: f32,
}

position_accessors!(Fix2);

impl Fix2 {
    pub fn fix_mode(&self) -> Option<FixMode> {
        FixMode::from_u8(self.mode)
    }
}

impl DataType for Fix2 {
    const DATA_TYPE_ID: DataTypeId = 1063;
    const SIGNATURE: u64 = 0xCA41E7000F37435F;
    const MAX_SIZE: usize = 221;

    fn decode(payload: &[u8], _tao: bool) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(payload);
        let timestamp_usec = r.read_unsigned(56)?;
        let gnss_timestamp_usec = r.read_unsigned(56)?;
        let gnss_time_standard = r.read_u8(3)?;
        r.skip(13)?;
        let num_leap_seconds = r.read_u8(8)?;
        let longitude_deg_1e8 = r.read_signed(37)?;
        let latitude_deg_1e8 = r.read_signed(37)?;
        let height_ellipsoid_mm = r.read_signed(27)? as i32;
        let height_msl_mm = r.read_signed(27)? as i32;
        let ned_velocity = [r.read_f32()?, r.read_f32()?, r.read_f32()?];
        let sats_used = r.read_u8(6)?;
        let status = r.read_u8(2)?;
        let mode = r.read_u8(4)?;
        let sub_mode = r.read_u8(6)?;
        let len = r.read_array_len(6, 36)?;
        let covariance = read_f16_array(&mut r, len)?;
        let pdop = r.read_f16()?;

        Ok(Self {
            timestamp_usec,
            gnss_timestamp_usec,
            gnss_time_standard,
            num_leap_seconds,
            longitude_deg_1e8,
            latitude_deg_1e8,
            height_ellipsoid_mm,
            height_msl_mm,
            ned_velocity,
            sats_used,
            status,
            mode,
            sub_mode,
            covariance,
            pdop,
        })
    }

    fn encode(&self, tao: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_unsigned(self.timestamp_usec, 56);
        w.write_unsigned(self.gnss_timestamp_usec, 56);
        w.write_unsigned(self.gnss_time_standard as u64, 3);
        w.pad(13);
        w.write_unsigned(self.num_leap_seconds as u64, 8);
        w.write_signed(self.longitude_deg_1e8, 37);
        w.write_signed(self.latitude_deg_1e8, 37);
        w.write_signed(self.height_ellipsoid_mm as i64, 27);
        w.write_signed(self.height_msl_mm as i64, 27);
        for value in self.ned_velocity {
            w.write_f32(value);
        }
        w.write_unsigned(self.sats_used as u64, 6);
        w.write_unsigned(self.status as u64, 2);
        w.write_unsigned(self.mode as u64, 4);
        w.write_unsigned(self.sub_mode as u64, 6);
        w.write_unsigned(self.covariance.len() as u64, 6);
        write_f16_array(&mut w, &self.covariance);
        w.write_f16(self.pdop);
        w.write_tail_array_len(tao, 0, 1);
        w.into_bytes()
    }
}

/// `uavcan.equipment.gnss.Auxiliary`, dilution of precision and satellite
/// counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Auxiliary {
    pub gdop: f32,
    pub pdop: f32,
    pub hdop: f32,
    pub vdop: f32,
    pub tdop: f32,
    pub ndop: f32,
    pub edop: f32,
    pub sats_visible: u8,
    pub sats_used: u8,
}

impl DataType for Auxiliary {
    const DATA_TYPE_ID: DataTypeId = 1061;
    const SIGNATURE: u64 = 0x9BE8BDC4C3DBBFD2;
    const MAX_SIZE: usize = 16;

    fn decode(payload: &[u8], _tao: bool) -> Result<Self, DecodeError> {
        let mut r = BitReader::new(payload);
        Ok(Self {
            gdop: r.read_f16()?,
            pdop: r.read_f16()?,
            hdop: r.read_f16()?,
            vdop: r.read_f16()?,
            tdop: r.read_f16()?,
            ndop: r.read_f16()?,
            edop: r.read_f16()?,
            sats_visible: r.read_u8(7)?,
            sats_used: r.read_u8(6)?,
        })
    }

    fn encode(&self, _tao: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        write_f16_array(
            &mut w,
            &[self.gdop, self.pdop, self.hdop, self.vdop, self.tdop, self.ndop, self.edop],
        );
        w.write_unsigned(self.sats_visible as u64, 7);
        w.write_unsigned(self.sats_used as u64, 6);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIX2: &str = "40420f0000000000401e18240a06400012a495e3d3f9062557900409c0002530000000404000008040000000bf472042003e0040003d";
    const FIX: &str = "40420f00000000000000000000002012a495e3d3f9062557900f3dbff82530000042004400b826004101003800340030";
    const AUX: &str = "003c003d003e003f0040804000412e88";

    #[test]
    fn fix2_scaled_position() {
        let fix = Fix2::decode(&hex::decode(FIX2).unwrap(), true).unwrap();
        assert_eq!(fix.latitude_deg_1e8, 4071277600);
        assert_eq!(fix.longitude_deg_1e8, -740059740);
        assert_eq!(fix.lat_deg(), 40.712776);
        assert_eq!(fix.lon_deg(), -7.4005974);
        assert_eq!(fix.height_msl_m(), 42.5);
        assert_eq!(fix.height_ellipsoid_m(), 10.0);
    }

    #[test]
    fn fix2_all_fields() {
        let fix = Fix2::decode(&hex::decode(FIX2).unwrap(), true).unwrap();
        assert_eq!(fix.timestamp_usec, 1_000_000);
        assert_eq!(fix.gnss_timestamp_usec, 1_700_000_000_000_000);
        assert_eq!(fix.time_standard(), Some(TimeStandard::Utc));
        assert_eq!(fix.num_leap_seconds, 18);
        assert_eq!(fix.ned_velocity, [3.0, 4.0, -0.5]);
        assert_eq!(fix.speed_mps(), 5.0);
        assert_eq!(fix.sats_used, 17);
        assert_eq!(fix.fix_status(), Some(FixStatus::Fix3D));
        assert_eq!(fix.fix_mode(), Some(FixMode::Rtk));
        assert_eq!(fix.sub_mode, 1);
        assert_eq!(&fix.covariance[..], &[1.5, 2.0]);
        assert_eq!(fix.pdop, 1.25);

        assert_eq!(hex::encode(fix.encode(true)), FIX2);
    }

    #[test]
    fn fix2_ignores_ecef_tail() {
        let mut payload = hex::decode(FIX2).unwrap();
        payload.extend_from_slice(&[0xff; 25]);
        let fix = Fix2::decode(&payload, true).unwrap();
        assert_eq!(fix.pdop, 1.25);
    }

    #[test]
    fn fix2_truncated() {
        let payload = hex::decode(FIX2).unwrap();
        assert!(std::matches!(
            Fix2::decode(&payload[..30], true),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn fix_with_tail_array() {
        let fix = Fix::decode(&hex::decode(FIX).unwrap(), true).unwrap();
        assert_eq!(fix.lat_deg(), 40.712776);
        assert_eq!(fix.lon_deg(), -7.4005974);
        assert_eq!(fix.height_ellipsoid_mm, -2500);
        assert_eq!(fix.time_standard(), Some(TimeStandard::Tai));
        assert_eq!(fix.ned_velocity, [3.0, 4.0, -0.5]);
        assert_eq!(fix.sats_used, 9);
        assert_eq!(fix.fix_status(), Some(FixStatus::Fix2D));
        assert_eq!(fix.pdop, 2.5);
        assert_eq!(&fix.position_covariance[..], &[0.5]);
        assert_eq!(&fix.velocity_covariance[..], &[0.25, 0.125]);

        assert_eq!(hex::encode(fix.encode(true)), FIX);
    }

    #[test]
    fn fix_fd_covariance_survives_padding() {
        let fix = Fix::decode(&hex::decode(FIX).unwrap(), true).unwrap();
        let mut payload = fix.encode(false);
        // 4 more bits for the velocity covariance length
        assert_eq!(payload.len(), 49);

        // Zero padding up to the next CAN-FD frame size
        payload.extend_from_slice(&[0; 14]);
        let decoded = Fix::decode(&payload, false).unwrap();
        assert_eq!(&decoded.velocity_covariance[..], &[0.25, 0.125]);
        assert_eq!(decoded, fix);
    }

    #[test]
    fn fix_fd_empty_velocity_covariance() {
        let fix = Fix {
            position_covariance: heapless::Vec::from_slice(&[0.5]).unwrap(),
            ..Default::default()
        };
        let mut payload = fix.encode(false);
        payload.extend_from_slice(&[0; 10]);
        let decoded = Fix::decode(&payload, false).unwrap();
        assert!(decoded.velocity_covariance.is_empty());
        assert_eq!(&decoded.position_covariance[..], &[0.5]);
    }

    #[test]
    fn fix2_fd_carries_empty_ecef_length() {
        let fix = Fix2::decode(&hex::decode(FIX2).unwrap(), true).unwrap();
        let classic = fix.encode(true);
        let fd = fix.encode(false);
        assert_eq!(fd.len(), classic.len() + 1);
        assert_eq!(fd[classic.len()], 0);
        assert_eq!(Fix2::decode(&fd, false).unwrap(), fix);
    }

    #[test]
    fn auxiliary() {
        let aux = Auxiliary::decode(&hex::decode(AUX).unwrap(), true).unwrap();
        assert_eq!(aux.gdop, 1.0);
        assert_eq!(aux.pdop, 1.25);
        assert_eq!(aux.hdop, 1.5);
        assert_eq!(aux.vdop, 1.75);
        assert_eq!(aux.tdop, 2.0);
        assert_eq!(aux.ndop, 2.25);
        assert_eq!(aux.edop, 2.5);
        assert_eq!(aux.sats_visible, 23);
        assert_eq!(aux.sats_used, 17);
        assert_eq!(hex::encode(aux.encode(true)), AUX);
    }
}
