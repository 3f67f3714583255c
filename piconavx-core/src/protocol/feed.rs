//! Binary Feed records.
//!
//! A `FEED:<total>|<count>` line is followed by `count` fixed-size records,
//! not line-terminated. All values are network byte order:
//!
//! ```text
//! offset  size  field
//!   0      4    timestamp        u32
//!   4     88    22 × f32         yaw, pitch, roll, compass, altitude,
//!                                fused heading, lin accel x/y/z, mpu temp,
//!                                quat w/x/y/z, baro pressure, baro temp,
//!                                vel x/y/z, disp x/y/z
//! ```

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::NavxError;
use crate::protocol::records::{Quaternion, Vec3};

/// Encoded size of one [`FeedSample`].
pub const FEED_RECORD_SIZE: usize = 92;

/// Upper bound on records announced by a single Feed header.
pub const MAX_FEED_CHUNKS: usize = 4096;

/// Header line announcing a binary batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedHeader {
    /// Payload length as declared by the board.
    pub declared_len: i32,
    /// Number of 92-byte records that follow.
    pub chunk_count: u32,
}

impl FeedHeader {
    pub fn new(chunk_count: u32) -> Self {
        Self {
            declared_len: (chunk_count as usize * FEED_RECORD_SIZE) as i32,
            chunk_count,
        }
    }

    /// Bytes the codec must consume after the header line.
    pub fn payload_len(&self) -> usize {
        self.chunk_count as usize * FEED_RECORD_SIZE
    }
}

/// One timestamped orientation/position sample from a Feed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSample {
    pub timestamp: u32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub compass_heading: f32,
    pub altitude: f32,
    pub fused_heading: f32,
    pub linear_accel: Vec3<f32>,
    pub mpu_temp_c: f32,
    pub quaternion: Quaternion<f32>,
    pub baro_pressure: f32,
    pub baro_temp_c: f32,
    pub velocity: Vec3<f32>,
    pub displacement: Vec3<f32>,
}

impl FeedSample {
    /// Decode one record. `src` must hold exactly [`FEED_RECORD_SIZE`] bytes.
    pub fn decode(mut src: &[u8]) -> Result<Self, NavxError> {
        if src.len() != FEED_RECORD_SIZE {
            return Err(NavxError::ProtocolViolation("feed record is not 92 bytes"));
        }
        let timestamp = src.get_u32();
        let mut f = || src.get_f32();
        Ok(Self {
            timestamp,
            yaw: f(),
            pitch: f(),
            roll: f(),
            compass_heading: f(),
            altitude: f(),
            fused_heading: f(),
            linear_accel: Vec3::new(f(), f(), f()),
            mpu_temp_c: f(),
            quaternion: Quaternion {
                w: f(),
                x: f(),
                y: f(),
                z: f(),
            },
            baro_pressure: f(),
            baro_temp_c: f(),
            velocity: Vec3::new(f(), f(), f()),
            displacement: Vec3::new(f(), f(), f()),
        })
    }

    /// Append the 92-byte wire form to `dst`.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32(self.timestamp);
        for v in [
            self.yaw,
            self.pitch,
            self.roll,
            self.compass_heading,
            self.altitude,
            self.fused_heading,
            self.linear_accel.x,
            self.linear_accel.y,
            self.linear_accel.z,
            self.mpu_temp_c,
            self.quaternion.w,
            self.quaternion.x,
            self.quaternion.y,
            self.quaternion.z,
            self.baro_pressure,
            self.baro_temp_c,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
            self.displacement.x,
            self.displacement.y,
            self.displacement.z,
        ] {
            dst.put_f32(v);
        }
    }
}

/// Decode a whole payload of back-to-back records.
pub fn decode_records(payload: &[u8]) -> Result<Vec<FeedSample>, NavxError> {
    if payload.len() % FEED_RECORD_SIZE != 0 {
        return Err(NavxError::ProtocolViolation(
            "feed payload is not a whole number of records",
        ));
    }
    payload
        .chunks_exact(FEED_RECORD_SIZE)
        .map(FeedSample::decode)
        .collect()
}

/// Render a header line plus its binary payload, as a board would send it.
pub fn encode_batch(samples: &[FeedSample]) -> Vec<u8> {
    let header = FeedHeader::new(samples.len() as u32);
    let mut out = format!("FEED:{}|{}\n", header.declared_len, header.chunk_count).into_bytes();
    out.reserve(header.payload_len());
    for sample in samples {
        sample.encode(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: u32) -> FeedSample {
        let v = i as f32;
        FeedSample {
            timestamp: 1_000 + i,
            yaw: -179.5 + v,
            pitch: 0.25 * v,
            roll: -0.0,
            compass_heading: 359.9,
            altitude: 12.5,
            fused_heading: f32::MAX,
            linear_accel: Vec3::new(0.01, -0.02, 0.98),
            mpu_temp_c: 31.0,
            quaternion: Quaternion {
                w: 1.0,
                x: 0.0,
                y: f32::MIN_POSITIVE,
                z: -1.0,
            },
            baro_pressure: 1013.25,
            baro_temp_c: 22.0,
            velocity: Vec3::new(v, v, v),
            displacement: Vec3::new(-v, 0.5, f32::INFINITY),
        }
    }

    fn bits(s: &FeedSample) -> Vec<u32> {
        let mut buf = Vec::new();
        s.encode(&mut buf);
        buf.chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn record_is_92_bytes_big_endian() {
        let mut buf = Vec::new();
        sample(0).encode(&mut buf);
        assert_eq!(buf.len(), FEED_RECORD_SIZE);
        assert_eq!(&buf[0..4], &1_000u32.to_be_bytes());
        assert_eq!(&buf[4..8], &(-179.5f32).to_be_bytes());
    }

    #[test]
    fn batches_decode_bit_identical() {
        for n in [0u32, 1, 100] {
            let samples: Vec<_> = (0..n).map(sample).collect();
            let wire = encode_batch(&samples);
            let header_len = wire.iter().position(|b| *b == b'\n').unwrap() + 1;
            assert_eq!(wire.len() - header_len, n as usize * FEED_RECORD_SIZE);

            let decoded = decode_records(&wire[header_len..]).unwrap();
            assert_eq!(decoded.len(), n as usize);
            for (a, b) in samples.iter().zip(&decoded) {
                assert_eq!(bits(a), bits(b));
            }
        }
    }

    #[test]
    fn nan_payload_survives() {
        let mut s = sample(7);
        s.altitude = f32::from_bits(0x7fc0_1234);
        let mut buf = Vec::new();
        s.encode(&mut buf);
        let back = FeedSample::decode(&buf).unwrap();
        assert_eq!(back.altitude.to_bits(), 0x7fc0_1234);
    }

    #[test]
    fn short_record_rejected() {
        assert!(FeedSample::decode(&[0u8; 91]).is_err());
        assert!(decode_records(&[0u8; 93]).is_err());
    }

    #[test]
    fn header_payload_len() {
        let h = FeedHeader::new(2);
        assert_eq!(h.declared_len, 184);
        assert_eq!(h.payload_len(), 184);
    }
}
