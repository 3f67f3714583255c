//! Plain value types for every report a board can send.
//!
//! Field order inside each struct follows the order on the wire.

use serde::{Deserialize, Serialize};

use crate::error::NavxError;
use crate::flags::{CalibrationStatus, CapabilityFlags, OpStatus, SelfTestStatus, SensorStatus};

// ── Building blocks ──────────────────────────────────────────────

/// Three-axis value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion, `w` first as on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quaternion<T> {
    pub w: T,
    pub x: T,
    pub y: T,
    pub z: T,
}

/// The 20 leading fields shared by `AHRS:` and `AHRSPOS:` lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub compass_heading: f64,
    pub altitude: f64,
    pub fused_heading: f64,
    pub linear_accel: Vec3<f64>,
    pub mpu_temp_c: f64,
    pub quaternion: Quaternion<f64>,
    pub baro_pressure: f64,
    pub baro_temp_c: f64,
    pub op_status: u8,
    pub sensor_status: u8,
    pub cal_status: u8,
    pub selftest_status: u8,
}

impl Orientation {
    pub fn op_status(&self) -> Result<OpStatus, NavxError> {
        OpStatus::try_from(self.op_status)
    }

    pub fn sensor_status(&self) -> SensorStatus {
        SensorStatus::from_bits_retain(self.sensor_status as u16)
    }

    pub fn cal_status(&self) -> CalibrationStatus {
        CalibrationStatus::from_bits_retain(self.cal_status)
    }

    pub fn selftest_status(&self) -> SelfTestStatus {
        SelfTestStatus::from_bits_retain(self.selftest_status)
    }
}

// ── Streamed updates ─────────────────────────────────────────────

/// `RAW:` unprocessed sensor counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub gyro: Vec3<i16>,
    pub accel: Vec3<i16>,
    pub mag: Vec3<i16>,
    pub temp_c: f64,
}

/// `AHRS:` fused orientation plus magnetometer calibration data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AhrsUpdate {
    pub orientation: Orientation,
    pub cal_mag: Vec3<f64>,
    pub mag_field_norm_ratio: f64,
    pub mag_field_norm_scalar: f64,
    pub raw_mag: Vec3<f64>,
}

/// `AHRSPOS:` fused orientation plus integrated velocity and displacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AhrsPosUpdate {
    pub orientation: Orientation,
    pub velocity: Vec3<f64>,
    pub displacement: Vec3<f64>,
}

/// `YPR:` orientation angles only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct YprUpdate {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

// ── Request / response reports ───────────────────────────────────

/// `HEALTH:` board runtime health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub mem_used: i32,
    pub mem_total: i32,
    pub core_temp_c: f64,
}

impl HealthReport {
    /// Fraction of memory in use, `None` when the board reports no total.
    pub fn mem_usage(&self) -> Option<f64> {
        (self.mem_total > 0).then(|| self.mem_used as f64 / self.mem_total as f64)
    }
}

/// `BSTATE:` board configuration and status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub op_status: u8,
    pub sensor_status: u16,
    pub cal_status: u8,
    pub selftest_status: u8,
    pub capability_flags: u16,
    pub update_rate_hz: u8,
    pub accel_fsr_g: u8,
    pub gyro_fsr_dps: u16,
}

impl BoardState {
    pub fn op_status(&self) -> Result<OpStatus, NavxError> {
        OpStatus::try_from(self.op_status)
    }

    pub fn sensor_status(&self) -> SensorStatus {
        SensorStatus::from_bits_retain(self.sensor_status)
    }

    pub fn cal_status(&self) -> CalibrationStatus {
        CalibrationStatus::from_bits_retain(self.cal_status)
    }

    pub fn selftest_status(&self) -> SelfTestStatus {
        SelfTestStatus::from_bits_retain(self.selftest_status)
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags::from_bits_retain(self.capability_flags)
    }
}

/// `BID:` board hardware and firmware identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardIdentity {
    pub board_type: u8,
    pub hw_rev: u8,
    pub fw_ver_major: u8,
    pub fw_ver_minor: u8,
    pub fw_revision: u8,
}

impl BoardIdentity {
    pub fn firmware_version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.fw_ver_major, self.fw_ver_minor, self.fw_revision
        )
    }
}
