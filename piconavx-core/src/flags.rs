//! Typed views over the status bytes a board reports in `AHRS:`,
//! `AHRSPOS:` and `BSTATE:` lines.
//!
//! The records keep the raw integers exactly as received; these types are
//! only interpretations layered on top, so unknown bits survive untouched.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::NavxError;

// ── OpStatus ─────────────────────────────────────────────────────

/// Board operational state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpStatus {
    Initializing = 0x00,
    SelfTestInProgress = 0x01,
    Error = 0x02,
    ImuAutoCalInProgress = 0x03,
    Normal = 0x04,
}

impl TryFrom<u8> for OpStatus {
    type Error = NavxError;

    fn try_from(value: u8) -> Result<Self, NavxError> {
        match value {
            0x00 => Ok(OpStatus::Initializing),
            0x01 => Ok(OpStatus::SelfTestInProgress),
            0x02 => Ok(OpStatus::Error),
            0x03 => Ok(OpStatus::ImuAutoCalInProgress),
            0x04 => Ok(OpStatus::Normal),
            _ => Err(NavxError::UnknownVariant {
                type_name: "OpStatus",
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Bit sets ─────────────────────────────────────────────────────

bitflags! {
    /// Motion / environment status reported by the fusion engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SensorStatus: u16 {
        const MOVING = 0x01;
        const YAW_STABLE = 0x02;
        const MAG_DISTURBANCE = 0x04;
        const ALTITUDE_VALID = 0x08;
        const SEALEVEL_PRESS_SET = 0x10;
        const FUSED_HEADING_VALID = 0x20;
    }
}

bitflags! {
    /// Calibration progress. The low two bits hold the IMU calibration
    /// state, see [`ImuCalState`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CalibrationStatus: u8 {
        const IMU_CAL_STATE_MASK = 0x03;
        const MAG_CAL_COMPLETE = 0x04;
        const BARO_CAL_COMPLETE = 0x08;
    }
}

bitflags! {
    /// Power-on self-test results.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SelfTestStatus: u8 {
        const GYRO_PASSED = 0x01;
        const ACCEL_PASSED = 0x02;
        const MAG_PASSED = 0x04;
        const BARO_PASSED = 0x08;
        const COMPLETE = 0x80;
    }
}

bitflags! {
    /// Optional features advertised by the board firmware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CapabilityFlags: u16 {
        const OMNIMOUNT = 0x0004;
        const OMNIMOUNT_CONFIG_MASK = 0x0038;
        const VEL_AND_DISP = 0x0040;
        const YAW_RESET = 0x0080;
        const AHRSPOS_TS = 0x0100;
    }
}

/// IMU calibration state carried in [`CalibrationStatus::IMU_CAL_STATE_MASK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImuCalState {
    InProgress,
    Accumulate,
    Complete,
    Reserved,
}

impl CalibrationStatus {
    pub fn imu_state(self) -> ImuCalState {
        match self.bits() & Self::IMU_CAL_STATE_MASK.bits() {
            0x00 => ImuCalState::InProgress,
            0x01 => ImuCalState::Accumulate,
            0x02 => ImuCalState::Complete,
            _ => ImuCalState::Reserved,
        }
    }
}

impl SelfTestStatus {
    /// Self-test finished and every sensor passed.
    pub fn all_passed(self) -> bool {
        self.contains(
            Self::COMPLETE
                | Self::GYRO_PASSED
                | Self::ACCEL_PASSED
                | Self::MAG_PASSED
                | Self::BARO_PASSED,
        )
    }
}

impl CapabilityFlags {
    /// Omnimount orientation index (bits 3..=5).
    pub fn omnimount_config(self) -> u8 {
        ((self.bits() & Self::OMNIMOUNT_CONFIG_MASK.bits()) >> 3) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_status_roundtrip() {
        for status in [
            OpStatus::Initializing,
            OpStatus::SelfTestInProgress,
            OpStatus::Error,
            OpStatus::ImuAutoCalInProgress,
            OpStatus::Normal,
        ] {
            assert_eq!(OpStatus::try_from(status as u8).unwrap(), status);
        }
    }

    #[test]
    fn op_status_invalid() {
        assert!(OpStatus::try_from(0x42).is_err());
    }

    #[test]
    fn unknown_bits_are_retained() {
        let status = SensorStatus::from_bits_retain(0x8003);
        assert!(status.contains(SensorStatus::MOVING | SensorStatus::YAW_STABLE));
        assert_eq!(status.bits(), 0x8003);
    }

    #[test]
    fn calibration_state() {
        let cal = CalibrationStatus::from_bits_retain(0x02 | 0x04);
        assert_eq!(cal.imu_state(), ImuCalState::Complete);
        assert!(cal.contains(CalibrationStatus::MAG_CAL_COMPLETE));
        assert!(!cal.contains(CalibrationStatus::BARO_CAL_COMPLETE));
    }

    #[test]
    fn self_test_all_passed() {
        assert!(SelfTestStatus::from_bits_retain(0x8F).all_passed());
        assert!(!SelfTestStatus::from_bits_retain(0x0F).all_passed());
    }

    #[test]
    fn omnimount_config_index() {
        let caps = CapabilityFlags::from_bits_retain(0x0004 | (0b101 << 3));
        assert!(caps.contains(CapabilityFlags::OMNIMOUNT));
        assert_eq!(caps.omnimount_config(), 5);
    }
}
