//! Line decode / encode.
//!
//! A line is `<PREFIX><field>|<field>|...`. The prefix selects the kind,
//! the fields are parsed strictly in wire order. A field that does not parse
//! fails the whole line; trailing extra fields are ignored.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::NavxError;
use crate::protocol::feed::{FeedHeader, MAX_FEED_CHUNKS};
use crate::protocol::records::{
    AhrsPosUpdate, AhrsUpdate, BoardIdentity, BoardState, HealthReport, Orientation, Quaternion,
    RawSample, Vec3, YprUpdate,
};
use crate::protocol::{Telemetry, TelemetryKind};

/// Line the server writes to open a handshake.
pub const HOST_INTRODUCTION: &str = "PICONAVX-HOST";

// ── Field reader ─────────────────────────────────────────────────

/// Ordered `|`-separated fields of one line.
struct Fields<'a> {
    kind: TelemetryKind,
    parts: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(kind: TelemetryKind, body: &'a str) -> Self {
        Self {
            kind,
            parts: body.split('|'),
        }
    }

    fn next<T: FromStr>(&mut self, field: &'static str) -> Result<T, NavxError> {
        let raw = self
            .parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(NavxError::MissingField {
                kind: self.kind,
                field,
            })?;
        raw.parse().map_err(|_| NavxError::Decode {
            kind: self.kind,
            field,
            value: raw.to_string(),
        })
    }

    fn vec3<T: FromStr>(
        &mut self,
        fields: [&'static str; 3],
    ) -> Result<Vec3<T>, NavxError> {
        Ok(Vec3::new(
            self.next(fields[0])?,
            self.next(fields[1])?,
            self.next(fields[2])?,
        ))
    }

    fn orientation(&mut self) -> Result<Orientation, NavxError> {
        Ok(Orientation {
            yaw: self.next("yaw")?,
            pitch: self.next("pitch")?,
            roll: self.next("roll")?,
            compass_heading: self.next("compass_heading")?,
            altitude: self.next("altitude")?,
            fused_heading: self.next("fused_heading")?,
            linear_accel: self.vec3(["lin_accel_x", "lin_accel_y", "lin_accel_z"])?,
            mpu_temp_c: self.next("mpu_temp")?,
            quaternion: Quaternion {
                w: self.next("quat_w")?,
                x: self.next("quat_x")?,
                y: self.next("quat_y")?,
                z: self.next("quat_z")?,
            },
            baro_pressure: self.next("baro_pressure")?,
            baro_temp_c: self.next("baro_temp")?,
            op_status: self.next("op_status")?,
            sensor_status: self.next("sensor_status")?,
            cal_status: self.next("cal_status")?,
            selftest_status: self.next("selftest_status")?,
        })
    }
}

// ── Decode ───────────────────────────────────────────────────────

/// Decode one line (without its terminator).
///
/// Lines with no known prefix become [`Telemetry::Unknown`] and never fail.
pub fn decode_line(line: &str) -> Result<Telemetry, NavxError> {
    let Some((kind, body)) = TelemetryKind::match_prefix(line) else {
        return Ok(Telemetry::Unknown(line.to_string()));
    };
    let mut f = Fields::new(kind, body);

    let telemetry = match kind {
        TelemetryKind::Identity => Telemetry::Identity(body.to_string()),
        TelemetryKind::Health => Telemetry::Health(HealthReport {
            mem_used: f.next("mem_used")?,
            mem_total: f.next("mem_total")?,
            core_temp_c: f.next("core_temp")?,
        }),
        TelemetryKind::YawPitchRoll => Telemetry::Ypr(YprUpdate {
            yaw: f.next("yaw")?,
            pitch: f.next("pitch")?,
            roll: f.next("roll")?,
        }),
        TelemetryKind::RawSample => Telemetry::Raw(RawSample {
            gyro: f.vec3(["gyro_x", "gyro_y", "gyro_z"])?,
            accel: f.vec3(["accel_x", "accel_y", "accel_z"])?,
            mag: f.vec3(["mag_x", "mag_y", "mag_z"])?,
            temp_c: f.next("temp")?,
        }),
        TelemetryKind::FusedOrientationPosition => Telemetry::AhrsPos(AhrsPosUpdate {
            orientation: f.orientation()?,
            velocity: f.vec3(["vel_x", "vel_y", "vel_z"])?,
            displacement: f.vec3(["disp_x", "disp_y", "disp_z"])?,
        }),
        TelemetryKind::FusedOrientation => Telemetry::Ahrs(AhrsUpdate {
            orientation: f.orientation()?,
            cal_mag: f.vec3(["cal_mag_x", "cal_mag_y", "cal_mag_z"])?,
            mag_field_norm_ratio: f.next("mag_field_norm_ratio")?,
            mag_field_norm_scalar: f.next("mag_field_norm_scalar")?,
            raw_mag: f.vec3(["raw_mag_x", "raw_mag_y", "raw_mag_z"])?,
        }),
        TelemetryKind::BoardState => Telemetry::BoardState(BoardState {
            op_status: f.next("op_status")?,
            sensor_status: f.next("sensor_status")?,
            cal_status: f.next("cal_status")?,
            selftest_status: f.next("selftest_status")?,
            capability_flags: f.next("capability_flags")?,
            update_rate_hz: f.next("update_rate_hz")?,
            accel_fsr_g: f.next("accel_fsr_g")?,
            gyro_fsr_dps: f.next("gyro_fsr_dps")?,
        }),
        TelemetryKind::BoardIdentity => Telemetry::BoardIdentity(BoardIdentity {
            board_type: f.next("type")?,
            hw_rev: f.next("hw_rev")?,
            fw_ver_major: f.next("fw_ver_major")?,
            fw_ver_minor: f.next("fw_ver_minor")?,
            fw_revision: f.next("fw_revision")?,
        }),
        TelemetryKind::Feed => Telemetry::FeedHeader(decode_feed_header(&mut f)?),
        TelemetryKind::Unknown => Telemetry::Unknown(line.to_string()),
    };
    Ok(telemetry)
}

fn decode_feed_header(f: &mut Fields<'_>) -> Result<FeedHeader, NavxError> {
    let declared_len: i32 = f.next("total_len")?;
    let chunk_count: i32 = f.next("chunk_count")?;
    let chunks = u32::try_from(chunk_count).map_err(|_| NavxError::Decode {
        kind: TelemetryKind::Feed,
        field: "chunk_count",
        value: chunk_count.to_string(),
    })?;
    if chunks as usize > MAX_FEED_CHUNKS {
        return Err(NavxError::FeedTooLarge {
            chunks: chunks as usize,
            max: MAX_FEED_CHUNKS,
        });
    }
    Ok(FeedHeader {
        declared_len,
        chunk_count: chunks,
    })
}

// ── Encode ───────────────────────────────────────────────────────

fn join(prefix: &str, fields: &[&dyn Display]) -> String {
    let mut out = String::from(prefix);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(&field.to_string());
    }
    out
}

fn orientation_fields(o: &Orientation) -> [&dyn Display; 20] {
    [
        &o.yaw,
        &o.pitch,
        &o.roll,
        &o.compass_heading,
        &o.altitude,
        &o.fused_heading,
        &o.linear_accel.x,
        &o.linear_accel.y,
        &o.linear_accel.z,
        &o.mpu_temp_c,
        &o.quaternion.w,
        &o.quaternion.x,
        &o.quaternion.y,
        &o.quaternion.z,
        &o.baro_pressure,
        &o.baro_temp_c,
        &o.op_status,
        &o.sensor_status,
        &o.cal_status,
        &o.selftest_status,
    ]
}

/// Render a record as the line a board would send (no terminator).
///
/// A decoded [`Telemetry::Feed`] batch renders as its header line only; the
/// binary records are produced by [`crate::protocol::feed::encode_batch`].
pub fn encode_line(telemetry: &Telemetry) -> String {
    let prefix = telemetry.kind().prefix();
    match telemetry {
        Telemetry::Identity(id) => format!("{prefix}{id}"),
        Telemetry::Health(h) => join(prefix, &[&h.mem_used, &h.mem_total, &h.core_temp_c]),
        Telemetry::Ypr(y) => join(prefix, &[&y.yaw, &y.pitch, &y.roll]),
        Telemetry::Raw(r) => join(
            prefix,
            &[
                &r.gyro.x, &r.gyro.y, &r.gyro.z, &r.accel.x, &r.accel.y, &r.accel.z, &r.mag.x,
                &r.mag.y, &r.mag.z, &r.temp_c,
            ],
        ),
        Telemetry::AhrsPos(a) => {
            let mut fields = orientation_fields(&a.orientation).to_vec();
            fields.extend_from_slice(&[
                &a.velocity.x,
                &a.velocity.y,
                &a.velocity.z,
                &a.displacement.x,
                &a.displacement.y,
                &a.displacement.z,
            ]);
            join(prefix, &fields)
        }
        Telemetry::Ahrs(a) => {
            let mut fields = orientation_fields(&a.orientation).to_vec();
            fields.extend_from_slice(&[
                &a.cal_mag.x,
                &a.cal_mag.y,
                &a.cal_mag.z,
                &a.mag_field_norm_ratio,
                &a.mag_field_norm_scalar,
                &a.raw_mag.x,
                &a.raw_mag.y,
                &a.raw_mag.z,
            ]);
            join(prefix, &fields)
        }
        Telemetry::BoardState(s) => join(
            prefix,
            &[
                &s.op_status,
                &s.sensor_status,
                &s.cal_status,
                &s.selftest_status,
                &s.capability_flags,
                &s.update_rate_hz,
                &s.accel_fsr_g,
                &s.gyro_fsr_dps,
            ],
        ),
        Telemetry::BoardIdentity(b) => join(
            prefix,
            &[
                &b.board_type,
                &b.hw_rev,
                &b.fw_ver_major,
                &b.fw_ver_minor,
                &b.fw_revision,
            ],
        ),
        Telemetry::FeedHeader(h) => join(prefix, &[&h.declared_len, &h.chunk_count]),
        Telemetry::Feed(batch) => join(prefix, &[&batch.declared_len, &batch.samples.len()]),
        Telemetry::Unknown(line) => line.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(t: Telemetry) {
        let line = encode_line(&t);
        assert_eq!(decode_line(&line).unwrap(), t, "line: {line}");
    }

    fn orientation(sign: f64) -> Orientation {
        Orientation {
            yaw: 179.99 * sign,
            pitch: -0.5 * sign,
            roll: 0.0,
            compass_heading: 359.0,
            altitude: -12.75,
            fused_heading: 1.0e-9,
            linear_accel: Vec3::new(0.01, -0.02, 0.98),
            mpu_temp_c: 36.6,
            quaternion: Quaternion {
                w: 1.0,
                x: 0.0,
                y: -0.0,
                z: 0.7071067811865476,
            },
            baro_pressure: 1013.25,
            baro_temp_c: 21.0,
            op_status: 4,
            sensor_status: 255,
            cal_status: 0,
            selftest_status: 0x8F,
        }
    }

    #[test]
    fn health_example() {
        let t = decode_line("HEALTH:1024|2048|25.50").unwrap();
        assert_eq!(
            t,
            Telemetry::Health(HealthReport {
                mem_used: 1024,
                mem_total: 2048,
                core_temp_c: 25.5,
            })
        );
    }

    #[test]
    fn board_identity_example() {
        let t = decode_line("BID:3|1|3|1|0").unwrap();
        assert_eq!(
            t,
            Telemetry::BoardIdentity(BoardIdentity {
                board_type: 3,
                hw_rev: 1,
                fw_ver_major: 3,
                fw_ver_minor: 1,
                fw_revision: 0,
            })
        );
    }

    #[test]
    fn identity_keeps_opaque_id() {
        assert_eq!(
            decode_line("ID:Robot").unwrap(),
            Telemetry::Identity("Robot".into())
        );
        assert_eq!(
            decode_line("ID:a|b c").unwrap(),
            Telemetry::Identity("a|b c".into())
        );
    }

    #[test]
    fn roundtrip_every_line_kind() {
        roundtrip(Telemetry::Health(HealthReport {
            mem_used: -1,
            mem_total: i32::MAX,
            core_temp_c: -40.125,
        }));
        roundtrip(Telemetry::Ypr(YprUpdate {
            yaw: -180.0,
            pitch: 0.0,
            roll: 90.000001,
        }));
        roundtrip(Telemetry::Raw(RawSample {
            gyro: Vec3::new(i16::MIN, 0, i16::MAX),
            accel: Vec3::new(-1, 1, 16384),
            mag: Vec3::new(0, -300, 300),
            temp_c: 27.3,
        }));
        roundtrip(Telemetry::AhrsPos(AhrsPosUpdate {
            orientation: orientation(1.0),
            velocity: Vec3::new(0.1, 0.2, -0.3),
            displacement: Vec3::new(1.5, -2.5, 0.0),
        }));
        roundtrip(Telemetry::Ahrs(AhrsUpdate {
            orientation: orientation(-1.0),
            cal_mag: Vec3::new(12.0, -4.0, 40.0),
            mag_field_norm_ratio: 0.98,
            mag_field_norm_scalar: 48.2,
            raw_mag: Vec3::new(11.0, -3.0, 41.0),
        }));
        roundtrip(Telemetry::BoardState(BoardState {
            op_status: u8::MAX,
            sensor_status: u16::MAX,
            cal_status: 0,
            selftest_status: 0x8F,
            capability_flags: u16::MAX,
            update_rate_hz: 200,
            accel_fsr_g: 16,
            gyro_fsr_dps: 2000,
        }));
        roundtrip(Telemetry::BoardIdentity(BoardIdentity {
            board_type: 0,
            hw_rev: u8::MAX,
            fw_ver_major: 0,
            fw_ver_minor: 0,
            fw_revision: u8::MAX,
        }));
        roundtrip(Telemetry::FeedHeader(FeedHeader {
            declared_len: 184,
            chunk_count: 2,
        }));
    }

    #[test]
    fn field_counts() {
        let ahrspos = encode_line(&Telemetry::AhrsPos(AhrsPosUpdate::default()));
        assert_eq!(ahrspos.split('|').count(), 26);
        let ahrs = encode_line(&Telemetry::Ahrs(AhrsUpdate::default()));
        assert_eq!(ahrs.split('|').count(), 28);
    }

    #[test]
    fn bad_field_fails_line() {
        let err = decode_line("HEALTH:1024|lots|25.5").unwrap_err();
        assert!(matches!(
            err,
            NavxError::Decode {
                kind: TelemetryKind::Health,
                field: "mem_total",
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_byte_fails() {
        assert!(decode_line("BID:256|1|3|1|0").is_err());
        assert!(decode_line("BID:-1|1|3|1|0").is_err());
    }

    #[test]
    fn missing_field_fails() {
        let err = decode_line("YPR:1.0|2.0").unwrap_err();
        assert!(matches!(err, NavxError::MissingField { field: "roll", .. }));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let t = decode_line("YPR:1|2|3|4").unwrap();
        assert_eq!(
            t,
            Telemetry::Ypr(YprUpdate {
                yaw: 1.0,
                pitch: 2.0,
                roll: 3.0
            })
        );
    }

    #[test]
    fn unknown_prefix() {
        assert_eq!(
            decode_line("HELLO").unwrap(),
            Telemetry::Unknown("HELLO".into())
        );
        assert_eq!(decode_line("").unwrap(), Telemetry::Unknown(String::new()));
        // Prefixes are case-sensitive.
        assert!(matches!(
            decode_line("health:1|2|3").unwrap(),
            Telemetry::Unknown(_)
        ));
    }

    #[test]
    fn feed_header_validation() {
        assert!(decode_line("FEED:0|-1").is_err());
        assert!(matches!(
            decode_line("FEED:0|100000").unwrap_err(),
            NavxError::FeedTooLarge { .. }
        ));
    }
}
