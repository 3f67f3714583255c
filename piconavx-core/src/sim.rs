//! Simulated board.
//!
//! Speaks the device side of the protocol over any byte stream: answers
//! report requests, honours `SETDATA:` by streaming the selected kind on a
//! fixed tick (Feed mode batches samples into binary frames) and applies the
//! zeroing commands to its motion model. Used for virtual connections in the
//! host and as the peer in integration tests.

use std::f64::consts::PI;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::MAX_LINE_LENGTH;
use crate::error::NavxError;
use crate::flags::{CalibrationStatus, CapabilityFlags, OpStatus, SelfTestStatus, SensorStatus};
use crate::protocol::feed::encode_batch;
use crate::protocol::{
    AhrsPosUpdate, AhrsUpdate, BoardIdentity, BoardState, Command, DataKind, FeedOverflowPolicy,
    FeedSample, HOST_INTRODUCTION, HealthReport, Orientation, Quaternion, RawSample, Telemetry,
    Vec3, YprUpdate, encode_line,
};

/// Identity every simulated board reports.
pub const SIM_IDENTITY: BoardIdentity = BoardIdentity {
    board_type: 3,
    hw_rev: 1,
    fw_ver_major: 3,
    fw_ver_minor: 1,
    fw_revision: 0,
};

const YAW_RATE_DPS: f64 = 15.0;
const GYRO_LSB_PER_DPS: f64 = 16.4;
const ACCEL_LSB_PER_G: i16 = 16384;
const MEM_TOTAL: i32 = 264 * 1024;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Id sent in the handshake.
    pub id: String,
    /// Stream selected before the host sends any `SETDATA:`.
    pub data_kind: DataKind,
    /// Sample period.
    pub update_interval: Duration,
    /// Samples per binary frame in Feed mode.
    pub feed_batch: usize,
    /// Expect the host introduction and answer with `ID:` first.
    pub handshake: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            id: "SimBoard".to_string(),
            data_kind: DataKind::Ypr,
            update_interval: Duration::from_millis(20),
            feed_batch: 10,
            handshake: false,
        }
    }
}

// ── Motion model ─────────────────────────────────────────────────

/// Slow constant-rate yaw with a gentle pitch/roll wobble while driving
/// along a circle.
#[derive(Debug, Default)]
struct Motion {
    elapsed: f64,
    yaw_offset: f64,
    displacement_origin: Vec3<f64>,
}

fn wrap_degrees(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

impl Motion {
    fn advance(&mut self, dt: Duration) {
        self.elapsed += dt.as_secs_f64();
    }

    fn heading(&self) -> f64 {
        self.elapsed * YAW_RATE_DPS
    }

    fn yaw(&self) -> f64 {
        wrap_degrees(self.heading() - self.yaw_offset)
    }

    fn pitch(&self) -> f64 {
        4.0 * (0.5 * self.elapsed).sin()
    }

    fn roll(&self) -> f64 {
        2.0 * (0.7 * self.elapsed).cos()
    }

    fn velocity(&self) -> Vec3<f64> {
        let t = 0.2 * self.elapsed;
        Vec3::new(0.5 * t.cos(), 0.5 * t.sin(), 0.0)
    }

    fn travelled(&self) -> Vec3<f64> {
        let t = 0.2 * self.elapsed;
        Vec3::new(2.5 * t.sin(), 2.5 * (1.0 - t.cos()), 0.0)
    }

    fn displacement(&self) -> Vec3<f64> {
        let p = self.travelled();
        let o = self.displacement_origin;
        Vec3::new(p.x - o.x, p.y - o.y, p.z - o.z)
    }

    fn zero_yaw(&mut self) {
        self.yaw_offset = self.heading();
    }

    fn zero_displacement(&mut self) {
        self.displacement_origin = self.travelled();
    }

    fn quaternion(&self) -> Quaternion<f64> {
        let (y, p, r) = (
            self.yaw().to_radians() / 2.0,
            self.pitch().to_radians() / 2.0,
            self.roll().to_radians() / 2.0,
        );
        let (cy, sy) = (y.cos(), y.sin());
        let (cp, sp) = (p.cos(), p.sin());
        let (cr, sr) = (r.cos(), r.sin());
        Quaternion {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    fn core_temp(&self) -> f64 {
        27.0 + 0.5 * (self.elapsed / 60.0 * PI).sin()
    }

    fn orientation(&self) -> Orientation {
        let compass = self.heading().rem_euclid(360.0);
        Orientation {
            yaw: self.yaw(),
            pitch: self.pitch(),
            roll: self.roll(),
            compass_heading: compass,
            altitude: 12.0,
            fused_heading: compass,
            linear_accel: Vec3::new(0.0, 0.0, 0.0),
            mpu_temp_c: self.core_temp() + 3.0,
            quaternion: self.quaternion(),
            baro_pressure: 1013.25,
            baro_temp_c: self.core_temp(),
            op_status: OpStatus::Normal as u8,
            sensor_status: sensor_status().bits() as u8,
            cal_status: cal_status().bits(),
            selftest_status: SelfTestStatus::all().bits(),
        }
    }
}

fn sensor_status() -> SensorStatus {
    SensorStatus::MOVING | SensorStatus::ALTITUDE_VALID | SensorStatus::FUSED_HEADING_VALID
}

fn cal_status() -> CalibrationStatus {
    // IMU state "complete" lives in the low two bits.
    CalibrationStatus::from_bits_retain(0x02)
        | CalibrationStatus::MAG_CAL_COMPLETE
        | CalibrationStatus::BARO_CAL_COMPLETE
}

fn lines_error(e: LinesCodecError) -> NavxError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => NavxError::LineTooLong {
            size: MAX_LINE_LENGTH + 1,
            max: MAX_LINE_LENGTH,
        },
        LinesCodecError::Io(e) => NavxError::Connection(e),
    }
}

// ── SimulatedBoard ───────────────────────────────────────────────

#[derive(Debug)]
pub struct SimulatedBoard {
    config: SimConfig,
    motion: Motion,
    data_kind: DataKind,
    overflow: FeedOverflowPolicy,
    pending_feed: Vec<FeedSample>,
    ticks: u32,
}

impl SimulatedBoard {
    pub fn new(config: SimConfig) -> Self {
        Self {
            data_kind: config.data_kind,
            motion: Motion::default(),
            overflow: FeedOverflowPolicy::DeleteOldest,
            pending_feed: Vec::with_capacity(config.feed_batch),
            ticks: 0,
            config,
        }
    }

    pub fn data_kind(&self) -> DataKind {
        self.data_kind
    }

    pub fn feed_overflow(&self) -> FeedOverflowPolicy {
        self.overflow
    }

    /// Serve the host on `stream` until it disconnects or `cancel` fires.
    pub async fn run<S>(mut self, stream: S, cancel: CancellationToken) -> Result<(), NavxError>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut lines = FramedRead::new(rd, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        if self.config.handshake {
            let intro = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                intro = lines.next() => intro,
            };
            match intro {
                Some(Ok(line)) if line.trim_end() == HOST_INTRODUCTION => {}
                Some(Ok(line)) => return Err(NavxError::HandshakeRejected(line)),
                Some(Err(e)) => return Err(lines_error(e)),
                None => return Err(NavxError::ConnectionClosed),
            }
            let id = encode_line(&Telemetry::Identity(self.config.id.clone()));
            wr.write_all(format!("{id}\n").as_bytes()).await?;
            debug!(id = %self.config.id, "simulated board identified");
        }

        let mut ticker = tokio::time::interval(self.config.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                line = lines.next() => match line {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(lines_error(e)),
                    Some(Ok(line)) => {
                        if let Some(reply) = self.handle_line(&line) {
                            wr.write_all(&reply).await?;
                        }
                    }
                },
                _ = ticker.tick() => {
                    if let Some(frame) = self.tick() {
                        wr.write_all(&frame).await?;
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Option<Vec<u8>> {
        match line.parse::<Command>() {
            Ok(command) => self.handle(command),
            Err(e) => {
                debug!(line, error = %e, "simulated board ignoring line");
                None
            }
        }
    }

    /// Apply one command, returning the reply bytes if it asks for a report.
    pub fn handle(&mut self, command: Command) -> Option<Vec<u8>> {
        trace!(%command, "simulated board received");
        let reply = match command {
            Command::SetDataKind(kind) => {
                self.data_kind = kind;
                self.pending_feed.clear();
                return None;
            }
            Command::SetFeedOverflow(policy) => {
                self.overflow = policy;
                return None;
            }
            Command::ZeroYaw => {
                self.motion.zero_yaw();
                return None;
            }
            Command::ZeroDisplacement => {
                self.motion.zero_displacement();
                return None;
            }
            Command::RequestHealth => Telemetry::Health(self.health()),
            Command::RequestBoardState => Telemetry::BoardState(self.board_state()),
            Command::RequestBoardIdentity => Telemetry::BoardIdentity(SIM_IDENTITY),
        };
        Some(line_bytes(&reply))
    }

    /// Advance one sample period and render whatever the current mode emits.
    pub fn tick(&mut self) -> Option<Vec<u8>> {
        self.motion.advance(self.config.update_interval);
        self.ticks = self.ticks.wrapping_add(1);
        let m = &self.motion;

        let telemetry = match self.data_kind {
            DataKind::Ypr => Telemetry::Ypr(YprUpdate {
                yaw: m.yaw(),
                pitch: m.pitch(),
                roll: m.roll(),
            }),
            DataKind::Raw => Telemetry::Raw(self.raw_sample()),
            DataKind::Ahrs => Telemetry::Ahrs(AhrsUpdate {
                orientation: m.orientation(),
                cal_mag: Vec3::new(0.21, -0.05, 0.43),
                mag_field_norm_ratio: 1.0,
                mag_field_norm_scalar: 0.48,
                raw_mag: Vec3::new(210.0, -50.0, 430.0),
            }),
            DataKind::AhrsPos => Telemetry::AhrsPos(AhrsPosUpdate {
                orientation: m.orientation(),
                velocity: m.velocity(),
                displacement: m.displacement(),
            }),
            DataKind::Feed => {
                let sample = self.feed_sample();
                self.pending_feed.push(sample);
                if self.pending_feed.len() < self.config.feed_batch.max(1) {
                    return None;
                }
                let frame = encode_batch(&self.pending_feed);
                self.pending_feed.clear();
                return Some(frame);
            }
        };
        Some(line_bytes(&telemetry))
    }

    fn health(&self) -> HealthReport {
        HealthReport {
            mem_used: 96 * 1024 + (self.ticks % 4096) as i32,
            mem_total: MEM_TOTAL,
            core_temp_c: self.motion.core_temp(),
        }
    }

    fn board_state(&self) -> BoardState {
        let rate = (1.0 / self.config.update_interval.as_secs_f64()).round();
        BoardState {
            op_status: OpStatus::Normal as u8,
            sensor_status: sensor_status().bits(),
            cal_status: cal_status().bits(),
            selftest_status: SelfTestStatus::all().bits(),
            capability_flags: (CapabilityFlags::OMNIMOUNT
                | CapabilityFlags::VEL_AND_DISP
                | CapabilityFlags::YAW_RESET
                | CapabilityFlags::AHRSPOS_TS)
                .bits(),
            update_rate_hz: rate.clamp(1.0, u8::MAX as f64) as u8,
            accel_fsr_g: 2,
            gyro_fsr_dps: 2000,
        }
    }

    fn raw_sample(&self) -> RawSample {
        let gyro_z = (YAW_RATE_DPS * GYRO_LSB_PER_DPS).round() as i16;
        RawSample {
            gyro: Vec3::new(0, 0, gyro_z),
            accel: Vec3::new(0, 0, ACCEL_LSB_PER_G),
            mag: Vec3::new(210, -50, 430),
            temp_c: self.motion.core_temp(),
        }
    }

    fn feed_sample(&self) -> FeedSample {
        let o = self.motion.orientation();
        let v = self.motion.velocity();
        let d = self.motion.displacement();
        let f = |x: f64| x as f32;
        FeedSample {
            timestamp: (self.motion.elapsed * 1000.0) as u32,
            yaw: f(o.yaw),
            pitch: f(o.pitch),
            roll: f(o.roll),
            compass_heading: f(o.compass_heading),
            altitude: f(o.altitude),
            fused_heading: f(o.fused_heading),
            linear_accel: Vec3::new(f(o.linear_accel.x), f(o.linear_accel.y), f(o.linear_accel.z)),
            mpu_temp_c: f(o.mpu_temp_c),
            quaternion: Quaternion {
                w: f(o.quaternion.w),
                x: f(o.quaternion.x),
                y: f(o.quaternion.y),
                z: f(o.quaternion.z),
            },
            baro_pressure: f(o.baro_pressure),
            baro_temp_c: f(o.baro_temp_c),
            velocity: Vec3::new(f(v.x), f(v.y), f(v.z)),
            displacement: Vec3::new(f(d.x), f(d.y), f(d.z)),
        }
    }
}

fn line_bytes(telemetry: &Telemetry) -> Vec<u8> {
    let mut line = encode_line(telemetry).into_bytes();
    line.push(b'\n');
    line
}
