//! Wire protocol: telemetry records, line and Feed codecs, commands.

pub mod command;
pub mod feed;
pub mod line;
pub mod records;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use command::{Command, CommandKind, DataKind, FeedOverflowPolicy};
pub use feed::{FEED_RECORD_SIZE, FeedHeader, FeedSample};
pub use line::{HOST_INTRODUCTION, decode_line, encode_line};
pub use records::{
    AhrsPosUpdate, AhrsUpdate, BoardIdentity, BoardState, HealthReport, Orientation, Quaternion,
    RawSample, Vec3, YprUpdate,
};

// ── TelemetryKind ────────────────────────────────────────────────

/// Kind of an inbound line, selected by its literal prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKind {
    Identity,
    RawSample,
    FusedOrientation,
    FusedOrientationPosition,
    YawPitchRoll,
    Health,
    BoardState,
    BoardIdentity,
    Feed,
    Unknown,
}

impl TelemetryKind {
    const PREFIXED: [TelemetryKind; 9] = [
        TelemetryKind::Health,
        TelemetryKind::YawPitchRoll,
        TelemetryKind::RawSample,
        TelemetryKind::FusedOrientationPosition,
        TelemetryKind::FusedOrientation,
        TelemetryKind::BoardState,
        TelemetryKind::BoardIdentity,
        TelemetryKind::Feed,
        TelemetryKind::Identity,
    ];

    /// Literal line prefix; empty for [`TelemetryKind::Unknown`].
    pub fn prefix(self) -> &'static str {
        match self {
            TelemetryKind::Identity => "ID:",
            TelemetryKind::RawSample => "RAW:",
            TelemetryKind::FusedOrientation => "AHRS:",
            TelemetryKind::FusedOrientationPosition => "AHRSPOS:",
            TelemetryKind::YawPitchRoll => "YPR:",
            TelemetryKind::Health => "HEALTH:",
            TelemetryKind::BoardState => "BSTATE:",
            TelemetryKind::BoardIdentity => "BID:",
            TelemetryKind::Feed => "FEED:",
            TelemetryKind::Unknown => "",
        }
    }

    /// Split `line` into its kind and the text after the prefix.
    pub fn match_prefix(line: &str) -> Option<(TelemetryKind, &str)> {
        Self::PREFIXED
            .iter()
            .find_map(|k| line.strip_prefix(k.prefix()).map(|body| (*k, body)))
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Telemetry ────────────────────────────────────────────────────

/// A decoded Feed frame: the header line plus every record that followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedBatch {
    pub declared_len: i32,
    pub samples: Vec<FeedSample>,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Identity(String),
    Raw(RawSample),
    Ahrs(AhrsUpdate),
    AhrsPos(AhrsPosUpdate),
    Ypr(YprUpdate),
    Health(HealthReport),
    BoardState(BoardState),
    BoardIdentity(BoardIdentity),
    /// A `FEED:` line on its own. The framing codec never yields this; it
    /// consumes the binary records and yields [`Telemetry::Feed`] instead.
    FeedHeader(FeedHeader),
    Feed(FeedBatch),
    Unknown(String),
}

impl Telemetry {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Telemetry::Identity(_) => TelemetryKind::Identity,
            Telemetry::Raw(_) => TelemetryKind::RawSample,
            Telemetry::Ahrs(_) => TelemetryKind::FusedOrientation,
            Telemetry::AhrsPos(_) => TelemetryKind::FusedOrientationPosition,
            Telemetry::Ypr(_) => TelemetryKind::YawPitchRoll,
            Telemetry::Health(_) => TelemetryKind::Health,
            Telemetry::BoardState(_) => TelemetryKind::BoardState,
            Telemetry::BoardIdentity(_) => TelemetryKind::BoardIdentity,
            Telemetry::FeedHeader(_) | Telemetry::Feed(_) => TelemetryKind::Feed,
            Telemetry::Unknown(_) => TelemetryKind::Unknown,
        }
    }
}

// ── Updates and reports ──────────────────────────────────────────

/// Telemetry the board pushes without being asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Update {
    Raw(RawSample),
    Ahrs(AhrsUpdate),
    AhrsPos(AhrsPosUpdate),
    Ypr(YprUpdate),
    Feed(Vec<FeedSample>),
}

impl Update {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Update::Raw(_) => TelemetryKind::RawSample,
            Update::Ahrs(_) => TelemetryKind::FusedOrientation,
            Update::AhrsPos(_) => TelemetryKind::FusedOrientationPosition,
            Update::Ypr(_) => TelemetryKind::YawPitchRoll,
            Update::Feed(_) => TelemetryKind::Feed,
        }
    }
}

/// The three kinds a board only sends in answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportKind {
    Health,
    BoardState,
    BoardIdentity,
}

impl ReportKind {
    /// Command that asks the board for this report.
    pub fn request(self) -> Command {
        match self {
            ReportKind::Health => Command::RequestHealth,
            ReportKind::BoardState => Command::RequestBoardState,
            ReportKind::BoardIdentity => Command::RequestBoardIdentity,
        }
    }
}

/// A request/response report value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Report {
    Health(HealthReport),
    BoardState(BoardState),
    BoardIdentity(BoardIdentity),
}

impl Report {
    pub fn kind(&self) -> ReportKind {
        match self {
            Report::Health(_) => ReportKind::Health,
            Report::BoardState(_) => ReportKind::BoardState,
            Report::BoardIdentity(_) => ReportKind::BoardIdentity,
        }
    }
}

/// How the session must treat one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Update(Update),
    Report(Report),
    Identity(String),
    Unknown(String),
}

impl From<Telemetry> for Inbound {
    fn from(t: Telemetry) -> Self {
        match t {
            Telemetry::Raw(r) => Inbound::Update(Update::Raw(r)),
            Telemetry::Ahrs(a) => Inbound::Update(Update::Ahrs(a)),
            Telemetry::AhrsPos(a) => Inbound::Update(Update::AhrsPos(a)),
            Telemetry::Ypr(y) => Inbound::Update(Update::Ypr(y)),
            Telemetry::Feed(batch) => Inbound::Update(Update::Feed(batch.samples)),
            Telemetry::Health(h) => Inbound::Report(Report::Health(h)),
            Telemetry::BoardState(s) => Inbound::Report(Report::BoardState(s)),
            Telemetry::BoardIdentity(b) => Inbound::Report(Report::BoardIdentity(b)),
            Telemetry::Identity(id) => Inbound::Identity(id),
            Telemetry::FeedHeader(h) => Inbound::Unknown(format!(
                "{}{}|{}",
                TelemetryKind::Feed.prefix(),
                h.declared_len,
                h.chunk_count
            )),
            Telemetry::Unknown(line) => Inbound::Unknown(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ahrs_prefix_does_not_shadow_ahrspos() {
        let (kind, body) = TelemetryKind::match_prefix("AHRSPOS:1|2").unwrap();
        assert_eq!(kind, TelemetryKind::FusedOrientationPosition);
        assert_eq!(body, "1|2");

        let (kind, _) = TelemetryKind::match_prefix("AHRS:1|2").unwrap();
        assert_eq!(kind, TelemetryKind::FusedOrientation);
    }

    #[test]
    fn bid_prefix_does_not_match_id() {
        let (kind, body) = TelemetryKind::match_prefix("BID:3|1|3|1|0").unwrap();
        assert_eq!(kind, TelemetryKind::BoardIdentity);
        assert_eq!(body, "3|1|3|1|0");
    }

    #[test]
    fn classification() {
        let health = Telemetry::Health(HealthReport::default());
        assert!(matches!(Inbound::from(health), Inbound::Report(Report::Health(_))));

        let ypr = Telemetry::Ypr(YprUpdate::default());
        assert!(matches!(Inbound::from(ypr), Inbound::Update(Update::Ypr(_))));

        let feed = Telemetry::Feed(FeedBatch {
            declared_len: 0,
            samples: vec![],
        });
        assert!(matches!(Inbound::from(feed), Inbound::Update(Update::Feed(s)) if s.is_empty()));
    }

    #[test]
    fn report_requests() {
        assert_eq!(ReportKind::Health.request(), Command::RequestHealth);
        assert_eq!(ReportKind::BoardState.request(), Command::RequestBoardState);
        assert_eq!(
            ReportKind::BoardIdentity.request(),
            Command::RequestBoardIdentity
        );
    }
}
