//! Host → board commands.
//!
//! Every command is a literal token, optionally followed by one literal
//! argument, terminated by a newline on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NavxError;

// ── DataKind ─────────────────────────────────────────────────────

/// Which update stream the board should push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Raw,
    Ahrs,
    AhrsPos,
    Ypr,
    /// Batched binary samples (high-bandwidth mode).
    Feed,
}

impl DataKind {
    pub fn token(self) -> &'static str {
        match self {
            DataKind::Raw => "RAW",
            DataKind::Ahrs => "AHRS",
            DataKind::AhrsPos => "AHRSPOS",
            DataKind::Ypr => "YPR",
            DataKind::Feed => "FEED",
        }
    }

    pub fn is_high_bandwidth(self) -> bool {
        self == DataKind::Feed
    }
}

impl TryFrom<&str> for DataKind {
    type Error = NavxError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "RAW" => Ok(DataKind::Raw),
            "AHRS" => Ok(DataKind::Ahrs),
            "AHRSPOS" => Ok(DataKind::AhrsPos),
            "YPR" => Ok(DataKind::Ypr),
            "FEED" => Ok(DataKind::Feed),
            _ => Err(NavxError::UnknownVariant {
                type_name: "DataKind",
                value: value.to_string(),
            }),
        }
    }
}

// ── FeedOverflowPolicy ───────────────────────────────────────────

/// What the board does when its outbound Feed buffer is full.
/// Enforcement happens on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedOverflowPolicy {
    DeleteOldest,
    ReduceOldestFrequency,
    Skip,
}

impl FeedOverflowPolicy {
    pub fn token(self) -> &'static str {
        match self {
            FeedOverflowPolicy::DeleteOldest => "DELETE",
            FeedOverflowPolicy::ReduceOldestFrequency => "LOWFREQ",
            FeedOverflowPolicy::Skip => "SKIP",
        }
    }
}

impl TryFrom<&str> for FeedOverflowPolicy {
    type Error = NavxError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "DELETE" => Ok(FeedOverflowPolicy::DeleteOldest),
            "LOWFREQ" => Ok(FeedOverflowPolicy::ReduceOldestFrequency),
            "SKIP" => Ok(FeedOverflowPolicy::Skip),
            _ => Err(NavxError::UnknownVariant {
                type_name: "FeedOverflowPolicy",
                value: value.to_string(),
            }),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// All commands understood by a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Select the pushed update stream.
    SetDataKind(DataKind),
    RequestHealth,
    RequestBoardState,
    RequestBoardIdentity,
    ZeroYaw,
    ZeroDisplacement,
    SetFeedOverflow(FeedOverflowPolicy),
}

/// Discriminant of a [`Command`], without its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetDataKind,
    RequestHealth,
    RequestBoardState,
    RequestBoardIdentity,
    ZeroYaw,
    ZeroDisplacement,
    SetFeedOverflow,
}

impl CommandKind {
    pub fn token(self) -> &'static str {
        match self {
            CommandKind::SetDataKind => "SETDATA:",
            CommandKind::RequestHealth => "GETHEALTH:",
            CommandKind::RequestBoardState => "GETBSTATE:",
            CommandKind::RequestBoardIdentity => "GETBID:",
            CommandKind::ZeroYaw => "ZEROYAW:",
            CommandKind::ZeroDisplacement => "ZERODISP:",
            CommandKind::SetFeedOverflow => "SETFEEDOVF:",
        }
    }

    const ALL: [CommandKind; 7] = [
        CommandKind::SetDataKind,
        CommandKind::RequestHealth,
        CommandKind::RequestBoardState,
        CommandKind::RequestBoardIdentity,
        CommandKind::ZeroYaw,
        CommandKind::ZeroDisplacement,
        CommandKind::SetFeedOverflow,
    ];
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetDataKind(_) => CommandKind::SetDataKind,
            Command::RequestHealth => CommandKind::RequestHealth,
            Command::RequestBoardState => CommandKind::RequestBoardState,
            Command::RequestBoardIdentity => CommandKind::RequestBoardIdentity,
            Command::ZeroYaw => CommandKind::ZeroYaw,
            Command::ZeroDisplacement => CommandKind::ZeroDisplacement,
            Command::SetFeedOverflow(_) => CommandKind::SetFeedOverflow,
        }
    }

    /// The literal argument appended to the token, if any.
    pub fn argument(&self) -> Option<&'static str> {
        match self {
            Command::SetDataKind(kind) => Some(kind.token()),
            Command::SetFeedOverflow(policy) => Some(policy.token()),
            _ => None,
        }
    }

    /// Wire form without the line terminator.
    pub fn to_line(&self) -> String {
        let token = self.kind().token();
        match self.argument() {
            Some(arg) => format!("{token}{arg}"),
            None => token.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().token())?;
        if let Some(arg) = self.argument() {
            f.write_str(arg)?;
        }
        Ok(())
    }
}

impl FromStr for Command {
    type Err = NavxError;

    /// Parse a command line as a board receives it.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (kind, arg) = CommandKind::ALL
            .iter()
            .find_map(|k| line.strip_prefix(k.token()).map(|rest| (*k, rest)))
            .ok_or_else(|| NavxError::UnknownVariant {
                type_name: "Command",
                value: line.to_string(),
            })?;

        let no_arg = |cmd: Command| {
            if arg.is_empty() {
                Ok(cmd)
            } else {
                Err(NavxError::ProtocolViolation("unexpected command argument"))
            }
        };

        match kind {
            CommandKind::SetDataKind => Ok(Command::SetDataKind(DataKind::try_from(arg)?)),
            CommandKind::SetFeedOverflow => {
                Ok(Command::SetFeedOverflow(FeedOverflowPolicy::try_from(arg)?))
            }
            CommandKind::RequestHealth => no_arg(Command::RequestHealth),
            CommandKind::RequestBoardState => no_arg(Command::RequestBoardState),
            CommandKind::RequestBoardIdentity => no_arg(Command::RequestBoardIdentity),
            CommandKind::ZeroYaw => no_arg(Command::ZeroYaw),
            CommandKind::ZeroDisplacement => no_arg(Command::ZeroDisplacement),
        }
    }
}
