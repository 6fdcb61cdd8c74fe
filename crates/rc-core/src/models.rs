//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Chat.
//! Timestamps are serialized as epoch milliseconds and keys as camelCase so
//! snapshot files stay readable by older deployments.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Identifies one live client connection. Never shown to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a connection sits in the pairing lifecycle.
///
/// There is no stored `Ended` state: a disconnected connection is removed
/// from the registry outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unpaired,
    Waiting,
    Paired,
}

/// Current moderation status of an IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanctionStatus {
    None,
    Mute,
    Ban,
}

/// The three sanction classes an admin can issue.
///
/// Each class maps to a fixed status and duration; see [`BanType::status`]
/// and [`BanType::duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanType {
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "forever")]
    Forever,
}

impl BanType {
    pub fn status(self) -> SanctionStatus {
        match self {
            Self::FifteenMinutes => SanctionStatus::Mute,
            Self::ThreeDays | Self::Forever => SanctionStatus::Ban,
        }
    }

    /// `None` means the sanction never expires.
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::FifteenMinutes => Some(Duration::minutes(15)),
            Self::ThreeDays => Some(Duration::days(3)),
            Self::Forever => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FifteenMinutes => "15m",
            Self::ThreeDays => "3d",
            Self::Forever => "forever",
        }
    }
}

impl fmt::Display for BanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BanType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "15m" => Ok(Self::FifteenMinutes),
            "3d" => Ok(Self::ThreeDays),
            "forever" => Ok(Self::Forever),
            other => Err(AppError::ValidationError(format!(
                "unknown sanction type '{other}' (expected 15m, 3d or forever)"
            ))),
        }
    }
}

/// One past application of a sanction, kept in the record's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub ban_type: BanType,
    /// Expiry computed when this event was applied.
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub until: Option<DateTime<Utc>>,
}

/// Moderation record keyed by IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sanction {
    pub ip: String,
    pub status: SanctionStatus,
    pub ban_type: BanType,
    /// Absolute wall-clock expiry. `None` only for `forever`.
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<SanctionEvent>,
}

impl Sanction {
    /// `forever` is always active; everything else until `expires_at`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.ban_type == BanType::Forever {
            return true;
        }
        self.expires_at.is_some_and(|expiry| now < expiry)
    }

    pub fn blocks_sending_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active_at(now)
            && matches!(self.status, SanctionStatus::Mute | SanctionStatus::Ban)
    }

    pub fn blocks_connecting_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active_at(now) && self.status == SanctionStatus::Ban
    }
}

/// Public self-status answer for `GET /api/sanction/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanctionView {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SanctionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_type: Option<BanType>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SanctionView {
    pub fn inactive() -> Self {
        Self {
            active: false,
            status: None,
            ban_type: None,
            expires_at: None,
        }
    }

    pub fn active(sanction: &Sanction) -> Self {
        Self {
            active: true,
            status: Some(sanction.status),
            ban_type: Some(sanction.ban_type),
            expires_at: sanction.expires_at,
        }
    }
}

/// Immutable abuse report.
///
/// `id`, `createdAt` and `ip` are stamped by the server; every other
/// caller-supplied field (reason, comment, excerpts) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ip: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Durable form of {Reports, Sanctions}.
///
/// Records are shared with the live stores, so taking a snapshot copies
/// pointers rather than report bodies and sanction histories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub reports: Vec<Arc<Report>>,
    #[serde(default)]
    pub sanctions: Vec<Arc<Sanction>>,
}
