use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type ActorId = i64;
pub type ResourceId = i64;
pub type ClaimId = i64;
pub type LabId = i64;

/// Lab partition used by simulated claims. Reset purges only this lab.
pub const TEST_LAB_ID: LabId = 1;

/// Isolation strength requested for a claim transaction.
///
/// Spelled `weak` / `repeatable` / `strict` in config, with the SQL names
/// (`read-committed`, `repeatable-read`, `serializable`) accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    #[serde(alias = "read-committed")]
    Weak,
    #[serde(alias = "repeatable-read")]
    Repeatable,
    #[serde(alias = "serializable")]
    Strict,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 3] = [
        IsolationLevel::Weak,
        IsolationLevel::Repeatable,
        IsolationLevel::Strict,
    ];

    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::Weak => "READ COMMITTED",
            IsolationLevel::Repeatable => "REPEATABLE READ",
            IsolationLevel::Strict => "SERIALIZABLE",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IsolationLevel::Weak => "weak",
            IsolationLevel::Repeatable => "repeatable",
            IsolationLevel::Strict => "strict",
        }
    }

    pub fn is_strict(self) -> bool {
        matches!(self, IsolationLevel::Strict)
    }

    /// Weak statements read the latest committed state; the other two levels
    /// read from the snapshot taken when the transaction began.
    pub fn uses_snapshot(self) -> bool {
        !matches!(self, IsolationLevel::Weak)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "weak" | "read-committed" => Ok(IsolationLevel::Weak),
            "repeatable" | "repeatable-read" => Ok(IsolationLevel::Repeatable),
            "strict" | "serializable" => Ok(IsolationLevel::Strict),
            _ => Err(format!(
                "unknown isolation level '{raw}': expected weak, repeatable or strict"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub code: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl ClaimStatus {
    pub fn code(self) -> i32 {
        match self {
            ClaimStatus::Pending => 1,
            ClaimStatus::Confirmed => 2,
            ClaimStatus::Active => 3,
            ClaimStatus::Completed => 4,
            ClaimStatus::Cancelled => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ClaimStatus::Pending),
            2 => Some(ClaimStatus::Confirmed),
            3 => Some(ClaimStatus::Active),
            4 => Some(ClaimStatus::Completed),
            5 => Some(ClaimStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(
            self,
            ClaimStatus::Pending | ClaimStatus::Confirmed | ClaimStatus::Active
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub id: ClaimId,
    pub actor_id: ActorId,
    pub resource_id: ResourceId,
    pub lab_id: LabId,
    pub status: ClaimStatus,
    pub requested_at: OffsetDateTime,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
}

impl ClaimRecord {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.status.is_open() && self.ends_at > now
    }
}
