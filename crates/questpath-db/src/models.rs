use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for GoalStatus {
    type Err = GoalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(GoalStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GoalStatus`] string.
#[derive(Debug, Clone)]
pub struct GoalStatusParseError(pub String);

impl fmt::Display for GoalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid goal status: {:?}", self.0)
    }
}

impl std::error::Error for GoalStatusParseError {}

// ---------------------------------------------------------------------------

/// Difficulty rating assigned to a goal by the plan producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

impl FromStr for Difficulty {
    type Err = DifficultyParseError;

    /// Case-insensitive: producers are not consistent about capitalisation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            _ => Err(DifficultyParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Difficulty`] string.
#[derive(Debug, Clone)]
pub struct DifficultyParseError(pub String);

impl fmt::Display for DifficultyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid difficulty: {:?}", self.0)
    }
}

impl std::error::Error for DifficultyParseError {}

// ---------------------------------------------------------------------------

/// Lock status of a stage within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Locked,
    Unlocked,
    Completed,
}

impl StageStatus {
    /// Status a freshly generated stage starts in: only the first stage is
    /// open.
    pub fn initial_for_order(order: i32) -> Self {
        if order == 1 {
            Self::Unlocked
        } else {
            Self::Locked
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for StageStatus {
    type Err = StageStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            "completed" => Ok(Self::Completed),
            other => Err(StageStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StageStatus`] string.
#[derive(Debug, Clone)]
pub struct StageStatusParseError(pub String);

impl fmt::Display for StageStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage status: {:?}", self.0)
    }
}

impl std::error::Error for StageStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A user, reduced to the fields the entitlement and billing code needs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_premium: bool,
    pub premium_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A goal -- the root of a generated plan hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Goal {
    pub id: Uuid,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty_level: Difficulty,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
}

/// The plan owned by a goal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One entry of a stage's topic checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub explanation: String,
}

/// An ordered stage of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stage {
    pub id: Uuid,
    pub plan_id: Uuid,
    #[sqlx(rename = "stage_order")]
    pub order: i32,
    pub title: String,
    pub description: String,
    pub topics: Json<Vec<Topic>>,
    pub xp_reward: i32,
    pub status: StageStatus,
    pub created_at: DateTime<Utc>,
}

/// An append-only domain event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DomainEvent {
    pub id: i64,
    pub event_type: String,
    pub user_id: Option<i64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
