//! Plain data types shared by the store backends and the rule evaluator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(StoreError::Invalid(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Game {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub board_rows: Option<i64>,
    pub board_cols: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewGame {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub board_rows: Option<i64>,
    #[serde(default)]
    pub board_cols: Option<i64>,
}

impl NewGame {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            board_rows: None,
            board_cols: None,
        }
    }

    #[must_use]
    pub fn with_board(mut self, rows: i64, cols: i64) -> Self {
        self.board_rows = Some(rows);
        self.board_cols = Some(cols);
        self
    }
}

/// Achievement definition as stored. `condition_type` is kept as raw text so
/// that malformed rows reach the evaluator and fail there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Achievement {
    pub id: i64,
    pub game_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub condition_type: String,
    pub condition_value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAchievement {
    pub game_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub condition_type: String,
    pub condition_value: Option<i64>,
}

impl NewAchievement {
    /// Score achievement unlocked at `threshold`.
    pub fn score(game_id: i64, name: impl Into<String>, threshold: i64) -> Self {
        Self {
            game_id,
            name: name.into(),
            description: None,
            condition_type: "score".into(),
            condition_value: Some(threshold),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BestScore {
    pub user_id: i64,
    pub game_id: i64,
    pub score: i64,
    pub updated_at: i64,
}

/// A user's unlocked achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub user_id: i64,
    pub achievement_id: i64,
    pub achievement_name: String,
    pub game_code: String,
    pub achieved_at: i64,
}

/// Result of a score submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub best_score: i64,
    pub improved: bool,
    /// Grants inserted by this submission only.
    pub granted: Vec<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: i64,
    pub username: String,
    pub score: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub games_played: i64,
    pub achievements_unlocked: i64,
    pub total_best_score: i64,
}
