//! Helpers shared between the store backends.

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::StoreError;
use crate::models::{Achievement, Grant, LeaderboardEntry, NewAchievement, NewGame};
use crate::rules::ConditionType;

/// Current time as Unix seconds, the unit every timestamp column uses.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::PasswordHash(e.to_string()))
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, StoreError> {
    let parsed = PasswordHash::new(stored).map_err(|e| StoreError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn validate_username(username: &str) -> Result<(), StoreError> {
    if username.is_empty() || username.len() > 64 {
        return Err(StoreError::Invalid(
            "username must be 1 to 64 characters".into(),
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(StoreError::Invalid(
            "username must not contain whitespace".into(),
        ));
    }
    Ok(())
}

pub fn validate_game(game: &NewGame) -> Result<(), StoreError> {
    if game.code.trim().is_empty() {
        return Err(StoreError::Invalid("game code must not be empty".into()));
    }
    if game.name.trim().is_empty() {
        return Err(StoreError::Invalid("game name must not be empty".into()));
    }
    for dim in [game.board_rows, game.board_cols].into_iter().flatten() {
        if dim <= 0 {
            return Err(StoreError::Invalid(format!(
                "board dimension {dim} must be positive"
            )));
        }
    }
    Ok(())
}

pub fn validate_achievement(achievement: &NewAchievement) -> Result<(), StoreError> {
    if achievement.name.trim().is_empty() {
        return Err(StoreError::Invalid(
            "achievement name must not be empty".into(),
        ));
    }
    achievement.condition_type.parse::<ConditionType>()?;
    Ok(())
}

pub fn validate_score(score: i64) -> Result<(), StoreError> {
    if score < 0 {
        return Err(StoreError::InvalidScore(score));
    }
    Ok(())
}

/// Map a foreign-key failure on a score write to a readable error.
pub fn missing_reference(err: sqlx::Error, user_id: i64, game_id: i64) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::Invalid(
            format!("unknown user {user_id} or game {game_id}"),
        ),
        _ => StoreError::Database(err),
    }
}

/// Rank `(user_id, username, score, updated_at)` rows already sorted best
/// first. Equal scores share a rank.
pub fn rank_entries(rows: Vec<(i64, String, i64, i64)>) -> Vec<LeaderboardEntry> {
    let mut entries = Vec::with_capacity(rows.len());
    let mut rank = 0;
    let mut previous = None;
    for (position, (user_id, username, score, updated_at)) in rows.into_iter().enumerate() {
        if previous != Some(score) {
            rank = u32::try_from(position + 1).unwrap_or(u32::MAX);
            previous = Some(score);
        }
        entries.push(LeaderboardEntry {
            rank,
            user_id,
            username,
            score,
            updated_at,
        });
    }
    entries
}

pub fn grant_for(user_id: i64, achievement: &Achievement, game_code: &str, at: i64) -> Grant {
    Grant {
        user_id,
        achievement_id: achievement.id,
        achievement_name: achievement.name.clone(),
        game_code: game_code.to_string(),
        achieved_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn rejects_bad_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("two words").is_err());
        assert!(validate_username(&"x".repeat(65)).is_err());
        assert!(validate_username("player_one").is_ok());
    }

    #[test]
    fn rejects_unknown_condition_types() {
        let mut achievement = NewAchievement::score(1, "Novice", 200);
        assert!(validate_achievement(&achievement).is_ok());
        achievement.condition_type = "streak".into();
        assert!(matches!(
            validate_achievement(&achievement),
            Err(StoreError::Rule(_))
        ));
    }

    #[test]
    fn equal_scores_share_a_rank() {
        let ranked = rank_entries(vec![
            (1, "ann".into(), 900, 10),
            (2, "bob".into(), 700, 11),
            (3, "cat".into(), 700, 12),
            (4, "dan".into(), 100, 13),
        ]);
        let ranks: Vec<u32> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }

    #[test]
    fn rejects_negative_scores_and_board_sizes() {
        assert!(matches!(validate_score(-5), Err(StoreError::InvalidScore(-5))));
        assert!(validate_score(0).is_ok());
        assert!(validate_game(&NewGame::new("go", "Go").with_board(0, 19)).is_err());
        assert!(validate_game(&NewGame::new("go", "Go").with_board(19, 19)).is_ok());
    }
}
