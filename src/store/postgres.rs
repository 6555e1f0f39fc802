use super::{
    GameStream, Store,
    common::{
        grant_for, hash_password, missing_reference, now, rank_entries, validate_achievement,
        validate_game, validate_score, validate_username, verify_password,
    },
};
use crate::error::StoreError;
use crate::migrations::{Migrator, postgres::PostgresMigrator};
use crate::models::{
    Achievement, BestScore, Game, Grant, LeaderboardEntry, NewAchievement, NewGame, Role,
    ScoreOutcome, User, UserSummary,
};
use crate::rules::{Progress, RuleSet};
use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use sqlx::{
    PgConnection, PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

const UPSERT_BEST_SCORE: &str = "INSERT INTO game_best_scores (user_id, game_id, score, updated_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (user_id, game_id) DO UPDATE
        SET score = EXCLUDED.score, updated_at = EXCLUDED.updated_at
        WHERE EXCLUDED.score > game_best_scores.score";

const SELECT_ACHIEVEMENTS: &str = "SELECT id, game_id, name, description, condition_type, condition_value
    FROM achievements WHERE game_id = $1 ORDER BY id";

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        role: role.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn game_from_row(row: &PgRow) -> Result<Game, sqlx::Error> {
    Ok(Game {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        board_rows: row.try_get("board_rows")?,
        board_cols: row.try_get("board_cols")?,
    })
}

fn achievement_from_row(row: &PgRow) -> Result<Achievement, sqlx::Error> {
    Ok(Achievement {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        condition_type: row.try_get("condition_type")?,
        condition_value: row.try_get("condition_value")?,
    })
}

/// Postgres aborts a transaction on any failed statement, so duplicate
/// grants are skipped with `ON CONFLICT DO NOTHING` rather than by catching
/// the unique violation.
async fn grant_qualifying(
    conn: &mut PgConnection,
    rules: &RuleSet,
    user_id: i64,
    game_id: i64,
    best_score: i64,
    at: i64,
) -> Result<Vec<Grant>, StoreError> {
    let game_code: String = sqlx::query_scalar("SELECT code FROM games WHERE id = $1")
        .bind(game_id)
        .fetch_one(&mut *conn)
        .await?;

    let achievements = sqlx::query(SELECT_ACHIEVEMENTS)
        .bind(game_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(achievement_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let granted: HashSet<i64> = sqlx::query_scalar(
        "SELECT ua.achievement_id FROM user_achievements ua \
         JOIN achievements a ON a.id = ua.achievement_id \
         WHERE ua.user_id = $1 AND a.game_id = $2",
    )
    .bind(user_id)
    .bind(game_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    let due = rules.evaluate(
        &Progress::from_best_score(best_score),
        &achievements,
        &granted,
    )?;

    let mut grants = Vec::with_capacity(due.len());
    for id in due {
        let Some(achievement) = achievements.iter().find(|a| a.id == id) else {
            continue;
        };
        let inserted = sqlx::query(
            "INSERT INTO user_achievements (user_id, achievement_id, achieved_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, achievement_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(id)
        .bind(at)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if inserted == 0 {
            debug!(user_id, achievement = %achievement.name, "achievement already granted");
            continue;
        }
        debug!(user_id, achievement = %achievement.name, "achievement granted");
        grants.push(grant_for(user_id, achievement, &game_code, at));
    }
    Ok(grants)
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    rules: Arc<RuleSet>,
}

impl PostgresStore {
    /// Open a Postgres store with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection or schema migration fails.
    pub async fn new(uri: &str) -> Result<Self, StoreError> {
        Self::connect(uri, 5).await
    }

    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        PostgresMigrator::new(pool.clone())
            .migrate_to_latest()
            .await?;
        Ok(Self {
            pool,
            rules: Arc::new(RuleSet::default()),
        })
    }

    #[must_use]
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[tracing::instrument(skip(self, password))]
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<User, StoreError> {
        validate_username(username)?;
        let hash = hash_password(password)?;
        let created_at = now();
        let result = sqlx::query_scalar(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(username)
        .bind(hash)
        .bind(role.as_str())
        .bind(created_at)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(id) => Ok(User {
                id,
                username: username.to_string(),
                role,
                created_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::UserExists(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        sqlx::query("SELECT id, username, role, created_at FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    #[tracing::instrument(skip(self, password))]
    async fn verify_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        if let Some(row) = sqlx::query("SELECT password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
        {
            let stored: String = row.try_get(0)?;
            verify_password(password, &stored)
        } else {
            Ok(false)
        }
    }

    #[tracing::instrument(skip(self))]
    async fn set_role(&self, username: &str, role: Role) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE users SET role = $1 WHERE username = $2")
            .bind(role.as_str())
            .bind(username)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        info!(username, "user deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn add_friend(&self, user_id: i64, friend_id: i64) -> Result<(), StoreError> {
        if user_id == friend_id {
            return Err(StoreError::Invalid("users cannot befriend themselves".into()));
        }
        let at = now();
        let mut tx = self.pool.begin().await?;
        for (a, b) in [(user_id, friend_id), (friend_id, user_id)] {
            sqlx::query(
                "INSERT INTO friends (user_id, friend_id, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id, friend_id) DO NOTHING",
            )
            .bind(a)
            .bind(b)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| missing_reference(e, a, b))?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM friends WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_friends(&self, user_id: i64) -> Result<Vec<User>, StoreError> {
        sqlx::query(
            "SELECT u.id, u.username, u.role, u.created_at FROM friends f \
             JOIN users u ON u.id = f.friend_id \
             WHERE f.user_id = $1 ORDER BY u.username",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(user_from_row)
        .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn add_game(&self, game: &NewGame) -> Result<Game, StoreError> {
        validate_game(game)?;
        let result = sqlx::query_scalar(
            "INSERT INTO games (code, name, board_rows, board_cols, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&game.code)
        .bind(&game.name)
        .bind(game.board_rows)
        .bind(game.board_cols)
        .bind(now())
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(id) => Ok(Game {
                id,
                code: game.code.clone(),
                name: game.name.clone(),
                board_rows: game.board_rows,
                board_cols: game.board_cols,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Invalid(format!("game code '{}' already exists", game.code)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_game(&self, code: &str) -> Result<Option<Game>, StoreError> {
        let row = sqlx::query(
            "SELECT id, code, name, board_rows, board_cols FROM games WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(game_from_row).transpose()?)
    }

    fn list_games(&self) -> GameStream<'_> {
        let pool = self.pool.clone();
        Box::pin(stream! {
            let mut rows = sqlx::query(
                "SELECT id, code, name, board_rows, board_cols FROM games ORDER BY code",
            )
            .fetch(&pool);

            while let Some(row) = rows.next().await {
                match row.and_then(|r| game_from_row(&r)) {
                    Ok(game) => yield Ok(game),
                    Err(e) => yield Err(StoreError::from(e)),
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn add_achievement(
        &self,
        achievement: &NewAchievement,
    ) -> Result<Achievement, StoreError> {
        validate_achievement(achievement)?;
        let result = sqlx::query_scalar(
            "INSERT INTO achievements (game_id, name, description, condition_type, condition_value) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(achievement.game_id)
        .bind(&achievement.name)
        .bind(&achievement.description)
        .bind(&achievement.condition_type)
        .bind(achievement.condition_value)
        .fetch_one(&self.pool)
        .await;
        match result {
            Ok(id) => Ok(Achievement {
                id,
                game_id: achievement.game_id,
                name: achievement.name.clone(),
                description: achievement.description.clone(),
                condition_type: achievement.condition_type.clone(),
                condition_value: achievement.condition_value,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Invalid(format!(
                    "achievement '{}' already exists for game {}",
                    achievement.name, achievement.game_id
                )))
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::GameNotFound(achievement.game_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_achievements(&self, game_id: i64) -> Result<Vec<Achievement>, StoreError> {
        Ok(sqlx::query(SELECT_ACHIEVEMENTS)
            .bind(game_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(achievement_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[tracing::instrument(skip(self))]
    async fn submit_score(
        &self,
        user_id: i64,
        game_id: i64,
        score: i64,
    ) -> Result<ScoreOutcome, StoreError> {
        validate_score(score)?;
        let at = now();
        let mut tx = self.pool.begin().await?;

        // Concurrent writers for the same (user, game) serialize on the
        // conflicting row; the loser sees the winner's score in the WHERE.
        let improved = sqlx::query(UPSERT_BEST_SCORE)
            .bind(user_id)
            .bind(game_id)
            .bind(score)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| missing_reference(e, user_id, game_id))?
            .rows_affected()
            > 0;

        let best_score: i64 = sqlx::query_scalar(
            "SELECT score FROM game_best_scores WHERE user_id = $1 AND game_id = $2",
        )
        .bind(user_id)
        .bind(game_id)
        .fetch_one(&mut *tx)
        .await?;

        let granted = if improved {
            grant_qualifying(&mut tx, &self.rules, user_id, game_id, best_score, at).await?
        } else {
            Vec::new()
        };
        tx.commit().await?;

        if !granted.is_empty() {
            info!(user_id, game_id, best_score, count = granted.len(), "achievements unlocked");
        }
        Ok(ScoreOutcome {
            best_score,
            improved,
            granted,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn best_score(
        &self,
        user_id: i64,
        game_id: i64,
    ) -> Result<Option<BestScore>, StoreError> {
        let row = sqlx::query(
            "SELECT score, updated_at FROM game_best_scores WHERE user_id = $1 AND game_id = $2",
        )
        .bind(user_id)
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(BestScore {
                user_id,
                game_id,
                score: row.try_get("score")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn reevaluate(&self, user_id: i64, game_id: i64) -> Result<Vec<Grant>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let best_score: Option<i64> = sqlx::query_scalar(
            "SELECT score FROM game_best_scores WHERE user_id = $1 AND game_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(game_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(best_score) = best_score else {
            return Ok(Vec::new());
        };

        let granted =
            grant_qualifying(&mut tx, &self.rules, user_id, game_id, best_score, now()).await?;
        tx.commit().await?;
        Ok(granted)
    }

    #[tracing::instrument(skip(self))]
    async fn leaderboard(
        &self,
        game_id: i64,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.user_id, u.username, s.score, s.updated_at FROM game_best_scores s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.game_id = $1 \
             ORDER BY s.score DESC, s.updated_at ASC, u.username ASC \
             LIMIT $2",
        )
        .bind(game_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let rows = rows
            .iter()
            .map(|r| {
                Ok((
                    r.try_get("user_id")?,
                    r.try_get("username")?,
                    r.try_get("score")?,
                    r.try_get("updated_at")?,
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(rank_entries(rows))
    }

    #[tracing::instrument(skip(self))]
    async fn user_achievements(&self, user_id: i64) -> Result<Vec<Grant>, StoreError> {
        let rows = sqlx::query(
            "SELECT ua.achievement_id, a.name, g.code, ua.achieved_at \
             FROM user_achievements ua \
             JOIN achievements a ON a.id = ua.achievement_id \
             JOIN games g ON g.id = a.game_id \
             WHERE ua.user_id = $1 \
             ORDER BY ua.achieved_at, ua.achievement_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                Ok(Grant {
                    user_id,
                    achievement_id: r.try_get("achievement_id")?,
                    achievement_name: r.try_get("name")?,
                    game_code: r.try_get("code")?,
                    achieved_at: r.try_get("achieved_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    #[tracing::instrument(skip(self))]
    async fn user_summary(&self, user_id: i64) -> Result<UserSummary, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }

        let row = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM game_best_scores WHERE user_id = $1) AS games_played, \
                (SELECT COUNT(*) FROM user_achievements WHERE user_id = $1) AS achievements_unlocked",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        // totals past i64::MAX saturate
        let scores: Vec<i64> =
            sqlx::query_scalar("SELECT score FROM game_best_scores WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(UserSummary {
            games_played: row.try_get("games_played")?,
            achievements_unlocked: row.try_get("achievements_unlocked")?,
            total_best_score: scores.into_iter().fold(0i64, i64::saturating_add),
        })
    }
}
