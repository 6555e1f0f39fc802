use super::{Migration, Migrator};
use crate::prelude::*;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
)";

const V1_USERS_GAMES_FRIENDS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS games (
        id BIGSERIAL PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        board_rows BIGINT,
        board_cols BIGINT,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS friends (
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        friend_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at BIGINT NOT NULL,
        PRIMARY KEY (user_id, friend_id),
        CHECK (user_id <> friend_id)
    )",
];

const V2_SCORES_ACHIEVEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS game_best_scores (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        game_id BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        score BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        UNIQUE (user_id, game_id)
    )",
    "CREATE TABLE IF NOT EXISTS achievements (
        id BIGSERIAL PRIMARY KEY,
        game_id BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT,
        condition_type TEXT NOT NULL DEFAULT 'score',
        condition_value BIGINT,
        UNIQUE (game_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS user_achievements (
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        achievement_id BIGINT NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
        achieved_at BIGINT NOT NULL,
        PRIMARY KEY (user_id, achievement_id)
    )",
];

const V3_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_best_scores_leaderboard
        ON game_best_scores (game_id, score DESC)",
    "CREATE INDEX IF NOT EXISTS idx_achievements_game_condition
        ON achievements (game_id, condition_type)",
];

struct PostgresMigration {
    pool: PgPool,
    version: u32,
    description: &'static str,
    statements: &'static [&'static str],
}

#[async_trait]
impl Migration for PostgresMigration {
    fn target_version(&self) -> u32 {
        self.version
    }

    fn description(&self) -> &str {
        self.description
    }

    async fn apply(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in self.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

pub struct PostgresMigrator {
    pool: PgPool,
}

impl PostgresMigrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn migration(
        &self,
        version: u32,
        description: &'static str,
        statements: &'static [&'static str],
    ) -> Box<dyn Migration> {
        Box::new(PostgresMigration {
            pool: self.pool.clone(),
            version,
            description,
            statements,
        })
    }
}

#[async_trait]
impl Migrator for PostgresMigrator {
    async fn stored_version(&self) -> Result<u32> {
        sqlx::query(CREATE_VERSION_TABLE).execute(&self.pool).await?;

        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let version: i32 = row.try_get("version")?;
                Ok(u32::try_from(version)?)
            }
            None => Ok(0),
        }
    }

    async fn record_version(&self, version: u32) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_VERSION_TABLE).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(i32::try_from(version)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn migrations(&self) -> Vec<Box<dyn Migration>> {
        vec![
            self.migration(1, "Users, games and friends", V1_USERS_GAMES_FRIENDS),
            self.migration(
                2,
                "Best scores, achievements and achievement grants",
                V2_SCORES_ACHIEVEMENTS,
            ),
            self.migration(3, "Leaderboard and achievement lookup indexes", V3_INDEXES),
        ]
    }
}
