use super::{Migration, Migrator};
use crate::prelude::*;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
)";

const V1_USERS_GAMES_FRIENDS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS games (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        board_rows INTEGER,
        board_cols INTEGER,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS friends (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        friend_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, friend_id),
        CHECK (user_id <> friend_id)
    )",
];

const V2_SCORES_ACHIEVEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS game_best_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        score INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (user_id, game_id)
    )",
    "CREATE TABLE IF NOT EXISTS achievements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        game_id INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT,
        condition_type TEXT NOT NULL DEFAULT 'score',
        condition_value INTEGER,
        UNIQUE (game_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS user_achievements (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
        achieved_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, achievement_id)
    )",
];

const V3_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_best_scores_leaderboard
        ON game_best_scores (game_id, score DESC)",
    "CREATE INDEX IF NOT EXISTS idx_achievements_game_condition
        ON achievements (game_id, condition_type)",
];

/// A migration made of plain SQL statements run in one transaction.
struct SqliteMigration {
    pool: SqlitePool,
    version: u32,
    description: &'static str,
    statements: &'static [&'static str],
}

#[async_trait]
impl Migration for SqliteMigration {
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

pub struct SqliteMigrator {
    pool: SqlitePool,
}

impl SqliteMigrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn migration(
        &self,
        version: u32,
        description: &'static str,
        statements: &'static [&'static str],
    ) -> Box<dyn Migration> {
        Box::new(SqliteMigration {
            pool: self.pool.clone(),
            version,
            description,
            statements,
        })
    }
}

#[async_trait]
impl Migrator for SqliteMigrator {
    async fn stored_version(&self) -> Result<u32> {
        sqlx::query(CREATE_VERSION_TABLE).execute(&self.pool).await?;

        let row = sqlx::query("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version")?;
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
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(i64::from(version))
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_database_migrates_to_latest() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = format!("sqlite://{}", temp_file.path().display());
        let pool = SqlitePool::connect(&db_path).await.unwrap();

        let migrator = SqliteMigrator::new(pool.clone());
        assert_eq!(migrator.stored_version().await.unwrap(), 0);

        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.stored_version().await.unwrap(), 3);

        let tables = table_names(&pool).await;
        for expected in [
            "achievements",
            "friends",
            "game_best_scores",
            "games",
            "schema_version",
            "user_achievements",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn migrating_twice_is_harmless() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = format!("sqlite://{}", temp_file.path().display());
        let pool = SqlitePool::connect(&db_path).await.unwrap();

        let migrator = SqliteMigrator::new(pool.clone());
        migrator.migrate_to_latest().await.unwrap();
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.stored_version().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn partial_schema_resumes_from_stored_version() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = format!("sqlite://{}", temp_file.path().display());
        let pool = SqlitePool::connect(&db_path).await.unwrap();

        let migrator = SqliteMigrator::new(pool.clone());
        migrator.migrations()[0].apply().await.unwrap();
        migrator.record_version(1).await.unwrap();

        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.stored_version().await.unwrap(), 3);
        assert!(table_names(&pool).await.iter().any(|t| t == "user_achievements"));
    }
}
