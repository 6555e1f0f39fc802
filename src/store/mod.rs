use crate::error::StoreError;
use crate::models::{
    Achievement, BestScore, Game, Grant, LeaderboardEntry, NewAchievement, NewGame, Role,
    ScoreOutcome, User, UserSummary,
};
use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub type GameStream<'a> = Pin<Box<dyn Stream<Item = Result<Game, StoreError>> + Send + 'a>>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Register a user with an argon2-hashed password.
    async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<User, StoreError>;

    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Check a password. Unknown users verify as `false`.
    async fn verify_user(&self, username: &str, password: &str) -> Result<bool, StoreError>;

    async fn set_role(&self, username: &str, role: Role) -> Result<(), StoreError>;

    /// Delete a user together with their friendships, scores and grants.
    async fn delete_user(&self, username: &str) -> Result<(), StoreError>;

    /// Make two users friends. Adding an existing friendship is a no-op.
    async fn add_friend(&self, user_id: i64, friend_id: i64) -> Result<(), StoreError>;

    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> Result<(), StoreError>;

    /// Friends of `user_id` ordered by username
    async fn list_friends(&self, user_id: i64) -> Result<Vec<User>, StoreError>;

    async fn add_game(&self, game: &NewGame) -> Result<Game, StoreError>;

    async fn get_game(&self, code: &str) -> Result<Option<Game>, StoreError>;

    /// All games ordered by code
    fn list_games(&self) -> GameStream<'_>;

    /// Add an achievement definition. The condition type must be known; the
    /// threshold may be absent for condition types nothing evaluates yet.
    async fn add_achievement(
        &self,
        achievement: &NewAchievement,
    ) -> Result<Achievement, StoreError>;

    async fn list_achievements(&self, game_id: i64) -> Result<Vec<Achievement>, StoreError>;

    /// Record a played score.
    ///
    /// The stored best only ever grows. When it changes, achievements are
    /// evaluated and granted in the same transaction; an evaluation failure
    /// rolls back the score write too.
    async fn submit_score(
        &self,
        user_id: i64,
        game_id: i64,
        score: i64,
    ) -> Result<ScoreOutcome, StoreError>;

    async fn best_score(&self, user_id: i64, game_id: i64)
    -> Result<Option<BestScore>, StoreError>;

    /// Re-run achievement evaluation against the current best score and
    /// return the grants it added.
    async fn reevaluate(&self, user_id: i64, game_id: i64) -> Result<Vec<Grant>, StoreError>;

    /// Top `limit` best scores for a game.
    async fn leaderboard(
        &self,
        game_id: i64,
        limit: u32,
    ) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Every grant held by a user, oldest first
    async fn user_achievements(&self, user_id: i64) -> Result<Vec<Grant>, StoreError>;

    async fn user_summary(&self, user_id: i64) -> Result<UserSummary, StoreError>;
}

pub type DynStore = Arc<dyn Store>;

pub mod common;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

/// Create a store backend from a connection URI and migrate it.
pub async fn open(uri: &str, max_connections: u32) -> Result<DynStore, StoreError> {
    if uri.starts_with("sqlite:") {
        Ok(Arc::new(
            sqlite::SqliteStore::connect(uri, max_connections).await?,
        ))
    } else if uri.starts_with("postgres:") || uri.starts_with("postgresql:") {
        #[cfg(feature = "postgres")]
        {
            Ok(Arc::new(
                postgres::PostgresStore::connect(uri, max_connections).await?,
            ))
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(StoreError::UnknownBackend(
                "postgres backend not enabled".into(),
            ))
        }
    } else {
        // only the scheme, the rest may carry credentials
        let scheme = uri.split(':').next().unwrap_or_default();
        Err(StoreError::UnknownBackend(scheme.to_string()))
    }
}
