#![allow(dead_code)]

use gamenest::models::{Achievement, Game, NewAchievement, NewGame, Role, User};
use gamenest::store::{Store, sqlite::SqliteStore};

/// In-memory store with the schema migrated.
pub async fn memory_store() -> SqliteStore {
    SqliteStore::new("sqlite::memory:").await.expect("init")
}

pub const LADDER: [(&str, i64); 5] = [
    ("Novice", 200),
    ("Skilled", 500),
    ("Expert", 1000),
    ("Master", 2000),
    ("Legend", 5000),
];

/// A game with score achievements at 200/500/1000/2000/5000.
pub async fn ladder_game(store: &dyn Store, code: &str) -> (Game, Vec<Achievement>) {
    let game = store
        .add_game(&NewGame::new(code, code.to_uppercase()))
        .await
        .unwrap();
    let mut achievements = Vec::new();
    for (name, threshold) in LADDER {
        achievements.push(
            store
                .add_achievement(&NewAchievement::score(game.id, name, threshold))
                .await
                .unwrap(),
        );
    }
    (game, achievements)
}

pub async fn player(store: &dyn Store, name: &str) -> User {
    store.create_user(name, "secret", Role::User).await.unwrap()
}

/// Names of the achievements a user holds, in grant order.
pub async fn granted_names(store: &dyn Store, user_id: i64) -> Vec<String> {
    store
        .user_achievements(user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.achievement_name)
        .collect()
}
