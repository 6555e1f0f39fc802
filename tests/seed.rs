mod common;

use common::memory_store;
use gamenest::config::{AchievementSeed, Config};
use gamenest::seed::{SeedReport, seed_catalog};
use gamenest::store::Store;

#[tokio::test]
async fn seeding_creates_catalog() {
    let store = memory_store().await;
    let games = Config::default_catalog(&[("tetris", "Tetris"), ("snake", "Snake")]);

    let report = seed_catalog(&store, &games).await.unwrap();
    assert_eq!(
        report,
        SeedReport {
            games_created: 2,
            achievements_created: 10
        }
    );

    let tetris = store.get_game("tetris").await.unwrap().expect("tetris");
    let names: Vec<_> = store
        .list_achievements(tetris.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["Novice", "Skilled", "Expert", "Master", "Legend"]);
}

#[tokio::test]
async fn seeding_twice_changes_nothing() {
    let store = memory_store().await;
    let games = Config::default_catalog(&[("tetris", "Tetris")]);
    seed_catalog(&store, &games).await.unwrap();

    let again = seed_catalog(&store, &games).await.unwrap();
    assert_eq!(again, SeedReport::default());

    let tetris = store.get_game("tetris").await.unwrap().unwrap();
    assert_eq!(store.list_achievements(tetris.id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn seeding_adds_only_new_achievements() {
    let store = memory_store().await;
    let mut games = Config::default_catalog(&[("tetris", "Tetris")]);
    seed_catalog(&store, &games).await.unwrap();

    games[0].achievements.push(AchievementSeed {
        name: "Mythic".into(),
        description: None,
        condition_type: "score".into(),
        condition_value: Some(10_000),
    });
    let report = seed_catalog(&store, &games).await.unwrap();
    assert_eq!(report.games_created, 0);
    assert_eq!(report.achievements_created, 1);
}
