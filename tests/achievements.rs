mod common;

use common::{granted_names, ladder_game, memory_store, player};
use gamenest::error::{RuleError, StoreError};
use gamenest::models::NewAchievement;
use gamenest::store::{Store, sqlite::SqliteStore};
use std::time::Duration;
use tempfile::NamedTempFile;

#[tokio::test]
async fn first_best_score_grants_reached_thresholds_only() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    let outcome = store.submit_score(user.id, game.id, 750).await.unwrap();
    assert!(outcome.improved);
    assert_eq!(outcome.best_score, 750);
    let names: Vec<_> = outcome
        .granted
        .iter()
        .map(|g| g.achievement_name.as_str())
        .collect();
    assert_eq!(names, vec!["Novice", "Skilled"]);
    assert!(outcome.granted.iter().all(|g| g.game_code == "tetris"));

    assert_eq!(granted_names(&store, user.id).await, vec!["Novice", "Skilled"]);
}

#[tokio::test]
async fn raising_best_score_adds_grants_and_keeps_old_ones() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    store.submit_score(user.id, game.id, 750).await.unwrap();
    let before = store.user_achievements(user.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let outcome = store.submit_score(user.id, game.id, 3000).await.unwrap();
    let names: Vec<_> = outcome
        .granted
        .iter()
        .map(|g| g.achievement_name.as_str())
        .collect();
    assert_eq!(names, vec!["Expert", "Master"]);

    let after = store.user_achievements(user.id).await.unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(&after[..2], &before[..]);
    assert!(after[2].achieved_at > before[0].achieved_at);
    assert!(!after.iter().any(|g| g.achievement_name == "Legend"));
}

#[tokio::test]
async fn one_jump_can_cross_several_thresholds() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "snake").await;
    let user = player(&store, "bob").await;

    store.submit_score(user.id, game.id, 150).await.unwrap();
    assert!(granted_names(&store, user.id).await.is_empty());

    let outcome = store.submit_score(user.id, game.id, 2500).await.unwrap();
    assert_eq!(outcome.granted.len(), 4);
    assert_eq!(
        granted_names(&store, user.id).await,
        vec!["Novice", "Skilled", "Expert", "Master"]
    );
}

#[tokio::test]
async fn resubmitting_the_same_score_changes_nothing() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    store.submit_score(user.id, game.id, 1200).await.unwrap();
    let before = store.user_achievements(user.id).await.unwrap();
    let best_before = store.best_score(user.id, game.id).await.unwrap().unwrap();

    let outcome = store.submit_score(user.id, game.id, 1200).await.unwrap();
    assert!(!outcome.improved);
    assert!(outcome.granted.is_empty());
    assert_eq!(store.user_achievements(user.id).await.unwrap(), before);
    assert_eq!(
        store.best_score(user.id, game.id).await.unwrap().unwrap(),
        best_before
    );
}

#[tokio::test]
async fn lower_scores_never_lower_the_best_or_revoke_grants() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    store.submit_score(user.id, game.id, 2100).await.unwrap();
    let outcome = store.submit_score(user.id, game.id, 40).await.unwrap();
    assert!(!outcome.improved);
    assert_eq!(outcome.best_score, 2100);
    assert_eq!(
        store.best_score(user.id, game.id).await.unwrap().unwrap().score,
        2100
    );
    assert_eq!(granted_names(&store, user.id).await.len(), 4);
}

#[tokio::test]
async fn final_grants_match_final_best_for_any_sequence() {
    let store = memory_store().await;
    let (game, achievements) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    for score in [10, 600, 300, 600, 1999, 0, 2000, 1500] {
        store.submit_score(user.id, game.id, score).await.unwrap();
    }

    let best = store.best_score(user.id, game.id).await.unwrap().unwrap().score;
    assert_eq!(best, 2000);
    let expected: Vec<_> = achievements
        .iter()
        .filter(|a| a.condition_value.unwrap() <= best)
        .map(|a| a.name.clone())
        .collect();
    let mut granted = granted_names(&store, user.id).await;
    granted.sort_by_key(|name| expected.iter().position(|e| e == name));
    assert_eq!(granted, expected);
}

#[tokio::test]
async fn grants_are_scoped_to_the_scored_game() {
    let store = memory_store().await;
    let (tetris, _) = ladder_game(&store, "tetris").await;
    let (snake, _) = ladder_game(&store, "snake").await;
    let user = player(&store, "ann").await;

    store.submit_score(user.id, tetris.id, 600).await.unwrap();
    let grants = store.user_achievements(user.id).await.unwrap();
    assert_eq!(grants.len(), 2);
    assert!(grants.iter().all(|g| g.game_code == "tetris"));

    let outcome = store.submit_score(user.id, snake.id, 250).await.unwrap();
    assert_eq!(outcome.granted.len(), 1);
    assert_eq!(outcome.granted[0].game_code, "snake");
}

#[tokio::test]
async fn missing_threshold_rolls_back_the_score_write() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;
    store.submit_score(user.id, game.id, 300).await.unwrap();

    let mut broken = NewAchievement::score(game.id, "Broken", 0);
    broken.condition_value = None;
    store.add_achievement(&broken).await.unwrap();

    let err = store.submit_score(user.id, game.id, 900).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Rule(RuleError::MissingThreshold { ref name, .. }) if name == "Broken"
    ));

    assert_eq!(
        store.best_score(user.id, game.id).await.unwrap().unwrap().score,
        300
    );
    assert_eq!(granted_names(&store, user.id).await, vec!["Novice"]);
}

#[tokio::test]
async fn unknown_condition_type_blocks_the_score_write() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    sqlx::query(
        "INSERT INTO achievements (game_id, name, condition_type, condition_value) \
         VALUES (?, 'Streaker', 'streak', 3)",
    )
    .bind(game.id)
    .execute(store.pool())
    .await
    .unwrap();

    let err = store.submit_score(user.id, game.id, 800).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Rule(RuleError::UnknownCondition(ref kind)) if kind == "streak"
    ));
    assert!(store.best_score(user.id, game.id).await.unwrap().is_none());
}

#[tokio::test]
async fn other_condition_types_are_not_evaluated() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    let mut wins = NewAchievement::score(game.id, "Ten Wins", 10);
    wins.condition_type = "win_count".into();
    store.add_achievement(&wins).await.unwrap();

    let outcome = store.submit_score(user.id, game.id, 100_000).await.unwrap();
    assert_eq!(outcome.granted.len(), 5);
    assert!(!granted_names(&store, user.id).await.contains(&"Ten Wins".to_string()));
}

#[tokio::test]
async fn reevaluate_picks_up_new_achievements_once() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;
    store.submit_score(user.id, game.id, 750).await.unwrap();

    store
        .add_achievement(&NewAchievement::score(game.id, "Bronze", 100))
        .await
        .unwrap();

    let outcome = store.submit_score(user.id, game.id, 700).await.unwrap();
    assert!(outcome.granted.is_empty());

    let granted = store.reevaluate(user.id, game.id).await.unwrap();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].achievement_name, "Bronze");
    assert!(store.reevaluate(user.id, game.id).await.unwrap().is_empty());
    assert_eq!(store.user_achievements(user.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn reevaluate_without_a_score_grants_nothing() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;
    assert!(store.reevaluate(user.id, game.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn negative_scores_are_rejected() {
    let store = memory_store().await;
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;
    let err = store.submit_score(user.id, game.id, -1).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidScore(-1)));
}

#[tokio::test]
async fn scores_for_unknown_games_are_rejected() {
    let store = memory_store().await;
    let user = player(&store, "ann").await;
    let err = store.submit_score(user.id, 999, 10).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_identical_writes_grant_once() {
    let temp_file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", temp_file.path().display());
    let store = SqliteStore::connect(&uri, 4).await.unwrap();
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    let (user_id, game_id) = (user.id, game.id);

    let (a, b) = {
        let (s1, s2) = (store.clone(), store.clone());
        let first = tokio::spawn(async move { s1.submit_score(user_id, game_id, 3000).await });
        let second = tokio::spawn(async move { s2.submit_score(user_id, game_id, 3000).await });
        (first.await.unwrap().unwrap(), second.await.unwrap().unwrap())
    };

    assert_eq!(u8::from(a.improved) + u8::from(b.improved), 1);
    assert_eq!(a.granted.len() + b.granted.len(), 4);

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM game_best_scores WHERE user_id = ? AND game_id = ?",
    )
    .bind(user.id)
    .bind(game.id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(
        granted_names(&store, user.id).await,
        vec!["Novice", "Skilled", "Expert", "Master"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rising_writes_end_consistent() {
    let temp_file = NamedTempFile::new().unwrap();
    let uri = format!("sqlite://{}", temp_file.path().display());
    let store = SqliteStore::connect(&uri, 4).await.unwrap();
    let (game, _) = ladder_game(&store, "tetris").await;
    let user = player(&store, "ann").await;

    let (user_id, game_id) = (user.id, game.id);

    let mut handles = Vec::new();
    for score in [250, 900, 5200, 1500, 40, 2100] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.submit_score(user_id, game_id, score).await
        }));
    }
    let mut total_granted = 0;
    for handle in handles {
        total_granted += handle.await.unwrap().unwrap().granted.len();
    }

    assert_eq!(
        store.best_score(user.id, game.id).await.unwrap().unwrap().score,
        5200
    );
    assert_eq!(total_granted, 5);
    assert_eq!(store.user_achievements(user.id).await.unwrap().len(), 5);
}
