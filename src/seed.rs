//! Load the configured game catalog into a store.

use crate::config::GameSeed;
use crate::error::StoreError;
use crate::store::Store;
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub games_created: usize,
    pub achievements_created: usize,
}

/// Create every missing game and achievement. Rows that already exist are
/// matched by game code and achievement name and left untouched.
#[tracing::instrument(skip_all, fields(games = games.len()))]
pub async fn seed_catalog(store: &dyn Store, games: &[GameSeed]) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    for seed in games {
        let game = match store.get_game(&seed.code).await? {
            Some(game) => game,
            None => {
                report.games_created += 1;
                store.add_game(&seed.to_new_game()).await?
            }
        };

        let existing: HashSet<String> = store
            .list_achievements(game.id)
            .await?
            .into_iter()
            .map(|a| a.name)
            .collect();
        for achievement in &seed.achievements {
            if existing.contains(&achievement.name) {
                continue;
            }
            store
                .add_achievement(&achievement.to_new_achievement(game.id))
                .await?;
            report.achievements_created += 1;
        }
    }
    tracing::info!(
        games = report.games_created,
        achievements = report.achievements_created,
        "catalog seeded"
    );
    Ok(report)
}
