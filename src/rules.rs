//! Achievement rule evaluation.
//!
//! Evaluation is a pure function of the player's progress, the game's
//! achievement definitions and the achievements already granted. Storage
//! backends call it inside the transaction that changed the best score and
//! insert whatever it returns.

use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::RuleError;
use crate::models::Achievement;

/// Ids of achievements to grant, in ascending threshold order.
pub type DueGrants = SmallVec<[i64; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    Score,
    PlayCount,
    Time,
    WinCount,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Score,
        ConditionType::PlayCount,
        ConditionType::Time,
        ConditionType::WinCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Score => "score",
            ConditionType::PlayCount => "play_count",
            ConditionType::Time => "time",
            ConditionType::WinCount => "win_count",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConditionType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RuleError::UnknownCondition(s.to_string()))
    }
}

/// What the evaluator knows about a player in one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub best_score: i64,
}

impl Progress {
    pub fn from_best_score(best_score: i64) -> Self {
        Self { best_score }
    }
}

/// Decides whether one kind of achievement condition holds.
pub trait ConditionStrategy: Send + Sync {
    fn is_met(&self, threshold: i64, progress: &Progress) -> bool;
}

/// Best score reaches the threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreThreshold;

impl ConditionStrategy for ScoreThreshold {
    fn is_met(&self, threshold: i64, progress: &Progress) -> bool {
        progress.best_score >= threshold
    }
}

/// Registry of condition strategies keyed by condition type.
///
/// Achievements whose type has no registered strategy are never evaluated.
pub struct RuleSet {
    strategies: HashMap<ConditionType, Box<dyn ConditionStrategy>>,
}

impl RuleSet {
    /// A rule set with no strategies; nothing is ever granted.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_strategy(
        mut self,
        kind: ConditionType,
        strategy: impl ConditionStrategy + 'static,
    ) -> Self {
        self.strategies.insert(kind, Box::new(strategy));
        self
    }

    pub fn handles(&self, kind: ConditionType) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Return the achievements that `progress` newly satisfies.
    ///
    /// # Errors
    ///
    /// Fails on the first malformed definition: an unknown condition type,
    /// or a missing threshold on an achievement this rule set evaluates.
    /// Nothing should be granted when this returns an error.
    pub fn evaluate(
        &self,
        progress: &Progress,
        achievements: &[Achievement],
        granted: &HashSet<i64>,
    ) -> Result<DueGrants, RuleError> {
        let mut due: SmallVec<[(i64, i64); 8]> = SmallVec::new();
        for achievement in achievements {
            let kind: ConditionType = achievement.condition_type.parse()?;
            let Some(strategy) = self.strategies.get(&kind) else {
                continue;
            };
            let threshold =
                achievement
                    .condition_value
                    .ok_or_else(|| RuleError::MissingThreshold {
                        achievement_id: achievement.id,
                        name: achievement.name.clone(),
                    })?;
            if granted.contains(&achievement.id) {
                continue;
            }
            if strategy.is_met(threshold, progress) {
                due.push((threshold, achievement.id));
            }
        }
        due.sort_unstable();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet::empty().with_strategy(ConditionType::Score, ScoreThreshold)
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.strategies.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("RuleSet").field("strategies", &kinds).finish()
    }
}
