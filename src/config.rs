use crate::error::ConfigError;
use crate::models::{NewAchievement, NewGame};
use crate::rules::ConditionType;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

fn default_db_uri() -> String {
    "sqlite:///var/lib/gamenest/gamenest.db".into()
}

fn default_max_connections() -> u32 {
    5
}

fn default_leaderboard_size() -> u32 {
    10
}

fn default_condition_type() -> String {
    ConditionType::Score.as_str().into()
}

/// Replace `$ENV{NAME}` with the environment variable and `$FILE{path}` with
/// the file's contents (trailing newline trimmed).
/// Read a file, keeping "missing" apart from other I/O failures.
fn read_file(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.into()),
        _ => ConfigError::Read {
            path: path.into(),
            source,
        },
    })
}

pub fn expand_placeholders(text: &str) -> Result<String, ConfigError> {
    let env_re = Regex::new(r"\$ENV\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let file_re =
        Regex::new(r"\$FILE\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in env_re.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&text[last..m.start()]);
        let var = std::env::var(&caps[1]).map_err(|_| ConfigError::MissingEnv(caps[1].into()))?;
        out.push_str(&var);
        last = m.end();
    }
    out.push_str(&text[last..]);

    let text = out;
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in file_re.captures_iter(&text) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&text[last..m.start()]);
        let contents = read_file(&caps[1])?;
        out.push_str(contents.trim_end_matches(['\r', '\n']));
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_db_uri")]
    pub db_uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: u32,
    #[serde(default)]
    pub games: Vec<GameSeed>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GameSeed {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub board_rows: Option<i64>,
    #[serde(default)]
    pub board_cols: Option<i64>,
    #[serde(default)]
    pub achievements: Vec<AchievementSeed>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AchievementSeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_condition_type")]
    pub condition_type: String,
    #[serde(default)]
    pub condition_value: Option<i64>,
}

impl GameSeed {
    pub fn to_new_game(&self) -> NewGame {
        NewGame {
            code: self.code.clone(),
            name: self.name.clone(),
            board_rows: self.board_rows,
            board_cols: self.board_cols,
        }
    }
}

impl AchievementSeed {
    pub fn to_new_achievement(&self, game_id: i64) -> NewAchievement {
        NewAchievement {
            game_id,
            name: self.name.clone(),
            description: self.description.clone(),
            condition_type: self.condition_type.clone(),
            condition_value: self.condition_value,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_uri: default_db_uri(),
            max_connections: default_max_connections(),
            log_format: LogFormat::default(),
            leaderboard_size: default_leaderboard_size(),
            games: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// resolved, or the result fails to parse or validate.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = read_file(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = expand_placeholders(text)?;
        let cfg: Config = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }
        let mut codes = HashSet::new();
        for game in &self.games {
            if !codes.insert(game.code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate game code '{}'",
                    game.code
                )));
            }
            let mut names = HashSet::new();
            for achievement in &game.achievements {
                if !names.insert(achievement.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate achievement '{}' in game '{}'",
                        achievement.name, game.code
                    )));
                }
                achievement
                    .condition_type
                    .parse::<ConditionType>()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                if achievement.condition_value.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "achievement '{}' in game '{}' has no condition_value",
                        achievement.name, game.code
                    )));
                }
            }
        }
        Ok(())
    }

    /// The classic score ladder attached to each of the given games.
    pub fn default_catalog(games: &[(&str, &str)]) -> Vec<GameSeed> {
        const LADDER: [(&str, &str, i64); 5] = [
            ("Novice", "Reach 200 points", 200),
            ("Skilled", "Reach 500 points", 500),
            ("Expert", "Reach 1000 points", 1000),
            ("Master", "Reach 2000 points", 2000),
            ("Legend", "Reach 5000 points", 5000),
        ];
        games
            .iter()
            .map(|(code, name)| GameSeed {
                code: (*code).into(),
                name: (*name).into(),
                board_rows: None,
                board_cols: None,
                achievements: LADDER
                    .iter()
                    .map(|(name, description, threshold)| AchievementSeed {
                        name: (*name).into(),
                        description: Some((*description).into()),
                        condition_type: default_condition_type(),
                        condition_value: Some(*threshold),
                    })
                    .collect(),
            })
            .collect()
    }
}
