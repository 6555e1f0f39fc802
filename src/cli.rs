//! Command-line interface for gamenest.

use crate::config::Config;
use crate::error::{GameError, StoreError};
use crate::models::{Game, Role, User};
use crate::seed::seed_catalog;
use crate::store::Store;
use clap::{Parser, Subcommand};
use serde::Serialize;
use futures_util::TryStreamExt;
use std::io::Write;

/// gamenest - scores, leaderboards and achievements
#[derive(Parser, Debug)]
#[command(name = "gamenest")]
#[command(about = "Administer the gamenest score and achievement store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gamenest.toml", env = "GAMENEST_CONFIG")]
    pub config: String,

    /// Override the database URI from the configuration
    #[arg(long, env = "GAMENEST_DB")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or upgrade the database schema
    Migrate,

    /// Load the configured games and achievements
    Seed,

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Manage friendships
    #[command(subcommand)]
    Friend(FriendCommand),

    /// List the game catalog
    Games,

    /// Record a score for a user
    Score {
        username: String,
        game: String,
        #[arg(allow_negative_numbers = true)]
        score: i64,
    },

    /// Show the best scores for a game
    Leaderboard {
        game: String,
        /// Number of entries, defaults to `leaderboard_size` from the config
        #[arg(short, long)]
        limit: Option<u32>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List a user's unlocked achievements
    Achievements {
        username: String,
        #[arg(long)]
        json: bool,
    },

    /// Re-run achievement evaluation for a user's best score
    Reevaluate { username: String, game: String },

    /// Show a user's totals
    Summary {
        username: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add {
        username: String,
        #[arg(long, env = "GAMENEST_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        admin: bool,
    },
    /// Delete a user and everything they own
    Remove { username: String },
    /// Change a user's role (admin or user)
    Role { username: String, role: String },
}

#[derive(Subcommand, Debug)]
pub enum FriendCommand {
    Add { username: String, friend: String },
    Remove { username: String, friend: String },
    List { username: String },
}

async fn require_user(store: &dyn Store, username: &str) -> Result<User, StoreError> {
    store
        .get_user(username)
        .await?
        .ok_or_else(|| StoreError::UserNotFound(username.to_string()))
}

async fn require_game(store: &dyn Store, code: &str) -> Result<Game, StoreError> {
    store
        .get_game(code)
        .await?
        .ok_or_else(|| StoreError::GameNotFound(code.to_string()))
}

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)
}

/// Run one command against an open store, writing human-readable output.
pub async fn execute<W: Write>(
    command: Command,
    store: &dyn Store,
    cfg: &Config,
    out: &mut W,
) -> Result<(), GameError> {
    match command {
        Command::Migrate => {
            writeln!(out, "schema up to date")?;
        }
        Command::Seed => {
            let report = seed_catalog(store, &cfg.games).await?;
            writeln!(
                out,
                "created {} games, {} achievements",
                report.games_created, report.achievements_created
            )?;
        }
        Command::User(UserCommand::Add {
            username,
            password,
            admin,
        }) => {
            let role = if admin { Role::Admin } else { Role::User };
            let user = store.create_user(&username, &password, role).await?;
            writeln!(out, "created {} ({}) id={}", user.username, user.role, user.id)?;
        }
        Command::User(UserCommand::Remove { username }) => {
            store.delete_user(&username).await?;
            writeln!(out, "removed {username}")?;
        }
        Command::User(UserCommand::Role { username, role }) => {
            let role: Role = role.parse()?;
            store.set_role(&username, role).await?;
            writeln!(out, "{username} is now {role}")?;
        }
        Command::Friend(FriendCommand::Add { username, friend }) => {
            let user = require_user(store, &username).await?;
            let other = require_user(store, &friend).await?;
            store.add_friend(user.id, other.id).await?;
            writeln!(out, "{username} and {friend} are friends")?;
        }
        Command::Friend(FriendCommand::Remove { username, friend }) => {
            let user = require_user(store, &username).await?;
            let other = require_user(store, &friend).await?;
            store.remove_friend(user.id, other.id).await?;
            writeln!(out, "{username} and {friend} are no longer friends")?;
        }
        Command::Friend(FriendCommand::List { username }) => {
            let user = require_user(store, &username).await?;
            for friend in store.list_friends(user.id).await? {
                writeln!(out, "{}", friend.username)?;
            }
        }
        Command::Games => {
            let games: Vec<Game> = store.list_games().try_collect().await?;
            for game in games {
                match (game.board_rows, game.board_cols) {
                    (Some(rows), Some(cols)) => {
                        writeln!(out, "{}\t{}\t{rows}x{cols}", game.code, game.name)?
                    }
                    _ => writeln!(out, "{}\t{}", game.code, game.name)?,
                }
            }
        }
        Command::Score {
            username,
            game,
            score,
        } => {
            let user = require_user(store, &username).await?;
            let game = require_game(store, &game).await?;
            let outcome = store.submit_score(user.id, game.id, score).await?;
            if outcome.improved {
                writeln!(out, "new best score {}", outcome.best_score)?;
            } else {
                writeln!(out, "best score remains {}", outcome.best_score)?;
            }
            for grant in &outcome.granted {
                writeln!(out, "unlocked {}", grant.achievement_name)?;
            }
        }
        Command::Leaderboard { game, limit, json } => {
            let game = require_game(store, &game).await?;
            let limit = limit.unwrap_or(cfg.leaderboard_size);
            let entries = store.leaderboard(game.id, limit).await?;
            if json {
                write_json(out, &entries)?;
            } else {
                for entry in entries {
                    writeln!(out, "{:>3}. {}\t{}", entry.rank, entry.username, entry.score)?;
                }
            }
        }
        Command::Achievements { username, json } => {
            let user = require_user(store, &username).await?;
            let grants = store.user_achievements(user.id).await?;
            if json {
                write_json(out, &grants)?;
            } else {
                for grant in grants {
                    writeln!(out, "{}\t{}", grant.game_code, grant.achievement_name)?;
                }
            }
        }
        Command::Reevaluate { username, game } => {
            let user = require_user(store, &username).await?;
            let game = require_game(store, &game).await?;
            let granted = store.reevaluate(user.id, game.id).await?;
            writeln!(out, "granted {} achievements", granted.len())?;
        }
        Command::Summary { username, json } => {
            let user = require_user(store, &username).await?;
            let summary = store.user_summary(user.id).await?;
            if json {
                write_json(out, &summary)?;
                return Ok(());
            }
            writeln!(
                out,
                "games played: {}\nachievements: {}\ntotal best score: {}",
                summary.games_played, summary.achievements_unlocked, summary.total_best_score
            )?;
        }
    }
    Ok(())
}
