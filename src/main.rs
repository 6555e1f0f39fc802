use clap::Parser;
use std::process::ExitCode;

use gamenest::cli::{Cli, execute};
use gamenest::config::Config;
use gamenest::error::{ConfigError, GameError};
use gamenest::logging::init_tracing;
use gamenest::store;

async fn run(cli: Cli) -> Result<(), GameError> {
    let mut cfg = match Config::from_file(&cli.config) {
        Ok(cfg) => cfg,
        // a missing default config file is fine when the database comes from the flag
        Err(ConfigError::FileNotFound(_)) if cli.db.is_some() => Config::default(),
        Err(e) => return Err(e.into()),
    };
    if let Some(db) = cli.db {
        cfg.db_uri = db;
    }
    init_tracing(cfg.log_format);

    let store = store::open(&cfg.db_uri, cfg.max_connections).await?;
    let mut stdout = std::io::stdout().lock();
    execute(cli.command, store.as_ref(), &cfg, &mut stdout).await
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
