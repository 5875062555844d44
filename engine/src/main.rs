// Docent document assistant
// Main entry point for the docent binary

use clap::Parser;
use docent_engine::cli::{Cli, Command, ConfigAction, SessionAction};
use docent_engine::config::Config;
use docent_engine::handlers::{
    handle_ask, handle_config_path, handle_config_show, handle_history, handle_session_close,
    handle_session_new, OutputFormat,
};
use docent_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use sdk::errors::DocentErrorExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let loaded = if cli.config.is_some() {
        Config::load_from_path(&config_path)
    } else {
        Config::load_or_create()
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            // Subscriber is only installed once, so log the failure at the default level
            init_telemetry();
            tracing::error!("Failed to load configuration: {} ({})", e, e.user_hint());
            return Err(e.into());
        }
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("Docent v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Ask {
            input,
            user,
            session,
            trace,
        } => handle_ask(input, user, session, trace, &config, format).await,

        Command::Session { action } => match action {
            SessionAction::New { user } => handle_session_new(user, &config, format).await,
            SessionAction::Close { user, session } => {
                handle_session_close(user, session, &config, format).await
            }
        },

        Command::History { user, session } => {
            handle_history(user, session, &config, format).await
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        },
    }
}
