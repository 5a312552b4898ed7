//! Threadline operator CLI entry point.
//!
//! Binary name: `tline`
//!
//! Parses CLI arguments, loads configuration, wires the conversation store to
//! the Redis backend, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use threadline_infra::config::load_config;
use threadline_observe::tracing_setup::{bootstrap_subscriber, default_filter, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or a backend
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "tline", &mut std::io::stdout());
        return Ok(());
    }

    let filter = default_filter(cli.verbose, cli.quiet);

    // Config decides the log format, so loading it logs through a temporary subscriber.
    let config = {
        let _guard = tracing::subscriber::set_default(bootstrap_subscriber(filter));
        load_config(cli.config.as_deref()).await
    };

    if let Err(e) = init_tracing(&config.logging, filter) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let state = AppState::init(config)?;
    let result = run(&cli, &state).await;

    state.close();
    shutdown_tracing();
    result
}

async fn run(cli: &Cli, state: &AppState) -> anyhow::Result<()> {
    let json = cli.json;

    match &cli.command {
        Commands::Show { key, last } => {
            cli::conversation::show(state, &key.to_key()?, *last, json).await
        }
        Commands::Append {
            key,
            role,
            content,
            timestamp,
            metadata,
        } => {
            cli::conversation::append(
                state,
                &key.to_key()?,
                *role,
                content.clone(),
                *timestamp,
                metadata.clone(),
                json,
            )
            .await
        }
        Commands::Delete { key, force } => {
            cli::conversation::delete(state, &key.to_key()?, *force, json).await
        }
        Commands::Ttl { key } => cli::conversation::ttl(state, &key.to_key()?, json).await,
        Commands::Touch { key } => cli::conversation::touch(state, &key.to_key()?, json).await,
        Commands::Context { key, last } => {
            cli::conversation::context(state, &key.to_key()?, *last, json).await
        }
        Commands::Ping => cli::status::ping(state, json).await,
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
