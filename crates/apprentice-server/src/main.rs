// crates/apprentice-server/src/main.rs
// Apprentice - personal knowledge indexer

mod cli;

use apprentice::config::{ApprenticeConfig, ApprenticeHome};
use clap::Parser;
use cli::{Cli, Commands};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help/version are not errors; everything else is a user error
            if e.use_stderr() {
                eprintln!("{e}");
                std::process::exit(1);
            }
            let _ = e.print();
            return;
        }
    };

    let home = ApprenticeHome::resolve();
    home.load_env();
    let config = ApprenticeConfig::load(&home);

    let log_level = match &cli.command {
        Some(Commands::Serve) | Some(Commands::Index { .. }) => Level::INFO,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let result = match cli.command {
        None | Some(Commands::Serve) => cli::run_serve(home, config).await,
        Some(Commands::Index { context }) => cli::run_index(home, config, context).await,
        Some(Commands::Context { action }) => cli::run_context(home, action).await,
        Some(Commands::Search {
            query,
            mode,
            limit,
            offset,
            events,
            assets,
            since,
            until,
            recent_minutes,
            filters,
            contexts,
            extensions,
            related,
            group_by,
            window_seconds,
        }) => {
            cli::run_search(
                home,
                config,
                query,
                mode,
                limit,
                offset,
                events,
                assets,
                since,
                until,
                recent_minutes,
                filters,
                contexts,
                extensions,
                related,
                group_by,
                window_seconds,
            )
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("apprentice: {e:#}");
        std::process::exit(1);
    }
}
