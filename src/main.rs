use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use log::info;

use paper_finder::ai::build_oracle;
use paper_finder::cli::Cli;
use paper_finder::config::Config;
use paper_finder::controller::SearchController;
use paper_finder::presenter::{run_interactive, Presenter, SystemOpener};
use paper_finder::telegram::TelegramSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // RUST_LOG=debug shows skipped channels and classifier verdicts
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .with_module_level("grammers_session", log::LevelFilter::Warn)
        .with_module_level("grammers_mtsender", log::LevelFilter::Warn)
        .with_module_level("grammers_client", log::LevelFilter::Warn)
        .init()?;

    let cli = Cli::parse();

    // Fail fast on missing credentials before touching the network
    let config = Config::from_env().context("invalid configuration")?;
    let oracle = build_oracle(&config.ai).context("cannot set up the AI classifier")?;

    let source = TelegramSource::connect(&config.telegram)
        .await
        .context("cannot connect to Telegram")?;
    info!("Telegram client connected and authorized.");

    let controller = SearchController::new(Arc::new(source), oracle, config.ai.clone());
    let mut presenter = Presenter::new(io::stdout(), SystemOpener);

    run_interactive(&controller, &mut presenter, cli.initial_query(), cli.once).await
}
