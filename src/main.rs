mod cli;
mod simulate;

use abyss_core::config::{Config, ConfigLoader};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("abyss=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ConfigSample { output } => {
            let path = output.unwrap_or_else(|| std::path::PathBuf::from("./abyss.sample.yaml"));
            Config::sample().save(&path)?;
            println!("Sample config written to {:?}", path);
        }
        Commands::Simulate { visitors, seconds } => {
            let config = ConfigLoader::load_or_default(cli.config_path.as_deref())?;
            info!(
                "Simulating {} visitor(s) for {}s, {} per room",
                visitors, seconds, config.room.max_participants
            );
            let reports = simulate::run(config, visitors, seconds).await?;
            simulate::print_layout(&reports);
        }
    }

    Ok(())
}
