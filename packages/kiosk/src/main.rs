use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

use kiosk::config::{FileConfig, KioskDirs, load_config};

#[derive(Parser)]
#[command(name = "kiosk")]
#[command(about = "Recycling kiosk: detects materials and grants points to cardholders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to the platform config dir + /kiosk)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kiosk in the foreground
    Run(RunArgs),

    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Parser)]
struct RunArgs {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn resolve(config_dir: Option<PathBuf>) -> Result<(FileConfig, KioskDirs)> {
    let dirs = KioskDirs::new(config_dir.clone(), None)?;
    let config: FileConfig = load_config(&dirs.config_dir)
        .extract()
        .with_context(|| format!("Invalid config in {}", dirs.config_toml_path().display()))?;

    // The captures directory is itself configurable
    let dirs = match &config.detection.captures_dir {
        Some(captures) => KioskDirs::new(config_dir, Some(captures.clone()))?,
        None => dirs,
    };
    Ok((config, dirs))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let default_directive = if args.debug {
                "kiosk=debug,claim_core=debug,info"
            } else {
                "kiosk=info,claim_core=info,warn"
            };
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();

            info!("Starting recycling kiosk");
            let (config, dirs) = resolve(cli.config_dir)?;
            kiosk::app::run(config, dirs).await
        }
        Commands::Config => {
            let (config, _) = resolve(cli.config_dir)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
