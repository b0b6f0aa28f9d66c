use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use syncq::cli::args::{Cli, Commands};
use syncq::cli::commands;
use syncq::config::{Config, Paths};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Log to stderr so stdout stays parseable. `SYNCQ_LOG` wins over the config.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env("SYNCQ_LOG")
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("syncq=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        print!("{}", commands::completions(shell));
        return Ok(());
    }

    let paths = match cli.data_dir {
        Some(dir) => Paths::with_root(dir),
        None => Paths::new()?,
    };
    let config_path = cli.config.unwrap_or_else(|| paths.config_file.clone());
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_tracing(&config.general.log_filter);
    let format = cli.output.unwrap_or(config.general.default_output);

    let output = match cli.command {
        Commands::Status => commands::status(&paths, format)?,
        Commands::List { limit } => commands::list(&paths, limit, format)?,
        Commands::Add {
            kind,
            collection,
            id,
            payload,
        } => commands::add(
            &config,
            &paths,
            kind.into(),
            collection,
            id,
            payload.as_deref(),
            format,
        )?,
        Commands::Run { offline, loopback } => {
            commands::run(&config, &paths, offline, loopback, format).await?
        }
        Commands::Failed { limit } => commands::failed(&paths, limit, format)?,
        Commands::Clear { failed, force } => commands::clear(&paths, failed, force, format)?,
        Commands::Completions { .. } => String::new(),
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
