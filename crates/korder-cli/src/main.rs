use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use korder_core::{AppContext, Config, Result};

#[derive(Parser)]
#[command(name = "korder")]
#[command(about = "Korder self-service kiosk order backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Server {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,

        #[arg(long, help = "Skip automatic database migration on startup")]
        skip_migrate: bool,

        #[arg(long, help = "Skip FSM recovery of incomplete orders on startup")]
        skip_recovery: bool,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Apply the schema
    Migrate,
    /// Check database connectivity
    Ping,
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(&path.to_string_lossy()),
        None => Config::from_env(),
    }
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    init_tracing(&cli, &config);

    match cli.command {
        Commands::Server {
            host,
            port,
            skip_migrate,
            skip_recovery,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let ctx = AppContext::initialize(config).await?;

            if !skip_migrate {
                korder_core::auto_migrate(&ctx.db).await?;
            }

            if !skip_recovery {
                let resumed = korder_core::recover_incomplete_orders(&ctx).await?;
                if resumed > 0 {
                    info!(resumed, "resumed incomplete orders from previous run");
                }
            }

            korder_api::run(ctx).await
        }

        Commands::Db { command } => {
            let ctx = AppContext::initialize(config).await?;
            match command {
                DbCommands::Migrate => {
                    korder_core::auto_migrate(&ctx.db).await?;
                    info!("migration complete");
                    Ok(())
                }
                DbCommands::Ping => {
                    ctx.db.health_check().await?;
                    info!("database reachable");
                    Ok(())
                }
            }
        }
    }
}
