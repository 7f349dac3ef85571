use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod manager;
mod pool;

#[derive(Parser)]
#[command(name = "kvpool")]
#[command(version, about = "Multi-target connection pool manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (falls back to KVPOOL_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then exit
    Validate,

    /// Build every pool and borrow one connection per target
    Check {
        /// Check a single target instead of all of them
        #[arg(long)]
        target: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Short-lived operational commands only; a single-threaded runtime is
    // enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Config errors are fatal: they propagate out of main and exit nonzero.
    let config = config::load_config(cli.config.as_deref())?;
    let manager = manager::PoolManager::new(config)?;

    match cli.command {
        Commands::Validate => {
            println!("configuration ok: {} target(s)", manager.config().targets.len());
        }
        Commands::Check { target } => {
            manager.initialize().await;

            let mut names: Vec<&str> = match &target {
                Some(name) => vec![name.as_str()],
                None => manager.config().targets.keys().map(String::as_str).collect(),
            };
            names.sort_unstable();

            let mut failed = 0usize;
            for name in &names {
                match manager.get(name).await {
                    Ok(conn) => {
                        println!("{name}: ok ({})", conn.addr());
                    }
                    Err(err) => {
                        failed += 1;
                        println!("{name}: FAILED ({err})");
                    }
                }
            }

            manager.shutdown().await;

            if failed > 0 {
                anyhow::bail!("{failed} of {} target(s) failed the connection check", names.len());
            }
        }
    }

    Ok(())
}
