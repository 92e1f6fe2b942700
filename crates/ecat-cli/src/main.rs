mod variations;

use clap::{Parser, Subcommand};
use ecat_core::SyncPolicy;
use tracing_subscriber::EnvFilter;

use crate::variations::Target;

#[derive(Debug, Parser)]
#[command(name = "ecat-cli")]
#[command(about = "Product catalog operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Report asymmetric and dangling variation references
    Audit {
        #[command(flatten)]
        target: Target,
    },
    /// Re-link products with their current variation lists
    Resync {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ecat_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = ecat_db::PoolConfig::from_app_config(&config);
    let pool = ecat_db::connect_pool(&config.database_url, pool_config).await?;
    let policy = SyncPolicy::new(config.variation_sync_max_attempts);

    match cli.command {
        Commands::Migrate => {
            let applied = ecat_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Audit { target } => variations::run_audit(&pool, &target).await?,
        Commands::Resync { target } => variations::run_resync(&pool, &target, policy).await?,
    }

    pool.close().await;
    Ok(())
}
