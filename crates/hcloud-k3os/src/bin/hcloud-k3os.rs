//! hcloud-k3os CLI - node configuration daemon and backup tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hcloud_k3os::backup::SnapshotStore;
use hcloud_k3os::providers::hetzner::{ClientConfig, HCloud};
use hcloud_k3os::{ConfigCache, Daemon, Paths, ResolvedConfiguration, Resolver, SystemRunner};

/// Configures k3OS nodes on Hetzner Cloud.
#[derive(Parser)]
#[command(name = "hcloud-k3os")]
#[command(about = "Configure k3OS nodes on Hetzner Cloud")]
struct Cli {
    /// Log commands instead of running them.
    #[arg(long, global = true, default_value = "false")]
    dry: bool,

    /// Enable debug logging.
    #[arg(long, global = true, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the node and keep backups running until terminated.
    Daemon,

    /// Manage backups of the master's state.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Resolve the configuration live and print it as YAML.
    Resolve {
        /// Hetzner Cloud API token instead of the one in user data.
        #[arg(long, env = "HCLOUD_TOKEN")]
        hcloud_token: Option<String>,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// List snapshots.
    List,

    /// Run a backup now.
    Run,

    /// Restore the latest snapshot.
    Restore,
}

fn resolver() -> Result<Resolver<HCloud>> {
    let client = HCloud::new(ClientConfig::default()).context("Failed to create API client")?;
    Ok(Resolver::new(client))
}

async fn load_config(paths: &Paths) -> Result<ResolvedConfiguration> {
    ConfigCache::new(&paths.cache_file)
        .refresh(&resolver()?)
        .await
        .context("Loading config failed")
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let runner = Arc::new(SystemRunner::new(cli.dry));
    if cli.dry {
        info!("Dry run, commands will only be logged");
    }
    let paths = Paths::default();

    match cli.command {
        Commands::Daemon => {
            let daemon = Daemon::new(runner, paths)?;
            daemon.run(&resolver()?).await?;
        }

        Commands::Backup { action } => {
            let daemon = Daemon::new(runner, paths.clone())?;
            let config = load_config(&paths).await?;
            let store = daemon.snapshot_store(&config);

            match action {
                BackupAction::List => {
                    let snapshots = store.list().context("Error listing snapshots")?;
                    println!("\n{:<10} {:<25}", "ShortID", "Time");
                    println!("{}", "-".repeat(36));
                    for snapshot in snapshots {
                        println!(
                            "{:<10} {:<25}",
                            snapshot.short_id,
                            snapshot.time.format("%Y-%m-%d %H:%M:%S %Z")
                        );
                    }
                }
                BackupAction::Run => {
                    store.backup().context("Error running backup")?;
                    info!("Backup completed");
                }
                BackupAction::Restore => {
                    store.restore_latest().context("Error restoring backup")?;
                    info!("Restore completed");
                }
            }
        }

        Commands::Resolve { hcloud_token } => {
            let config = resolver()?
                .with_token_override(hcloud_token)
                .resolve()
                .await
                .context("Failed to resolve configuration")?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
