use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use benchpool::config::load_inventory;
use benchpool::dashboard::{run_dashboard, DashboardState};
use benchpool::health::BenchProber;
use benchpool::manager::ResourceManager;
use benchpool::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "benchpool")]
#[command(version)]
#[command(about = "Resource manager for physical radar test benches")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the resource manager
    Serve(ServeArgs),

    /// Validate an inventory file and exit
    CheckConfig {
        /// Path to the bench inventory file (YAML or JSON)
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Path to the bench inventory file (YAML or JSON)
    #[arg(long)]
    config: PathBuf,

    /// Address for the dashboard HTTP server
    #[arg(long, default_value = "127.0.0.1:8080")]
    dashboard_addr: SocketAddr,

    /// Disable the dashboard HTTP server
    #[arg(long)]
    no_dashboard: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::CheckConfig { config } => {
            let inventory = load_inventory(&config)?;
            println!(
                "OK: {} benches, default lease timeout {}s",
                inventory.benches.len(),
                inventory.config.default_lease_timeout.as_secs()
            );
            Ok(())
        }
        Commands::Serve(serve) => {
            let inventory = load_inventory(&serve.config)?;
            let prober = Arc::new(BenchProber::new(inventory.config.probe_timeout));
            let manager = Arc::new(ResourceManager::new(
                inventory.benches,
                inventory.config,
                prober,
            )?);

            let token = install_shutdown_handler();
            manager.spawn_loops(token.clone());

            if !serve.no_dashboard {
                let state = DashboardState {
                    manager: manager.clone(),
                };
                let addr = serve.dashboard_addr;
                tokio::spawn(async move {
                    run_dashboard(addr, state).await;
                });
            }

            token.cancelled().await;
            tracing::info!("Shutdown complete");
            Ok(())
        }
    }
}
