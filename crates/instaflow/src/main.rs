mod commands;
mod context;
mod declarations;
mod planner;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use colored::Colorize;
use context::Context;
use instaflow_cloud::StateManager;
use instaflow_cloud_instaclustr::ApiConfig;
use instaflow_cloud_instaclustr::config::{DEFAULT_API_URL, ENV_ACCESS_KEY, ENV_SECRET_KEY, ENV_URL};
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "instaflow")]
#[command(about = "Declarative provisioning for Instaclustr clusters", long_about = None)]
struct Cli {
    /// Provisioning API endpoint
    #[arg(long, global = true, env = ENV_URL, default_value = DEFAULT_API_URL)]
    url: String,

    /// API access key (username)
    #[arg(long, global = true, env = ENV_ACCESS_KEY, hide_env_values = true)]
    access_key: Option<String>,

    /// API secret key
    #[arg(long, global = true, env = ENV_SECRET_KEY, hide_env_values = true)]
    secret_key: Option<String>,

    /// Directory holding the .instaflow state directory
    #[arg(long, global = true, default_value = ".")]
    state_dir: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes needed to match the declarations
    Plan {
        /// Declarations file
        #[arg(short, long, default_value = "instaflow.yaml")]
        file: PathBuf,
    },
    /// Create, replace and delete resources to match the declarations
    Apply {
        /// Declarations file
        #[arg(short, long, default_value = "instaflow.yaml")]
        file: PathBuf,
    },
    /// Re-read tracked resources from the provider
    Refresh,
    /// Delete tracked resources
    Destroy {
        /// Only resources declared under this name
        name: Option<String>,
    },
    /// Track an existing resource
    Import {
        /// Resource kind (cluster, firewall_rule, vpc_peering)
        kind: String,
        /// Name to track the resource under
        name: String,
        /// Provider id (firewall rules: clusterId:network, peerings: datacenterId:peeringId)
        id: String,
    },
    /// Show the node addresses of a cluster
    Ips {
        /// Tracked name, cluster id or cluster name at the provider
        cluster: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tracked resources
    State,
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that never talk to the API
    match cli.command {
        Commands::Version => {
            println!("instaflow {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::State => {
            return commands::state::handle(&StateManager::new(&cli.state_dir)).await;
        }
        _ => {}
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping after the current step...".yellow());
            let _ = cancel_tx.send(true);
        }
    });

    let config = ApiConfig::new(
        cli.url,
        cli.access_key.unwrap_or_default(),
        cli.secret_key.unwrap_or_default(),
    );
    let ctx = Context::new(config, &cli.state_dir, cancel_rx)
        .context("Invalid Instaclustr API configuration")?;

    match cli.command {
        Commands::Plan { file } => commands::plan::handle(&ctx, &file).await,
        Commands::Apply { file } => commands::apply::handle(&ctx, &file).await,
        Commands::Refresh => commands::refresh::handle(&ctx).await,
        Commands::Destroy { name } => commands::destroy::handle(&ctx, name).await,
        Commands::Import { kind, name, id } => {
            commands::import::handle(&ctx, &kind, &name, &id).await
        }
        Commands::Ips { cluster, json } => commands::ips::handle(&ctx, &cluster, json).await,
        Commands::Version | Commands::State => Ok(()),
    }
}
