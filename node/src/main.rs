//! Virtual baton node binary

use baton_core::{BatonConfig, NodeConfig};
use baton_node::NodeBuilder;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "baton-node")]
#[command(about = "Virtual baton node - decentralized mutual exclusion over gossip")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node holding one baton instance
    Run {
        /// Baton name; overrides the configuration file
        #[arg(short, long)]
        baton: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// P2P listen address
        #[arg(long)]
        listen: Option<String>,

        /// Bootstrap peer address, repeatable
        #[arg(long)]
        bootstrap: Vec<String>,

        /// Instance identity; defaults to the peer id
        #[arg(long)]
        instance_id: Option<String>,

        /// Claim the baton on start
        #[arg(long)]
        claim: bool,

        /// Release after holding this many milliseconds, then claim again
        #[arg(long)]
        hold_ms: Option<u64>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Disable the HTTP API
        #[arg(long)]
        no_api: bool,
    },

    /// Print the default configuration
    DefaultConfig,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            baton,
            config,
            listen,
            bootstrap,
            instance_id,
            claim,
            hold_ms,
            api_addr,
            no_api,
        } => {
            let config = match config {
                Some(path) => NodeConfig::from_file(&path)?,
                None => NodeConfig::default(),
            };
            init_logging(&config.log_level);

            let mut builder = NodeBuilder::new().config(config);
            if let Some(name) = &baton {
                builder = builder.baton(name);
            }
            if let Some(addr) = &listen {
                builder = builder.p2p_addr(addr);
            }
            for addr in &bootstrap {
                builder = builder.bootstrap(addr);
            }
            if let Some(id) = &instance_id {
                builder = builder.instance_id(id);
            }
            if claim {
                builder = builder.claim_on_start();
            }
            if let Some(ms) = hold_ms {
                builder = builder.hold_for(Duration::from_millis(ms));
            }
            if let Some(addr) = &api_addr {
                builder = builder.api_addr(addr);
            }
            if no_api {
                builder = builder.disable_api();
            }

            let node = builder.build();
            info!("Baton: {}", node.config().baton.baton_name);
            node.start().await?;
        }

        Commands::DefaultConfig => {
            let config = NodeConfig {
                baton: BatonConfig::new("my-baton"),
                ..Default::default()
            };
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}
