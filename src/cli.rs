use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{native_connector, Connector, HostResolver, MountedShares};
use crate::config::{BackendChoice, ExecutionContext};
use crate::connect::ConnectionFactory;
use crate::console::StdoutSink;
use crate::load_config::load_config;
use crate::publish::publish;

/// CLI for smb-publish: copy build artifacts to an SMB/CIFS share.
#[derive(Parser)]
#[clap(
    name = "smb-publish",
    version,
    about = "Publish files to SMB/CIFS shares over SMB1 URLs or SMB2/3 sessions"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish all configured transfers to the target share
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Print every directory, delete and copy step
        #[clap(long)]
        verbose: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish { config, verbose } => {
            let config = load_config(config)?;
            let exec = ExecutionContext::new(verbose || config.verbose)
                .with_wins_server(config.wins_server.clone())
                .with_sink(Arc::new(StdoutSink));
            let connector = match connector_for(&config.backend) {
                Ok(connector) => connector,
                Err(e) => {
                    eprintln!("[ERROR] Publish failed: {}", e);
                    return Err(e);
                }
            };
            let factory = ConnectionFactory::new(connector);

            println!("Publish starting...");
            match publish(&factory, &config, &exec).await {
                Ok(report) => {
                    println!("Publish complete.\nReport:");
                    println!("{:#?}", report);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Publish failed: {}", e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

fn connector_for(backend: &BackendChoice) -> Result<Arc<dyn Connector>> {
    match backend {
        BackendChoice::Mounted(root) => Ok(Arc::new(MountedShares::new(root.clone()))),
        BackendChoice::Native { lmhosts } => {
            let resolver = match lmhosts {
                Some(path) => HostResolver::new().with_lmhosts(path.clone()),
                None => HostResolver::new(),
            };
            Ok(native_connector(resolver)?)
        }
    }
}
