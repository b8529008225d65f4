use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use flatten_dns::Chain;
use flatten_dns::DNSServer;
use flatten_dns::DNSUpstream;
use flatten_dns::Flatten;
use flatten_dns::Forward;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
use config::Config;

const PROG_NAME: &str = env!("CARGO_BIN_NAME");
const PROG_VERSION: &str = env!("CARGO_PKG_VERSION");

// ----------------------
//      cmd line
// ----------------------

/// CNAME flattening DNS server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config path
    #[arg(short, long, value_name = "FILE_PATH")]
    config: String,
}

// ----------------------
//     server setup
// ----------------------

/// One flatten handler per directive, then the forwarder if any
fn create_chain(config: &Config) -> Chain {
    let mut chain = Chain::new();

    for directive in config.flatten.iter() {
        info!(
            original = %directive.original,
            target = %directive.target,
            upstream = %directive.upstream,
            "flatten"
        );
        let upstream = DNSUpstream::new(directive.upstream, config.timeout);
        chain = chain.push(Flatten::new(directive.clone(), upstream));
    }

    match config.forward {
        Some(forward) => {
            info!(upstream = %forward, "forward the rest");
            chain = chain.push(Forward::new(DNSUpstream::new(forward, config.timeout)));
        }
        None => {
            warn!("no forward upstream, queries not flattened are answered with SERVFAIL");
        }
    }

    chain
}

async fn serve(config: Arc<Config>) -> Result<()> {
    let chain = create_chain(&config);
    let dns_server = DNSServer::new(config.listen_at, chain);

    info!("dns server is listening at {}", dns_server.listen_at());
    dns_server.serve().await
}

// ----------------------
//        main
// ----------------------

#[tokio::main]
async fn main() -> Result<()> {
    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;
    let config = Arc::new(config);

    info!("{PROG_NAME} version: {PROG_VERSION}, link start");

    tokio::select! {
        res = serve(config) => {
            if let Err(err) = res {
                error!(cause = %err, "Failed to start");
                return Err(err);
            }
        }
        _ = signal::ctrl_c() => {
            info!("{PROG_NAME} is shutting down.");
        }
    }
    info!("Exiting...");

    Ok(())
}
