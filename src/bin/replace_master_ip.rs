use std::fs;

use anyhow::Context;
use bootstrap::cluster::{master_ip, nodes_api};
use bootstrap::descriptor::rewrite;
use bootstrap::telemetry;
use clap::Parser;
use kube::Client;
use tracing::*;

/// Point the cluster descriptor's node entry at the control-plane address
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input descriptor
    #[arg(short, long = "ifile")]
    input: String,

    /// Output descriptor
    #[arg(short, long = "ofile")]
    output: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init().await;

    let input = fs::read_to_string(&args.input)
        .with_context(|| format!("failure read {}", args.input))?;
    let client = Client::try_default().await?;
    let ip = master_ip(&nodes_api(client)).await?;
    if ip.is_none() {
        warn!("No control-plane node with an InternalIP, writing null node address");
    }

    let descriptor = rewrite(&input, ip)?;
    fs::write(&args.output, serde_json::to_string(&descriptor)?)
        .with_context(|| format!("failure write {}", args.output))?;
    info!("Wrote {}", args.output);
    Ok(())
}
