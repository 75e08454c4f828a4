use std::process::ExitCode;

use bootstrap::annotations::publish;
use bootstrap::cluster::nodes_api;
use bootstrap::config::{DEFAULT_CONFIG_FILE, NodeConfig};
use bootstrap::desired::BridgeLayout;
use bootstrap::helper::get_my_node_name;
use bootstrap::host::SystemHost;
use bootstrap::reconcile::discover_external_facts;
use bootstrap::{Error, Result, finish, telemetry};
use clap::Parser;
use kube::Client;

/// Publish the external gateway facts of this node without touching the host
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Node network config file
    #[arg(short, long, env = "KBR_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

async fn run(args: Args) -> Result<()> {
    let config = NodeConfig::load(&args.config)?;
    let host = SystemHost::connect().map_err(|e| Error::OtherError(e.to_string()))?;
    let facts = discover_external_facts(&host, &config, &BridgeLayout::default()).await?;

    let node_name = get_my_node_name()?;
    let client = Client::try_default().await.map_err(Error::KubeError)?;
    publish(&nodes_api(client), &node_name, &facts).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init().await;
    finish(run(args).await)
}
