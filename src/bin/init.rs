use std::process::ExitCode;

use bootstrap::annotations::publish;
use bootstrap::cluster::nodes_api;
use bootstrap::config::{DEFAULT_CONFIG_FILE, NodeConfig};
use bootstrap::desired::{BridgeLayout, DesiredState, compute};
use bootstrap::helper::get_my_node_name;
use bootstrap::host::SystemHost;
use bootstrap::reconcile::{ExternalMode, reconcile_external, reconcile_gateway};
use bootstrap::{Error, Result, finish, telemetry};
use clap::Parser;
use kube::Client;
use tracing::*;

/// First-boot bootstrap: gateway bridges and routes from the config file,
/// uplink attached to the external bridge, facts published on the node
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Node network config file
    #[arg(short, long, env = "KBR_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

async fn run(args: Args) -> Result<()> {
    let config = NodeConfig::load(&args.config)?;
    let net = compute(&config, None)?;
    let layout = BridgeLayout::default();
    let desired = DesiredState::new(&net, &layout)?;
    let host = SystemHost::connect().map_err(|e| Error::OtherError(e.to_string()))?;

    reconcile_gateway(&host, &desired).await?;
    let outcome = reconcile_external(&host, &net, &layout, ExternalMode::Attach).await?;

    let Some(facts) = outcome.facts else {
        info!("No external gateway facts to publish");
        return Ok(());
    };
    let node_name = get_my_node_name()?;
    let client = Client::try_default().await.map_err(Error::KubeError)?;
    publish(&nodes_api(client), &node_name, &facts).await?;

    match host.ovs.dpid(&layout.integration).await {
        Ok(dpid) => info!("Node {node_name} integration bridge DPID: {dpid:?}"),
        Err(e) => warn!("{e}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init().await;
    finish(run(args).await)
}
