use std::process::ExitCode;

use bootstrap::cluster::{nodes_api, pod_cidr};
use bootstrap::config::{DEFAULT_CONFIG_FILE, NodeConfig};
use bootstrap::desired::{BridgeLayout, DesiredState, compute};
use bootstrap::helper::get_my_node_name;
use bootstrap::host::SystemHost;
use bootstrap::reconcile::{ExternalMode, reconcile_external, reconcile_gateway};
use bootstrap::{Error, Result, finish, telemetry};
use clap::Parser;
use kube::Client;
use tracing::*;

/// Bring up the gateway bridges and routes, moving the uplink onto the
/// external bridge
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Node network config file
    #[arg(short, long, env = "KBR_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

async fn run(args: Args) -> Result<()> {
    let config = NodeConfig::load(&args.config)?;
    let node_name = get_my_node_name()?;
    let client = Client::try_default().await.map_err(Error::KubeError)?;
    let assigned = pod_cidr(&nodes_api(client), &node_name).await?;

    let net = compute(&config, assigned.as_deref())?;
    let layout = BridgeLayout::default();
    let desired = DesiredState::new(&net, &layout)?;
    let host = SystemHost::connect().map_err(|e| Error::OtherError(e.to_string()))?;

    reconcile_gateway(&host, &desired).await?;
    let outcome = reconcile_external(&host, &net, &layout, ExternalMode::Migrate).await?;
    if let Some(facts) = &outcome.facts {
        info!("External bridge {} carries {}", layout.external, facts.bridge_ip);
    }

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
