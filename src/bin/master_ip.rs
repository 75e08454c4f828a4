use bootstrap::cluster::{master_ip, nodes_api};
use bootstrap::telemetry;
use clap::Parser;
use kube::Client;

/// Print the InternalIP of the control-plane node
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _args = Args::parse();
    telemetry::init().await;

    let client = Client::try_default().await?;
    let ip = master_ip(&nodes_api(client))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no control-plane node with an InternalIP"))?;
    println!("{ip}");
    Ok(())
}
