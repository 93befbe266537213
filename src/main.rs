//! Example binary demonstrating the halldyll_starter_ionet library.
//!
//! ## Usage
//!
//! 1. Put your io.net API key in `~/.ionet/api_key`
//! 2. Optionally create a `.env` file (`IONET_CLUSTER_NAME`, `IONET_INSTANCE_TYPE`,
//!    `IONET_REGION`, `IONET_VM_COUNT`, plus the library settings)
//! 3. Run: `cargo run -- up|status|info|down|stop`

#![allow(clippy::print_stdout)] // Allow println! in the binary example

use std::env;

use halldyll_starter_ionet::{
    DeploymentSpec, IonetClient, IonetClientConfig, IonetOrchestrator, IonetOrchestratorConfig,
    JsonFileMetadataStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let command = env::args().nth(1).unwrap_or_else(|| "up".to_string());
    let cluster = env::var("IONET_CLUSTER_NAME").unwrap_or_else(|_| "halldyll-head".to_string());

    // Load configuration from environment
    let client = IonetClient::new(&IonetClientConfig::from_env()?)?;
    let cfg = IonetOrchestratorConfig::from_env()?;
    let store = JsonFileMetadataStore::new(&cfg.state_dir);
    println!("Configuration loaded:");
    println!("  Cluster: {cluster}");
    println!("  State dir: {}", cfg.state_dir.display());

    let orchestrator = IonetOrchestrator::new(client, store, cfg);

    match command.as_str() {
        "up" => {
            let spec = DeploymentSpec::new(
                env::var("IONET_INSTANCE_TYPE").unwrap_or_else(|_| "ionet-h100-1x".to_string()),
                env::var("IONET_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                env::var("IONET_VM_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            );
            println!("\nEnsuring deployment is running...");
            let handle = orchestrator.ensure_running(&cluster, &spec).await?;
            println!("\nDeployment ready!");
            println!("  ID: {}", handle.deployment_id);
            println!("  Region: {}", handle.region);
            println!("  Created: {}", handle.created);
            print_view(&orchestrator.inspect(&cluster).await);
        }
        "status" => {
            let statuses = orchestrator.query_status(&cluster, false).await?;
            if statuses.is_empty() {
                println!("No deployments tracked for {cluster}");
            }
            for (id, entry) in statuses {
                println!("  {id}: {:?}", entry.status);
                if let Some(error) = entry.error {
                    println!("    error: {error}");
                }
            }
        }
        "info" => print_view(&orchestrator.inspect(&cluster).await),
        "down" => {
            let report = orchestrator.terminate(&cluster).await?;
            println!("Destroyed: {:?}", report.destroyed);
            for (id, error) in &report.failed {
                println!("  FAILED {id}: {error}");
            }
        }
        "stop" => orchestrator.stop(&cluster)?,
        other => return Err(format!("unknown command: {other} (expected up|status|info|down|stop)").into()),
    }

    Ok(())
}

fn print_view(view: &halldyll_starter_ionet::ClusterView) {
    if view.instances.is_empty() {
        println!("\nNo VMs discovered yet");
        return;
    }

    println!("\nInstances:");
    for instance in &view.instances {
        println!(
            "  {} [{}] internal={} external={}",
            instance.instance_id,
            instance.role.as_str(),
            instance.internal_ip,
            instance.external_ip.as_deref().unwrap_or("-"),
        );
    }

    // Show connection info
    if let Some(host) = view.head().and_then(|h| h.external_ip.as_deref()) {
        println!("\nSSH connection:");
        println!("  ssh -p 22 ubuntu@{host}");
    }
}
