use crate::context::Context;
use colored::Colorize;
use instaflow_cloud_instaclustr::{ClusterIps, cluster};

/// Print the node addresses of a cluster.
///
/// `target` is a tracked cluster name, a cluster id, or the cluster's
/// name at the provider.
pub async fn handle(ctx: &Context, target: &str, json: bool) -> anyhow::Result<()> {
    let state = ctx.state.load().await?;
    let ips = match state.get(cluster::KIND, target) {
        Some(resource) => ClusterIps::read(ctx.client.as_ref(), resource.stable_id.as_str()).await?,
        None => ClusterIps::lookup(ctx.client.as_ref(), target).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ips)?);
        return Ok(());
    }

    println!("{}", format!("Cluster {}", ips.cluster_id).bold());
    if let Some(cidr) = &ips.cidr_block {
        println!("  CIDR: {}", cidr.cyan());
    }
    println!("  Public:");
    for ip in &ips.public_ips {
        println!("    • {ip}");
    }
    println!("  Private:");
    for ip in &ips.private_ips {
        println!("    • {ip}");
    }
    Ok(())
}
