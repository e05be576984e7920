use crate::context::{Context, kind_rank};
use anyhow::bail;
use colored::Colorize;
use instaflow_cloud::ResourceState;
use std::cmp::Reverse;

/// Delete tracked resources, dependents before their clusters.
///
/// With `name`, only resources declared under that name are deleted.
pub async fn handle(ctx: &Context, name: Option<String>) -> anyhow::Result<()> {
    let lock = ctx.state.acquire_lock().await?;
    let mut state = ctx.state.load().await?;

    let mut targets: Vec<ResourceState> = state
        .resources
        .values()
        .filter(|r| name.as_deref().is_none_or(|n| r.name == n))
        .cloned()
        .collect();
    targets.sort_by_key(|r| Reverse(kind_rank(&r.kind)));

    if targets.is_empty() {
        lock.release().await?;
        match name {
            Some(name) => bail!("no tracked resource named '{name}'"),
            None => {
                println!("{}", "No resources tracked.".yellow());
                return Ok(());
            }
        }
    }

    let mut failures = Vec::new();
    for resource in targets {
        let key = resource.key();
        if ctx.is_cancelled() {
            failures.push(format!("{key}: interrupted"));
            continue;
        }

        println!(
            "{}",
            format!("■ Deleting {} ({})...", key, resource.stable_id)
                .red()
                .bold()
        );
        match ctx.delete(&resource.kind, &resource.stable_id).await {
            Ok(()) => {
                state.remove_resource(&key);
                ctx.state.save(&state).await?;
                println!("  ✓ Deleted");
            }
            Err(err) => {
                println!("  {} {}", "✗".red(), err);
                failures.push(format!("{key}: {err}"));
            }
        }
    }
    lock.release().await?;

    if failures.is_empty() {
        println!("{}", "✓ Destroy complete".green());
        Ok(())
    } else {
        bail!("failed to delete {} resource(s):\n  {}", failures.len(), failures.join("\n  "))
    }
}
