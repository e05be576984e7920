use crate::commands::plan::print_plan;
use crate::commands::refresh::refresh_all;
use crate::context::{Context, kind_rank};
use crate::declarations::Declarations;
use crate::planner::{self, Pending};
use anyhow::{Context as _, bail};
use colored::Colorize;
use instaflow_cloud::{Action, ActionType, ApplyResult, GlobalState, Reconciler, ResourceState};
use instaflow_cloud_instaclustr::{cluster, firewall, vpc_peering};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

pub async fn handle(ctx: &Context, file: &Path) -> anyhow::Result<()> {
    let declarations = Declarations::load(file)?;

    let lock = ctx.state.acquire_lock().await?;
    let mut state = ctx.state.load().await?;
    let outcome = apply(ctx, &declarations, &mut state).await;
    let saved = ctx.state.save(&state).await;
    lock.release().await?;
    saved?;

    let result = outcome?;
    println!();
    if result.is_success() {
        println!(
            "{} Apply complete: {} succeeded ({} ms)",
            "✓".green(),
            result.succeeded.len(),
            result.duration_ms
        );
        Ok(())
    } else {
        for failure in &result.failed {
            println!(
                "  {} {}: {}",
                "✗".red(),
                failure.key.cyan(),
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        bail!(
            "{} of {} actions failed",
            result.failed.len(),
            result.failed.len() + result.succeeded.len()
        )
    }
}

async fn apply(
    ctx: &Context,
    declarations: &Declarations,
    state: &mut GlobalState,
) -> anyhow::Result<ApplyResult> {
    if !state.resources.is_empty() {
        println!("{}", "Refreshing state...".blue());
        refresh_all(ctx, state).await?;
        ctx.state.save(state).await?;
    }

    let plan = planner::plan(declarations, state)?;
    print_plan(&plan);

    let started = Instant::now();
    let mut result = ApplyResult::new();
    if !plan.has_changes {
        println!("{}", "No changes. Infrastructure matches the declarations.".green());
        return Ok(result);
    }

    // Dependents go first, so peerings and rules never outlive their cluster.
    let mut removals: Vec<&Action> = plan
        .actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::Delete | ActionType::Replace))
        .collect();
    removals.sort_by_key(|a| Reverse(kind_rank(&a.kind)));

    let mut blocked = BTreeSet::new();
    for action in removals {
        let key = action.key();
        if ctx.is_cancelled() {
            result.add_failure(key.clone(), "interrupted".to_string());
            blocked.insert(key);
            continue;
        }
        let Some(resource) = state.get_resource(&key).cloned() else {
            continue;
        };

        println!();
        println!(
            "{}",
            format!("■ Deleting {} ({})...", key, resource.stable_id)
                .red()
                .bold()
        );
        match ctx.delete(&resource.kind, &resource.stable_id).await {
            Ok(()) => {
                state.remove_resource(&key);
                ctx.state.save(state).await?;
                println!("  ✓ Deleted");
                if action.action_type == ActionType::Delete {
                    result.add_success(key, format!("deleted {}", resource.stable_id));
                }
            }
            Err(err) => {
                println!("  {} {}", "✗".red(), err);
                result.add_failure(key.clone(), err.to_string());
                blocked.insert(key);
            }
        }
    }

    let mut creations: Vec<&Action> = plan
        .actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::Create | ActionType::Replace))
        .filter(|a| !blocked.contains(&a.key()))
        .collect();
    creations.sort_by_key(|a| kind_rank(&a.kind));

    for action in creations {
        let key = action.key();
        if ctx.is_cancelled() {
            result.add_failure(key, "interrupted".to_string());
            continue;
        }

        println!();
        println!("{}", format!("■ Creating {key}...").green().bold());
        match create(ctx, declarations, state, action).await {
            Ok(resource) => {
                println!("  ✓ Created {}", resource.stable_id.to_string().cyan());
                let message = format!("created {}", resource.stable_id);
                state.set_resource(resource);
                ctx.state.save(state).await?;
                result.add_success(key, message);
            }
            Err(err) => {
                println!("  {} {:#}", "✗".red(), err);
                result.add_failure(key, format!("{err:#}"));
            }
        }
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

/// Create one declared resource, resolving its cluster from the current state.
async fn create(
    ctx: &Context,
    declarations: &Declarations,
    state: &GlobalState,
    action: &Action,
) -> anyhow::Result<ResourceState> {
    let name = action.name.as_str();
    let settled = Pending::new();

    match action.kind.as_str() {
        cluster::KIND => {
            let decl = declarations
                .clusters
                .get(name)
                .with_context(|| format!("cluster '{name}' is not declared"))?;
            let tracked = ctx.clusters.create(&decl.to_spec(name)).await?;
            Ok(ResourceState::from_tracked(cluster::KIND, name, &tracked)?)
        }
        firewall::KIND => {
            let decl = declarations
                .firewall_rules
                .get(name)
                .with_context(|| format!("firewall rule '{name}' is not declared"))?;
            let cluster_id = planner::resolve_cluster_id(decl.cluster_ref()?, state, &settled)
                .with_context(|| format!("cluster of firewall rule '{name}' is not available"))?;
            let tracked = ctx.firewall_rules.create(&decl.to_spec(&cluster_id)).await?;
            Ok(ResourceState::from_tracked(firewall::KIND, name, &tracked)?)
        }
        vpc_peering::KIND => {
            let decl = declarations
                .vpc_peerings
                .get(name)
                .with_context(|| format!("VPC peering '{name}' is not declared"))?;
            let datacenter_id =
                planner::resolve_datacenter_id(decl.cluster_ref()?, state, &settled).with_context(
                    || format!("cluster datacenter of VPC peering '{name}' is not available"),
                )?;
            let tracked = ctx.peerings.create(&decl.to_spec(&datacenter_id)).await?;
            Ok(ResourceState::from_tracked(vpc_peering::KIND, name, &tracked)?)
        }
        other => bail!("unknown resource kind '{other}'"),
    }
}
