use crate::context::Context;
use colored::Colorize;
use instaflow_cloud::{GlobalState, ReadOutcome};

/// Re-read every tracked resource, dropping the ones that are gone.
///
/// Returns the number of resources that reported drift.
pub async fn refresh_all(ctx: &Context, state: &mut GlobalState) -> anyhow::Result<usize> {
    let mut drifted = 0;
    let keys: Vec<String> = state.resources.keys().cloned().collect();

    for key in keys {
        let Some(mut resource) = state.get_resource(&key).cloned() else {
            continue;
        };
        match ctx.read(&mut resource).await? {
            ReadOutcome::Gone => {
                println!(
                    "  {} {} ({}) no longer exists",
                    "-".red(),
                    key.cyan(),
                    resource.stable_id
                );
                state.remove_resource(&key);
            }
            ReadOutcome::Present(report) => {
                if report.has_drift() {
                    drifted += 1;
                    println!(
                        "  {} {} drifted: {}",
                        "~".yellow(),
                        key.cyan(),
                        report.drifted().join(", ")
                    );
                } else {
                    tracing::debug!(resource = %key, "Resource is in sync");
                }
                state.set_resource(resource);
            }
        }
    }
    Ok(drifted)
}

pub async fn handle(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", "Refreshing state...".blue());

    let lock = ctx.state.acquire_lock().await?;
    let mut state = ctx.state.load().await?;
    let tracked = state.resources.len();

    let outcome = refresh_all(ctx, &mut state).await;
    if outcome.is_ok() {
        ctx.state.save(&state).await?;
    }
    lock.release().await?;
    let drifted = outcome?;

    println!(
        "{} {} tracked, {} gone, {} drifted",
        "✓".green(),
        tracked,
        tracked - state.resources.len(),
        drifted
    );
    Ok(())
}
