use crate::context::Context;
use anyhow::{Context as _, bail};
use colored::Colorize;
use instaflow_cloud::StableId;

/// Start tracking a resource that already exists at the provider.
pub async fn handle(ctx: &Context, kind: &str, name: &str, id: &str) -> anyhow::Result<()> {
    let lock = ctx.state.acquire_lock().await?;
    let mut state = ctx.state.load().await?;

    if let Some(existing) = state.get(kind, name) {
        let key = existing.key();
        let tracked_id = existing.stable_id.clone();
        lock.release().await?;
        bail!("{key} is already tracked as {tracked_id}");
    }

    let imported = ctx
        .import(kind, name, &StableId::new(id))
        .await
        .with_context(|| format!("Failed to import {kind} {id}"));
    let resource = match imported {
        Ok(resource) => resource,
        Err(err) => {
            lock.release().await?;
            return Err(err);
        }
    };

    let key = resource.key();
    state.set_resource(resource);
    ctx.state.save(&state).await?;
    lock.release().await?;

    println!("{} Imported {} as {}", "✓".green(), id.cyan(), key.cyan());
    Ok(())
}
