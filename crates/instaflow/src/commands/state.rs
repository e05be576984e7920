use colored::Colorize;
use instaflow_cloud::StateManager;

/// List the tracked resources.
pub async fn handle(manager: &StateManager) -> anyhow::Result<()> {
    let state = manager.load().await?;

    if state.resources.is_empty() {
        println!("{}", "No resources tracked.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Tracked resources ({}):", state.resources.len()).bold()
    );
    for resource in state.resources.values() {
        println!(
            "  • {} {} {}",
            resource.key().cyan(),
            resource.stable_id,
            format!("(updated {})", resource.updated_at.format("%Y-%m-%d %H:%M:%S")).dimmed()
        );
    }
    Ok(())
}
