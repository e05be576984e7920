use crate::commands::refresh::refresh_all;
use crate::context::Context;
use crate::declarations::Declarations;
use crate::planner;
use colored::Colorize;
use instaflow_cloud::{ActionType, Plan};
use std::path::Path;

pub fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "Planned actions:".bold());
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Replace => "-/+".yellow(),
            ActionType::Delete => "-".red(),
            ActionType::NoOp => "=".dimmed(),
        };
        let line = format!("  {} {}", marker, action.description);
        if action.action_type == ActionType::NoOp {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }
    println!();
    println!("Plan: {}", plan.summary().to_string().bold());
}

/// Show what `apply` would do without touching anything.
///
/// The state is refreshed in memory only.
pub async fn handle(ctx: &Context, file: &Path) -> anyhow::Result<()> {
    let declarations = Declarations::load(file)?;
    let mut state = ctx.state.load().await?;

    if !state.resources.is_empty() {
        println!("{}", "Refreshing state...".blue());
        refresh_all(ctx, &mut state).await?;
    }

    let plan = planner::plan(&declarations, &state)?;
    print_plan(&plan);
    if !plan.has_changes {
        println!("{}", "No changes. Infrastructure matches the declarations.".green());
    }
    Ok(())
}
