//! CLI command handlers.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _};
use comfy_table::{presets::UTF8_FULL, Table};
use uuid::Uuid;

use crate::application::AppContext;
use crate::cli::{Cli, Commands, RunCommands, TaskCommands};
use crate::domain::models::Config;
use crate::infrastructure::config::load_config;
use crate::infrastructure::config::loader::CONFIG_FILE;

/// Dispatch the parsed command line.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Commands::Init) {
        return init();
    }

    let config = load_config(cli.config.as_deref())?;
    let ctx = AppContext::build(config, cli.mock_agent).await?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Task(cmd) => task(&ctx, cmd).await,
        Commands::Fix {
            task_id,
            max_iterations,
        } => fix(&ctx, task_id, max_iterations).await,
        Commands::Review {
            task_id,
            max_rounds,
        } => review(&ctx, task_id, max_rounds).await,
        Commands::Run(cmd) => run(&ctx, cmd).await,
    }
}

fn init() -> anyhow::Result<()> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        println!("{CONFIG_FILE} already exists, leaving it untouched");
    } else {
        let defaults = Config::default();
        std::fs::create_dir_all(".drover")?;
        std::fs::write(config_path, serde_yaml::to_string(&defaults)?)?;
        println!("Wrote {CONFIG_FILE}");
        std::fs::create_dir_all(&defaults.storage.state_dir)?;
        std::fs::create_dir_all(&defaults.workspace.workspaces_dir)?;
    }
    println!("Drover is ready. Start with: drover run start \"<objective>\"");
    Ok(())
}

async fn task(ctx: &AppContext, cmd: TaskCommands) -> anyhow::Result<()> {
    match cmd {
        TaskCommands::Create { branch } => {
            let task = ctx.registry.create_task(None, &branch).await?;
            println!("Created task {} on branch {}", task.id, task.branch);
        }
        TaskCommands::List => {
            let tasks = ctx.registry.list().await;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Branch", "Status", "Turns", "Updated"]);
            for task in tasks {
                table.add_row(vec![
                    task.id.to_string(),
                    task.branch.clone(),
                    task.status.to_string(),
                    format!("{}/{}", task.turns_used, task.turn_budget),
                    task.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ]);
            }
            println!("{table}");
        }
        TaskCommands::Show { task_id } => {
            let task = ctx
                .registry
                .get(task_id)
                .await
                .with_context(|| format!("task {task_id} not found"))?;
            println!("Task:      {}", task.id);
            println!("Branch:    {}", task.branch);
            println!("Status:    {}", task.status);
            println!("Turns:     {}/{}", task.turns_used, task.turn_budget);
            if let Some(workspace) = &task.workspace_path {
                println!("Workspace: {workspace}");
            }
            if let Some(thread) = task.thread_id {
                println!("Thread:    {thread}");
            }
            if let Some(failure) = &task.failure {
                println!(
                    "Failure:   {}{}",
                    failure.reason,
                    if failure.guardrail { " (guardrail)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

async fn fix(ctx: &AppContext, task_id: Uuid, max_iterations: Option<u32>) -> anyhow::Result<()> {
    let result = ctx.fix_loop.fix_until_green(task_id, max_iterations).await?;
    if result.success {
        println!(
            "Verification green after {} repair iteration(s)",
            result.iterations
        );
        Ok(())
    } else {
        let reason = result
            .abort
            .map_or("unknown", |a| a.as_str());
        for failure in result.last_verify.prioritized_failures() {
            println!(
                "  [{}] {}{}",
                failure.category.as_str(),
                failure
                    .file
                    .as_deref()
                    .map(|f| format!("{f}: "))
                    .unwrap_or_default(),
                failure.message
            );
        }
        bail!(
            "fix loop aborted ({reason}) after {} iteration(s)",
            result.iterations
        );
    }
}

async fn review(ctx: &AppContext, task_id: Uuid, max_rounds: Option<u32>) -> anyhow::Result<()> {
    let result = ctx
        .review_loop
        .review_until_approved(task_id, max_rounds)
        .await?;
    for finding in &result.last_report.findings {
        println!(
            "  [{}] {}{}",
            finding.severity.as_str(),
            finding
                .file
                .as_deref()
                .map(|f| format!("{f}: "))
                .unwrap_or_default(),
            finding.message
        );
    }
    if result.approved {
        println!("Approved after {} round(s)", result.rounds);
        Ok(())
    } else {
        bail!("not approved; {} round(s) exhausted", result.rounds);
    }
}

async fn run(ctx: &AppContext, cmd: RunCommands) -> anyhow::Result<()> {
    match cmd {
        RunCommands::Start { objective, follow } => {
            let run_id = ctx.orchestrator.start(objective).await?;
            println!("Started run {run_id}");
            if follow {
                follow_run(ctx, run_id).await?;
            }
        }
        RunCommands::List => {
            let runs = ctx.orchestrator.list().await;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Status", "Objective", "PR"]);
            for run in runs {
                table.add_row(vec![
                    run.id.to_string(),
                    run.status.to_string(),
                    truncate(&run.objective, 50),
                    run.pr_url.unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        RunCommands::Show { run_id } => {
            let run = ctx
                .orchestrator
                .get(run_id)
                .await
                .with_context(|| format!("run {run_id} not found"))?;
            println!("Run:       {}", run.id);
            println!("Objective: {}", run.objective);
            println!("Status:    {}", run.status);
            println!("Task:      {}", run.task_id);
            if let Some(quality) = &run.quality {
                println!("Quality:   {:.1}/100", quality.overall);
            }
            if let Some(commit) = &run.commit {
                println!("Commit:    {commit}");
            }
            if let Some(pr_url) = &run.pr_url {
                println!("PR:        {pr_url}");
            }
            if let Some(approved) = run.review_approved {
                println!("Review:    {}", if approved { "approved" } else { "not approved" });
            }
            if let Some(failure) = &run.failure {
                println!("Failure:   {}", failure.reason);
            }
            if let Some(plan) = ctx.orchestrator.plan(run_id).await {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Phase", "Status", "Fix iterations", "Error"]);
                for phase in &plan.phases {
                    table.add_row(vec![
                        phase.kind.as_str().to_string(),
                        format!("{:?}", phase.status).to_lowercase(),
                        phase.fix_iterations.to_string(),
                        phase.error.clone().unwrap_or_default(),
                    ]);
                }
                println!("{table}");
            }
        }
        RunCommands::Cancel { run_id } => {
            let run = ctx.orchestrator.cancel(run_id).await?;
            if run.status.is_terminal() {
                println!("Run {run_id} already {}", run.status);
            } else {
                println!("Cancellation requested; honored at the next phase boundary");
            }
        }
        RunCommands::Checkpoints { task_id } => {
            let checkpoints = ctx.orchestrator.checkpoints(task_id).await;
            if checkpoints.is_empty() {
                println!("No checkpoints for task {task_id}");
            }
            for checkpoint in checkpoints {
                println!(
                    "{}  {}",
                    checkpoint.at.format("%Y-%m-%d %H:%M:%S"),
                    checkpoint.description
                );
            }
        }
    }
    Ok(())
}

async fn follow_run(ctx: &AppContext, run_id: Uuid) -> anyhow::Result<()> {
    let mut last_status = None;
    loop {
        let Some(run) = ctx.orchestrator.get(run_id).await else {
            bail!("run {run_id} disappeared");
        };
        if last_status != Some(run.status) {
            println!("  status: {}", run.status);
            last_status = Some(run.status);
        }
        if run.status.is_terminal() {
            if let Some(failure) = &run.failure {
                println!("  reason: {}", failure.reason);
            }
            if let Some(pr_url) = &run.pr_url {
                println!("  pr: {pr_url}");
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    }
}
