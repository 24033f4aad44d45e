//! Command-line interface.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "drover",
    version,
    about = "Drive an AI coding agent through a verify-fix-review change lifecycle"
)]
pub struct Cli {
    /// Extra configuration file merged over .drover/config.yaml
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use the in-process mock agent instead of the app server
    #[arg(long, global = true)]
    pub mock_agent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize the .drover directory and a default configuration
    Init,

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Run the verify-fix loop for a task until verification passes
    Fix {
        task_id: Uuid,

        /// Override the configured repair-iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Run review rounds for a task until approved
    Review {
        task_id: Uuid,

        /// Override the configured review-round budget
        #[arg(long)]
        max_rounds: Option<u32>,
    },

    /// Manage autonomous runs
    #[command(subcommand)]
    Run(RunCommands),
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Create a task on a new branch
    Create {
        /// Branch name; must never have been used by another task
        #[arg(long)]
        branch: String,
    },

    /// List all tasks
    List,

    /// Show one task
    Show { task_id: Uuid },
}

#[derive(Debug, Subcommand)]
pub enum RunCommands {
    /// Start an autonomous run for an objective
    Start {
        objective: String,

        /// Stay attached and print status changes until the run finishes
        #[arg(long)]
        follow: bool,
    },

    /// List all runs
    List,

    /// Show one run and its execution plan
    Show { run_id: Uuid },

    /// Request cancellation of a run
    Cancel { run_id: Uuid },

    /// Show retained checkpoints for a task
    Checkpoints { task_id: Uuid },
}
