//! Configuration tree for drover.

use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Workspace gateway configuration
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Agent app-server configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Verification configuration
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Verify-fix loop configuration
    #[serde(default)]
    pub fix_loop: FixLoopConfig,

    /// Guardrail configuration
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Quality gate configuration
    #[serde(default)]
    pub quality: QualityConfig,

    /// Review loop configuration
    #[serde(default)]
    pub review: ReviewConfig,

    /// Autonomous orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Directory holding the snapshot files
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Checkpoints retained per task (FIFO eviction)
    #[serde(default = "default_checkpoint_capacity")]
    pub checkpoint_capacity: usize,

    /// Learning records retained overall (FIFO eviction)
    #[serde(default = "default_learning_capacity")]
    pub learning_capacity: usize,
}

fn default_state_dir() -> String {
    ".drover/state".to_string()
}

const fn default_checkpoint_capacity() -> usize {
    20
}

const fn default_learning_capacity() -> usize {
    200
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            checkpoint_capacity: default_checkpoint_capacity(),
            learning_capacity: default_learning_capacity(),
        }
    }
}

/// Workspace gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceConfig {
    /// Source repository the workspaces are cloned from
    #[serde(default = "default_source_repo")]
    pub source_repo: String,

    /// Directory task workspaces are provisioned under
    #[serde(default = "default_workspaces_dir")]
    pub workspaces_dir: String,

    /// Allow-listed command names runnable inside a workspace
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_source_repo() -> String {
    ".".to_string()
}

fn default_workspaces_dir() -> String {
    ".drover/workspaces".to_string()
}

fn default_allowed_commands() -> Vec<String> {
    ["git", "gh", "cargo", "npm", "npx", "pnpm", "make", "python3"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_command_timeout() -> u64 {
    120
}

/// Hard upper bound on the per-command timeout.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            source_repo: default_source_repo(),
            workspaces_dir: default_workspaces_dir(),
            allowed_commands: default_allowed_commands(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Agent app-server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// App-server executable
    #[serde(default = "default_agent_program")]
    pub program: String,

    /// Extra arguments passed to the app server
    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout for awaiting a turn's terminal notification, in seconds
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
}

fn default_agent_program() -> String {
    "agent-app-server".to_string()
}

const fn default_turn_timeout() -> u64 {
    900
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: Vec::new(),
            turn_timeout_secs: default_turn_timeout(),
        }
    }
}

/// Verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerifyConfig {
    /// Verification command argv run inside the workspace
    #[serde(default = "default_verify_command")]
    pub command: Vec<String>,

    /// Bytes of raw output retained as the unparsed tail
    #[serde(default = "default_raw_tail_bytes")]
    pub raw_tail_bytes: usize,
}

fn default_verify_command() -> Vec<String> {
    vec!["npm".to_string(), "run".to_string(), "verify".to_string()]
}

const fn default_raw_tail_bytes() -> usize {
    4096
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: default_verify_command(),
            raw_tail_bytes: default_raw_tail_bytes(),
        }
    }
}

/// Verify-fix loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FixLoopConfig {
    /// Default repair-iteration budget
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive identical diff fingerprints before aborting as stuck
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,

    /// Lifetime agent-turn budget per task
    #[serde(default = "default_turn_budget")]
    pub turn_budget: u32,
}

const fn default_max_iterations() -> u32 {
    5
}

const fn default_stuck_threshold() -> u32 {
    3
}

const fn default_turn_budget() -> u32 {
    40
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stuck_threshold: default_stuck_threshold(),
            turn_budget: default_turn_budget(),
        }
    }
}

/// Guardrail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardrailConfig {
    /// Protected paths an agent turn must never touch
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
}

fn default_protected_paths() -> Vec<String> {
    // Root package manifest, type-check config, lint config, coordination file.
    vec![
        "package.json".to_string(),
        "tsconfig.json".to_string(),
        ".eslintrc.json".to_string(),
        "COORDINATION.md".to_string(),
    ]
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            protected_paths: default_protected_paths(),
        }
    }
}

/// One registered quality check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityCheckConfig {
    /// Check name, unique within the registry
    pub name: String,
    /// Dimension the check scores
    pub dimension: crate::domain::models::quality::QualityDimension,
    /// Command argv run inside the workspace
    pub command: Vec<String>,
}

/// Quality gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityConfig {
    /// Composite threshold on a 0-1 scale
    #[serde(default = "default_quality_threshold")]
    pub threshold: f64,

    /// Registered checks; dimensions without a check score neutral
    #[serde(default)]
    pub checks: Vec<QualityCheckConfig>,
}

const fn default_quality_threshold() -> f64 {
    0.7
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_quality_threshold(),
            checks: Vec::new(),
        }
    }
}

/// Review loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReviewConfig {
    /// Whether autonomous runs finish with a review loop
    #[serde(default = "default_review_enabled")]
    pub enabled: bool,

    /// Maximum review rounds
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

const fn default_review_enabled() -> bool {
    true
}

const fn default_max_rounds() -> u32 {
    3
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: default_review_enabled(),
            max_rounds: default_max_rounds(),
        }
    }
}

/// Autonomous orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Fix-loop budget per phase
    #[serde(default = "default_max_phase_fixes")]
    pub max_phase_fixes: u32,

    /// Consecutive phase failures that trip the circuit breaker
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Quality threshold for the validating stage, 0-1 scale;
    /// 0 skips the gate
    #[serde(default)]
    pub quality_threshold: f64,

    /// Concurrent autonomous runs allowed
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

const fn default_max_phase_fixes() -> u32 {
    3
}

const fn default_breaker_threshold() -> u32 {
    2
}

const fn default_max_concurrent_runs() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_phase_fixes: default_max_phase_fixes(),
            breaker_threshold: default_breaker_threshold(),
            quality_threshold: 0.0,
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: pretty or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
