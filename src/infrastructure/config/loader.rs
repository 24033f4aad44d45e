//! Hierarchical configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, `.drover/config.yaml`,
//! `.drover/local.yaml`, an explicit `--config` file, then `DROVER_*`
//! environment variables (nested keys separated by `__`, e.g.
//! `DROVER_FIX_LOOP__MAX_ITERATIONS=9`).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::{Config, MAX_COMMAND_TIMEOUT_SECS};

pub const CONFIG_FILE: &str = ".drover/config.yaml";
pub const LOCAL_CONFIG_FILE: &str = ".drover/local.yaml";
pub const ENV_PREFIX: &str = "DROVER_";

/// Load and validate the configuration.
pub fn load_config(explicit: Option<&Path>) -> DomainResult<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(CONFIG_FILE))
        .merge(Yaml::file(LOCAL_CONFIG_FILE));
    if let Some(path) = explicit {
        figment = figment.merge(Yaml::file(path));
    }
    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| DomainError::ValidationFailed(format!("configuration: {e}")))?;

    validate(&config)?;
    debug!(
        state_dir = %config.storage.state_dir,
        max_concurrent_runs = config.orchestrator.max_concurrent_runs,
        "Configuration loaded"
    );
    Ok(config)
}

fn validate(config: &Config) -> DomainResult<()> {
    if config.verify.command.is_empty() {
        return Err(DomainError::ValidationFailed(
            "verify.command must not be empty".to_string(),
        ));
    }
    if config.workspace.allowed_commands.is_empty() {
        return Err(DomainError::ValidationFailed(
            "workspace.allowed_commands must not be empty".to_string(),
        ));
    }
    if config.workspace.command_timeout_secs == 0
        || config.workspace.command_timeout_secs > MAX_COMMAND_TIMEOUT_SECS
    {
        return Err(DomainError::ValidationFailed(format!(
            "workspace.command_timeout_secs must be in 1..={MAX_COMMAND_TIMEOUT_SECS}"
        )));
    }
    if config.fix_loop.max_iterations == 0 {
        return Err(DomainError::ValidationFailed(
            "fix_loop.max_iterations must be at least 1".to_string(),
        ));
    }
    if config.fix_loop.stuck_threshold == 0 {
        return Err(DomainError::ValidationFailed(
            "fix_loop.stuck_threshold must be at least 1".to_string(),
        ));
    }
    if config.fix_loop.turn_budget == 0 {
        return Err(DomainError::ValidationFailed(
            "fix_loop.turn_budget must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.quality.threshold) {
        return Err(DomainError::ValidationFailed(
            "quality.threshold must be between 0 and 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.orchestrator.quality_threshold) {
        return Err(DomainError::ValidationFailed(
            "orchestrator.quality_threshold must be between 0 and 1".to_string(),
        ));
    }
    if config.review.max_rounds == 0 {
        return Err(DomainError::ValidationFailed(
            "review.max_rounds must be at least 1".to_string(),
        ));
    }
    if config.orchestrator.max_concurrent_runs == 0 {
        return Err(DomainError::ValidationFailed(
            "orchestrator.max_concurrent_runs must be at least 1".to_string(),
        ));
    }

    let mut names: Vec<&str> = config.quality.checks.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != config.quality.checks.len() {
        return Err(DomainError::ValidationFailed(
            "quality.checks names must be unique".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{QualityCheckConfig, QualityDimension};

    #[test]
    fn test_defaults_validate() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn test_zero_stuck_threshold_is_rejected() {
        let mut config = Config::default();
        config.fix_loop.stuck_threshold = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_excessive_command_timeout_is_rejected() {
        let mut config = Config::default();
        config.workspace.command_timeout_secs = MAX_COMMAND_TIMEOUT_SECS + 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_threshold_outside_unit_interval_is_rejected() {
        let mut config = Config::default();
        config.quality.threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_check_names_are_rejected() {
        let mut config = Config::default();
        let check = QualityCheckConfig {
            name: "lint-run".to_string(),
            dimension: QualityDimension::Lint,
            command: vec!["npm".to_string(), "run".to_string(), "lint".to_string()],
        };
        config.quality.checks = vec![check.clone(), check];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_yaml_overrides_defaults_via_figment() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir(".drover")?;
            jail.create_file(
                ".drover/config.yaml",
                "fix_loop:\n  max_iterations: 8\nreview:\n  max_rounds: 2\n",
            )?;
            let config = load_config(None).expect("config loads");
            assert_eq!(config.fix_loop.max_iterations, 8);
            assert_eq!(config.review.max_rounds, 2);
            assert_eq!(config.fix_loop.stuck_threshold, 3);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir(".drover")?;
            jail.create_file(".drover/config.yaml", "fix_loop:\n  turn_budget: 10\n")?;
            jail.set_env("DROVER_FIX_LOOP__TURN_BUDGET", "25");
            let config = load_config(None).expect("config loads");
            assert_eq!(config.fix_loop.turn_budget, 25);
            Ok(())
        });
    }
}
