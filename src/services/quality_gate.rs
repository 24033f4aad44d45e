//! Quality gate - weighted composite scoring over registered checks.
//!
//! Each dimension either has a registered check (its outcome supplies the
//! score and pass flag) or it doesn't, in which case it scores neutral and
//! counts as passed. A check that errors out is treated as missing data for
//! its dimension, not as a failing check.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{DimensionScore, QualityDimension, QualityScore, NEUTRAL_SCORE};
use crate::domain::ports::QualityCheck;

/// Runs every registered quality check and folds the outcomes into one
/// composite score.
pub struct QualityGate {
    checks: Vec<Arc<dyn QualityCheck>>,
}

impl QualityGate {
    pub fn new(checks: Vec<Arc<dyn QualityCheck>>) -> Self {
        Self { checks }
    }

    /// Names of the registered checks, in registration order.
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Score the task across all dimensions, running the checks
    /// concurrently. Dimensions without a check, and dimensions whose
    /// check errored, score neutral and pass.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn score(&self, task_id: Uuid) -> DomainResult<QualityScore> {
        let dimensions = join_all(QualityDimension::ALL.into_iter().map(|dimension| async move {
            let Some(check) = self.checks.iter().find(|c| c.dimension() == dimension) else {
                return neutral(dimension);
            };
            match check.run(task_id).await {
                Ok(outcome) => DimensionScore {
                    dimension,
                    score: outcome.score.clamp(0.0, 100.0),
                    passed: outcome.passed,
                    available: true,
                },
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        check = check.name(),
                        dimension = dimension.as_str(),
                        error = %e,
                        "Quality check errored, scoring dimension neutral"
                    );
                    neutral(dimension)
                }
            }
        }))
        .await;

        let composite = QualityScore::from_dimensions(dimensions);
        info!(task_id = %task_id, overall = composite.overall, "Quality score computed");
        Ok(composite)
    }
}

fn neutral(dimension: QualityDimension) -> DimensionScore {
    DimensionScore {
        dimension,
        score: NEUTRAL_SCORE,
        passed: true,
        available: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::CheckOutcome;
    use async_trait::async_trait;

    struct FixedCheck {
        name: &'static str,
        dimension: QualityDimension,
        outcome: Result<CheckOutcome, String>,
    }

    #[async_trait]
    impl QualityCheck for FixedCheck {
        fn name(&self) -> &str {
            self.name
        }
        fn dimension(&self) -> QualityDimension {
            self.dimension
        }
        async fn run(&self, _: Uuid) -> DomainResult<CheckOutcome> {
            self.outcome
                .clone()
                .map_err(DomainError::ValidationFailed)
        }
    }

    fn check(
        name: &'static str,
        dimension: QualityDimension,
        outcome: CheckOutcome,
    ) -> Arc<dyn QualityCheck> {
        Arc::new(FixedCheck {
            name,
            dimension,
            outcome: Ok(outcome),
        })
    }

    #[tokio::test]
    async fn test_no_checks_scores_all_neutral() {
        let gate = QualityGate::new(vec![]);
        let score = gate.score(Uuid::new_v4()).await.unwrap();
        assert!((score.overall - 50.0).abs() < 1e-9);
        assert!(score.dimensions.iter().all(|d| !d.available && d.passed));
    }

    #[tokio::test]
    async fn test_mixed_checks_and_neutral_dimensions() {
        let gate = QualityGate::new(vec![
            check("eval-suite", QualityDimension::Eval, CheckOutcome::passing(80.0)),
            check("ci-status", QualityDimension::Ci, CheckOutcome::passing(100.0)),
        ]);
        let score = gate.score(Uuid::new_v4()).await.unwrap();
        // eval 80*0.30 + ci 100*0.25 + neutral 50 on the other three
        let expected = 80.0 * 0.30 + 100.0 * 0.25 + 50.0 * (0.20 + 0.15 + 0.10);
        assert!((score.overall - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_check_blocks_gate_despite_high_composite() {
        let gate = QualityGate::new(vec![
            check("eval-suite", QualityDimension::Eval, CheckOutcome::passing(100.0)),
            check("ci-status", QualityDimension::Ci, CheckOutcome::passing(100.0)),
            check("lint-run", QualityDimension::Lint, CheckOutcome::passing(100.0)),
            check("arch-rules", QualityDimension::Architecture, CheckOutcome::passing(100.0)),
            check("doc-density", QualityDimension::Docs, CheckOutcome::failing(50.0)),
        ]);
        let score = gate.score(Uuid::new_v4()).await.unwrap();
        assert!(score.overall >= 90.0);
        assert!(!score.gate_passed(0.7));
    }

    #[tokio::test]
    async fn test_erroring_check_scores_neutral_and_passes() {
        let gate = QualityGate::new(vec![Arc::new(FixedCheck {
            name: "broken",
            dimension: QualityDimension::Ci,
            outcome: Err("command not found".to_string()),
        }) as Arc<dyn QualityCheck>]);
        let score = gate.score(Uuid::new_v4()).await.unwrap();
        let ci = score
            .dimensions
            .iter()
            .find(|d| d.dimension == QualityDimension::Ci)
            .unwrap();
        assert!((ci.score - NEUTRAL_SCORE).abs() < 1e-9);
        assert!(ci.passed);
        assert!(!ci.available);
    }

    #[tokio::test]
    async fn test_scores_are_clamped_to_range() {
        let gate = QualityGate::new(vec![check(
            "overeager",
            QualityDimension::Eval,
            CheckOutcome::passing(250.0),
        )]);
        let score = gate.score(Uuid::new_v4()).await.unwrap();
        let eval = score
            .dimensions
            .iter()
            .find(|d| d.dimension == QualityDimension::Eval)
            .unwrap();
        assert!((eval.score - 100.0).abs() < 1e-9);
    }
}
