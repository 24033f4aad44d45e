//! Quality gate score model.

use serde::{Deserialize, Serialize};

/// Score assigned to a dimension with no available check data. Neutral
/// rather than zero so new tasks are not penalized for lacking history.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// A quality dimension with a fixed composite weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Eval,
    Ci,
    Lint,
    Architecture,
    Docs,
}

impl QualityDimension {
    /// All dimensions, in weight order.
    pub const ALL: [QualityDimension; 5] = [
        Self::Eval,
        Self::Ci,
        Self::Lint,
        Self::Architecture,
        Self::Docs,
    ];

    /// Fixed composite weight; weights sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Eval => 0.30,
            Self::Ci => 0.25,
            Self::Lint => 0.20,
            Self::Architecture => 0.15,
            Self::Docs => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eval => "eval",
            Self::Ci => "ci",
            Self::Lint => "lint",
            Self::Architecture => "architecture",
            Self::Docs => "docs",
        }
    }
}

/// Outcome of one quality sub-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    /// 0-100 dimension score
    pub score: f64,
    /// Opaque check-specific detail
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl CheckOutcome {
    pub fn passing(score: f64) -> Self {
        Self {
            passed: true,
            score,
            detail: serde_json::Value::Null,
        }
    }

    pub fn failing(score: f64) -> Self {
        Self {
            passed: false,
            score,
            detail: serde_json::Value::Null,
        }
    }
}

/// Score for a single dimension as seen by the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: QualityDimension,
    /// 0-100
    pub score: f64,
    /// Pass flag of the underlying check; true for missing-data dimensions
    /// (only executed checks can fail the gate)
    pub passed: bool,
    /// Whether check data was available for this dimension
    pub available: bool,
}

/// Composite weighted quality score across all dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub dimensions: Vec<DimensionScore>,
    /// Weighted sum on the 0-100 scale
    pub overall: f64,
}

impl QualityScore {
    /// Build the composite from per-dimension scores.
    pub fn from_dimensions(dimensions: Vec<DimensionScore>) -> Self {
        let overall = dimensions
            .iter()
            .map(|d| d.score * d.dimension.weight())
            .sum();
        Self { dimensions, overall }
    }

    /// Gate decision: all executed checks passed AND the composite meets
    /// the threshold (0-1 scale). The two-part rule keeps low-weight
    /// passing dimensions from mathematically offsetting one failing
    /// high-weight dimension.
    pub fn gate_passed(&self, threshold: f64) -> bool {
        let all_checks_passed = self.dimensions.iter().all(|d| d.passed);
        all_checks_passed && self.overall >= threshold * 100.0
    }
}
