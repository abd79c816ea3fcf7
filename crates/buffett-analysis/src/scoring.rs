use std::collections::HashMap;

use screener_core::{Criterion, CriterionId, ScreenerError};
use serde::{Deserialize, Serialize};

/// Maximum points a single criterion can earn before weighting
pub const CRITERION_MAX_POINTS: f64 = 10.0;

const WEIGHT_TOTAL: f64 = 100.0;
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Per-criterion weights. Always sum to 100, including when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<CriterionId, f64>", into = "HashMap<CriterionId, f64>")]
pub struct CriterionWeights {
    weights: HashMap<CriterionId, f64>,
}

impl CriterionWeights {
    /// Validate and build a weight table.
    pub fn new(weights: HashMap<CriterionId, f64>) -> Result<Self, ScreenerError> {
        if let Some((id, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(ScreenerError::ConfigurationError(format!(
                "weight for '{}' must be a non-negative number, got {}",
                id.key(),
                w
            )));
        }
        let total: f64 = weights.values().sum();
        if (total - WEIGHT_TOTAL).abs() > WEIGHT_TOLERANCE {
            return Err(ScreenerError::ConfigurationError(format!(
                "criterion weights must sum to {}, got {}",
                WEIGHT_TOTAL, total
            )));
        }
        Ok(Self { weights })
    }

    pub fn get(&self, id: CriterionId) -> Option<f64> {
        self.weights.get(&id).copied()
    }
}

impl TryFrom<HashMap<CriterionId, f64>> for CriterionWeights {
    type Error = ScreenerError;

    fn try_from(weights: HashMap<CriterionId, f64>) -> Result<Self, Self::Error> {
        Self::new(weights)
    }
}

impl From<CriterionWeights> for HashMap<CriterionId, f64> {
    fn from(weights: CriterionWeights) -> Self {
        weights.weights
    }
}

impl Default for CriterionWeights {
    fn default() -> Self {
        let weights = HashMap::from([
            (CriterionId::ProfitableYears, 12.0),
            (CriterionId::PeRatio, 12.0),
            (CriterionId::Roic, 12.0),
            (CriterionId::Roe, 10.0),
            (CriterionId::DividendYield, 5.0),
            (CriterionId::EpsGrowth, 10.0),
            (CriterionId::RevenueGrowth, 8.0),
            (CriterionId::NetDebtToEbitda, 10.0),
            (CriterionId::NetMargin, 8.0),
            (CriterionId::FcfMargin, 8.0),
            (CriterionId::MarginOfSafety, 5.0),
        ]);
        Self { weights }
    }
}

/// Combines evaluated criteria into a raw count and a weighted 0-100 score
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator {
    weights: CriterionWeights,
}

impl ScoreAggregator {
    pub fn new(weights: CriterionWeights) -> Self {
        Self { weights }
    }

    /// Number of passed criteria
    pub fn raw_score(&self, criteria: &[Criterion]) -> u32 {
        criteria.iter().filter(|c| c.pass()).count() as u32
    }

    /// Points (0-10) earned by a single criterion.
    ///
    /// Sub-aspect fulfillment, when present, takes precedence over the boolean outcome.
    pub fn criterion_points(criterion: &Criterion) -> f64 {
        match criterion.sub_aspects() {
            Some(sub) => sub.fulfilled as f64 / sub.total as f64 * CRITERION_MAX_POINTS,
            None if criterion.pass() => CRITERION_MAX_POINTS,
            None => 0.0,
        }
    }

    /// Weighted compatibility in percent. A criterion without a configured weight is an error.
    pub fn weighted_score(&self, criteria: &[Criterion]) -> Result<f64, ScreenerError> {
        criteria.iter().try_fold(0.0, |acc, c| -> Result<f64, ScreenerError> {
            let weight = self.weights.get(c.id()).ok_or_else(|| {
                ScreenerError::ConfigurationError(format!(
                    "no weight configured for criterion '{}'",
                    c.id().key()
                ))
            })?;
            Ok(acc + Self::criterion_points(c) / CRITERION_MAX_POINTS * weight)
        })
    }

    /// `(raw_score, weighted_score)`
    pub fn aggregate(&self, criteria: &[Criterion]) -> Result<(u32, f64), ScreenerError> {
        let weighted = self.weighted_score(criteria)?;
        Ok((self.raw_score(criteria), weighted))
    }
}
