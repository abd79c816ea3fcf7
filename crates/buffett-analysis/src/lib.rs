//! Buffett-style fundamental screening: metric math, criteria evaluation,
//! score aggregation and the per-security analyzer.

pub mod analyzer;
pub mod criteria;
pub mod derived;
pub mod math;
pub mod scoring;

pub use analyzer::SecurityAnalyzer;
pub use criteria::{CriteriaThresholds, CriterionEvaluator};
pub use derived::derive_metrics;
pub use scoring::{CriterionWeights, ScoreAggregator};
