pub mod aggregate;
pub mod engine;
pub mod rating;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::criteria::Criterion;
use crate::formula::FormulaLimits;
use crate::input::QualitativeScale;

pub use aggregate::{aggregate, group_breakdown, pillar_breakdown};
pub use engine::{required_fields, score_inputs};
pub use rating::{check_bands, rate};
pub use validate::{validate_criteria_set, CompiledCriterion};

pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 1e-6;

/// Everything scoring needs besides the criteria and the inputs. Recorded on
/// each criteria set at import so later config edits never change how stored
/// assessments re-derive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOptions {
    pub weight_tolerance: f64,
    pub limits: FormulaLimits,
    pub scale: QualitativeScale,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            limits: FormulaLimits::default(),
            scale: QualitativeScale::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion_id: String,
    pub criterion_name: String,
    pub pillar: Option<String>,
    pub weight: f64,
    pub score: f64,
    pub weighted: f64,
    /// Label from the criterion's own bands, if it has any.
    pub rating: Option<String>,
}

impl CriterionScore {
    pub fn new(criterion: &Criterion, score: f64) -> Self {
        Self {
            criterion_id: criterion.id.clone(),
            criterion_name: criterion.name.clone(),
            pillar: criterion.pillar.clone(),
            weight: criterion.weight,
            score,
            weighted: criterion.weight * score,
            rating: rate(score, &criterion.bands).map(|band| band.label.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PillarScore {
    pub pillar: String,
    /// Sum of member criterion weights.
    pub weight: f64,
    pub score: f64,
    pub criteria: usize,
}

/// Weighted mean of the criteria under one performance signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalScore {
    pub signal: String,
    pub key_topic: Option<String>,
    pub weight: f64,
    pub score: f64,
    pub rating: Option<String>,
    pub criteria: usize,
}

/// Weighted mean of the performance signals under one key topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicScore {
    pub topic: String,
    pub weight: f64,
    pub score: f64,
    pub rating: Option<String>,
    /// Member signal names, in first-seen order.
    pub signals: Vec<String>,
}

/// Result of scoring one set of inputs against one criteria set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreCard {
    pub scores: Vec<CriterionScore>,
    pub aggregate_score: f64,
    /// `None` when the aggregate sits below the lowest band.
    pub rating: Option<String>,
    pub pillars: Vec<PillarScore>,
    pub signals: Vec<SignalScore>,
    pub topics: Vec<TopicScore>,
}
