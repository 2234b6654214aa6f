pub mod history;
pub mod submit;
pub mod verify;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{CriteriaSet, CriteriaVersion, VersionedCriteria};
use crate::input::InputValues;
use crate::scoring::{
    group_breakdown, pillar_breakdown, CriterionScore, PillarScore, ScoreCard, SignalScore,
    TopicScore,
};

pub use history::{diff_inputs, field_history, summarize_history, HistorySummary, InputChange};
pub use submit::{submit, SubmissionRequest};
pub use verify::{verify_assessment, verify_stored, VerificationReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AssessmentId(pub i64);

impl Display for AssessmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted, append-only assessment record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub id: AssessmentId,
    pub devco: String,
    pub criteria_version: CriteriaVersion,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
    pub inputs: InputValues,
    pub scores: Vec<CriterionScore>,
    pub aggregate_score: f64,
    pub rating: Option<String>,
    /// Derived from `scores`, never stored.
    #[serde(default)]
    pub pillars: Vec<PillarScore>,
    /// Derived from `scores` and the criteria version's grouping.
    #[serde(default)]
    pub signals: Vec<SignalScore>,
    #[serde(default)]
    pub topics: Vec<TopicScore>,
}

impl Assessment {
    pub fn from_pending(id: AssessmentId, pending: PendingAssessment) -> Self {
        let PendingAssessment {
            devco,
            criteria_version,
            submitted_at,
            submitted_by,
            inputs,
            card,
        } = pending;
        Self {
            id,
            devco,
            criteria_version,
            submitted_at,
            submitted_by,
            inputs,
            scores: card.scores,
            aggregate_score: card.aggregate_score,
            rating: card.rating,
            pillars: card.pillars,
            signals: card.signals,
            topics: card.topics,
        }
    }

    /// Rebuilds the breakdowns a loaded record does not store. Without its
    /// criteria set only pillars can be derived.
    pub(crate) fn with_derived_breakdowns(mut self, set: Option<&CriteriaSet>) -> Self {
        self.pillars = pillar_breakdown(&self.scores);
        if let Some(set) = set {
            (self.signals, self.topics) = group_breakdown(&self.scores, set);
        }
        self
    }
}

/// A fully scored submission that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAssessment {
    pub devco: String,
    pub criteria_version: CriteriaVersion,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
    pub inputs: InputValues,
    pub card: ScoreCard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CriteriaImported,
    CriteriaActivated,
    AssessmentSubmitted,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CriteriaImported => "criteria_imported",
            Self::CriteriaActivated => "criteria_activated",
            Self::AssessmentSubmitted => "assessment_submitted",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "criteria_imported" => Ok(Self::CriteriaImported),
            "criteria_activated" => Ok(Self::CriteriaActivated),
            "assessment_submitted" => Ok(Self::AssessmentSubmitted),
            other => Err(anyhow::anyhow!("unknown audit action: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: AuditAction,
    pub actor: String,
    pub assessment_id: Option<AssessmentId>,
    pub criteria_version: Option<CriteriaVersion>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Storage seam used by submission and verification.
pub trait AssessmentRepository {
    /// The active criteria version, if one has been activated.
    fn load_criteria(&self) -> Result<Option<VersionedCriteria>>;

    fn criteria_version(&self, version: CriteriaVersion) -> Result<Option<VersionedCriteria>>;

    /// Writes the assessment, its inputs, scores and audit entry atomically.
    fn save_assessment(&mut self, pending: &PendingAssessment) -> Result<AssessmentId>;

    /// Newest first.
    fn list_assessments(&self, devco: Option<&str>, limit: usize) -> Result<Vec<Assessment>>;

    fn load_assessment(&self, id: AssessmentId) -> Result<Option<Assessment>>;
}
