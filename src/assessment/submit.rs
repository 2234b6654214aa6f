use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assessment::{Assessment, AssessmentRepository, PendingAssessment};
use crate::error::SubmissionError;
use crate::input::InputValues;
use crate::scoring::score_inputs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRequest {
    pub devco: String,
    pub inputs: InputValues,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

/// Scores a submission against the active criteria, under the scoring rules
/// that version recorded, and persists it.
///
/// Nothing is written unless every active criterion evaluates.
pub fn submit<R: AssessmentRepository + ?Sized>(
    repo: &mut R,
    request: SubmissionRequest,
    default_actor: &str,
) -> Result<Assessment, SubmissionError> {
    let devco = request.devco.trim().to_string();
    if devco.is_empty() {
        return Err(SubmissionError::EmptyDevco);
    }
    let submitted_by = request
        .submitted_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_actor.to_string());

    let criteria = repo
        .load_criteria()
        .map_err(SubmissionError::Store)?
        .ok_or(SubmissionError::NoActiveCriteria)?;

    let card = match score_inputs(&criteria.set, &request.inputs) {
        Ok(card) => card,
        Err(err) => {
            warn!("rejected submission for {devco} under {}: {err}", criteria.version);
            return Err(err);
        }
    };

    let pending = PendingAssessment {
        devco,
        criteria_version: criteria.version,
        submitted_at: Utc::now(),
        submitted_by,
        inputs: request.inputs,
        card,
    };
    let id = repo
        .save_assessment(&pending)
        .map_err(SubmissionError::Store)?;
    info!(
        "assessment {id} for {} scored {:.4} ({}) under {}",
        pending.devco,
        pending.card.aggregate_score,
        pending.card.rating.as_deref().unwrap_or("unrated"),
        pending.criteria_version
    );
    Ok(Assessment::from_pending(id, pending))
}
