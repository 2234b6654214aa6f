use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::assessment::{Assessment, AssessmentId, AssessmentRepository};
use crate::criteria::{CriteriaVersion, VersionedCriteria};
use crate::scoring::score_inputs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreMismatch {
    pub criterion_id: String,
    pub stored: Option<f64>,
    pub recomputed: Option<f64>,
}

/// Outcome of re-deriving a stored assessment from its inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationReport {
    pub assessment_id: AssessmentId,
    pub criteria_version: CriteriaVersion,
    pub matches: bool,
    pub stored_aggregate: f64,
    pub recomputed_aggregate: Option<f64>,
    pub stored_rating: Option<String>,
    pub recomputed_rating: Option<String>,
    pub mismatches: Vec<ScoreMismatch>,
    /// Set when the stored inputs no longer score at all.
    pub error: Option<String>,
}

/// Re-scores `assessment` with `criteria` and compares every number exactly.
///
/// Scoring uses the rules recorded on the criteria version, so edits to the
/// config file after submission cannot make a record drift.
pub fn verify_assessment(
    assessment: &Assessment,
    criteria: &VersionedCriteria,
) -> VerificationReport {
    let mut report = VerificationReport {
        assessment_id: assessment.id,
        criteria_version: assessment.criteria_version,
        matches: false,
        stored_aggregate: assessment.aggregate_score,
        recomputed_aggregate: None,
        stored_rating: assessment.rating.clone(),
        recomputed_rating: None,
        mismatches: Vec::new(),
        error: None,
    };
    if criteria.version != assessment.criteria_version {
        report.error = Some(format!(
            "assessment was scored under {}, not {}",
            assessment.criteria_version, criteria.version
        ));
        return report;
    }

    let card = match score_inputs(&criteria.set, &assessment.inputs) {
        Ok(card) => card,
        Err(err) => {
            report.error = Some(err.to_string());
            return report;
        }
    };

    for stored in &assessment.scores {
        let recomputed = card
            .scores
            .iter()
            .find(|s| s.criterion_id == stored.criterion_id);
        if recomputed.map(|s| s.score) != Some(stored.score) {
            report.mismatches.push(ScoreMismatch {
                criterion_id: stored.criterion_id.clone(),
                stored: Some(stored.score),
                recomputed: recomputed.map(|s| s.score),
            });
        }
    }
    for recomputed in &card.scores {
        if !assessment
            .scores
            .iter()
            .any(|s| s.criterion_id == recomputed.criterion_id)
        {
            report.mismatches.push(ScoreMismatch {
                criterion_id: recomputed.criterion_id.clone(),
                stored: None,
                recomputed: Some(recomputed.score),
            });
        }
    }

    report.matches = report.mismatches.is_empty()
        && card.aggregate_score == assessment.aggregate_score
        && card.rating == assessment.rating
        && card.signals == assessment.signals
        && card.topics == assessment.topics;
    report.recomputed_aggregate = Some(card.aggregate_score);
    report.recomputed_rating = card.rating;
    if !report.matches {
        warn!("assessment {} does not re-derive", assessment.id);
    }
    report
}

/// Loads an assessment and the criteria version it records, then verifies it.
pub fn verify_stored<R: AssessmentRepository + ?Sized>(
    repo: &R,
    id: AssessmentId,
) -> Result<Option<VerificationReport>> {
    let Some(assessment) = repo.load_assessment(id)? else {
        return Ok(None);
    };
    let criteria = repo
        .criteria_version(assessment.criteria_version)?
        .ok_or_else(|| {
            anyhow!(
                "criteria {} referenced by assessment {id} is missing",
                assessment.criteria_version
            )
        })?;
    Ok(Some(verify_assessment(&assessment, &criteria)))
}

#[cfg(test)]
mod tests {
    use super::{verify_assessment, verify_stored};
    use crate::assessment::{
        submit, Assessment, AssessmentId, AssessmentRepository, SubmissionRequest,
    };
    use crate::criteria::{CriteriaSet, Criterion, RatingBand};
    use crate::input::{InputValue, QualitativeScale};
    use crate::scoring::ScoringOptions;
    use crate::store::AssessmentStore;

    fn criterion(id: &str, weight: f64, formula: &str) -> Criterion {
        Criterion {
            id: id.to_string(),
            name: id.to_string(),
            weight,
            formula: formula.to_string(),
            bands: Vec::new(),
            pillar: Some("P&M".to_string()),
            performance_signal: Some(id.to_uppercase()),
            key_topic: Some("Delivery".to_string()),
            description: String::new(),
            active: true,
        }
    }

    fn seeded_store() -> (AssessmentStore, AssessmentId) {
        let mut store = AssessmentStore::open_in_memory().expect("store");
        let set = CriteriaSet::with_hash(
            "pilot",
            "memory",
            vec![
                criterion("spi", 0.3, "[Earned Value] / [Planned Value] * 100"),
                criterion("quality", 0.7, "if(done, 100, round(x / 3, 2))"),
            ],
            vec![RatingBand::new(0.0, "Fail"), RatingBand::new(50.0, "Pass")],
        );
        let version = store.import_criteria(&set, "admin").expect("import");
        store.activate_criteria(version, "admin").expect("activate");
        let inputs = [
            ("Earned Value", InputValue::Numeric(1234.5678)),
            ("Planned Value", InputValue::Numeric(1300.1)),
            ("done", InputValue::Text("No".to_string())),
            ("x", InputValue::Numeric(0.1 + 0.2)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let assessment = submit(
            &mut store,
            SubmissionRequest {
                devco: "devco-7".to_string(),
                inputs,
                submitted_by: Some("reviewer".to_string()),
            },
            "analyst",
        )
        .expect("submit");
        (store, assessment.id)
    }

    #[test]
    fn stored_assessment_re_derives_exactly() {
        let (store, id) = seeded_store();
        let report = verify_stored(&store, id)
            .expect("verify")
            .expect("present");
        assert!(report.matches, "{report:?}");
        assert!(report.mismatches.is_empty());
        assert_eq!(report.recomputed_aggregate, Some(report.stored_aggregate));
    }

    #[test]
    fn tampered_score_is_reported() {
        let (store, id) = seeded_store();
        let mut assessment = store.load_assessment(id).expect("load").expect("present");
        assessment.scores[0].score += 1e-9;
        let criteria = store
            .criteria_version(assessment.criteria_version)
            .expect("criteria")
            .expect("present");
        let report = verify_assessment(&assessment, &criteria);
        assert!(!report.matches);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].criterion_id, "spi");
    }

    #[test]
    fn later_scale_change_does_not_break_stored_assessments() {
        let (mut store, id) = seeded_store();
        let before = store.load_assessment(id).expect("load").expect("present");

        let lenient = ScoringOptions {
            scale: QualitativeScale::new([("no".to_string(), 80.0)].into()),
            ..ScoringOptions::default()
        };
        let mut next = store
            .active_criteria()
            .expect("load")
            .expect("active")
            .set
            .with_scoring(lenient);
        next.label = "pilot-2".to_string();
        let version = store.import_criteria(&next, "admin").expect("import");
        store.activate_criteria(version, "admin").expect("activate");

        let report = verify_stored(&store, id).expect("verify").expect("present");
        assert!(report.matches, "{report:?}");
        assert_eq!(report.recomputed_aggregate, Some(before.aggregate_score));

        let again = submit(
            &mut store,
            SubmissionRequest {
                devco: "devco-7".to_string(),
                inputs: before.inputs.clone(),
                submitted_by: None,
            },
            "analyst",
        )
        .expect("submit");
        assert_eq!(again.criteria_version, version);
        let quality = |a: &Assessment| {
            a.scores
                .iter()
                .find(|s| s.criterion_id == "quality")
                .map(|s| s.score)
        };
        assert_eq!(quality(&before), Some(0.1));
        assert_eq!(quality(&again), Some(100.0));
        assert!(verify_stored(&store, again.id).expect("verify").expect("present").matches);
    }

    #[test]
    fn mismatched_signal_breakdown_fails_verification() {
        let (store, id) = seeded_store();
        let mut assessment = store.load_assessment(id).expect("load").expect("present");
        assessment.topics[0].score += 1.0;
        let criteria = store
            .criteria_version(assessment.criteria_version)
            .expect("criteria")
            .expect("present");
        let report = verify_assessment(&assessment, &criteria);
        assert!(!report.matches);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn unknown_assessment_is_none() {
        let (store, _) = seeded_store();
        assert!(verify_stored(&store, AssessmentId(999))
            .expect("verify")
            .is_none());
    }
}
