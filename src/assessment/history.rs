use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{Assessment, AssessmentId};
use crate::input::{InputValue, InputValues};

const TREND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Steady,
    FirstSubmission,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistorySummary {
    pub devco: Option<String>,
    pub count: usize,
    pub latest_score: Option<f64>,
    pub latest_rating: Option<String>,
    pub best_score: Option<f64>,
    pub trend: Option<Trend>,
}

/// Summary over assessments ordered newest first.
pub fn summarize_history(devco: Option<&str>, assessments: &[Assessment]) -> HistorySummary {
    let latest = assessments.first();
    let trend = latest.map(|latest| match assessments.get(1) {
        None => Trend::FirstSubmission,
        Some(previous) => {
            let delta = latest.aggregate_score - previous.aggregate_score;
            if delta > TREND_EPSILON {
                Trend::Improving
            } else if delta < -TREND_EPSILON {
                Trend::Declining
            } else {
                Trend::Steady
            }
        }
    });
    HistorySummary {
        devco: devco.map(str::to_string),
        count: assessments.len(),
        latest_score: latest.map(|a| a.aggregate_score),
        latest_rating: latest.and_then(|a| a.rating.clone()),
        best_score: assessments
            .iter()
            .map(|a| a.aggregate_score)
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s)))),
        trend,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputChange {
    pub field: String,
    pub old_value: Option<InputValue>,
    pub new_value: Option<InputValue>,
}

/// Fields whose value differs between two submissions, sorted by field.
pub fn diff_inputs(older: &InputValues, newer: &InputValues) -> Vec<InputChange> {
    let fields = older
        .keys()
        .chain(newer.keys())
        .collect::<BTreeSet<_>>();
    fields
        .into_iter()
        .filter_map(|field| {
            let old_value = older.get(field);
            let new_value = newer.get(field);
            (old_value != new_value).then(|| InputChange {
                field: field.clone(),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldHistoryEntry {
    pub assessment_id: AssessmentId,
    pub devco: String,
    pub submitted_at: DateTime<Utc>,
    pub value: Option<InputValue>,
    pub change: String,
}

/// Change log of one input field across submissions ordered newest first.
///
/// Each entry is compared with the next older submission of the same DevCo.
pub fn field_history(assessments: &[Assessment], field: &str) -> Vec<FieldHistoryEntry> {
    assessments
        .iter()
        .enumerate()
        .map(|(idx, assessment)| {
            let value = assessment.inputs.get(field).cloned();
            let previous = assessments[idx + 1..]
                .iter()
                .find(|older| older.devco == assessment.devco);
            let change = match previous {
                None => "initial entry".to_string(),
                Some(older) => {
                    let old_value = older.inputs.get(field);
                    if old_value == value.as_ref() {
                        "no change".to_string()
                    } else {
                        format!("'{}' → '{}'", display(old_value), display(value.as_ref()))
                    }
                }
            };
            FieldHistoryEntry {
                assessment_id: assessment.id,
                devco: assessment.devco.clone(),
                submitted_at: assessment.submitted_at,
                value,
                change,
            }
        })
        .collect()
}

fn display(value: Option<&InputValue>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{diff_inputs, field_history, summarize_history, Trend};
    use crate::assessment::{Assessment, AssessmentId};
    use crate::criteria::CriteriaVersion;
    use crate::input::{InputValue, InputValues};

    fn inputs(pairs: &[(&str, f64)]) -> InputValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), InputValue::Numeric(*v)))
            .collect()
    }

    fn assessment(id: i64, devco: &str, score: f64, inputs: InputValues) -> Assessment {
        Assessment {
            id: AssessmentId(id),
            devco: devco.to_string(),
            criteria_version: CriteriaVersion(1),
            submitted_at: Utc::now(),
            submitted_by: "analyst".to_string(),
            inputs,
            scores: Vec::new(),
            aggregate_score: score,
            rating: Some(if score >= 50.0 { "Pass" } else { "Fail" }.to_string()),
            pillars: Vec::new(),
            signals: Vec::new(),
            topics: Vec::new(),
        }
    }

    #[test]
    fn summarizes_newest_first() {
        let history = vec![
            assessment(3, "d", 72.0, inputs(&[])),
            assessment(2, "d", 40.0, inputs(&[])),
            assessment(1, "d", 80.0, inputs(&[])),
        ];
        let summary = summarize_history(Some("d"), &history);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.latest_score, Some(72.0));
        assert_eq!(summary.latest_rating.as_deref(), Some("Pass"));
        assert_eq!(summary.best_score, Some(80.0));
        assert_eq!(summary.trend, Some(Trend::Improving));

        let empty = summarize_history(None, &[]);
        assert_eq!(empty.count, 0);
        assert!(empty.trend.is_none());
    }

    #[test]
    fn diffs_inputs_by_field() {
        let older = inputs(&[("a", 1.0), ("b", 2.0)]);
        let newer = inputs(&[("a", 1.0), ("b", 3.0), ("c", 4.0)]);
        let changes = diff_inputs(&older, &newer);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "b");
        assert_eq!(changes[1].field, "c");
        assert!(changes[1].old_value.is_none());
    }

    #[test]
    fn field_history_compares_within_devco() {
        let history = vec![
            assessment(4, "x", 0.0, inputs(&[("spi", 0.9)])),
            assessment(3, "y", 0.0, inputs(&[("spi", 0.5)])),
            assessment(2, "x", 0.0, inputs(&[("spi", 0.9)])),
            assessment(1, "x", 0.0, inputs(&[("spi", 0.7)])),
        ];
        let log = field_history(&history, "spi");
        let changes = log.iter().map(|e| e.change.as_str()).collect::<Vec<_>>();
        assert_eq!(
            changes,
            vec!["no change", "initial entry", "'0.7' → '0.9'", "initial entry"]
        );
    }
}
