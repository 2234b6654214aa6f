use std::collections::BTreeSet;

use tracing::debug;

use crate::criteria::CriteriaSet;
use crate::error::{ConfigurationError, SubmissionError};
use crate::input::InputValues;
use crate::scoring::{
    aggregate, group_breakdown, pillar_breakdown, rate, validate_criteria_set, CriterionScore,
    ScoreCard,
};

/// Scores `inputs` against every active criterion of `set`, under the scoring
/// rules the set recorded when it was imported.
///
/// The first criterion that fails to evaluate aborts the whole scoring; no
/// partial score card is ever produced.
pub fn score_inputs(
    set: &CriteriaSet,
    inputs: &InputValues,
) -> Result<ScoreCard, SubmissionError> {
    let compiled = validate_criteria_set(set)?;

    let mut scores = Vec::with_capacity(compiled.len());
    for entry in &compiled {
        let score = entry
            .formula
            .evaluate(inputs, &set.scoring.scale)
            .map_err(|source| SubmissionError::Evaluation {
                criterion: entry.criterion.name.clone(),
                source,
            })?;
        debug!("{} = {score}", entry.criterion.id);
        scores.push(CriterionScore::new(entry.criterion, score));
    }

    let aggregate_score = aggregate(&scores);
    let rating = rate(aggregate_score, &set.bands).map(|band| band.label.clone());
    let pillars = pillar_breakdown(&scores);
    let (signals, topics) = group_breakdown(&scores, set);
    Ok(ScoreCard {
        scores,
        aggregate_score,
        rating,
        pillars,
        signals,
        topics,
    })
}

/// Union of fields referenced by the active formulas, sorted.
pub fn required_fields(set: &CriteriaSet) -> Result<BTreeSet<String>, ConfigurationError> {
    let compiled = validate_criteria_set(set)?;
    Ok(compiled
        .iter()
        .flat_map(|entry| entry.formula.fields())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{required_fields, score_inputs};
    use crate::criteria::{CriteriaSet, Criterion, RatingBand};
    use crate::error::{ConfigurationError, EvaluationError, SubmissionError};
    use crate::input::{InputValue, InputValues, QualitativeScale};
    use crate::scoring::ScoringOptions;

    fn criterion(id: &str, weight: f64, formula: &str) -> Criterion {
        Criterion {
            id: id.to_string(),
            name: id.to_uppercase(),
            weight,
            formula: formula.to_string(),
            bands: Vec::new(),
            pillar: None,
            performance_signal: None,
            key_topic: None,
            description: String::new(),
            active: true,
        }
    }

    fn pass_fail(criteria: Vec<Criterion>) -> CriteriaSet {
        CriteriaSet::with_hash(
            "pilot",
            "memory",
            criteria,
            vec![RatingBand::new(0.0, "Fail"), RatingBand::new(50.0, "Pass")],
        )
    }

    fn inputs(pairs: &[(&str, f64)]) -> InputValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), InputValue::Numeric(*v)))
            .collect()
    }

    #[test]
    fn weighted_aggregate_and_rating() {
        let set = pass_fail(vec![criterion("a", 0.5, "a"), criterion("b", 0.5, "b")]);
        let card = score_inputs(&set, &inputs(&[("a", 80.0), ("b", 60.0)])).expect("score");
        assert_eq!(card.scores.len(), 2);
        assert!((card.aggregate_score - 70.0).abs() < 1e-9);
        assert_eq!(card.rating.as_deref(), Some("Pass"));
    }

    #[test]
    fn aggregate_on_band_boundary_takes_that_band() {
        let set = pass_fail(vec![criterion("a", 1.0, "a")]);
        let card = score_inputs(&set, &inputs(&[("a", 50.0)])).expect("score");
        assert_eq!(card.rating.as_deref(), Some("Pass"));
    }

    #[test]
    fn below_lowest_band_is_unrated() {
        let set = pass_fail(vec![criterion("a", 1.0, "a - 100")]);
        let card = score_inputs(&set, &inputs(&[("a", 10.0)])).expect("score");
        assert!(card.rating.is_none());
    }

    #[test]
    fn criterion_bands_rate_each_score() {
        let mut a = criterion("a", 1.0, "a");
        a.bands = vec![RatingBand::new(0.0, "Low"), RatingBand::new(90.0, "High")];
        a.pillar = Some("P&M".to_string());
        let card = score_inputs(&pass_fail(vec![a]), &inputs(&[("a", 95.0)])).expect("score");
        assert_eq!(card.scores[0].rating.as_deref(), Some("High"));
        assert_eq!(card.pillars.len(), 1);
        assert!((card.pillars[0].score - 95.0).abs() < 1e-9);
    }

    #[test]
    fn missing_input_names_field_and_criterion() {
        let set = pass_fail(vec![criterion("a", 0.5, "a"), criterion("b", 0.5, "min(a, y) * 2")]);
        let err = score_inputs(&set, &inputs(&[("a", 3.0)])).expect_err("missing");
        match err {
            SubmissionError::Evaluation { criterion, source } => {
                assert_eq!(criterion, "B");
                assert_eq!(source, EvaluationError::MissingField("y".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_set_is_a_configuration_error() {
        let set = pass_fail(vec![criterion("a", 0.9, "a")]);
        let err = score_inputs(&set, &inputs(&[("a", 1.0)])).expect_err("weights");
        assert!(matches!(
            err,
            SubmissionError::Configuration(ConfigurationError::WeightSum { .. })
        ));
    }

    #[test]
    fn qualitative_answers_use_the_recorded_scale() {
        let set = pass_fail(vec![criterion("a", 1.0, "done")]);
        let answer: InputValues =
            [("done".to_string(), InputValue::Text("Yes".to_string()))].into();
        let card = score_inputs(&set, &answer).expect("score");
        assert!((card.aggregate_score - 100.0).abs() < 1e-9);

        let lenient = ScoringOptions {
            scale: QualitativeScale::new([("yes".to_string(), 80.0)].into()),
            ..ScoringOptions::default()
        };
        let card = score_inputs(&set.with_scoring(lenient), &answer).expect("score");
        assert!((card.aggregate_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn score_card_carries_signals_and_topics() {
        let mut a = criterion("a", 0.5, "a");
        a.performance_signal = Some("Schedule".to_string());
        a.key_topic = Some("Delivery".to_string());
        let mut b = criterion("b", 0.5, "b");
        b.performance_signal = Some("Schedule".to_string());
        b.key_topic = Some("Delivery".to_string());
        let card = score_inputs(&pass_fail(vec![a, b]), &inputs(&[("a", 90.0), ("b", 30.0)]))
            .expect("score");
        assert_eq!(card.signals.len(), 1);
        assert_eq!(card.signals[0].criteria, 2);
        assert!((card.signals[0].score - 60.0).abs() < 1e-9);
        assert_eq!(card.topics.len(), 1);
        assert_eq!(card.topics[0].signals, vec!["Schedule".to_string()]);
        assert_eq!(card.topics[0].rating.as_deref(), Some("Pass"));
    }

    #[test]
    fn lists_required_fields() {
        let set = pass_fail(vec![
            criterion("a", 0.5, "[Earned Value] / [Planned Value]"),
            criterion("b", 0.5, "if(done, 100, x)"),
        ]);
        let fields = required_fields(&set).expect("fields");
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec!["Earned Value", "Planned Value", "done", "x"]
        );
    }
}
