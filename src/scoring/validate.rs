use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::criteria::{CriteriaSet, Criterion};
use crate::error::ConfigurationError;
use crate::formula::Formula;
use crate::scoring::rating::check_bands;

/// An active criterion with its formula already parsed.
#[derive(Debug, Clone)]
pub struct CompiledCriterion<'a> {
    pub criterion: &'a Criterion,
    pub formula: Formula,
}

/// Checks a criteria set against the scoring rules it recorded and compiles
/// its active formulas.
///
/// A set that fails here must neither be activated nor used for scoring.
pub fn validate_criteria_set(
    set: &CriteriaSet,
) -> Result<Vec<CompiledCriterion<'_>>, ConfigurationError> {
    let options = &set.scoring;
    let tolerance = options.weight_tolerance;
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(ConfigurationError::InvalidTolerance(tolerance));
    }

    let mut ids = BTreeSet::new();
    for criterion in &set.criteria {
        if !ids.insert(criterion.id.as_str()) {
            return Err(ConfigurationError::DuplicateCriterion(criterion.id.clone()));
        }
    }

    let active = set.active_criteria().collect::<Vec<_>>();
    if active.is_empty() {
        return Err(ConfigurationError::NoActiveCriteria);
    }

    let mut total = 0.0;
    for criterion in &active {
        if !criterion.weight.is_finite() || criterion.weight < 0.0 {
            return Err(ConfigurationError::InvalidWeight {
                criterion: criterion.name.clone(),
                weight: criterion.weight,
            });
        }
        total += criterion.weight;
    }
    if (total - 1.0).abs() > tolerance {
        return Err(ConfigurationError::WeightSum { total, tolerance });
    }

    check_bands("aggregate", &set.bands, true)?;
    check_groups(set)?;

    let mut compiled = Vec::with_capacity(active.len());
    for criterion in active {
        check_bands(&format!("criterion `{}`", criterion.name), &criterion.bands, false)?;
        let formula = Formula::parse(&criterion.formula, &options.limits).map_err(|source| {
            ConfigurationError::Formula {
                criterion: criterion.name.clone(),
                source,
            }
        })?;
        compiled.push(CompiledCriterion { criterion, formula });
    }
    debug!(
        "criteria set `{}` valid: {} active criteria, weight total {total}",
        set.label,
        compiled.len()
    );
    Ok(compiled)
}

/// Each performance signal belongs to at most one key topic, and group bands
/// only name groups that exist.
fn check_groups(set: &CriteriaSet) -> Result<(), ConfigurationError> {
    let mut topic_of: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for criterion in &set.criteria {
        let topic = criterion.key_topic.as_deref();
        let Some(signal) = criterion.performance_signal.as_deref() else {
            if topic.is_some() {
                return Err(ConfigurationError::TopicWithoutSignal(criterion.name.clone()));
            }
            continue;
        };
        match topic_of.get(signal) {
            None => {
                topic_of.insert(signal, topic);
            }
            Some(known) if *known == topic => {}
            Some(known) => {
                return Err(ConfigurationError::SignalTopicConflict {
                    signal: signal.to_string(),
                    first: known.unwrap_or("(none)").to_string(),
                    second: topic.unwrap_or("(none)").to_string(),
                });
            }
        }
    }
    let topics = topic_of.values().flatten().copied().collect::<BTreeSet<_>>();

    for (name, bands) in &set.signal_bands {
        if !topic_of.contains_key(name.as_str()) {
            return Err(ConfigurationError::UnknownGroup {
                level: "performance signal".to_string(),
                name: name.clone(),
            });
        }
        check_bands(&format!("signal `{name}`"), bands, true)?;
    }
    for (name, bands) in &set.topic_bands {
        if !topics.contains(name.as_str()) {
            return Err(ConfigurationError::UnknownGroup {
                level: "key topic".to_string(),
                name: name.clone(),
            });
        }
        check_bands(&format!("topic `{name}`"), bands, true)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::validate_criteria_set;
    use crate::criteria::{CriteriaSet, Criterion, RatingBand};
    use crate::error::{ConfigurationError, EvaluationError};
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

    fn set(criteria: Vec<Criterion>) -> CriteriaSet {
        CriteriaSet::with_hash(
            "test",
            "memory",
            criteria,
            vec![RatingBand::new(0.0, "Fail"), RatingBand::new(50.0, "Pass")],
        )
    }

    #[test]
    fn accepts_consistent_set() {
        let set = set(vec![criterion("a", 0.5, "x"), criterion("b", 0.5, "y * 2")]);
        let compiled = validate_criteria_set(&set).expect("valid");
        assert_eq!(compiled.len(), 2);
    }

    #[test]
    fn weights_must_sum_to_one_within_tolerance() {
        let close = set(vec![
            criterion("a", 0.5, "x"),
            criterion("b", 0.5 + 5e-7, "x"),
        ]);
        assert!(validate_criteria_set(&close).is_ok());

        let off = set(vec![criterion("a", 0.5, "x"), criterion("b", 0.4, "x")]);
        assert!(matches!(
            validate_criteria_set(&off),
            Err(ConfigurationError::WeightSum { .. })
        ));
    }

    #[test]
    fn inactive_criteria_do_not_count() {
        let mut retired = criterion("c", 0.3, "garbage (");
        retired.active = false;
        let set = set(vec![criterion("a", 0.5, "x"), criterion("b", 0.5, "x"), retired]);
        let compiled = validate_criteria_set(&set).expect("valid");
        assert_eq!(compiled.len(), 2);
    }

    #[test]
    fn rejects_negative_weight_duplicates_and_bad_formulas() {
        let negative = set(vec![criterion("a", 1.5, "x"), criterion("b", -0.5, "x")]);
        assert!(matches!(
            validate_criteria_set(&negative),
            Err(ConfigurationError::InvalidWeight { .. })
        ));

        let duplicate = set(vec![criterion("a", 0.5, "x"), criterion("a", 0.5, "x")]);
        assert_eq!(
            validate_criteria_set(&duplicate).err(),
            Some(ConfigurationError::DuplicateCriterion("a".to_string()))
        );

        let unsafe_formula = set(vec![criterion("a", 1.0, "eval(x)")]);
        assert_eq!(
            validate_criteria_set(&unsafe_formula).err(),
            Some(ConfigurationError::Formula {
                criterion: "A".to_string(),
                source: EvaluationError::UnknownFunction("eval".to_string()),
            })
        );
    }

    #[test]
    fn rejects_bad_bands() {
        let mut no_bands = set(vec![criterion("a", 1.0, "x")]);
        no_bands.bands.clear();
        assert!(matches!(
            validate_criteria_set(&no_bands),
            Err(ConfigurationError::EmptyBands { .. })
        ));

        let mut bad_criterion = criterion("a", 1.0, "x");
        bad_criterion.bands = vec![RatingBand::new(10.0, "Hi"), RatingBand::new(5.0, "Lo")];
        assert!(matches!(
            validate_criteria_set(&set(vec![bad_criterion])),
            Err(ConfigurationError::BandsNotAscending { index: 1, .. })
        ));
    }

    #[test]
    fn recorded_tolerance_must_be_usable() {
        for tolerance in [f64::NAN, f64::INFINITY, -1e-6] {
            let options = ScoringOptions {
                weight_tolerance: tolerance,
                ..ScoringOptions::default()
            };
            let broken = set(vec![criterion("a", 0.5, "x"), criterion("b", 0.1, "x")])
                .with_scoring(options);
            assert!(matches!(
                validate_criteria_set(&broken),
                Err(ConfigurationError::InvalidTolerance(_))
            ));
        }

        let loose = ScoringOptions {
            weight_tolerance: 0.2,
            ..ScoringOptions::default()
        };
        let set = set(vec![criterion("a", 0.5, "x"), criterion("b", 0.4, "x")]).with_scoring(loose);
        assert!(validate_criteria_set(&set).is_ok());
    }

    fn grouped(id: &str, signal: Option<&str>, topic: Option<&str>) -> Criterion {
        Criterion {
            performance_signal: signal.map(str::to_string),
            key_topic: topic.map(str::to_string),
            ..criterion(id, 0.5, "x")
        }
    }

    #[test]
    fn signals_belong_to_one_topic() {
        let orphan = set(vec![grouped("a", None, Some("Delivery")), grouped("b", None, None)]);
        assert_eq!(
            validate_criteria_set(&orphan).err(),
            Some(ConfigurationError::TopicWithoutSignal("A".to_string()))
        );

        let split = set(vec![
            grouped("a", Some("Schedule"), Some("Delivery")),
            grouped("b", Some("Schedule"), Some("Cost")),
        ]);
        assert!(matches!(
            validate_criteria_set(&split),
            Err(ConfigurationError::SignalTopicConflict { signal, .. }) if signal == "Schedule"
        ));

        let fine = set(vec![
            grouped("a", Some("Schedule"), Some("Delivery")),
            grouped("b", Some("Schedule"), Some("Delivery")),
        ]);
        assert!(validate_criteria_set(&fine).is_ok());
    }

    #[test]
    fn group_bands_must_name_known_groups() {
        let criteria = vec![
            grouped("a", Some("Schedule"), Some("Delivery")),
            grouped("b", Some("Safety"), None),
        ];
        let bands = || vec![RatingBand::new(0.0, "Low"), RatingBand::new(50.0, "High")];

        let known = set(criteria.clone()).with_group_bands(
            BTreeMap::from([("Safety".to_string(), bands())]),
            BTreeMap::from([("Delivery".to_string(), bands())]),
        );
        assert!(validate_criteria_set(&known).is_ok());

        let unknown = set(criteria.clone())
            .with_group_bands(BTreeMap::new(), BTreeMap::from([("Cost".to_string(), bands())]));
        assert!(matches!(
            validate_criteria_set(&unknown),
            Err(ConfigurationError::UnknownGroup { name, .. }) if name == "Cost"
        ));

        let descending = set(criteria).with_group_bands(
            BTreeMap::from([(
                "Schedule".to_string(),
                vec![RatingBand::new(50.0, "High"), RatingBand::new(0.0, "Low")],
            )]),
            BTreeMap::new(),
        );
        assert!(matches!(
            validate_criteria_set(&descending),
            Err(ConfigurationError::BandsNotAscending { .. })
        ));
    }

    #[test]
    fn empty_set_has_no_active_criteria() {
        assert_eq!(
            validate_criteria_set(&set(Vec::new())).err(),
            Some(ConfigurationError::NoActiveCriteria)
        );
    }
}
