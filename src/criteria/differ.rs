use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::criteria::schema::{
    format_bands, CriteriaSet, CriteriaVersion, Criterion, GroupBands, VersionedCriteria,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaVersionDiff {
    pub from: CriteriaVersion,
    pub to: CriteriaVersion,
    pub changes: Vec<CriterionChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionChange {
    pub criterion_id: String,
    pub change_type: ChangeType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    FormulaChanged,
    WeightChanged,
    BandsChanged,
    ActivationChanged,
    DescriptionChanged,
    GroupingChanged,
    AggregateBandsChanged,
    GroupBandsChanged,
    ScoringRulesChanged,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::FormulaChanged => "formula_changed",
            Self::WeightChanged => "weight_changed",
            Self::BandsChanged => "bands_changed",
            Self::ActivationChanged => "activation_changed",
            Self::DescriptionChanged => "description_changed",
            Self::GroupingChanged => "grouping_changed",
            Self::AggregateBandsChanged => "aggregate_bands_changed",
            Self::GroupBandsChanged => "group_bands_changed",
            Self::ScoringRulesChanged => "scoring_rules_changed",
        }
    }
}

/// Criterion-level changes between two sets, matched by criterion id.
pub fn diff_criteria(old_set: &CriteriaSet, new_set: &CriteriaSet) -> Vec<CriterionChange> {
    let old_map = old_set
        .criteria
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect::<BTreeMap<_, _>>();
    let new_map = new_set
        .criteria
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect::<BTreeMap<_, _>>();

    let mut ids = BTreeSet::new();
    ids.extend(old_map.keys().copied());
    ids.extend(new_map.keys().copied());

    let mut changes = Vec::new();
    if old_set.bands != new_set.bands {
        changes.push(change(
            "*",
            ChangeType::AggregateBandsChanged,
            Some(format_bands(&old_set.bands)),
            Some(format_bands(&new_set.bands)),
        ));
    }
    if old_set.scoring != new_set.scoring {
        changes.push(change(
            "*",
            ChangeType::ScoringRulesChanged,
            serde_json::to_string(&old_set.scoring).ok(),
            serde_json::to_string(&new_set.scoring).ok(),
        ));
    }
    diff_group_bands("signal", &old_set.signal_bands, &new_set.signal_bands, &mut changes);
    diff_group_bands("topic", &old_set.topic_bands, &new_set.topic_bands, &mut changes);
    for id in ids {
        match (old_map.get(id), new_map.get(id)) {
            (None, Some(new_c)) => changes.push(change(
                id,
                ChangeType::Added,
                None,
                Some(summarize(new_c)),
            )),
            (Some(old_c), None) => changes.push(change(
                id,
                ChangeType::Removed,
                Some(summarize(old_c)),
                None,
            )),
            (Some(old_c), Some(new_c)) => diff_pair(id, old_c, new_c, &mut changes),
            (None, None) => {}
        }
    }
    changes
}

fn diff_pair(id: &str, old_c: &Criterion, new_c: &Criterion, changes: &mut Vec<CriterionChange>) {
    if old_c.formula != new_c.formula {
        changes.push(change(
            id,
            ChangeType::FormulaChanged,
            Some(old_c.formula.clone()),
            Some(new_c.formula.clone()),
        ));
    }
    if old_c.weight != new_c.weight {
        changes.push(change(
            id,
            ChangeType::WeightChanged,
            Some(format!("{:.4}", old_c.weight)),
            Some(format!("{:.4}", new_c.weight)),
        ));
    }
    if old_c.bands != new_c.bands {
        changes.push(change(
            id,
            ChangeType::BandsChanged,
            Some(format_bands(&old_c.bands)),
            Some(format_bands(&new_c.bands)),
        ));
    }
    let grouping = |c: &Criterion| {
        [&c.pillar, &c.performance_signal, &c.key_topic]
            .map(|g| g.as_deref().unwrap_or("-"))
            .join(" / ")
    };
    if grouping(old_c) != grouping(new_c) {
        changes.push(change(
            id,
            ChangeType::GroupingChanged,
            Some(grouping(old_c)),
            Some(grouping(new_c)),
        ));
    }
    if old_c.active != new_c.active {
        changes.push(change(
            id,
            ChangeType::ActivationChanged,
            Some(old_c.active.to_string()),
            Some(new_c.active.to_string()),
        ));
    }
    if old_c.description != new_c.description || old_c.name != new_c.name {
        changes.push(change(
            id,
            ChangeType::DescriptionChanged,
            Some(format!("{}: {}", old_c.name, old_c.description)),
            Some(format!("{}: {}", new_c.name, new_c.description)),
        ));
    }
}

/// Reported under `signal:<name>` or `topic:<name>`.
fn diff_group_bands(
    level: &str,
    old: &GroupBands,
    new: &GroupBands,
    changes: &mut Vec<CriterionChange>,
) {
    let names = old.keys().chain(new.keys()).collect::<BTreeSet<_>>();
    for name in names {
        let (before, after) = (old.get(name), new.get(name));
        if before != after {
            changes.push(change(
                &format!("{level}:{name}"),
                ChangeType::GroupBandsChanged,
                before.map(|b| format_bands(b)),
                after.map(|b| format_bands(b)),
            ));
        }
    }
}

fn change(
    id: &str,
    change_type: ChangeType,
    old_value: Option<String>,
    new_value: Option<String>,
) -> CriterionChange {
    CriterionChange {
        criterion_id: id.to_string(),
        change_type,
        old_value,
        new_value,
    }
}

fn summarize(criterion: &Criterion) -> String {
    format!("{} (w={:.4}) = {}", criterion.name, criterion.weight, criterion.formula)
}

pub fn build_version_diff(old: &VersionedCriteria, new: &VersionedCriteria) -> CriteriaVersionDiff {
    let changes = if old.set.content_hash == new.set.content_hash {
        Vec::new()
    } else {
        diff_criteria(&old.set, &new.set)
    };
    CriteriaVersionDiff {
        from: old.version,
        to: new.version,
        changes,
    }
}

/// Line diff of the pretty-printed criteria, for `criteria diff --text`.
pub fn textual_diff(old_set: &CriteriaSet, new_set: &CriteriaSet) -> String {
    let old_str = serde_json::to_string_pretty(&old_set.criteria).unwrap_or_default();
    let new_str = serde_json::to_string_pretty(&new_set.criteria).unwrap_or_default();
    let diff = TextDiff::from_lines(&old_str, &new_str);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let symbol = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(symbol);
        out.push_str(change.value());
    }
    out
}
