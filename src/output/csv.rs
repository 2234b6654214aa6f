use anyhow::Result;

use crate::assessment::{Assessment, AuditLogEntry};
use crate::criteria::schema::{format_bands, GroupBands};
use crate::criteria::VersionedCriteria;

/// Writes criteria in the same column layout `criteria import` reads.
pub fn criteria_to_csv(criteria: &VersionedCriteria) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "criterion",
        "weight",
        "formula",
        "bands",
        "pillar",
        "performance_signal",
        "key_topic",
        "signal_bands",
        "topic_bands",
        "description",
        "active",
    ])?;
    let set = &criteria.set;
    let group_bands = |bands: &GroupBands, group: &Option<String>| {
        group
            .as_ref()
            .and_then(|name| bands.get(name))
            .map(|b| format_bands(b))
            .unwrap_or_default()
    };
    for c in &set.criteria {
        writer.write_record([
            c.id.clone(),
            c.name.clone(),
            c.weight.to_string(),
            c.formula.clone(),
            format_bands(&c.bands),
            c.pillar.clone().unwrap_or_default(),
            c.performance_signal.clone().unwrap_or_default(),
            c.key_topic.clone().unwrap_or_default(),
            group_bands(&set.signal_bands, &c.performance_signal),
            group_bands(&set.topic_bands, &c.key_topic),
            c.description.clone(),
            c.active.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn assessment_to_csv(assessment: &Assessment) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "assessment_id",
        "devco",
        "criteria_version",
        "criterion_id",
        "criterion",
        "pillar",
        "weight",
        "score",
        "weighted",
        "rating",
    ])?;
    for s in &assessment.scores {
        writer.write_record([
            assessment.id.to_string(),
            assessment.devco.clone(),
            assessment.criteria_version.0.to_string(),
            s.criterion_id.clone(),
            s.criterion_name.clone(),
            s.pillar.clone().unwrap_or_default(),
            s.weight.to_string(),
            s.score.to_string(),
            s.weighted.to_string(),
            s.rating.clone().unwrap_or_default(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn history_to_csv(assessments: &[Assessment]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "assessment_id",
        "submitted_at",
        "devco",
        "criteria_version",
        "aggregate_score",
        "rating",
        "submitted_by",
    ])?;
    for a in assessments {
        writer.write_record([
            a.id.to_string(),
            a.submitted_at.to_rfc3339(),
            a.devco.clone(),
            a.criteria_version.0.to_string(),
            a.aggregate_score.to_string(),
            a.rating.clone().unwrap_or_default(),
            a.submitted_by.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn audit_to_csv(entries: &[AuditLogEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "recorded_at",
        "action",
        "actor",
        "assessment_id",
        "criteria_version",
        "detail",
    ])?;
    for e in entries {
        writer.write_record([
            e.id.to_string(),
            e.recorded_at.to_rfc3339(),
            e.action.to_string(),
            e.actor.clone(),
            e.assessment_id.map(|id| id.to_string()).unwrap_or_default(),
            e.criteria_version
                .map(|v| v.0.to_string())
                .unwrap_or_default(),
            e.detail.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}
