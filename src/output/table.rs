use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::assessment::history::FieldHistoryEntry;
use crate::assessment::{Assessment, AuditLogEntry, HistorySummary, InputChange, VerificationReport};
use crate::criteria::schema::format_bands;
use crate::criteria::{CriteriaVersionDiff, CriteriaVersionInfo, VersionedCriteria};
use crate::input::InputValue;
use crate::scoring::SignalScore;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn rating_cell(rating: Option<&str>) -> Cell {
    match rating {
        Some(label) => Cell::new(label),
        None => Cell::new("unrated").fg(Color::Red),
    }
}

fn yes_no(flag: bool) -> Cell {
    if flag {
        Cell::new("YES").fg(Color::Green)
    } else {
        Cell::new("NO").fg(Color::Red)
    }
}

fn show_value(value: Option<&InputValue>) -> String {
    value
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

pub fn render_criteria_table(criteria: &VersionedCriteria) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID", "Criterion", "Pillar", "Signal", "Topic", "Weight", "Formula", "Bands", "Active",
    ]);
    for c in &criteria.set.criteria {
        table.add_row(Row::from(vec![
            Cell::new(&c.id),
            Cell::new(&c.name),
            Cell::new(c.pillar.as_deref().unwrap_or("-")),
            Cell::new(c.performance_signal.as_deref().unwrap_or("-")),
            Cell::new(c.key_topic.as_deref().unwrap_or("-")),
            Cell::new(format!("{:.4}", c.weight)),
            Cell::new(&c.formula),
            Cell::new(format_bands(&c.bands)),
            yes_no(c.active),
        ]));
    }
    let set = &criteria.set;
    let mut out = format!(
        "Criteria {} `{}`{} (hash {})\n{table}\nAggregate bands: {}",
        criteria.version,
        set.label,
        if criteria.active { " [active]" } else { "" },
        short_hash(&set.content_hash),
        format_bands(&set.bands)
    );
    for (name, bands) in &set.signal_bands {
        out.push_str(&format!("\nSignal `{name}` bands: {}", format_bands(bands)));
    }
    for (name, bands) in &set.topic_bands {
        out.push_str(&format!("\nTopic `{name}` bands: {}", format_bands(bands)));
    }
    out.push_str(&format!(
        "\nWeight tolerance: {}, qualitative answers: {}",
        set.scoring.weight_tolerance,
        set.scoring.scale.entries().count()
    ));
    out
}

pub fn render_versions_table(versions: &[CriteriaVersionInfo]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Version",
        "Label",
        "Source",
        "Imported At",
        "Criteria",
        "Hash",
        "Active",
    ]);
    for v in versions {
        table.add_row(Row::from(vec![
            Cell::new(v.version.to_string()),
            Cell::new(&v.label),
            Cell::new(&v.source),
            Cell::new(v.imported_at.to_rfc3339()),
            Cell::new(v.criteria_count.to_string()),
            Cell::new(short_hash(&v.content_hash)),
            yes_no(v.active),
        ]));
    }
    table.to_string()
}

pub fn render_assessment_table(assessment: &Assessment) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Criterion", "Pillar", "Weight", "Score", "Weighted", "Rating",
    ]);
    for s in &assessment.scores {
        table.add_row(vec![
            s.criterion_name.clone(),
            s.pillar.clone().unwrap_or_else(|| "-".to_string()),
            format!("{:.4}", s.weight),
            format!("{:.3}", s.score),
            format!("{:.3}", s.weighted),
            s.rating.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }

    let mut out = format!(
        "Assessment {} for {} ({} by {} at {})\n{table}",
        assessment.id,
        assessment.devco,
        assessment.criteria_version,
        assessment.submitted_by,
        assessment.submitted_at.to_rfc3339()
    );
    if !assessment.pillars.is_empty() {
        let mut pillars = new_table();
        pillars.set_header(vec!["Pillar", "Criteria", "Weight", "Score"]);
        for p in &assessment.pillars {
            pillars.add_row(vec![
                p.pillar.clone(),
                p.criteria.to_string(),
                format!("{:.4}", p.weight),
                format!("{:.3}", p.score),
            ]);
        }
        out.push('\n');
        out.push_str(&pillars.to_string());
    }
    if !assessment.signals.is_empty() {
        let mut groups = new_table();
        groups.set_header(vec!["Key Topic", "Performance Signal", "Weight", "Score", "Rating"]);
        for t in &assessment.topics {
            groups.add_row(vec![
                t.topic.clone(),
                "(all)".to_string(),
                format!("{:.4}", t.weight),
                format!("{:.3}", t.score),
                t.rating.clone().unwrap_or_else(|| "-".to_string()),
            ]);
            for s in assessment
                .signals
                .iter()
                .filter(|s| s.key_topic.as_deref() == Some(t.topic.as_str()))
            {
                groups.add_row(signal_row(s));
            }
        }
        for s in assessment.signals.iter().filter(|s| s.key_topic.is_none()) {
            groups.add_row(signal_row(s));
        }
        out.push('\n');
        out.push_str(&groups.to_string());
    }
    out.push_str(&format!(
        "\nAggregate score: {:.3}\nRating: {}",
        assessment.aggregate_score,
        assessment.rating.as_deref().unwrap_or("unrated (below every band)")
    ));
    out
}

fn signal_row(s: &SignalScore) -> Vec<String> {
    vec![
        s.key_topic.clone().unwrap_or_else(|| "-".to_string()),
        s.signal.clone(),
        format!("{:.4}", s.weight),
        format!("{:.3}", s.score),
        s.rating.clone().unwrap_or_else(|| "-".to_string()),
    ]
}

pub fn render_history_table(summary: &HistorySummary, assessments: &[Assessment]) -> String {
    if summary.count == 0 {
        return "No assessments found.".to_string();
    }
    let mut table = new_table();
    table.set_header(vec![
        "ID",
        "Submitted At",
        "DevCo",
        "Criteria",
        "Score",
        "Rating",
        "Submitted By",
    ]);
    for a in assessments {
        table.add_row(Row::from(vec![
            Cell::new(a.id.to_string()),
            Cell::new(a.submitted_at.to_rfc3339()),
            Cell::new(&a.devco),
            Cell::new(a.criteria_version.to_string()),
            Cell::new(format!("{:.3}", a.aggregate_score)),
            rating_cell(a.rating.as_deref()),
            Cell::new(&a.submitted_by),
        ]));
    }
    format!(
        "{table}\n{} assessment(s); latest {} ({}), best {}, trend {}",
        summary.count,
        summary
            .latest_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string()),
        summary.latest_rating.as_deref().unwrap_or("unrated"),
        summary
            .best_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string()),
        summary
            .trend
            .map(|t| format!("{t:?}").to_lowercase())
            .unwrap_or_else(|| "-".to_string())
    )
}

pub fn render_field_history_table(field: &str, entries: &[FieldHistoryEntry]) -> String {
    if entries.is_empty() {
        return format!("No submissions found for `{field}`.");
    }
    let mut table = new_table();
    table.set_header(vec!["Assessment", "Submitted At", "DevCo", "Value", "Change"]);
    for e in entries {
        let change = if e.change.contains('→') {
            Cell::new(&e.change).fg(Color::Green)
        } else {
            Cell::new(&e.change)
        };
        table.add_row(Row::from(vec![
            Cell::new(e.assessment_id.to_string()),
            Cell::new(e.submitted_at.to_rfc3339()),
            Cell::new(&e.devco),
            Cell::new(show_value(e.value.as_ref())),
            change,
        ]));
    }
    table.to_string()
}

pub fn render_input_changes_table(changes: &[InputChange]) -> String {
    if changes.is_empty() {
        return "No input changes.".to_string();
    }
    let mut table = new_table();
    table.set_header(vec!["Field", "Before", "After"]);
    for c in changes {
        table.add_row(vec![
            c.field.clone(),
            show_value(c.old_value.as_ref()),
            show_value(c.new_value.as_ref()),
        ]);
    }
    table.to_string()
}

pub fn render_audit_table(entries: &[AuditLogEntry]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID", "Recorded At", "Action", "Actor", "Assessment", "Criteria", "Detail",
    ]);
    for e in entries {
        table.add_row(vec![
            e.id.to_string(),
            e.recorded_at.to_rfc3339(),
            e.action.to_string(),
            e.actor.clone(),
            e.assessment_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            e.criteria_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            e.detail.clone(),
        ]);
    }
    table.to_string()
}

pub fn render_diff_table(diff: &CriteriaVersionDiff) -> String {
    if diff.changes.is_empty() {
        return format!("No differences between {} and {}.", diff.from, diff.to);
    }
    let mut table = new_table();
    table.set_header(vec!["Criterion", "Change", "Before", "After"]);
    for c in &diff.changes {
        table.add_row(vec![
            c.criterion_id.clone(),
            c.change_type.as_str().to_string(),
            c.old_value.clone().unwrap_or_else(|| "-".to_string()),
            c.new_value.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    format!("Changes {} -> {}\n{table}", diff.from, diff.to)
}

pub fn render_verification_table(report: &VerificationReport) -> String {
    let mut out = format!(
        "Assessment {} under {}: {}",
        report.assessment_id,
        report.criteria_version,
        if report.matches {
            "re-derived exactly"
        } else {
            "MISMATCH"
        }
    );
    if let Some(error) = &report.error {
        out.push_str(&format!("\nRe-scoring failed: {error}"));
        return out;
    }
    let mut table = new_table();
    table.set_header(vec!["", "Stored", "Recomputed"]);
    table.add_row(vec![
        "Aggregate".to_string(),
        format!("{}", report.stored_aggregate),
        report
            .recomputed_aggregate
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Rating".to_string(),
        report.stored_rating.clone().unwrap_or_else(|| "-".to_string()),
        report
            .recomputed_rating
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    ]);
    for m in &report.mismatches {
        table.add_row(Row::from(vec![
            Cell::new(&m.criterion_id).fg(Color::Red),
            Cell::new(m.stored.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())),
            Cell::new(
                m.recomputed
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]));
    }
    out.push('\n');
    out.push_str(&table.to_string());
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{render_assessment_table, render_diff_table, render_history_table};
    use crate::assessment::{summarize_history, Assessment, AssessmentId};
    use crate::criteria::{CriteriaVersion, CriteriaVersionDiff};
    use crate::input::InputValues;
    use crate::scoring::{CriterionScore, PillarScore, SignalScore, TopicScore};

    fn assessment() -> Assessment {
        Assessment {
            id: AssessmentId(5),
            devco: "devco-9".to_string(),
            criteria_version: CriteriaVersion(2),
            submitted_at: Utc::now(),
            submitted_by: "analyst".to_string(),
            inputs: InputValues::new(),
            scores: vec![CriterionScore {
                criterion_id: "spi".to_string(),
                criterion_name: "Schedule Performance".to_string(),
                pillar: Some("P&M".to_string()),
                weight: 1.0,
                score: 42.0,
                weighted: 42.0,
                rating: None,
            }],
            aggregate_score: 42.0,
            rating: None,
            pillars: vec![PillarScore {
                pillar: "P&M".to_string(),
                weight: 1.0,
                score: 42.0,
                criteria: 1,
            }],
            signals: vec![SignalScore {
                signal: "Schedule".to_string(),
                key_topic: Some("Delivery".to_string()),
                weight: 1.0,
                score: 42.0,
                rating: Some("Slipping".to_string()),
                criteria: 1,
            }],
            topics: vec![TopicScore {
                topic: "Delivery".to_string(),
                weight: 1.0,
                score: 42.0,
                rating: None,
                signals: vec!["Schedule".to_string()],
            }],
        }
    }

    #[test]
    fn assessment_table_shows_breakdown_and_unrated() {
        let text = render_assessment_table(&assessment());
        assert!(text.contains("Schedule Performance"));
        assert!(text.contains("P&M"));
        assert!(text.contains("Aggregate score: 42.000"));
        assert!(text.contains("unrated"));
        assert!(text.contains("Delivery"));
        assert!(text.contains("Slipping"));
    }

    #[test]
    fn empty_history_and_diff_have_messages() {
        let summary = summarize_history(None, &[]);
        assert_eq!(render_history_table(&summary, &[]), "No assessments found.");
        let diff = CriteriaVersionDiff {
            from: CriteriaVersion(1),
            to: CriteriaVersion(2),
            changes: Vec::new(),
        };
        assert_eq!(render_diff_table(&diff), "No differences between v1 and v2.");
    }
}
