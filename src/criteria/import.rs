//! Criteria import from a CSV export of the assessment workbook.

use std::collections::BTreeSet;
use std::collections::btree_map::Entry;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use csv::StringRecord;
use tracing::{debug, info, warn};

use crate::criteria::schema::{
    parse_bands, slugify, CriteriaSet, Criterion, GroupBands, RatingBand,
};
use crate::input::import::{find_column, normalize_header};
use crate::scoring::ScoringOptions;

const NAME_COLUMNS: [&str; 4] = ["criterion", "assessment_criteria", "name", "criterion_name"];
const WEIGHT_COLUMNS: [&str; 2] = ["weight", "weightage"];
const SIGNAL_COLUMNS: [&str; 3] = ["performance_signal", "signal", "ps"];
const TOPIC_COLUMNS: [&str; 3] = ["key_topic", "topic", "kt"];

/// Lower bounds used for workbook rating text that carries no number, e.g. a
/// qualitative "Yes" / "Partially" / "No" criterion scored on the default
/// qualitative scale.
const QUALITATIVE_GOOD: f64 = 100.0;
const QUALITATIVE_SATISFACTORY: f64 = 50.0;
const QUALITATIVE_NEEDS_IMPROVEMENT: f64 = 0.0;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub label: Option<String>,
    /// Bands for the weighted aggregate; the sheet only carries per-criterion
    /// and per-group bands.
    pub aggregate_bands: Vec<RatingBand>,
    /// Recorded on the imported set and used for every score under it.
    pub scoring: ScoringOptions,
}

pub fn import_criteria_file(path: &Path, options: &ImportOptions) -> Result<CriteriaSet> {
    let file = File::open(path)
        .with_context(|| format!("failed opening criteria sheet: {}", path.display()))?;
    let source = path.display().to_string();
    let set = parse_criteria_csv(file, &source, options)
        .with_context(|| format!("failed parsing criteria sheet: {}", path.display()))?;
    info!(
        "parsed {} criteria from {} (hash {})",
        set.criteria.len(),
        source,
        &set.content_hash[..12]
    );
    Ok(set)
}

pub fn parse_criteria_csv<R: Read>(
    reader: R,
    source: &str,
    options: &ImportOptions,
) -> Result<CriteriaSet> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();

    let name_idx = find_column(&headers, &NAME_COLUMNS)
        .ok_or_else(|| anyhow!("criteria sheet has no criterion name column"))?;
    let weight_idx = find_column(&headers, &WEIGHT_COLUMNS)
        .ok_or_else(|| anyhow!("criteria sheet has no weight column"))?;
    let formula_idx = find_column(&headers, &["formula"])
        .ok_or_else(|| anyhow!("criteria sheet has no formula column"))?;
    let id_idx = find_column(&headers, &["id", "criterion_id", "code"]);
    let bands_idx = find_column(&headers, &["bands", "rating_bands"]);
    let good_idx = find_column(&headers, &["rating_good", "good"]);
    let satisfactory_idx = find_column(&headers, &["rating_satisfactory", "satisfactory"]);
    let needs_idx = find_column(
        &headers,
        &["rating_needs_improvement", "needs_improvement"],
    );
    let pillar_idx = find_column(&headers, &["pillar"]);
    let signal_idx = find_column(&headers, &SIGNAL_COLUMNS);
    let topic_idx = find_column(&headers, &TOPIC_COLUMNS);
    let signal_bands_idx = find_column(&headers, &["signal_bands"]);
    let topic_bands_idx = find_column(&headers, &["topic_bands"]);
    let description_idx = find_column(&headers, &["description"]);
    let active_idx = find_column(&headers, &["active", "enabled"]);

    let mut criteria = Vec::new();
    let mut seen_ids = BTreeSet::new();
    let mut signal_bands = GroupBands::new();
    let mut topic_bands = GroupBands::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = row + 2;
        let cell = |idx: Option<usize>| cell_at(&record, idx);

        let name = cell(Some(name_idx));
        if name.is_empty() {
            debug!("skipping row {line} without a criterion name");
            continue;
        }
        let id = match cell(id_idx) {
            "" => slugify(name),
            explicit => explicit.to_string(),
        };
        if id.is_empty() {
            bail!("row {line}: cannot derive an id from criterion name `{name}`");
        }
        if !seen_ids.insert(id.clone()) {
            warn!("row {line}: duplicate criterion id `{id}`");
        }

        let weight = parse_weight(cell(Some(weight_idx)))
            .with_context(|| format!("row {line}: invalid weight for `{name}`"))?;
        let formula = cell(Some(formula_idx)).to_string();

        let bands = match cell(bands_idx) {
            "" => bands_from_workbook(
                cell(good_idx),
                cell(satisfactory_idx),
                cell(needs_idx),
            ),
            raw => parse_bands(raw).with_context(|| format!("row {line}: invalid bands"))?,
        };

        let pillar = optional(cell(pillar_idx));
        let performance_signal = optional(cell(signal_idx));
        let key_topic = optional(cell(topic_idx));
        if let Some(signal) = &performance_signal {
            record_group_bands(&mut signal_bands, signal, cell(signal_bands_idx))
                .with_context(|| format!("row {line}: invalid signal bands"))?;
        }
        if let Some(topic) = &key_topic {
            record_group_bands(&mut topic_bands, topic, cell(topic_bands_idx))
                .with_context(|| format!("row {line}: invalid topic bands"))?;
        }
        let active = match cell(active_idx) {
            "" => true,
            raw => parse_flag(raw)
                .ok_or_else(|| anyhow!("row {line}: invalid active flag `{raw}`"))?,
        };

        criteria.push(Criterion {
            id,
            name: name.to_string(),
            weight,
            formula,
            bands,
            pillar,
            performance_signal,
            key_topic,
            description: cell(description_idx).to_string(),
            active,
        });
    }

    if criteria.is_empty() {
        bail!("criteria sheet contains no criteria");
    }

    let label = options
        .label
        .clone()
        .unwrap_or_else(|| default_label(source));
    Ok(CriteriaSet::with_hash(
        label,
        source,
        criteria,
        options.aggregate_bands.clone(),
    )
    .with_group_bands(signal_bands, topic_bands)
    .with_scoring(options.scoring.clone()))
}

fn optional(raw: &str) -> Option<String> {
    match raw {
        "" => None,
        value => Some(value.to_string()),
    }
}

/// Group bands may repeat on every row of the group but must not disagree.
fn record_group_bands(groups: &mut GroupBands, group: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let bands = parse_bands(raw)?;
    match groups.entry(group.to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(bands);
        }
        Entry::Occupied(existing) if *existing.get() == bands => {}
        Entry::Occupied(_) => bail!("bands for `{group}` differ from an earlier row"),
    }
    Ok(())
}

/// `25%` is a fraction (0.25); a plain number is taken as given.
pub fn parse_weight(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let (number, percent) = match trimmed.strip_suffix('%') {
        Some(stripped) => (stripped.trim(), true),
        None => (trimmed, false),
    };
    let value = number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| anyhow!("`{raw}` is not a number"))?;
    Ok(if percent { value / 100.0 } else { value })
}

/// Builds ascending bands from the workbook's Good / Satisfactory / Needs
/// Improvement threshold text (`>=90%`, `70-89%`, `<70%`). A bare `>` makes
/// the bound exclusive.
pub fn bands_from_workbook(good: &str, satisfactory: &str, needs: &str) -> Vec<RatingBand> {
    let mut bands = Vec::new();
    if !needs.trim().is_empty() {
        let lower = if needs.contains('<') {
            QUALITATIVE_NEEDS_IMPROVEMENT
        } else {
            threshold_lower_bound(needs).unwrap_or(QUALITATIVE_NEEDS_IMPROVEMENT)
        };
        bands.push(RatingBand::new(lower, "Needs Improvement"));
    }
    if !satisfactory.trim().is_empty() {
        let lower = threshold_lower_bound(satisfactory).unwrap_or(QUALITATIVE_SATISFACTORY);
        bands.push(threshold_band(satisfactory, lower, "Satisfactory"));
    }
    if !good.trim().is_empty() {
        let lower = threshold_lower_bound(good).unwrap_or(QUALITATIVE_GOOD);
        bands.push(threshold_band(good, lower, "Good"));
    }
    bands
}

fn threshold_band(raw: &str, lower: f64, label: &str) -> RatingBand {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('>') && !trimmed.starts_with(">=") {
        RatingBand::above(lower, label)
    } else {
        RatingBand::new(lower, label)
    }
}

/// First number in the threshold text: `>=90%` → 90, `70-89` → 70.
fn threshold_lower_bound(raw: &str) -> Option<f64> {
    let bytes = raw.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    raw[start..end].trim_end_matches('.').parse::<f64>().ok()
}

fn cell_at(record: &StringRecord, idx: Option<usize>) -> &str {
    idx.and_then(|i| record.get(i)).unwrap_or_default()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn default_label(source: &str) -> String {
    Path::new(source)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string())
}
