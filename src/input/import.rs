use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::input::{InputValue, InputValues};

const DEVCO_COLUMNS: [&str; 4] = ["devco", "devco_id", "entity", "username"];
const FIELD_COLUMNS: [&str; 4] = ["field", "field_name", "data_point", "data_point_id"];
const VALUE_COLUMNS: [&str; 2] = ["value", "input_value"];

/// Reads a bulk input export and groups values by DevCo.
///
/// The file needs `field` and `value` columns; a `devco` column is optional
/// when `default_devco` is given, in which case rows for other DevCos are
/// kept as their own groups.
pub fn read_inputs_file(
    path: &Path,
    default_devco: Option<&str>,
) -> Result<BTreeMap<String, InputValues>> {
    let file = File::open(path)
        .with_context(|| format!("failed opening input file: {}", path.display()))?;
    read_inputs_csv(file, default_devco)
        .with_context(|| format!("failed reading input file: {}", path.display()))
}

pub fn read_inputs_csv<R: Read>(
    reader: R,
    default_devco: Option<&str>,
) -> Result<BTreeMap<String, InputValues>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();

    let devco_idx = find_column(&headers, &DEVCO_COLUMNS);
    let field_idx = find_column(&headers, &FIELD_COLUMNS)
        .ok_or_else(|| anyhow!("input file has no field column"))?;
    let value_idx = find_column(&headers, &VALUE_COLUMNS)
        .ok_or_else(|| anyhow!("input file has no value column"))?;
    if devco_idx.is_none() && default_devco.is_none() {
        return Err(anyhow!(
            "input file has no devco column and no DevCo was given"
        ));
    }

    let mut grouped: BTreeMap<String, InputValues> = BTreeMap::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let devco = devco_idx
            .and_then(|idx| record.get(idx))
            .filter(|v| !v.is_empty())
            .or(default_devco)
            .ok_or_else(|| anyhow!("row {} has no DevCo", line + 2))?;
        let field = record.get(field_idx).unwrap_or_default();
        if field.is_empty() {
            debug!("skipping row {} without a field name", line + 2);
            continue;
        }
        let Some(value) = record.get(value_idx).and_then(InputValue::from_cell) else {
            continue;
        };
        let values = grouped.entry(devco.to_string()).or_default();
        if values.insert(field.to_string(), value).is_some() {
            warn!("duplicate value for {devco}/{field}, keeping the last one");
        }
    }
    Ok(grouped)
}

pub(crate) fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

pub(crate) fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}
