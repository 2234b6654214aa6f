use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::assessment::{
    Assessment, AssessmentId, AssessmentRepository, AuditAction, AuditLogEntry, PendingAssessment,
};
use crate::criteria::{CriteriaSet, CriteriaVersion, CriteriaVersionInfo, VersionedCriteria};
use crate::input::{InputValue, InputValues};
use crate::scoring::{validate_criteria_set, CriterionScore};
use crate::store::migrations::{BASE_MIGRATION, CRITERIA_SET_COLUMNS};

const CRITERIA_COLUMNS: &str = "version, label, source, imported_at, content_hash, criteria_json, \
     bands_json, active, signal_bands_json, topic_bands_json, scoring_json";

pub struct AssessmentStore {
    conn: Connection,
}

impl AssessmentStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed creating database directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening database: {}", path.display()))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(BASE_MIGRATION)
            .context("failed applying schema migration")?;
        let existing = self
            .conn
            .prepare("SELECT name FROM pragma_table_info('criteria_sets')")?
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (column, definition) in CRITERIA_SET_COLUMNS {
            if !existing.iter().any(|name| name == column) {
                self.conn
                    .execute_batch(&format!(
                        "ALTER TABLE criteria_sets ADD COLUMN {column} {definition}"
                    ))
                    .with_context(|| format!("failed adding criteria_sets.{column}"))?;
                info!("added criteria_sets.{column}");
            }
        }
        Ok(())
    }

    /// Stores `set` as a new, inactive version.
    pub fn import_criteria(&mut self, set: &CriteriaSet, actor: &str) -> Result<CriteriaVersion> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"
INSERT INTO criteria_sets(
    label, source, imported_at, content_hash, criteria_count, criteria_json, bands_json,
    signal_bands_json, topic_bands_json, scoring_json
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
            params![
                set.label,
                set.source,
                set.imported_at.to_rfc3339(),
                set.content_hash,
                set.criteria.len() as i64,
                serde_json::to_string(&set.criteria)?,
                serde_json::to_string(&set.bands)?,
                serde_json::to_string(&set.signal_bands)?,
                serde_json::to_string(&set.topic_bands)?,
                serde_json::to_string(&set.scoring)?
            ],
        )
        .context("failed inserting criteria set")?;
        let version = CriteriaVersion(tx.last_insert_rowid());
        insert_audit(
            &tx,
            AuditAction::CriteriaImported,
            actor,
            None,
            Some(version),
            &format!(
                "imported `{}` from {} ({} criteria)",
                set.label,
                set.source,
                set.criteria.len()
            ),
        )?;
        tx.commit()?;
        info!("stored criteria `{}` as {version}", set.label);
        Ok(version)
    }

    /// Makes `version` the one new submissions are scored with.
    ///
    /// The version is validated under its recorded scoring rules first; on
    /// failure the previously active version stays active.
    pub fn activate_criteria(
        &mut self,
        version: CriteriaVersion,
        actor: &str,
    ) -> Result<VersionedCriteria> {
        let mut criteria = self
            .criteria_version(version)?
            .ok_or_else(|| anyhow!("criteria {version} does not exist"))?;
        validate_criteria_set(&criteria.set)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("UPDATE criteria_sets SET active = 0 WHERE active = 1", [])?;
        tx.execute(
            "UPDATE criteria_sets SET active = 1 WHERE version = ?1",
            params![version.0],
        )?;
        insert_audit(
            &tx,
            AuditAction::CriteriaActivated,
            actor,
            None,
            Some(version),
            &format!("activated `{}`", criteria.set.label),
        )?;
        tx.commit()?;
        info!("activated criteria {version}");
        criteria.active = true;
        Ok(criteria)
    }

    pub fn active_criteria(&self) -> Result<Option<VersionedCriteria>> {
        self.conn
            .query_row(
                &format!("SELECT {CRITERIA_COLUMNS} FROM criteria_sets WHERE active = 1"),
                [],
                row_to_criteria,
            )
            .optional()
            .context("failed loading active criteria")
    }

    pub fn criteria_version(&self, version: CriteriaVersion) -> Result<Option<VersionedCriteria>> {
        self.conn
            .query_row(
                &format!("SELECT {CRITERIA_COLUMNS} FROM criteria_sets WHERE version = ?1"),
                params![version.0],
                row_to_criteria,
            )
            .optional()
            .with_context(|| format!("failed loading criteria {version}"))
    }

    /// Newest first.
    pub fn list_criteria_versions(&self) -> Result<Vec<CriteriaVersionInfo>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT version, label, source, imported_at, content_hash, criteria_count, active
FROM criteria_sets
ORDER BY version DESC
"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CriteriaVersionInfo {
                    version: CriteriaVersion(row.get(0)?),
                    label: row.get(1)?,
                    source: row.get(2)?,
                    imported_at: timestamp(row, 3)?,
                    content_hash: row.get(4)?,
                    criteria_count: row.get::<_, i64>(5)? as usize,
                    active: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn save_assessment(&mut self, pending: &PendingAssessment) -> Result<AssessmentId> {
        self.insert_assessment(pending)
            .with_context(|| format!("failed saving assessment for {}", pending.devco))
    }

    fn insert_assessment(&mut self, pending: &PendingAssessment) -> Result<AssessmentId> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"
INSERT INTO assessments(
    devco, criteria_version, submitted_at, submitted_by, aggregate_score, rating
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                pending.devco,
                pending.criteria_version.0,
                pending.submitted_at.to_rfc3339(),
                pending.submitted_by,
                pending.card.aggregate_score,
                pending.card.rating
            ],
        )?;
        let id = AssessmentId(tx.last_insert_rowid());
        {
            let mut stmt = tx.prepare(
                r#"
INSERT INTO assessment_inputs(assessment_id, field, kind, numeric_value, text_value)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
            )?;
            for (field, value) in &pending.inputs {
                let (numeric, text) = match value {
                    InputValue::Numeric(v) => (Some(*v), None),
                    InputValue::Text(t) => (None, Some(t.as_str())),
                };
                stmt.execute(params![id.0, field, value.kind(), numeric, text])?;
            }

            let mut stmt = tx.prepare(
                r#"
INSERT INTO criterion_scores(
    assessment_id, position, criterion_id, criterion_name, pillar, weight, score, weighted, rating
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
            )?;
            for (position, score) in pending.card.scores.iter().enumerate() {
                stmt.execute(params![
                    id.0,
                    position as i64,
                    score.criterion_id,
                    score.criterion_name,
                    score.pillar,
                    score.weight,
                    score.score,
                    score.weighted,
                    score.rating
                ])?;
            }
        }
        insert_audit(
            &tx,
            AuditAction::AssessmentSubmitted,
            &pending.submitted_by,
            Some(id),
            Some(pending.criteria_version),
            &format!(
                "{} scored {:.4} ({})",
                pending.devco,
                pending.card.aggregate_score,
                pending.card.rating.as_deref().unwrap_or("unrated")
            ),
        )?;
        tx.commit()?;
        debug!("assessment {id} committed");
        Ok(id)
    }

    pub fn load_assessment(&self, id: AssessmentId) -> Result<Option<Assessment>> {
        self.load_assessment_cached(id, &mut BTreeMap::new())
    }

    /// Loads one assessment, reusing criteria sets already fetched for
    /// earlier records of the same version.
    fn load_assessment_cached(
        &self,
        id: AssessmentId,
        criteria: &mut BTreeMap<CriteriaVersion, Option<CriteriaSet>>,
    ) -> Result<Option<Assessment>> {
        let header = self
            .conn
            .query_row(
                r#"
SELECT id, devco, criteria_version, submitted_at, submitted_by, aggregate_score, rating
FROM assessments
WHERE id = ?1
"#,
                params![id.0],
                row_to_assessment_header,
            )
            .optional()
            .with_context(|| format!("failed loading assessment {id}"))?;
        let Some(mut assessment) = header else {
            return Ok(None);
        };
        assessment.inputs = self.load_inputs(id)?;
        assessment.scores = self.load_scores(id)?;
        let version = assessment.criteria_version;
        if !criteria.contains_key(&version) {
            let set = self.criteria_version(version)?.map(|c| c.set);
            criteria.insert(version, set);
        }
        let set = criteria.get(&version).and_then(Option::as_ref);
        Ok(Some(assessment.with_derived_breakdowns(set)))
    }

    /// Newest first, optionally restricted to one DevCo.
    pub fn list_assessments(&self, devco: Option<&str>, limit: usize) -> Result<Vec<Assessment>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT id
FROM assessments
WHERE ?1 IS NULL OR devco = ?1
ORDER BY id DESC
LIMIT ?2
"#,
        )?;
        let ids = stmt
            .query_map(params![devco, limit as i64], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(ids.len());
        let mut criteria = BTreeMap::new();
        for id in ids {
            let id = AssessmentId(id);
            if let Some(assessment) = self.load_assessment_cached(id, &mut criteria)? {
                out.push(assessment);
            }
        }
        Ok(out)
    }

    /// Newest first.
    pub fn audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT id, action, actor, assessment_id, criteria_version, detail, recorded_at
FROM audit_log
ORDER BY id DESC
LIMIT ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let action = row
                    .get::<_, String>(1)?
                    .parse::<AuditAction>()
                    .map_err(|e| conversion_error(1, e))?;
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action,
                    actor: row.get(2)?,
                    assessment_id: row.get::<_, Option<i64>>(3)?.map(AssessmentId),
                    criteria_version: row.get::<_, Option<i64>>(4)?.map(CriteriaVersion),
                    detail: row.get(5)?,
                    recorded_at: timestamp(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn load_inputs(&self, id: AssessmentId) -> Result<InputValues> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT field, kind, numeric_value, text_value
FROM assessment_inputs
WHERE assessment_id = ?1
"#,
        )?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                let field: String = row.get(0)?;
                let kind: String = row.get(1)?;
                let value = match (
                    kind.as_str(),
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ) {
                    ("numeric", Some(v), _) => InputValue::Numeric(v),
                    ("text", _, Some(t)) => InputValue::Text(t),
                    _ => {
                        return Err(rusqlite::Error::InvalidColumnType(1, kind.clone(), Type::Text))
                    }
                };
                Ok((field, value))
            })?
            .collect::<rusqlite::Result<InputValues>>()?;
        Ok(rows)
    }

    fn load_scores(&self, id: AssessmentId) -> Result<Vec<CriterionScore>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT criterion_id, criterion_name, pillar, weight, score, weighted, rating
FROM criterion_scores
WHERE assessment_id = ?1
ORDER BY position
"#,
        )?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                Ok(CriterionScore {
                    criterion_id: row.get(0)?,
                    criterion_name: row.get(1)?,
                    pillar: row.get(2)?,
                    weight: row.get(3)?,
                    score: row.get(4)?,
                    weighted: row.get(5)?,
                    rating: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl AssessmentRepository for AssessmentStore {
    fn load_criteria(&self) -> Result<Option<VersionedCriteria>> {
        self.active_criteria()
    }

    fn criteria_version(&self, version: CriteriaVersion) -> Result<Option<VersionedCriteria>> {
        AssessmentStore::criteria_version(self, version)
    }

    fn save_assessment(&mut self, pending: &PendingAssessment) -> Result<AssessmentId> {
        AssessmentStore::save_assessment(self, pending)
    }

    fn list_assessments(&self, devco: Option<&str>, limit: usize) -> Result<Vec<Assessment>> {
        AssessmentStore::list_assessments(self, devco, limit)
    }

    fn load_assessment(&self, id: AssessmentId) -> Result<Option<Assessment>> {
        AssessmentStore::load_assessment(self, id)
    }
}

fn insert_audit(
    conn: &Connection,
    action: AuditAction,
    actor: &str,
    assessment_id: Option<AssessmentId>,
    criteria_version: Option<CriteriaVersion>,
    detail: &str,
) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO audit_log(action, actor, assessment_id, criteria_version, detail, recorded_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
        params![
            action.as_str(),
            actor,
            assessment_id.map(|id| id.0),
            criteria_version.map(|v| v.0),
            detail,
            Utc::now().to_rfc3339()
        ],
    )
    .with_context(|| format!("failed writing {action} audit entry"))?;
    Ok(())
}

fn row_to_criteria(row: &Row<'_>) -> rusqlite::Result<VersionedCriteria> {
    Ok(VersionedCriteria {
        version: CriteriaVersion(row.get(0)?),
        active: row.get::<_, i64>(7)? != 0,
        set: CriteriaSet {
            label: row.get(1)?,
            source: row.get(2)?,
            imported_at: timestamp(row, 3)?,
            content_hash: row.get(4)?,
            criteria: json_column(row, 5)?,
            bands: json_column(row, 6)?,
            signal_bands: json_column(row, 8)?,
            topic_bands: json_column(row, 9)?,
            scoring: json_column(row, 10)?,
        },
    })
}

fn row_to_assessment_header(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    Ok(Assessment {
        id: AssessmentId(row.get(0)?),
        devco: row.get(1)?,
        criteria_version: CriteriaVersion(row.get(2)?),
        submitted_at: timestamp(row, 3)?,
        submitted_by: row.get(4)?,
        inputs: InputValues::new(),
        scores: Vec::new(),
        aggregate_score: row.get(5)?,
        rating: row.get(6)?,
        pillars: Vec::new(),
        signals: Vec::new(),
        topics: Vec::new(),
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::AssessmentStore;
    use crate::assessment::{AssessmentId, AuditAction, PendingAssessment};
    use crate::criteria::{CriteriaSet, CriteriaVersion, Criterion, RatingBand};
    use crate::error::ConfigurationError;
    use crate::input::{InputValue, InputValues};
    use crate::input::QualitativeScale;
    use crate::scoring::{score_inputs, ScoringOptions};

    fn criterion(id: &str, weight: f64, formula: &str) -> Criterion {
        Criterion {
            id: id.to_string(),
            name: id.to_uppercase(),
            weight,
            formula: formula.to_string(),
            bands: vec![RatingBand::new(0.0, "Low"), RatingBand::new(60.0, "High")],
            pillar: Some("D&T".to_string()),
            performance_signal: Some(format!("signal-{id}")),
            key_topic: Some("Delivery".to_string()),
            description: String::new(),
            active: true,
        }
    }

    fn criteria_set(weights: (f64, f64)) -> CriteriaSet {
        CriteriaSet::with_hash(
            "pilot",
            "pilot.csv",
            vec![criterion("a", weights.0, "a"), criterion("b", weights.1, "b * 1.5")],
            vec![RatingBand::new(0.0, "Fail"), RatingBand::new(50.0, "Pass")],
        )
    }

    fn inputs() -> InputValues {
        [
            ("a".to_string(), InputValue::Numeric(80.0)),
            ("b".to_string(), InputValue::Text("40".to_string())),
            ("note".to_string(), InputValue::Text("on track".to_string())),
        ]
        .into_iter()
        .collect()
    }

    fn pending(store: &AssessmentStore, devco: &str) -> PendingAssessment {
        let criteria = store.active_criteria().expect("load").expect("active");
        let card = score_inputs(&criteria.set, &inputs()).expect("score");
        PendingAssessment {
            devco: devco.to_string(),
            criteria_version: criteria.version,
            submitted_at: Utc::now(),
            submitted_by: "analyst".to_string(),
            inputs: inputs(),
            card,
        }
    }

    fn active_store() -> AssessmentStore {
        let mut store = AssessmentStore::open_in_memory().expect("store");
        let version = store
            .import_criteria(&criteria_set((0.5, 0.5)), "admin")
            .expect("import");
        store
            .activate_criteria(version, "admin")
            .expect("activate");
        store
    }

    fn count(store: &AssessmentStore, table: &str) -> i64 {
        store
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn imported_versions_start_inactive() {
        let mut store = AssessmentStore::open_in_memory().expect("store");
        let set = criteria_set((0.5, 0.5));
        let version = store.import_criteria(&set, "admin").expect("import");
        assert_eq!(version, CriteriaVersion(1));
        assert!(store.active_criteria().expect("active").is_none());

        let loaded = store
            .criteria_version(version)
            .expect("load")
            .expect("present");
        assert_eq!(loaded.set, set);
        assert!(!loaded.active);

        let versions = store.list_criteria_versions().expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].criteria_count, 2);
    }

    #[test]
    fn failed_activation_keeps_previous_version() {
        let mut store = active_store();
        let bad = store
            .import_criteria(&criteria_set((0.5, 0.4)), "admin")
            .expect("import");
        let err = store
            .activate_criteria(bad, "admin")
            .expect_err("weights sum to 0.9");
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::WeightSum { .. })
        ));
        let active = store.active_criteria().expect("load").expect("active");
        assert_eq!(active.version, CriteriaVersion(1));

        let good = store
            .import_criteria(&criteria_set((0.25, 0.75)), "admin")
            .expect("import");
        store
            .activate_criteria(good, "admin")
            .expect("activate");
        let versions = store.list_criteria_versions().expect("versions");
        let active = versions.iter().filter(|v| v.active).collect::<Vec<_>>();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, good);
    }

    #[test]
    fn round_trips_assessments() {
        let mut store = active_store();
        let pending = pending(&store, "devco-1");
        let id = store.save_assessment(&pending).expect("save");
        let loaded = store.load_assessment(id).expect("load").expect("present");
        assert_eq!(loaded.inputs, pending.inputs);
        assert_eq!(loaded.scores, pending.card.scores);
        assert_eq!(loaded.aggregate_score, pending.card.aggregate_score);
        assert_eq!(loaded.rating, pending.card.rating);
        assert_eq!(loaded.pillars, pending.card.pillars);
        assert_eq!(loaded.signals, pending.card.signals);
        assert_eq!(loaded.topics, pending.card.topics);
        assert_eq!(loaded.topics.len(), 1);
        assert_eq!(loaded.criteria_version, CriteriaVersion(1));
        assert!(store.load_assessment(AssessmentId(42)).expect("load").is_none());

        let audit = store.audit_log(1).expect("audit");
        assert_eq!(audit[0].action, AuditAction::AssessmentSubmitted);
        assert_eq!(audit[0].assessment_id, Some(id));
        assert_eq!(audit[0].actor, "analyst");
    }

    #[test]
    fn recorded_rules_and_group_bands_persist() {
        let mut store = AssessmentStore::open_in_memory().expect("store");
        let rules = ScoringOptions {
            weight_tolerance: 0.05,
            scale: QualitativeScale::new([("on track".to_string(), 75.0)].into()),
            ..ScoringOptions::default()
        };
        let set = criteria_set((0.5, 0.5))
            .with_scoring(rules.clone())
            .with_group_bands(
                [("signal-a".to_string(), vec![RatingBand::above(70.0, "Ahead")])].into(),
                [("Delivery".to_string(), vec![RatingBand::new(0.0, "Behind")])].into(),
            );
        let version = store.import_criteria(&set, "admin").expect("import");
        let loaded = store.criteria_version(version).expect("load").expect("present");
        assert_eq!(loaded.set.scoring, rules);
        assert_eq!(loaded.set.signal_bands, set.signal_bands);
        assert!(loaded.set.signal_bands["signal-a"][0].exclusive);
        assert_eq!(loaded.set.content_hash, set.content_hash);
    }

    #[test]
    fn older_databases_gain_new_columns() {
        let conn = rusqlite::Connection::open_in_memory().expect("conn");
        conn.execute_batch(
            r#"
CREATE TABLE criteria_sets (
    version INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    source TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    criteria_count INTEGER NOT NULL,
    criteria_json TEXT NOT NULL,
    bands_json TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 0
);
INSERT INTO criteria_sets(
    label, source, imported_at, content_hash, criteria_count, criteria_json, bands_json
) VALUES ('legacy', 'old.csv', '2024-01-01T00:00:00+00:00', 'abc', 0, '[]', '[]');
"#,
        )
        .expect("legacy schema");
        let store = AssessmentStore { conn };
        store.migrate().expect("migrate");
        store.migrate().expect("migrate twice");
        let legacy = store
            .criteria_version(CriteriaVersion(1))
            .expect("load")
            .expect("present");
        assert_eq!(legacy.set.scoring, ScoringOptions::default());
        assert!(legacy.set.topic_bands.is_empty());
    }

    #[test]
    fn lists_newest_first_per_devco() {
        let mut store = active_store();
        for devco in ["x", "y", "x"] {
            let pending = pending(&store, devco);
            store.save_assessment(&pending).expect("save");
        }
        let xs = store.list_assessments(Some("x"), 10).expect("list");
        assert_eq!(
            xs.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![AssessmentId(3), AssessmentId(1)]
        );
        assert_eq!(store.list_assessments(None, 2).expect("list").len(), 2);
    }

    #[test]
    fn failed_save_leaves_no_rows() {
        let mut store = active_store();
        store
            .conn
            .execute_batch(
                r#"
CREATE TRIGGER fail_scores BEFORE INSERT ON criterion_scores
BEGIN
    SELECT RAISE(ABORT, 'injected failure');
END;
"#,
            )
            .expect("trigger");
        let pending = pending(&store, "devco-1");
        assert!(store.save_assessment(&pending).is_err());
        assert_eq!(count(&store, "assessments"), 0);
        assert_eq!(count(&store, "assessment_inputs"), 0);
        assert_eq!(count(&store, "criterion_scores"), 0);
        assert_eq!(count(&store, "audit_log"), 2);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("guide.db");
        let id = {
            let mut store = AssessmentStore::open(&path).expect("open");
            let version = store
                .import_criteria(&criteria_set((0.5, 0.5)), "admin")
                .expect("import");
            store
                .activate_criteria(version, "admin")
                .expect("activate");
            let pending = pending(&store, "devco-1");
            store.save_assessment(&pending).expect("save")
        };
        let reopened = AssessmentStore::open(&path).expect("reopen");
        assert!(reopened.load_assessment(id).expect("load").is_some());
        assert_eq!(reopened.audit_log(10).expect("audit").len(), 3);
    }
}
