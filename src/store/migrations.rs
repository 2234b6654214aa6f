pub const BASE_MIGRATION: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS criteria_sets (
    version INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    source TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    criteria_count INTEGER NOT NULL,
    criteria_json TEXT NOT NULL,
    bands_json TEXT NOT NULL,
    signal_bands_json TEXT NOT NULL DEFAULT '{}',
    topic_bands_json TEXT NOT NULL DEFAULT '{}',
    scoring_json TEXT NOT NULL DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_criteria_single_active
    ON criteria_sets(active) WHERE active = 1;

CREATE TABLE IF NOT EXISTS assessments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    devco TEXT NOT NULL,
    criteria_version INTEGER NOT NULL REFERENCES criteria_sets(version),
    submitted_at TEXT NOT NULL,
    submitted_by TEXT NOT NULL,
    aggregate_score REAL NOT NULL,
    rating TEXT
);
CREATE INDEX IF NOT EXISTS idx_assessments_devco
    ON assessments(devco, id DESC);

CREATE TABLE IF NOT EXISTS assessment_inputs (
    assessment_id INTEGER NOT NULL REFERENCES assessments(id),
    field TEXT NOT NULL,
    kind TEXT NOT NULL,
    numeric_value REAL,
    text_value TEXT,
    PRIMARY KEY (assessment_id, field)
);

CREATE TABLE IF NOT EXISTS criterion_scores (
    assessment_id INTEGER NOT NULL REFERENCES assessments(id),
    position INTEGER NOT NULL,
    criterion_id TEXT NOT NULL,
    criterion_name TEXT NOT NULL,
    pillar TEXT,
    weight REAL NOT NULL,
    score REAL NOT NULL,
    weighted REAL NOT NULL,
    rating TEXT,
    PRIMARY KEY (assessment_id, position)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    assessment_id INTEGER REFERENCES assessments(id),
    criteria_version INTEGER REFERENCES criteria_sets(version),
    detail TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

/// Columns added to `criteria_sets` after the first release, applied to
/// databases created before them.
pub const CRITERIA_SET_COLUMNS: &[(&str, &str)] = &[
    ("signal_bands_json", "TEXT NOT NULL DEFAULT '{}'"),
    ("topic_bands_json", "TEXT NOT NULL DEFAULT '{}'"),
    ("scoring_json", "TEXT NOT NULL DEFAULT '{}'"),
];
