use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::criteria::RatingBand;
use crate::error::ConfigurationError;
use crate::formula::FormulaLimits;
use crate::input::QualitativeScale;
use crate::scoring::{check_bands, ScoringOptions, DEFAULT_WEIGHT_TOLERANCE};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub formula: FormulaLimits,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
    /// Bands attached to newly imported criteria sets.
    #[serde(default = "default_aggregate_bands")]
    pub aggregate_bands: Vec<RatingBand>,
    /// Overrides the built-in qualitative answers when non-empty.
    #[serde(default)]
    pub qualitative: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Recorded as the actor when no `--actor` is given.
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_list_limit")]
    pub default_limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub actor: Option<String>,
    pub bind: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/assessment-guide/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed
            .validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(parsed)
    }

    /// Rejects values that would silently weaken checks on imported criteria.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let tolerance = self.scoring.weight_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigurationError::InvalidTolerance(tolerance));
        }
        check_bands("configured aggregate", &self.scoring.aggregate_bands, true)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(actor) = overrides.actor {
            self.audit.actor = actor;
        }
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn scoring_options(&self) -> ScoringOptions {
        let scale = if self.scoring.qualitative.is_empty() {
            QualitativeScale::default()
        } else {
            QualitativeScale::new(self.scoring.qualitative.clone())
        };
        ScoringOptions {
            weight_tolerance: self.scoring.weight_tolerance,
            limits: self.formula.clone(),
            scale,
        }
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/assessment-guide/assessments.db"

[scoring]
# Active criterion weights must sum to 1 within this tolerance.
weight_tolerance = 1e-6
aggregate_bands = [
    { lower_bound = 0.0, label = "Needs Improvement" },
    { lower_bound = 70.0, label = "Satisfactory" },
    { lower_bound = 85.0, label = "Good" },
]

# Text answers accepted in numeric formulas. Leave empty for the built-in
# yes / partial / no scale.
[scoring.qualitative]
# "yes" = 100.0
# "partially applied" = 50.0
# "no" = 0.0

[formula]
max_length = 1024
max_depth = 64

[audit]
actor = "analyst"

[server]
bind = "127.0.0.1:8080"
default_limit = 50
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_tolerance: default_weight_tolerance(),
            aggregate_bands: default_aggregate_bands(),
            qualitative: BTreeMap::new(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_limit: default_list_limit(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/assessment-guide/assessments.db".to_string()
}

fn default_weight_tolerance() -> f64 {
    DEFAULT_WEIGHT_TOLERANCE
}

fn default_aggregate_bands() -> Vec<RatingBand> {
    vec![
        RatingBand::new(0.0, "Needs Improvement"),
        RatingBand::new(70.0, "Satisfactory"),
        RatingBand::new(85.0, "Good"),
    ]
}

fn default_actor() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "analyst".to_string())
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_list_limit() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{expand_tilde, Config, ConfigOverrides};
    use crate::error::ConfigurationError;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        let defaults = Config::default();
        assert_eq!(parsed.storage.db_path, defaults.storage.db_path);
        assert_eq!(parsed.scoring.aggregate_bands, defaults.scoring.aggregate_bands);
        assert_eq!(parsed.scoring.weight_tolerance, defaults.scoring.weight_tolerance);
        assert_eq!(parsed.formula, defaults.formula);
        assert!(parsed.scoring.qualitative.is_empty());
    }

    #[test]
    fn partial_files_fall_back_per_section() {
        let parsed: Config = toml::from_str(
            r#"
[scoring]
weight_tolerance = 0.01

[scoring.qualitative]
"on track" = 80.0
"#,
        )
        .expect("partial");
        assert_eq!(parsed.scoring.weight_tolerance, 0.01);
        assert_eq!(parsed.scoring.aggregate_bands.len(), 3);
        assert_eq!(parsed.formula.max_depth, 64);
        let options = parsed.scoring_options();
        assert_eq!(options.scale.score("On Track"), Some(80.0));
        assert_eq!(options.scale.score("yes"), None);
    }

    #[test]
    fn loads_file_and_applies_overrides() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        Config::write_template(&path).expect("write");
        let mut config = Config::load(Some(&path)).expect("load");
        config.apply_overrides(ConfigOverrides {
            db_path: Some("/tmp/other.db".to_string()),
            actor: Some("reviewer".to_string()),
            bind: None,
        });
        assert_eq!(config.resolved_db_path().to_string_lossy(), "/tmp/other.db");
        assert_eq!(config.audit.actor, "reviewer");
        assert_eq!(config.server.bind, "127.0.0.1:8080");

        let missing = Config::load(Some(&dir.path().join("absent.toml"))).expect("default");
        assert_eq!(missing.server.default_limit, 50);
    }

    #[test]
    fn rejects_unusable_weight_tolerance() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        for raw in ["nan", "inf", "-0.5"] {
            std::fs::write(&path, format!("[scoring]\nweight_tolerance = {raw}\n")).expect("write");
            let err = Config::load(Some(&path)).expect_err(raw);
            assert!(
                matches!(
                    err.downcast_ref::<ConfigurationError>(),
                    Some(ConfigurationError::InvalidTolerance(_))
                ),
                "{raw}: {err:?}"
            );
        }
        std::fs::write(&path, "[scoring]\nweight_tolerance = 0.0\n").expect("write");
        assert_eq!(Config::load(Some(&path)).expect("zero").scoring.weight_tolerance, 0.0);
    }

    #[test]
    fn expands_home_prefix_only() {
        assert_eq!(expand_tilde("/var/db.sqlite").to_string_lossy(), "/var/db.sqlite");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x.db"), home.join("x.db"));
        }
    }
}
