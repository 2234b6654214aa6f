pub mod differ;
pub mod import;
pub mod schema;

pub use differ::{
    build_version_diff, diff_criteria, textual_diff, ChangeType, CriteriaVersionDiff,
    CriterionChange,
};
pub use import::{import_criteria_file, parse_criteria_csv, ImportOptions};
pub use schema::{
    CriteriaSet, CriteriaVersion, CriteriaVersionInfo, Criterion, RatingBand, VersionedCriteria,
};
