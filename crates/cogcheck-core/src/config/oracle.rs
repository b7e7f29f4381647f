use crate::domain::{CogCheckError, ExpectedSpec};
use crate::service::ALL_VARIABLES;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const ORACLE_TABLE_PATH: &str = "tasks/oracle-table.json";

/// Declarative fixture data: one conversion case per (granule, variable)
/// and the multi-variable requests that must be rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OracleTable {
    #[serde(default = "default_reference_root")]
    pub reference_root: PathBuf,
    #[serde(default)]
    pub conversions: Vec<ConversionCase>,
    #[serde(default)]
    pub rejections: Vec<RejectionCase>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConversionCase {
    pub id: String,
    pub granule_id: String,
    pub variable: String,
    #[serde(default = "default_expected_file_count")]
    pub expected_file_count: usize,
    /// Overrides the `{granule}__{variable}.tif` reference name.
    #[serde(default)]
    pub reference_file: Option<PathBuf>,
    #[serde(default)]
    pub expected_metadata: ExpectedSpec,
}

impl ConversionCase {
    pub fn reference_file_name(&self) -> PathBuf {
        self.reference_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}__{}.tif", self.granule_id, self.variable)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RejectionCase {
    pub id: String,
    pub granule_id: String,
    pub variables: Vec<String>,
    pub expected_message: String,
}

fn default_reference_root() -> PathBuf {
    PathBuf::from("fixtures/reference")
}

fn default_expected_file_count() -> usize {
    1
}

impl OracleTable {
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Relative reference roots resolve against the table's own directory.
    pub fn reference_root_dir(&self) -> PathBuf {
        self.base_dir.join(&self.reference_root)
    }

    pub fn reference_path(&self, case: &ConversionCase) -> PathBuf {
        self.reference_root_dir().join(case.reference_file_name())
    }

    pub fn conversion(&self, id: &str) -> Option<&ConversionCase> {
        self.conversions.iter().find(|case| case.id == id)
    }

    pub fn case_ids(&self) -> impl Iterator<Item = &str> {
        self.conversions
            .iter()
            .map(|case| case.id.as_str())
            .chain(self.rejections.iter().map(|case| case.id.as_str()))
    }

    fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for id in self.case_ids() {
            if id.trim().is_empty() {
                return Err("case ids must not be empty".to_string());
            }
            if !seen.insert(id) {
                return Err(format!("duplicate case id '{}'", id));
            }
        }

        for case in &self.conversions {
            if case.variable.trim().is_empty() || case.variable == ALL_VARIABLES {
                return Err(format!(
                    "conversion '{}' must name exactly one variable",
                    case.id
                ));
            }
            if case.expected_file_count == 0 {
                return Err(format!(
                    "conversion '{}' must expect at least one file",
                    case.id
                ));
            }
        }

        for case in &self.rejections {
            let single_concrete = case.variables.len() == 1 && case.variables[0] != ALL_VARIABLES;
            if case.variables.is_empty() || single_concrete {
                return Err(format!(
                    "rejection '{}' must request several variables or '{}'",
                    case.id, ALL_VARIABLES
                ));
            }
            if case.expected_message.trim().is_empty() {
                return Err(format!("rejection '{}' has an empty expected message", case.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("failed to read oracle table '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse oracle table '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid oracle table '{}': {detail}", path.display())]
    Invalid { path: PathBuf, detail: String },
    #[error("invalid case filter '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

impl From<OracleError> for CogCheckError {
    fn from(error: OracleError) -> Self {
        let message = error.to_string();
        match error {
            OracleError::Read { .. } => CogCheckError::io_system("IO.ORACLE_READ", message),
            OracleError::Parse { .. } => CogCheckError::input_validation("INPUT.ORACLE_PARSE", message),
            OracleError::Invalid { .. } => {
                CogCheckError::input_validation("INPUT.ORACLE_INVALID", message)
            }
            OracleError::Pattern { .. } => {
                CogCheckError::input_validation("INPUT.CASE_FILTER", message)
            }
        }
    }
}

pub fn load_oracle_table(table_path: impl AsRef<Path>) -> Result<OracleTable, OracleError> {
    let table_path = table_path.as_ref();
    let source = fs::read_to_string(table_path).map_err(|source| OracleError::Read {
        path: table_path.to_path_buf(),
        source,
    })?;
    let mut table: OracleTable =
        serde_json::from_str(&source).map_err(|source| OracleError::Parse {
            path: table_path.to_path_buf(),
            source,
        })?;
    table.base_dir = table_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    table.validate().map_err(|detail| OracleError::Invalid {
        path: table_path.to_path_buf(),
        detail,
    })?;
    Ok(table)
}

/// Selects cases by id glob. No patterns selects every case.
#[derive(Debug, Clone)]
pub struct CaseFilter {
    patterns: Vec<String>,
    set: Option<GlobSet>,
}

impl CaseFilter {
    pub fn all() -> Self {
        Self {
            patterns: Vec::new(),
            set: None,
        }
    }

    pub fn new(patterns: &[String]) -> Result<Self, OracleError> {
        if patterns.is_empty() {
            return Ok(Self::all());
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| OracleError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|source| OracleError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set: Some(set),
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, case_id: &str) -> bool {
        self.set.as_ref().is_none_or(|set| set.is_match(case_id))
    }
}

impl Default for CaseFilter {
    fn default() -> Self {
        Self::all()
    }
}
