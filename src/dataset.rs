//! Risky-code dataset loading.
//!
//! A dataset file is a JSON array of cases:
//!
//! ```json
//! [{"Index": "1_1", "Language": "python", "Code": "...", "Text_summary": "...", "Text_details": "..."}]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::error::DatasetError;

/// One risky-code case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    #[serde(rename = "Index", deserialize_with = "string_or_number")]
    pub index: String,
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Text_summary")]
    pub text_summary: String,
    #[serde(rename = "Text_details")]
    pub text_details: String,
}

impl Case {
    /// Dataset prefix of the index (`"4"` for `"4_12"`).
    pub fn index_prefix(&self) -> &str {
        self.index.split('_').next().unwrap_or(&self.index)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// A loaded dataset file.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Label used in run summaries; the risky id for standard file names.
    pub id: String,
    pub path: PathBuf,
    pub cases: Vec<Case>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// Standard file name for risky dataset `id`.
pub fn risky_dataset_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("index{id}_30_codes_full.json"))
}

/// Derives a dataset label from its file name.
///
/// `index7_30_codes_full.json` gives `"7"`; other names give their stem.
pub fn dataset_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    stem.strip_prefix("index")
        .and_then(|rest| rest.split('_').next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .unwrap_or(stem)
}

/// Loads and parses a dataset file.
///
/// # Errors
///
/// `DatasetError::Read` when the file cannot be read and
/// `DatasetError::Parse` when it is not a valid case array.
pub fn load_dataset(path: &Path) -> Result<Dataset, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let cases: Vec<Case> = serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), cases = cases.len(), "Loaded dataset");

    Ok(Dataset {
        id: dataset_id_from_path(path),
        path: path.to_path_buf(),
        cases,
    })
}
