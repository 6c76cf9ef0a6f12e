//! Pipeline-wide categorical vocabulary
//!
//! Each categorical column owns an ordered list of values and a value's code is its position
//! in that list. Lists only ever grow at the end, so a value keeps its code across files and
//! runs. The persisted form is a TOML file with one array per column.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{EtlError, EtlResult};
use crate::schema::{CanonicalField, FileId};
use crate::staging::local::write_atomic;
use crate::staging::{StagingArea, StagingError};
use crate::transformer::{observe_categories, TransformSettings};

/// Columns recoded to integer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalColumn {
    Status,
    ProductLine,
    ProductCode,
    DealSize,
}

impl CategoricalColumn {
    pub const ALL: [CategoricalColumn; 4] = [
        CategoricalColumn::Status,
        CategoricalColumn::ProductLine,
        CategoricalColumn::ProductCode,
        CategoricalColumn::DealSize,
    ];

    pub fn field(self) -> CanonicalField {
        match self {
            CategoricalColumn::Status => CanonicalField::Status,
            CategoricalColumn::ProductLine => CanonicalField::ProductLine,
            CategoricalColumn::ProductCode => CanonicalField::ProductCode,
            CategoricalColumn::DealSize => CanonicalField::DealSize,
        }
    }
}

impl fmt::Display for CategoricalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field().name())
    }
}

const BUILTIN_STATUS: &[&str] = &[
    "Cancelled",
    "Disputed",
    "In Process",
    "On Hold",
    "Resolved",
    "Shipped",
];

const BUILTIN_PRODUCT_LINE: &[&str] = &[
    "Classic Cars",
    "Motorcycles",
    "Planes",
    "Ships",
    "Trains",
    "Trucks and Buses",
    "Vintage Cars",
];

const BUILTIN_DEAL_SIZE: &[&str] = &["Large", "Medium", "Small"];

#[derive(Debug, Clone, Default, PartialEq)]
struct ColumnVocabulary {
    values: Vec<String>,
    codes: HashMap<String, i32>,
}

impl ColumnVocabulary {
    fn from_values(column: CategoricalColumn, values: Vec<String>) -> EtlResult<Self> {
        let mut vocab = Self::default();
        for value in values {
            if vocab.codes.contains_key(&value) {
                return Err(EtlError::config(format!(
                    "value '{}' is listed twice in the {} vocabulary",
                    value, column
                )));
            }
            vocab.push(value);
        }
        Ok(vocab)
    }

    fn push(&mut self, value: String) {
        let code = self.values.len() as i32;
        self.codes.insert(value.clone(), code);
        self.values.push(value);
    }
}

/// On-disk layout; an omitted column keeps its built-in list
#[derive(Debug, Default, Serialize, Deserialize)]
struct VocabularyFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_line: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_code: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deal_size: Option<Vec<String>>,
}

/// Written above the lists by [`CategoryVocabulary::to_toml_string`]
const FILE_HEADER: &str = "# Category vocabulary: a value's code is its position in the list.
# Append new values at the end only; `retail-etl vocabulary build` does this for you.

";

/// Fixed value -> code tables for every categorical column
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryVocabulary {
    columns: BTreeMap<CategoricalColumn, ColumnVocabulary>,
}

impl CategoryVocabulary {
    /// Known value sets of the sales dataset; product codes must come from a vocabulary file
    pub fn builtin() -> Self {
        let list = |values: &[&str]| {
            let mut vocab = ColumnVocabulary::default();
            for value in values {
                vocab.push(value.to_string());
            }
            vocab
        };

        let mut columns = BTreeMap::new();
        columns.insert(CategoricalColumn::Status, list(BUILTIN_STATUS));
        columns.insert(CategoricalColumn::ProductLine, list(BUILTIN_PRODUCT_LINE));
        columns.insert(CategoricalColumn::ProductCode, ColumnVocabulary::default());
        columns.insert(CategoricalColumn::DealSize, list(BUILTIN_DEAL_SIZE));
        Self { columns }
    }

    pub fn code(&self, column: CategoricalColumn, value: &str) -> Option<i32> {
        self.columns.get(&column)?.codes.get(value).copied()
    }

    pub fn values(&self, column: CategoricalColumn) -> &[String] {
        self.columns
            .get(&column)
            .map(|vocab| vocab.values.as_slice())
            .unwrap_or_default()
    }

    /// Append values not yet known, in sorted order. Returns how many were added.
    pub fn extend<I>(&mut self, column: CategoricalColumn, values: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let vocab = self.columns.entry(column).or_default();
        let fresh: BTreeSet<String> = values
            .into_iter()
            .filter(|value| !vocab.codes.contains_key(value))
            .collect();
        let added = fresh.len();
        for value in fresh {
            vocab.push(value);
        }
        added
    }

    pub fn from_toml_str(content: &str) -> EtlResult<Self> {
        let file: VocabularyFile = toml::from_str(content)
            .map_err(|e| EtlError::config(format!("invalid vocabulary file: {}", e)))?;

        let mut vocab = Self::builtin();
        for (column, values) in [
            (CategoricalColumn::Status, file.status),
            (CategoricalColumn::ProductLine, file.product_line),
            (CategoricalColumn::ProductCode, file.product_code),
            (CategoricalColumn::DealSize, file.deal_size),
        ] {
            match values {
                Some(values) => {
                    vocab.columns.insert(column, ColumnVocabulary::from_values(column, values)?);
                },
                None => debug!(column = %column, "Column missing from vocabulary file, using built-in list"),
            }
        }
        Ok(vocab)
    }

    pub fn to_toml_string(&self) -> EtlResult<String> {
        let file = VocabularyFile {
            status: Some(self.values(CategoricalColumn::Status).to_vec()),
            product_line: Some(self.values(CategoricalColumn::ProductLine).to_vec()),
            product_code: Some(self.values(CategoricalColumn::ProductCode).to_vec()),
            deal_size: Some(self.values(CategoricalColumn::DealSize).to_vec()),
        };
        let body = toml::to_string_pretty(&file)
            .map_err(|e| EtlError::config(format!("cannot serialize vocabulary: {}", e)))?;
        Ok(format!("{}{}", FILE_HEADER, body))
    }

    /// Read the persisted vocabulary, falling back to [`CategoryVocabulary::builtin`]
    /// when the file does not exist yet.
    pub async fn load(path: &Path) -> EtlResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let vocab = Self::from_toml_str(&content)?;
                info!(
                    path = %path.display(),
                    product_codes = vocab.values(CategoricalColumn::ProductCode).len(),
                    "Loaded category vocabulary"
                );
                Ok(vocab)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "No vocabulary file, using built-in vocabulary without product codes"
                );
                Ok(Self::builtin())
            },
            Err(e) => Err(EtlError::config(format!(
                "cannot read vocabulary file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Persist atomically: write a sibling temp file, then rename over the target
    pub async fn save(&self, path: &Path) -> EtlResult<()> {
        let content = self.to_toml_string()?;

        write_atomic(path, content.into_bytes())
            .await
            .map_err(|e| EtlError::storage(format!("writing {}", path.display()), e))?;

        info!(path = %path.display(), "Saved category vocabulary");
        Ok(())
    }
}

impl Default for CategoryVocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Outcome of a vocabulary scan over raw staging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VocabularyBuild {
    pub files_scanned: usize,
    /// Files whose header or rows could not be read; their values were not collected
    pub files_skipped: Vec<FileId>,
    pub added: BTreeMap<CategoricalColumn, usize>,
}

impl VocabularyBuild {
    pub fn total_added(&self) -> usize {
        self.added.values().sum()
    }
}

/// Collect categorical values from every raw file and append the unseen ones.
///
/// Values are gathered across all files before appending, so new codes do not depend on
/// the order files are listed in.
pub async fn build_from_staging(
    raw: &dyn StagingArea,
    settings: &TransformSettings,
    vocabulary: &mut CategoryVocabulary,
) -> EtlResult<VocabularyBuild> {
    let mut build = VocabularyBuild::default();
    let mut observed: BTreeMap<CategoricalColumn, BTreeSet<String>> = BTreeMap::new();

    for id in raw.list_ids().await? {
        let bytes = match raw.read(&id).await {
            Ok(bytes) => bytes,
            Err(StagingError::NotFound(_)) => {
                warn!(file = %id, "File disappeared during vocabulary scan");
                build.files_skipped.push(id);
                continue;
            },
            Err(StagingError::Unavailable(cause)) => {
                return Err(EtlError::storage(format!("reading {}", id.file_name()), cause));
            },
        };

        match observe_categories(&id, &bytes, settings) {
            Ok(values) => {
                for (column, set) in values {
                    observed.entry(column).or_default().extend(set);
                }
                build.files_scanned += 1;
                debug!(file = %id, "Scanned categorical values");
            },
            Err(e) if e.is_file_scoped() => {
                warn!(file = %id, error = %e, "Skipping unreadable file in vocabulary scan");
                build.files_skipped.push(id);
            },
            Err(e) => return Err(e),
        }
    }

    for (column, values) in observed {
        let added = vocabulary.extend(column, values);
        if added > 0 {
            info!(column = %column, added, "Extended category vocabulary");
        }
        build.added.insert(column, added);
    }

    Ok(build)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_codes_are_sorted_positions() {
        let vocab = CategoryVocabulary::builtin();
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Large"), Some(0));
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Small"), Some(2));
        assert_eq!(vocab.code(CategoricalColumn::Status, "In Process"), Some(2));
        assert_eq!(vocab.code(CategoricalColumn::ProductLine, "Vintage Cars"), Some(6));
        assert_eq!(vocab.code(CategoricalColumn::ProductCode, "S10_1678"), None);
    }

    #[test]
    fn test_extend_appends_without_moving_codes() {
        let mut vocab = CategoryVocabulary::builtin();
        let small = vocab.code(CategoricalColumn::DealSize, "Small").unwrap();

        // "Huge" sorts before "Large" but must not shift existing codes
        let added = vocab.extend(
            CategoricalColumn::DealSize,
            ["Huge".to_string(), "Small".to_string(), "Enormous".to_string()],
        );

        assert_eq!(added, 2);
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Small"), Some(small));
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Enormous"), Some(3));
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Huge"), Some(4));
    }

    #[test]
    fn test_toml_round_trip_preserves_order() {
        let mut vocab = CategoryVocabulary::builtin();
        vocab.extend(
            CategoricalColumn::ProductCode,
            ["S18_2238".to_string(), "S10_1678".to_string()],
        );
        let text = vocab.to_toml_string().unwrap();
        let parsed = CategoryVocabulary::from_toml_str(&text).unwrap();
        assert_eq!(parsed, vocab);
        assert_eq!(parsed.code(CategoricalColumn::ProductCode, "S10_1678"), Some(0));
    }

    #[test]
    fn test_duplicate_values_are_rejected() {
        let err = CategoryVocabulary::from_toml_str(r#"deal_size = ["Small", "Small"]"#).unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = CategoryVocabulary::load(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(vocab, CategoryVocabulary::builtin());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("vocabulary.toml");

        let mut vocab = CategoryVocabulary::builtin();
        vocab.extend(CategoricalColumn::ProductCode, ["S24_3969".to_string()]);
        vocab.save(&path).await.unwrap();

        let loaded = CategoryVocabulary::load(&path).await.unwrap();
        assert_eq!(loaded, vocab);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Category vocabulary"));
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_omitted_columns_keep_builtin_lists() {
        let vocab = CategoryVocabulary::from_toml_str(r#"product_code = ["S10_1678"]"#).unwrap();
        assert_eq!(vocab.code(CategoricalColumn::ProductCode, "S10_1678"), Some(0));
        assert_eq!(vocab.code(CategoricalColumn::DealSize, "Small"), Some(2));
        assert_eq!(vocab.code(CategoricalColumn::Status, "Shipped"), Some(5));
        assert_eq!(
            vocab.values(CategoricalColumn::ProductLine),
            CategoryVocabulary::builtin().values(CategoricalColumn::ProductLine)
        );
    }

    #[test]
    fn test_explicit_empty_list_is_kept() {
        let vocab = CategoryVocabulary::from_toml_str("deal_size = []").unwrap();
        assert!(vocab.values(CategoricalColumn::DealSize).is_empty());
    }
}
