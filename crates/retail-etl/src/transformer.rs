//! Raw file -> canonical cleaned file
//!
//! A transform is a pure function of the raw bytes, the column mapping and the category
//! vocabulary: the same inputs always produce byte-identical cleaned output.

use encoding_rs::Encoding;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{EtlError, EtlResult};
use crate::schema::{CanonicalField, CanonicalRecord, ColumnMapping, FileId, HeaderPlan, RawSalesRow, RowError};
use crate::staging::{StagingArea, StagingError};
use crate::vocabulary::{CategoricalColumn, CategoryVocabulary};

/// Everything a transform depends on besides the file itself
#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub mapping: ColumnMapping,
    pub vocabulary: Arc<CategoryVocabulary>,
    pub encoding: &'static Encoding,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            mapping: ColumnMapping::default(),
            vocabulary: Arc::new(CategoryVocabulary::builtin()),
            encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub file: FileId,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub rows_written: usize,
}

/// Canonical rows of one file plus counters
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedFile {
    pub records: Vec<CanonicalRecord>,
    pub rows_read: usize,
    pub rows_dropped: usize,
}

pub struct Transformer {
    raw: Arc<dyn StagingArea>,
    cleaned: Arc<dyn StagingArea>,
    settings: TransformSettings,
}

impl Transformer {
    pub fn new(
        raw: Arc<dyn StagingArea>,
        cleaned: Arc<dyn StagingArea>,
        settings: TransformSettings,
    ) -> Self {
        Self {
            raw,
            cleaned,
            settings,
        }
    }

    /// Convert `<id>.csv` from raw staging and publish it to cleaned staging
    #[instrument(skip(self), fields(file = %id))]
    pub async fn transform(&self, id: &FileId) -> EtlResult<TransformReport> {
        let bytes = self.raw.read(id).await.map_err(|e| match e {
            StagingError::NotFound(_) => EtlError::transform(id, e),
            StagingError::Unavailable(cause) => {
                EtlError::storage(format!("reading {} from raw staging", id.file_name()), cause)
            },
        })?;

        let transformed = transform_bytes(id, &bytes, &self.settings)?;
        let content = write_cleaned(&transformed.records).map_err(|e| EtlError::transform(id, e))?;
        self.cleaned.write(id, content).await?;

        let report = TransformReport {
            file: id.clone(),
            rows_read: transformed.rows_read,
            rows_dropped: transformed.rows_dropped,
            rows_written: transformed.records.len(),
        };

        info!(
            rows_read = report.rows_read,
            rows_dropped = report.rows_dropped,
            rows_written = report.rows_written,
            "Transformed file"
        );
        Ok(report)
    }
}

/// Decode raw bytes, honouring a byte order mark over the configured encoding
pub fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Option<Cow<'a, str>> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((detected, bom_length)) => (detected, &bytes[bom_length..]),
        None => (encoding, bytes),
    };
    encoding.decode_without_bom_handling_and_without_replacement(body)
}

fn open_source<'a>(
    id: &FileId,
    bytes: &'a [u8],
    settings: &TransformSettings,
) -> EtlResult<(csv::Reader<std::io::Cursor<Cow<'a, [u8]>>>, HeaderPlan)> {
    let text = decode(bytes, settings.encoding).ok_or_else(|| {
        EtlError::transform(
            id,
            format!("content is not valid {}", settings.encoding.name()),
        )
    })?;
    let text: Cow<'a, [u8]> = match text {
        Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
        Cow::Owned(text) => Cow::Owned(text.into_bytes()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(std::io::Cursor::new(text));

    let headers = reader
        .headers()
        .map_err(|e| EtlError::transform(id, format!("unreadable header: {}", e)))?;

    let plan = settings.mapping.plan(headers).map_err(|e| {
        if e.is_configuration() {
            EtlError::config(format!("{}: {}", id.file_name(), e))
        } else {
            EtlError::transform(id, e)
        }
    })?;

    Ok((reader, plan))
}

/// Apply the drop, rename, completeness and recoding steps to one file's bytes
pub fn transform_bytes(
    id: &FileId,
    bytes: &[u8],
    settings: &TransformSettings,
) -> EtlResult<TransformedFile> {
    let (mut reader, plan) = open_source(id, bytes, settings)?;

    let mut records = Vec::new();
    let mut rows_read = 0;
    let mut rows_dropped = 0;

    for (index, result) in reader.records().enumerate() {
        let row_number = index + 1;
        let record = result.map_err(|e| EtlError::transform(id, format!("row {}: {}", row_number, e)))?;
        rows_read += 1;

        let raw = RawSalesRow::from_record(&record, &plan);
        if let Some(field) = raw.first_missing(settings.mapping.required()) {
            debug!(file = %id, row = row_number, field = %field, "Dropping incomplete row");
            rows_dropped += 1;
            continue;
        }

        match CanonicalRecord::from_raw(&raw, &settings.vocabulary) {
            Ok(canonical) => records.push(canonical),
            Err(RowError::UnknownCategory { column, value }) => {
                return Err(EtlError::config(format!(
                    "{} row {}: value '{}' is not in the {} vocabulary (run `retail-etl vocabulary build`)",
                    id.file_name(),
                    row_number,
                    value,
                    column
                )));
            },
            Err(e) => return Err(EtlError::transform(id, format!("row {}: {}", row_number, e))),
        }
    }

    Ok(TransformedFile {
        records,
        rows_read,
        rows_dropped,
    })
}

/// Distinct categorical values of the rows a transform would keep
pub fn observe_categories(
    id: &FileId,
    bytes: &[u8],
    settings: &TransformSettings,
) -> EtlResult<BTreeMap<CategoricalColumn, BTreeSet<String>>> {
    let (mut reader, plan) = open_source(id, bytes, settings)?;
    let mut observed: BTreeMap<CategoricalColumn, BTreeSet<String>> = BTreeMap::new();

    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| EtlError::transform(id, format!("row {}: {}", index + 1, e)))?;
        let raw = RawSalesRow::from_record(&record, &plan);
        if raw.first_missing(settings.mapping.required()).is_some() {
            continue;
        }

        for column in CategoricalColumn::ALL {
            if let Some(value) = raw.get(column.field()) {
                observed.entry(column).or_default().insert(value.to_string());
            }
        }
    }

    Ok(observed)
}

/// Serialize canonical rows; the header is written even when there are no rows
pub fn write_cleaned(records: &[CanonicalRecord]) -> Result<Vec<u8>, String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(CanonicalField::ALL.iter().map(|field| field.name()))
        .map_err(|e| e.to_string())?;
    for record in records {
        writer.serialize(record).map_err(|e| e.to_string())?;
    }

    writer.into_inner().map_err(|e| e.to_string())
}

/// Parse a cleaned file back into canonical rows
pub fn read_cleaned(bytes: &[u8]) -> Result<Vec<CanonicalRecord>, String> {
    let mut reader = csv::Reader::from_reader(bytes);

    let headers = reader.headers().map_err(|e| e.to_string())?;
    let expected = CanonicalField::ALL.iter().map(|field| field.name());
    if !headers.iter().eq(expected) {
        return Err(format!("unexpected cleaned header: {:?}", headers));
    }

    reader
        .deserialize::<CanonicalRecord>()
        .enumerate()
        .map(|(index, row)| row.map_err(|e| format!("row {}: {}", index + 1, e)))
        .collect()
}
