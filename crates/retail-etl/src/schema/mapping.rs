//! Raw-to-canonical column mapping
//!
//! [`SchemaConfig`] is the serializable form (defaults reproduce the legacy dataset layout);
//! [`ColumnMapping`] is the validated form used by the transformer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use super::CanonicalField;
use crate::error::{EtlError, EtlResult};

/// Personally identifying or low-value raw columns removed before mapping
pub const DEFAULT_DROP_COLUMNS: &[&str] = &[
    "PHONE",
    "ADDRESSLINE1",
    "ADDRESSLINE2",
    "POSTALCODE",
    "TERRITORY",
    "CONTACTLASTNAME",
    "CONTACTFIRSTNAME",
];

/// Raw column name -> canonical column name
pub const DEFAULT_RENAME: &[(&str, &str)] = &[
    ("ORDERNUMBER", "order_number"),
    ("QUANTITYORDERED", "quantity_ordered"),
    ("PRICEEACH", "price_each"),
    ("ORDERLINENUMBER", "order_line_number"),
    ("SALES", "sales"),
    ("ORDERDATE", "order_date"),
    ("STATUS", "status"),
    ("QTR_ID", "qtr_id"),
    ("MONTH_ID", "month_id"),
    ("YEAR_ID", "year_id"),
    ("PRODUCTLINE", "product_line"),
    ("MSRP", "msrp"),
    ("PRODUCTCODE", "product_code"),
    ("CUSTOMERNAME", "customer_name"),
    ("CITY", "city"),
    ("STATE", "state"),
    ("COUNTRY", "country"),
    ("DEALSIZE", "deal_size"),
];

/// Canonical columns whose absence invalidates the whole row
pub const DEFAULT_REQUIRED: &[&str] = &[
    "order_number",
    "quantity_ordered",
    "price_each",
    "order_line_number",
    "sales",
    "order_date",
    "status",
    "qtr_id",
    "month_id",
    "year_id",
    "product_line",
    "msrp",
    "product_code",
    "deal_size",
];

/// Column handling for one dataset family, as written in the schema TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub drop_columns: Vec<String>,
    pub rename: BTreeMap<String, String>,
    pub required: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            drop_columns: DEFAULT_DROP_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rename: DEFAULT_RENAME
                .iter()
                .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
                .collect(),
            required: DEFAULT_REQUIRED.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl SchemaConfig {
    pub fn from_toml_str(content: &str) -> EtlResult<Self> {
        toml::from_str(content).map_err(|e| EtlError::config(format!("invalid schema file: {}", e)))
    }

    pub async fn load(path: &Path) -> EtlResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            EtlError::config(format!("cannot read schema file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the mapping is total and consistent, producing the lookup form
    pub fn validate(&self) -> EtlResult<ColumnMapping> {
        let drop: HashSet<String> = self.drop_columns.iter().map(|c| c.trim().to_string()).collect();

        let mut rename = HashMap::with_capacity(self.rename.len());
        let mut sources: HashMap<CanonicalField, &str> = HashMap::new();

        for (raw, canonical) in &self.rename {
            let raw = raw.trim();
            if drop.contains(raw) {
                return Err(EtlError::config(format!(
                    "column '{}' is both dropped and renamed",
                    raw
                )));
            }

            let field: CanonicalField = canonical.trim().parse().map_err(EtlError::config)?;
            if let Some(previous) = sources.insert(field, raw) {
                return Err(EtlError::config(format!(
                    "columns '{}' and '{}' both map to {}",
                    previous, raw, field
                )));
            }
            rename.insert(raw.to_string(), field);
        }

        let unmapped: Vec<&str> = CanonicalField::ALL
            .iter()
            .filter(|field| !sources.contains_key(field))
            .map(|field| field.name())
            .collect();
        if !unmapped.is_empty() {
            return Err(EtlError::config(format!(
                "no raw column maps to {}",
                unmapped.join(", ")
            )));
        }

        let mut required = Vec::with_capacity(self.required.len());
        for name in &self.required {
            let field: CanonicalField = name.trim().parse().map_err(EtlError::config)?;
            if !required.contains(&field) {
                required.push(field);
            }
        }

        if let Some(field) = CanonicalField::ALL
            .into_iter()
            .find(|field| !field.is_optional() && !required.contains(field))
        {
            return Err(EtlError::config(format!(
                "{} cannot be absent in a canonical record and must be listed as required",
                field
            )));
        }

        Ok(ColumnMapping {
            drop,
            rename,
            required,
        })
    }
}

/// Validated column handling
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    drop: HashSet<String>,
    rename: HashMap<String, CanonicalField>,
    required: Vec<CanonicalField>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        // The built-in tables are checked by the unit tests below
        match SchemaConfig::default().validate() {
            Ok(mapping) => mapping,
            Err(e) => unreachable!("built-in schema tables are inconsistent: {}", e),
        }
    }
}

impl ColumnMapping {
    pub fn required(&self) -> &[CanonicalField] {
        &self.required
    }

    /// Resolve a file's header row against the mapping
    pub fn plan(&self, headers: &csv::StringRecord) -> Result<HeaderPlan, PlanError> {
        let mut positions: [Option<usize>; CanonicalField::COUNT] = [None; CanonicalField::COUNT];
        let mut seen = HashSet::new();

        for (position, header) in headers.iter().enumerate() {
            let header = header.trim();
            if !seen.insert(header) {
                return Err(PlanError::DuplicateColumn(header.to_string()));
            }
            if self.drop.contains(header) {
                continue;
            }
            match self.rename.get(header) {
                Some(field) => positions[field.index()] = Some(position),
                None => return Err(PlanError::UnmappedColumn(header.to_string())),
            }
        }

        let mut resolved = [0usize; CanonicalField::COUNT];
        for field in CanonicalField::ALL {
            resolved[field.index()] =
                positions[field.index()].ok_or(PlanError::MissingColumn(field))?;
        }

        Ok(HeaderPlan {
            positions: resolved,
        })
    }
}

/// Column positions of each canonical field within one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPlan {
    positions: [usize; CanonicalField::COUNT],
}

impl HeaderPlan {
    pub fn position(&self, field: CanonicalField) -> usize {
        self.positions[field.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A retained raw column has no canonical name (configuration problem)
    UnmappedColumn(String),
    /// The file lacks a column the mapping expects (data problem)
    MissingColumn(CanonicalField),
    DuplicateColumn(String),
}

impl PlanError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, PlanError::UnmappedColumn(_))
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::UnmappedColumn(column) => {
                write!(f, "retained column '{}' has no entry in the rename table", column)
            },
            PlanError::MissingColumn(field) => write!(f, "no column provides {}", field),
            PlanError::DuplicateColumn(column) => write!(f, "column '{}' appears twice", column),
        }
    }
}
