//! Raw and canonical sales record types
//!
//! A raw CSV record is first projected into a [`RawSalesRow`] through the configured
//! [`ColumnMapping`], then converted field by field into a typed [`CanonicalRecord`].

use chrono::{NaiveDate, NaiveDateTime};
use retail_common::RetailError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::vocabulary::{CategoricalColumn, CategoryVocabulary};

pub mod mapping;

pub use mapping::{ColumnMapping, HeaderPlan, PlanError, SchemaConfig};

// ============================================================================
// File identifiers
// ============================================================================

/// Extension of every staged file
pub const CSV_EXTENSION: &str = "csv";

/// Stable identifier of a source file: its name without the `.csv` extension
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Identifier for a staged object name, or `None` if it is not a `.csv` file
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".csv")?;
        stem.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object name in a staging area
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, CSV_EXTENSION)
    }
}

impl FromStr for FileId {
    type Err = RetailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && !s.starts_with('.')
            && !s.contains(['/', '\\'])
            && !s.chars().any(char::is_control);

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(RetailError::InvalidFileId(s.to_string()))
        }
    }
}

impl TryFrom<String> for FileId {
    type Error = RetailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Canonical fields
// ============================================================================

/// Every column of the canonical sales schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    OrderNumber,
    QuantityOrdered,
    PriceEach,
    OrderLineNumber,
    Sales,
    OrderDate,
    Status,
    QtrId,
    MonthId,
    YearId,
    ProductLine,
    Msrp,
    ProductCode,
    CustomerName,
    City,
    State,
    Country,
    DealSize,
}

impl CanonicalField {
    pub const COUNT: usize = 18;

    /// Fields in canonical column order
    pub const ALL: [CanonicalField; Self::COUNT] = [
        CanonicalField::OrderNumber,
        CanonicalField::QuantityOrdered,
        CanonicalField::PriceEach,
        CanonicalField::OrderLineNumber,
        CanonicalField::Sales,
        CanonicalField::OrderDate,
        CanonicalField::Status,
        CanonicalField::QtrId,
        CanonicalField::MonthId,
        CanonicalField::YearId,
        CanonicalField::ProductLine,
        CanonicalField::Msrp,
        CanonicalField::ProductCode,
        CanonicalField::CustomerName,
        CanonicalField::City,
        CanonicalField::State,
        CanonicalField::Country,
        CanonicalField::DealSize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::OrderNumber => "order_number",
            CanonicalField::QuantityOrdered => "quantity_ordered",
            CanonicalField::PriceEach => "price_each",
            CanonicalField::OrderLineNumber => "order_line_number",
            CanonicalField::Sales => "sales",
            CanonicalField::OrderDate => "order_date",
            CanonicalField::Status => "status",
            CanonicalField::QtrId => "qtr_id",
            CanonicalField::MonthId => "month_id",
            CanonicalField::YearId => "year_id",
            CanonicalField::ProductLine => "product_line",
            CanonicalField::Msrp => "msrp",
            CanonicalField::ProductCode => "product_code",
            CanonicalField::CustomerName => "customer_name",
            CanonicalField::City => "city",
            CanonicalField::State => "state",
            CanonicalField::Country => "country",
            CanonicalField::DealSize => "deal_size",
        }
    }

    /// Position in [`CanonicalField::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Fields the canonical record can represent as absent
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            CanonicalField::CustomerName
                | CanonicalField::City
                | CanonicalField::State
                | CanonicalField::Country
        )
    }

    pub fn categorical(self) -> Option<CategoricalColumn> {
        match self {
            CanonicalField::Status => Some(CategoricalColumn::Status),
            CanonicalField::ProductLine => Some(CategoricalColumn::ProductLine),
            CanonicalField::ProductCode => Some(CategoricalColumn::ProductCode),
            CanonicalField::DealSize => Some(CategoricalColumn::DealSize),
            _ => None,
        }
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("'{}' is not a canonical column", s))
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Raw rows
// ============================================================================

/// Cell values the legacy reader treated as missing, besides blank cells
const NA_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn present(cell: &str) -> Option<String> {
    let cell = cell.trim();
    if cell.is_empty() || NA_TOKENS.contains(&cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

/// A raw source row projected onto the canonical fields, still untyped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSalesRow {
    pub order_number: Option<String>,
    pub quantity_ordered: Option<String>,
    pub price_each: Option<String>,
    pub order_line_number: Option<String>,
    pub sales: Option<String>,
    pub order_date: Option<String>,
    pub status: Option<String>,
    pub qtr_id: Option<String>,
    pub month_id: Option<String>,
    pub year_id: Option<String>,
    pub product_line: Option<String>,
    pub msrp: Option<String>,
    pub product_code: Option<String>,
    pub customer_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub deal_size: Option<String>,
}

impl RawSalesRow {
    /// Project a CSV record through a header plan; dropped columns are never read
    pub fn from_record(record: &csv::StringRecord, plan: &HeaderPlan) -> Self {
        let mut row = Self::default();
        for field in CanonicalField::ALL {
            let value = record.get(plan.position(field)).and_then(present);
            *row.slot(field) = value;
        }
        row
    }

    fn slot(&mut self, field: CanonicalField) -> &mut Option<String> {
        match field {
            CanonicalField::OrderNumber => &mut self.order_number,
            CanonicalField::QuantityOrdered => &mut self.quantity_ordered,
            CanonicalField::PriceEach => &mut self.price_each,
            CanonicalField::OrderLineNumber => &mut self.order_line_number,
            CanonicalField::Sales => &mut self.sales,
            CanonicalField::OrderDate => &mut self.order_date,
            CanonicalField::Status => &mut self.status,
            CanonicalField::QtrId => &mut self.qtr_id,
            CanonicalField::MonthId => &mut self.month_id,
            CanonicalField::YearId => &mut self.year_id,
            CanonicalField::ProductLine => &mut self.product_line,
            CanonicalField::Msrp => &mut self.msrp,
            CanonicalField::ProductCode => &mut self.product_code,
            CanonicalField::CustomerName => &mut self.customer_name,
            CanonicalField::City => &mut self.city,
            CanonicalField::State => &mut self.state,
            CanonicalField::Country => &mut self.country,
            CanonicalField::DealSize => &mut self.deal_size,
        }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        let value = match field {
            CanonicalField::OrderNumber => &self.order_number,
            CanonicalField::QuantityOrdered => &self.quantity_ordered,
            CanonicalField::PriceEach => &self.price_each,
            CanonicalField::OrderLineNumber => &self.order_line_number,
            CanonicalField::Sales => &self.sales,
            CanonicalField::OrderDate => &self.order_date,
            CanonicalField::Status => &self.status,
            CanonicalField::QtrId => &self.qtr_id,
            CanonicalField::MonthId => &self.month_id,
            CanonicalField::YearId => &self.year_id,
            CanonicalField::ProductLine => &self.product_line,
            CanonicalField::Msrp => &self.msrp,
            CanonicalField::ProductCode => &self.product_code,
            CanonicalField::CustomerName => &self.customer_name,
            CanonicalField::City => &self.city,
            CanonicalField::State => &self.state,
            CanonicalField::Country => &self.country,
            CanonicalField::DealSize => &self.deal_size,
        };
        value.as_deref()
    }

    /// First required field without a value, if any
    pub fn first_missing(&self, required: &[CanonicalField]) -> Option<CanonicalField> {
        required.iter().copied().find(|field| self.get(*field).is_none())
    }
}

// ============================================================================
// Canonical records
// ============================================================================

/// One cleaned sales line; column names and order match the `retail_sales` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub order_number: i32,
    pub quantity_ordered: i32,
    pub price_each: f64,
    pub order_line_number: i32,
    pub sales: f64,
    pub order_date: NaiveDateTime,
    pub status: i32,
    pub qtr_id: i32,
    pub month_id: i32,
    pub year_id: i32,
    pub product_line: i32,
    pub msrp: f64,
    pub product_code: i32,
    pub customer_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub deal_size: i32,
}

/// Why a raw row could not become a canonical record
#[derive(Debug, Clone, PartialEq)]
pub enum RowError {
    Missing(CanonicalField),
    Invalid {
        field: CanonicalField,
        value: String,
        reason: String,
    },
    UnknownCategory {
        column: CategoricalColumn,
        value: String,
    },
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::Missing(field) => write!(f, "missing value for {}", field),
            RowError::Invalid { field, value, reason } => {
                write!(f, "invalid {} '{}': {}", field, value, reason)
            },
            RowError::UnknownCategory { column, value } => {
                write!(f, "value '{}' is not in the {} vocabulary", value, column)
            },
        }
    }
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// Parse an order timestamp in any of the formats seen in source drops
pub fn parse_order_date(value: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl CanonicalRecord {
    /// Type every field and recode categoricals through the shared vocabulary
    pub fn from_raw(raw: &RawSalesRow, vocabulary: &CategoryVocabulary) -> Result<Self, RowError> {
        let text = |field: CanonicalField| raw.get(field).ok_or(RowError::Missing(field));

        let int = |field: CanonicalField| -> Result<i32, RowError> {
            let value = text(field)?;
            value.parse::<i32>().map_err(|e| RowError::Invalid {
                field,
                value: value.to_string(),
                reason: e.to_string(),
            })
        };

        let float = |field: CanonicalField| -> Result<f64, RowError> {
            let value = text(field)?;
            match value.parse::<f64>() {
                Ok(number) if number.is_finite() => Ok(number),
                Ok(_) => Err(RowError::Invalid {
                    field,
                    value: value.to_string(),
                    reason: "not a finite number".to_string(),
                }),
                Err(e) => Err(RowError::Invalid {
                    field,
                    value: value.to_string(),
                    reason: e.to_string(),
                }),
            }
        };

        let code = |field: CanonicalField, column: CategoricalColumn| -> Result<i32, RowError> {
            let value = text(field)?;
            vocabulary
                .code(column, value)
                .ok_or_else(|| RowError::UnknownCategory {
                    column,
                    value: value.to_string(),
                })
        };

        let order_date = {
            let value = text(CanonicalField::OrderDate)?;
            parse_order_date(value).ok_or_else(|| RowError::Invalid {
                field: CanonicalField::OrderDate,
                value: value.to_string(),
                reason: "unrecognized date format".to_string(),
            })?
        };

        Ok(Self {
            order_number: int(CanonicalField::OrderNumber)?,
            quantity_ordered: int(CanonicalField::QuantityOrdered)?,
            price_each: float(CanonicalField::PriceEach)?,
            order_line_number: int(CanonicalField::OrderLineNumber)?,
            sales: float(CanonicalField::Sales)?,
            order_date,
            status: code(CanonicalField::Status, CategoricalColumn::Status)?,
            qtr_id: int(CanonicalField::QtrId)?,
            month_id: int(CanonicalField::MonthId)?,
            year_id: int(CanonicalField::YearId)?,
            product_line: code(CanonicalField::ProductLine, CategoricalColumn::ProductLine)?,
            msrp: float(CanonicalField::Msrp)?,
            product_code: code(CanonicalField::ProductCode, CategoricalColumn::ProductCode)?,
            customer_name: raw.customer_name.clone(),
            city: raw.city.clone(),
            state: raw.state.clone(),
            country: raw.country.clone(),
            deal_size: code(CanonicalField::DealSize, CategoricalColumn::DealSize)?,
        })
    }
}
