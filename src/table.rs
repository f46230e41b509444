//! Columnar-table decoding (Parquet).
//!
//! Reads a Parquet file into one [`Record`] per row, restricted to an
//! allowlist of columns. Requested columns missing from the file are simply
//! absent from every record, so files written with slightly different
//! schemas decode the same way.

use crate::error::Result;
use crate::pickle::MAX_SAFE_INTEGER;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use parquet::basic::{ConvertedType, LogicalType, TimeUnit};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use parquet::schema::types::{Type, TypePtr};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One normalized table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings, and integers beyond the safe range as decimal text.
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<Cell>),
}

/// One decoded row: column name to cell, requested columns only.
pub type Record = BTreeMap<String, Cell>;

#[derive(Debug, Clone, Copy)]
enum Unit {
    Millis,
    Micros,
    Nanos,
}

impl Cell {
    /// Text cells only.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            _ => None,
        }
    }

    /// Byte-vector and list cells as a plain array of cells.
    #[must_use]
    pub fn to_array(&self) -> Option<Vec<Self>> {
        match self {
            Self::Bytes(raw) => Some(raw.iter().map(|b| Self::Int(i64::from(*b))).collect()),
            Self::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Decode `bytes` as a Parquet file, projecting `columns`.
///
/// # Errors
///
/// Returns [`LensError::Parquet`](crate::LensError::Parquet) when the file
/// is not valid Parquet or a row cannot be read.
pub fn decode(bytes: Bytes, columns: &[&str]) -> Result<Vec<Record>> {
    let reader = SerializedFileReader::new(bytes)?;
    let metadata = reader.metadata().file_metadata();
    let num_rows = usize::try_from(metadata.num_rows()).unwrap_or_default();
    let schema = metadata.schema();

    let selected: Vec<TypePtr> = columns
        .iter()
        .filter_map(|name| {
            schema
                .get_fields()
                .iter()
                .find(|field| field.name() == *name)
                .cloned()
        })
        .collect();

    if selected.is_empty() {
        debug!(rows = num_rows, "No requested columns present");
        return Ok(vec![Record::new(); num_rows]);
    }

    let units: HashMap<String, Unit> = selected
        .iter()
        .filter_map(|field| timestamp_unit(field).map(|unit| (field.name().to_string(), unit)))
        .collect();

    let projection = Type::group_type_builder(schema.name())
        .with_fields(selected)
        .build()?;

    let mut records = Vec::with_capacity(num_rows);
    for row in reader.get_row_iter(Some(projection))? {
        let row = row?;
        let record = row
            .into_columns()
            .into_iter()
            .map(|(name, field)| {
                let cell = match (units.get(&name), &field) {
                    (Some(unit), Field::Long(raw)) => timestamp_from_unit(*raw, *unit),
                    _ => convert(field),
                };
                (name, cell)
            })
            .collect();
        records.push(record);
    }

    debug!(rows = records.len(), columns = columns.len(), "Decoded table");
    Ok(records)
}

fn timestamp_unit(field: &Arc<Type>) -> Option<Unit> {
    if !field.is_primitive() {
        return None;
    }
    let info = field.get_basic_info();
    match info.logical_type() {
        Some(LogicalType::Timestamp { unit, .. }) => Some(match unit {
            TimeUnit::MILLIS(_) => Unit::Millis,
            TimeUnit::MICROS(_) => Unit::Micros,
            TimeUnit::NANOS(_) => Unit::Nanos,
        }),
        _ => match info.converted_type() {
            ConvertedType::TIMESTAMP_MILLIS => Some(Unit::Millis),
            ConvertedType::TIMESTAMP_MICROS => Some(Unit::Micros),
            _ => None,
        },
    }
}

fn timestamp_from_unit(raw: i64, unit: Unit) -> Cell {
    let instant = match unit {
        Unit::Millis => DateTime::from_timestamp_millis(raw),
        Unit::Micros => DateTime::from_timestamp_micros(raw),
        Unit::Nanos => Some(DateTime::from_timestamp_nanos(raw)),
    };
    instant.map_or(Cell::Null, Cell::Timestamp)
}

fn int_cell(value: i128) -> Cell {
    if value.abs() <= MAX_SAFE_INTEGER {
        i64::try_from(value).map_or(Cell::Null, Cell::Int)
    } else {
        Cell::Text(value.to_string())
    }
}

fn convert(field: Field) -> Cell {
    match field {
        Field::Null => Cell::Null,
        Field::Bool(b) => Cell::Bool(b),
        Field::Byte(v) => Cell::Int(i64::from(v)),
        Field::Short(v) => Cell::Int(i64::from(v)),
        Field::Int(v) => Cell::Int(i64::from(v)),
        Field::Long(v) => int_cell(i128::from(v)),
        Field::UByte(v) => Cell::Int(i64::from(v)),
        Field::UShort(v) => Cell::Int(i64::from(v)),
        Field::UInt(v) => Cell::Int(i64::from(v)),
        Field::ULong(v) => int_cell(i128::from(v)),
        Field::Float(v) => Cell::Float(f64::from(v)),
        Field::Double(v) => Cell::Float(v),
        Field::Str(s) => Cell::Text(s),
        Field::Bytes(raw) => match raw.as_utf8() {
            Ok(text) => Cell::Text(text.to_string()),
            Err(_) => Cell::Bytes(raw.data().to_vec()),
        },
        Field::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(Cell::Null, |naive| Cell::Timestamp(naive.and_utc())),
        Field::TimestampMillis(ms) => timestamp_from_unit(ms, Unit::Millis),
        Field::TimestampMicros(us) => timestamp_from_unit(us, Unit::Micros),
        Field::ListInternal(list) => Cell::List(list.elements().iter().cloned().map(convert).collect()),
        _ => Cell::Null,
    }
}
