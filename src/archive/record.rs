//! Dynamic record codec: packing/unpacking rows whose column layout is
//! only known at runtime (an archive's current schema), as opposed to
//! the statically-typed [`Encode`]/[`Decode`] structs in [`super::types`].

use crate::archive::types::ColumnType;
use crate::encoding::{Decode, Encode, EncodingError};

/// One column's value in a record. The variant always matches the
/// [`ColumnType`] at the same position in the owning schema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A [`ColumnType::Bool`] value.
    Bool(bool),
    /// A [`ColumnType::Int16`] value.
    Int16(i16),
    /// A [`ColumnType::UInt32`] value.
    UInt32(u32),
    /// A [`ColumnType::Int32`] value.
    Int32(i32),
    /// A [`ColumnType::Float32`] value.
    Float32(f32),
}

impl Value {
    /// The [`ColumnType`] this value was built with.
    pub fn col_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int16(_) => ColumnType::Int16,
            Value::UInt32(_) => ColumnType::UInt32,
            Value::Int32(_) => ColumnType::Int32,
            Value::Float32(_) => ColumnType::Float32,
        }
    }

    /// A zero-valued placeholder for `col_type`, used to backfill
    /// existing rows when a column is added to an archive's schema.
    pub fn zero(col_type: ColumnType) -> Self {
        match col_type {
            ColumnType::Bool => Value::Bool(false),
            ColumnType::Int16 => Value::Int16(0),
            ColumnType::UInt32 => Value::UInt32(0),
            ColumnType::Int32 => Value::Int32(0),
            ColumnType::Float32 => Value::Float32(0.0),
        }
    }

    fn encode_to(self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Value::Bool(v) => v.encode_to(buf),
            Value::Int16(v) => v.encode_to(buf),
            Value::UInt32(v) => v.encode_to(buf),
            Value::Int32(v) => v.encode_to(buf),
            Value::Float32(v) => v.encode_to(buf),
        }
    }

    fn decode_from(col_type: ColumnType, buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok(match col_type {
            ColumnType::Bool => {
                let (v, n) = bool::decode_from(buf)?;
                (Value::Bool(v), n)
            }
            ColumnType::Int16 => {
                let (v, n) = i16::decode_from(buf)?;
                (Value::Int16(v), n)
            }
            ColumnType::UInt32 => {
                let (v, n) = u32::decode_from(buf)?;
                (Value::UInt32(v), n)
            }
            ColumnType::Int32 => {
                let (v, n) = i32::decode_from(buf)?;
                (Value::Int32(v), n)
            }
            ColumnType::Float32 => {
                let (v, n) = f32::decode_from(buf)?;
                (Value::Float32(v), n)
            }
        })
    }
}

/// A single time-series row: a timestamp plus one value per schema
/// column, in schema declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Seconds since the UNIX epoch.
    pub timestamp: u32,
    /// One value per column, aligned with the owning archive's schema.
    pub values: Vec<Value>,
}

impl Row {
    /// Creates a new row.
    pub fn new(timestamp: u32, values: Vec<Value>) -> Self {
        Self { timestamp, values }
    }
}

/// Byte width of one fixed-width record (`timestamp` + every column),
/// given the schema that record was written under.
pub fn record_width(schema: &[ColumnType]) -> usize {
    4 + schema.iter().map(|c| c.width()).sum::<usize>()
}

/// Packs a single row into its fixed-width on-disk representation.
///
/// `row.values` must have exactly one entry per `schema` column, in
/// order; a mismatch indicates a caller bug (an archive's writer always
/// builds rows against its own current schema) and is reported as
/// [`EncodingError::Custom`] rather than panicking.
pub fn pack_record(schema: &[ColumnType], row: &Row) -> Result<Vec<u8>, EncodingError> {
    if row.values.len() != schema.len() {
        return Err(EncodingError::Custom(format!(
            "record has {} values, schema has {} columns",
            row.values.len(),
            schema.len()
        )));
    }
    let mut buf = Vec::with_capacity(record_width(schema));
    row.timestamp.encode_to(&mut buf)?;
    for (value, col_type) in row.values.iter().zip(schema) {
        if value.col_type() != *col_type {
            return Err(EncodingError::Custom(format!(
                "value type {:?} does not match schema column type {:?}",
                value.col_type(),
                col_type
            )));
        }
        value.encode_to(&mut buf)?;
    }
    Ok(buf)
}

/// Packs a batch of rows into one contiguous buffer, in one pass — the
/// shape a single `write(2)` call wants.
pub fn pack_records(schema: &[ColumnType], rows: &[Row]) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::with_capacity(record_width(schema) * rows.len());
    for row in rows {
        let packed = pack_record(schema, row)?;
        buf.extend_from_slice(&packed);
    }
    Ok(buf)
}

/// Unpacks a single fixed-width record from the start of `buf`.
pub fn unpack_record(schema: &[ColumnType], buf: &[u8]) -> Result<(Row, usize), EncodingError> {
    let mut offset = 0;
    let (timestamp, n) = u32::decode_from(&buf[offset..])?;
    offset += n;
    let mut values = Vec::with_capacity(schema.len());
    for col_type in schema {
        let (value, n) = Value::decode_from(*col_type, &buf[offset..])?;
        offset += n;
        values.push(value);
    }
    Ok((Row { timestamp, values }, offset))
}

/// Unpacks every whole record found in `buf` (a batch read from the
/// data file). Any trailing bytes shorter than one record width are
/// ignored — callers that care about a torn final record detect it by
/// comparing `buf.len()` against a multiple of `record_width(schema)`
/// before calling this.
pub fn unpack_records(schema: &[ColumnType], buf: &[u8]) -> Result<Vec<Row>, EncodingError> {
    let width = record_width(schema);
    if width == 0 {
        return Ok(Vec::new());
    }
    let whole = (buf.len() / width) * width;
    let mut rows = Vec::with_capacity(buf.len() / width);
    let mut offset = 0;
    while offset < whole {
        let (row, consumed) = unpack_record(schema, &buf[offset..])?;
        offset += consumed;
        rows.push(row);
    }
    Ok(rows)
}
