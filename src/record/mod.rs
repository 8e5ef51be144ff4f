//! Record model — the shared currency type of the database.
//!
//! This module defines:
//!
//! - [`Value`] — a scalar or vector measurement.
//! - [`Record`] — an immutable time-stamped record with tag and field maps.
//! - [`TimeRange`] — a half-open `[start, end)` interval of timestamps.
//! - [`Aggregation`] / [`QueryConfig`] — the ad-hoc query descriptor.
//!
//! ## Design Invariants
//!
//! - A record is **immutable after insertion**: engines may copy records
//!   but never mutate them in place. All mutating constructors consume
//!   `self` builder-style before the record enters a table.
//! - Timestamps are signed 64-bit milliseconds since epoch (stream tables
//!   may treat them as microseconds by convention; the storage layers are
//!   unit-agnostic).
//! - Tag and field maps are `BTreeMap`s so that the encoded wire form is
//!   deterministic.
//!
//! ## Wire format
//!
//! `[i64 ts][u8 value_kind (0=scalar, 1=vector)][value bytes]
//!  [u32 tag_count][key][value]…[u32 field_count][key][value]…`
//!
//! shared by the WAL, SSTable data blocks, and the legacy archive format.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A measurement value: either a single scalar or an ordered vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A single `f64` measurement.
    Scalar(f64),

    /// An ordered sequence of `f64` measurements (e.g. an embedding).
    Vector(Vec<f64>),
}

impl Value {
    /// Projects the value to a scalar.
    ///
    /// Vectors project to their first element; an empty vector projects
    /// to `0.0`.
    pub fn as_scalar(&self) -> f64 {
        match self {
            Value::Scalar(v) => *v,
            Value::Vector(vs) => vs.first().copied().unwrap_or(0.0),
        }
    }

    /// Projects the value to a vector, wrapping a scalar in a
    /// one-element vector.
    pub fn as_vector(&self) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Vector(vs) => vs.clone(),
        }
    }

    /// Approximate in-memory footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        match self {
            Value::Scalar(_) => std::mem::size_of::<f64>(),
            Value::Vector(vs) => vs.len() * std::mem::size_of::<f64>(),
        }
    }
}

impl Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Value::Scalar(v) => {
                0u8.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Value::Vector(vs) => {
                1u8.encode_to(buf)?;
                encoding::encode_vec(vs, buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u8::decode_from(buf)?;
        match tag {
            0 => {
                let (v, n) = f64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Value::Scalar(v), offset))
            }
            1 => {
                let (vs, n) = encoding::decode_vec::<f64>(&buf[offset..])?;
                offset += n;
                Ok((Value::Vector(vs), offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Value",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// An immutable time-stamped record.
///
/// Tags are indexable key/value annotations; fields are free-form
/// key/value payload that is never indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Milliseconds since epoch (microseconds by convention in stream tables).
    pub timestamp: i64,

    /// The measurement itself.
    pub value: Value,

    /// Indexable string annotations.
    pub tags: BTreeMap<String, String>,

    /// Non-indexed string payload.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates a record carrying a scalar value.
    pub fn new_scalar(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value: Value::Scalar(value),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Creates a record carrying a vector value.
    pub fn new_vector(timestamp: i64, values: Vec<f64>) -> Self {
        Self {
            timestamp,
            value: Value::Vector(values),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a tag, builder-style.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field, builder-style.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Scalar projection of the value (first element for vectors).
    pub fn scalar_value(&self) -> f64 {
        self.value.as_scalar()
    }

    /// Returns true when every `(key, value)` pair in `filter` is present
    /// in this record's tags. An empty filter matches everything.
    pub fn matches_tags(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|tv| tv == v))
    }

    /// Approximate in-memory footprint in bytes, used for memtable
    /// budget accounting.
    pub fn approximate_size(&self) -> usize {
        let maps: usize = self
            .tags
            .iter()
            .chain(self.fields.iter())
            .map(|(k, v)| k.len() + v.len())
            .sum();
        std::mem::size_of::<i64>() + self.value.approximate_size() + maps
    }
}

impl Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.timestamp.encode_to(buf)?;
        self.value.encode_to(buf)?;
        encoding::encode_string_map(&self.tags, buf)?;
        encoding::encode_string_map(&self.fields, buf)?;
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Value::decode_from(&buf[offset..])?;
        offset += n;
        let (tags, n) = encoding::decode_string_map(&buf[offset..])?;
        offset += n;
        let (fields, n) = encoding::decode_string_map(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                timestamp,
                value,
                tags,
                fields,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// TimeRange
// ------------------------------------------------------------------------------------------------

/// A half-open timestamp interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Inclusive start timestamp.
    pub start: i64,

    /// Exclusive end timestamp.
    pub end: i64,
}

impl TimeRange {
    /// Creates a new range covering `[start, end)`.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The range covering every representable timestamp.
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Returns true iff `start ≤ ts < end`.
    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.end
    }

    /// A range is valid when it is non-empty.
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    /// Returns true when the two half-open ranges share any timestamp.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Range length; zero for invalid ranges.
    pub fn duration(&self) -> i64 {
        (self.end - self.start).max(0)
    }
}

impl Encode for TimeRange {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TimeRange {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (start, n1) = i64::decode_from(buf)?;
        let (end, n2) = i64::decode_from(&buf[n1..])?;
        Ok((Self { start, end }, n1 + n2))
    }
}

// ------------------------------------------------------------------------------------------------
// Aggregation
// ------------------------------------------------------------------------------------------------

/// Aggregation applied to the scalar projection of query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Return raw records, no aggregation.
    #[default]
    None,
    Sum,
    Avg,
    Min,
    Max,
    Count,
    First,
    Last,
    Stddev,
}

impl Aggregation {
    /// Applies the aggregation over the given scalar values.
    ///
    /// An empty input yields `0.0` for every kind.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Aggregation::None | Aggregation::First => values[0],
            Aggregation::Last => values[values.len() - 1],
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Count => values.len() as f64,
            Aggregation::Stddev => {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var =
                    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
                var.sqrt()
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// QueryConfig
// ------------------------------------------------------------------------------------------------

/// Ad-hoc query descriptor: time range, optional tag filter, optional
/// aggregation, optional windowing, and a row limit.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Time range to query, half-open.
    pub range: TimeRange,

    /// Records must carry every listed tag pair. Empty = no filter.
    pub tag_filter: BTreeMap<String, String>,

    /// Aggregation applied to scalar projections.
    pub aggregation: Aggregation,

    /// Optional window size in milliseconds for windowed aggregation.
    pub window_size_ms: Option<i64>,

    /// Maximum number of rows to return. `None` = unlimited.
    pub limit: Option<usize>,
}

impl QueryConfig {
    /// A plain range query with no filter, aggregation, or limit.
    pub fn range(range: TimeRange) -> Self {
        Self {
            range,
            tag_filter: BTreeMap::new(),
            aggregation: Aggregation::None,
            window_size_ms: None,
            limit: None,
        }
    }

    /// Adds a tag-equality filter, builder-style.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag_filter.insert(key.into(), value.into());
        self
    }

    /// Sets the aggregation kind, builder-style.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Sets the row limit, builder-style.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
