//! Row-oriented tuple model carried by buffer accessors.
//!
//! The engine never inspects tuple bytes; it only needs a shape to hand from
//! producer to consumer and a byte size to decide when a buffer is full.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int64,
    Float64,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl AttrDesc {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Shape of every tuple on one buffer. Fixed once the producer is prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleDesc {
    pub attrs: Vec<AttrDesc>,
}

impl TupleDesc {
    pub fn new(attrs: Vec<AttrDesc>) -> Self {
        Self { attrs }
    }

    /// Single non-null column; handy for counters.
    pub fn single(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(vec![AttrDesc::new(name, data_type, false)])
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
}

impl Datum {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(DataType::Bool),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Text(_) => Some(DataType::Text),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Bytes this value would occupy in a page: one tag byte plus payload.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int64(_) | Datum::Float64(_) => 8,
            Datum::Text(s) => 4 + s.len(),
        }
    }

    /// Convert a JSON/YAML literal into a datum of the expected type.
    pub fn from_json(value: &serde_json::Value, data_type: DataType) -> Result<Self> {
        use serde_json::Value;
        let datum = match (value, data_type) {
            (Value::Null, _) => Datum::Null,
            (Value::Bool(b), DataType::Bool) => Datum::Bool(*b),
            (Value::Number(n), DataType::Int64) => n
                .as_i64()
                .map(Datum::Int64)
                .ok_or_else(|| Error::Value(format!("{n} is not an int64")))?,
            (Value::Number(n), DataType::Float64) => n
                .as_f64()
                .map(Datum::Float64)
                .ok_or_else(|| Error::Value(format!("{n} is not a float64")))?,
            (Value::String(s), DataType::Text) => Datum::Text(s.clone()),
            (other, ty) => {
                return Err(Error::Value(format!("cannot read {other} as {ty:?}")));
            }
        };
        Ok(datum)
    }

    /// Total order used by comparisons; `None` when the types differ or
    /// either side is null.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
            (Datum::Int64(a), Datum::Int64(b)) => Some(a.cmp(b)),
            (Datum::Float64(a), Datum::Float64(b)) => a.partial_cmp(b),
            (Datum::Int64(a), Datum::Float64(b)) => (*a as f64).partial_cmp(b),
            (Datum::Float64(a), Datum::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(b) => write!(f, "{b}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuple(pub Vec<Datum>);

impl Tuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.0.get(idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        // two-byte attribute count header
        2 + self.0.iter().map(Datum::encoded_len).sum::<usize>()
    }

    /// Build a tuple from a JSON array, checking it against `desc`.
    pub fn from_json(row: &serde_json::Value, desc: &TupleDesc) -> Result<Self> {
        let values = row
            .as_array()
            .ok_or_else(|| Error::Value(format!("row {row} is not an array")))?;
        if values.len() != desc.len() {
            return Err(Error::Value(format!(
                "row has {} values, shape has {} attributes",
                values.len(),
                desc.len()
            )));
        }
        let mut out = Vec::with_capacity(values.len());
        for (value, attr) in values.iter().zip(&desc.attrs) {
            let datum = Datum::from_json(value, attr.data_type)?;
            if datum == Datum::Null && !attr.nullable {
                return Err(Error::Value(format!("NULL in non-nullable '{}'", attr.name)));
            }
            out.push(datum);
        }
        Ok(Self(out))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tuple_from_json_checks_shape() {
        let desc = TupleDesc::new(vec![
            AttrDesc::new("id", DataType::Int64, false),
            AttrDesc::new("name", DataType::Text, true),
        ]);
        let t = Tuple::from_json(&json!([1, "a"]), &desc).unwrap();
        assert_eq!(t.0, vec![Datum::Int64(1), Datum::Text("a".into())]);
        assert_eq!(t.encoded_len(), 2 + 9 + 6);

        assert!(Tuple::from_json(&json!([1]), &desc).is_err());
        assert!(Tuple::from_json(&json!([null, "a"]), &desc).is_err());
        assert!(Tuple::from_json(&json!(["x", "a"]), &desc).is_err());
        assert!(Tuple::from_json(&json!([2, null]), &desc).is_ok());
    }

    #[test]
    fn mixed_numeric_compare() {
        assert_eq!(
            Datum::Int64(2).compare(&Datum::Float64(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Datum::Null.compare(&Datum::Int64(1)), None);
        assert_eq!(format!("{}", Tuple::new(vec![Datum::Int64(1), Datum::Null])), "[1, NULL]");
    }
}
