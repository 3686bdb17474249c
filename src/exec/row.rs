// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Row-at-a-time value model used by the aggregation engine.
//!
//! Aggregate-state rows are mutated in place while their group is resident,
//! which is awkward on immutable Arrow arrays; the engine therefore works on
//! `Row`s of owned `Datum`s and converts to and from `Chunk`s at the operator
//! boundary and when pages are written to spill files.

use std::fmt;

use arrow::datatypes::DataType;

use crate::exec::hash_table::hash::canonical_f64_bits;

/// Fixed per-row bookkeeping charged by `Row::estimated_bytes`.
pub const ROW_OVERHEAD_BYTES: usize = 8;
/// Fixed per-slot size charged by `Row::estimated_bytes`, on top of heap bytes.
pub const SLOT_BYTES: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value widened to f64; integers convert, other types do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Float64(v) => Some(*v),
            Datum::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Binary(v) => Some(v.as_slice()),
            Datum::Utf8(v) => Some(v.as_bytes()),
            _ => None,
        }
    }

    /// Arrow type this value is stored as; `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Boolean(_) => Some(DataType::Boolean),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Utf8(_) => Some(DataType::Utf8),
            Datum::Binary(_) => Some(DataType::Binary),
        }
    }

    /// Whether a value of this datum may be stored in a column of `data_type`.
    pub fn fits(&self, data_type: &DataType) -> bool {
        match self.data_type() {
            None => true,
            Some(t) => &t == data_type,
        }
    }

    pub fn heap_bytes(&self) -> usize {
        match self {
            Datum::Utf8(v) => v.len(),
            Datum::Binary(v) => v.len(),
            _ => 0,
        }
    }

    /// Grouping equality: NULLs form one group, every NaN is one group and
    /// `-0.0` groups with `0.0`.
    pub fn group_eq(&self, other: &Datum) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Boolean(a), Datum::Boolean(b)) => a == b,
            (Datum::Int64(a), Datum::Int64(b)) => a == b,
            (Datum::Float64(a), Datum::Float64(b)) => {
                canonical_f64_bits(*a) == canonical_f64_bits(*b)
            }
            (Datum::Utf8(a), Datum::Utf8(b)) => a == b,
            (Datum::Binary(a), Datum::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Utf8(v) => write!(f, "{v}"),
            Datum::Binary(v) => write!(f, "0x{}", hex(v)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    datums: Vec<Datum>,
}

impl Row {
    pub fn new(datums: Vec<Datum>) -> Self {
        Self { datums }
    }

    pub fn with_capacity(width: usize) -> Self {
        Self {
            datums: Vec::with_capacity(width),
        }
    }

    pub fn len(&self) -> usize {
        self.datums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.datums.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Datum> {
        self.datums.get_mut(idx)
    }

    pub fn push(&mut self, datum: Datum) {
        self.datums.push(datum);
    }

    pub fn datums(&self) -> &[Datum] {
        &self.datums
    }

    pub fn datums_mut(&mut self) -> &mut [Datum] {
        &mut self.datums
    }

    pub fn into_datums(self) -> Vec<Datum> {
        self.datums
    }

    /// Approximate in-memory footprint used for page accounting.
    pub fn estimated_bytes(&self) -> usize {
        ROW_OVERHEAD_BYTES
            + self
                .datums
                .iter()
                .map(|d| SLOT_BYTES + d.heap_bytes())
                .sum::<usize>()
    }
}

impl From<Vec<Datum>> for Row {
    fn from(datums: Vec<Datum>) -> Self {
        Row::new(datums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_grouping_folds_nan_and_signed_zero() {
        assert!(Datum::Float64(f64::NAN).group_eq(&Datum::Float64(-f64::NAN)));
        assert!(Datum::Float64(0.0).group_eq(&Datum::Float64(-0.0)));
        assert!(!Datum::Float64(1.0).group_eq(&Datum::Float64(2.0)));
        assert!(Datum::Null.group_eq(&Datum::Null));
        assert!(!Datum::Null.group_eq(&Datum::Int64(0)));
        assert!(!Datum::Int64(1).group_eq(&Datum::Float64(1.0)));
    }

    #[test]
    fn estimated_bytes_counts_heap() {
        let row = Row::new(vec![Datum::Int64(1), Datum::Utf8("abcd".to_string())]);
        assert_eq!(
            row.estimated_bytes(),
            ROW_OVERHEAD_BYTES + 2 * SLOT_BYTES + 4
        );
        assert_eq!(Row::default().estimated_bytes(), ROW_OVERHEAD_BYTES);
    }
}
