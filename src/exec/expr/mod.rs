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
//! Expressions over input rows.
//!
//! Grouping keys and aggregate inputs are column references into the input
//! layout; evaluating one is a read of that column.

pub mod agg;

use arrow::datatypes::{DataType, Schema};

use crate::exec::row::{Datum, Row};

static NULL_DATUM: Datum = Datum::Null;

/// Reference to one column of the input layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRef {
    pub index: usize,
    pub data_type: DataType,
}

impl SlotRef {
    pub fn new(index: usize, data_type: DataType) -> Self {
        Self { index, data_type }
    }

    /// Resolve a column of `schema` by position.
    pub fn from_schema(schema: &Schema, index: usize) -> Result<Self, String> {
        let field = schema.fields().get(index).ok_or_else(|| {
            format!(
                "slot index {index} out of bounds for schema with {} columns",
                schema.fields().len()
            )
        })?;
        Ok(Self::new(index, field.data_type().clone()))
    }

    /// Checks the slot against the layout it will be evaluated over.
    pub fn validate(&self, schema: &Schema) -> Result<(), String> {
        let field = schema.fields().get(self.index).ok_or_else(|| {
            format!(
                "slot index {} out of bounds for schema with {} columns",
                self.index,
                schema.fields().len()
            )
        })?;
        if field.data_type() != &self.data_type {
            return Err(format!(
                "slot {} ({}) declared as {:?}, input column is {:?}",
                self.index,
                field.name(),
                self.data_type,
                field.data_type()
            ));
        }
        Ok(())
    }

    /// The slot's value in `row`; NULL when the row is narrower than the layout.
    pub fn eval<'a>(&self, row: &'a Row) -> &'a Datum {
        row.get(self.index).unwrap_or(&NULL_DATUM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;

    #[test]
    fn slot_reads_column_and_validates_type() {
        let schema = nullable_schema([("k", DataType::Utf8), ("v", DataType::Int64)]);
        let slot = SlotRef::from_schema(&schema, 1).unwrap();
        assert_eq!(slot.data_type, DataType::Int64);
        slot.validate(&schema).unwrap();
        assert!(SlotRef::new(1, DataType::Utf8).validate(&schema).is_err());
        assert!(SlotRef::from_schema(&schema, 2).is_err());

        let row = Row::new(vec![Datum::Utf8("a".into()), Datum::Int64(4)]);
        assert_eq!(slot.eval(&row), &Datum::Int64(4));
        assert_eq!(SlotRef::new(5, DataType::Int64).eval(&row), &Datum::Null);
    }
}
