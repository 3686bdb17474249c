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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, RecordBatch,
    RecordBatchOptions, StringArray,
};
use arrow::buffer::Buffer;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::exec::row::{Datum, Row};

/// A chunk of data, consisting of multiple rows.
/// Wrapper around an Arrow RecordBatch restricted to the column types `Datum` models.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn try_new(batch: RecordBatch) -> Result<Self, String> {
        for field in batch.schema().fields() {
            ensure_supported_type(field.name(), field.data_type())?;
        }
        Ok(Self { batch })
    }

    /// Build a chunk with `schema` from rows whose width and value types match it.
    pub fn from_rows(schema: SchemaRef, rows: &[Row]) -> Result<Self, String> {
        let num_columns = schema.fields().len();
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != num_columns) {
            return Err(format!(
                "row {idx} has {} values, schema expects {num_columns}",
                row.len()
            ));
        }
        let mut columns = Vec::with_capacity(num_columns);
        for (col, field) in schema.fields().iter().enumerate() {
            columns.push(build_column(col, field.data_type(), rows)?);
        }
        let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
        let batch = RecordBatch::try_new_with_options(schema, columns, &options)
            .map_err(|e| format!("build record batch from rows failed: {e}"))?;
        Self::try_new(batch)
    }

    pub fn to_rows(&self) -> Result<Vec<Row>, String> {
        let num_rows = self.len();
        let mut rows = (0..num_rows)
            .map(|_| Row::with_capacity(self.batch.num_columns()))
            .collect::<Vec<_>>();
        for (col, array) in self.batch.columns().iter().enumerate() {
            for (idx, row) in rows.iter_mut().enumerate() {
                row.push(datum_at(col, array, idx)?);
            }
        }
        Ok(rows)
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }
}

/// Schema with every column nullable, as produced by the operators in this crate.
pub fn nullable_schema<N: Into<String>>(columns: impl IntoIterator<Item = (N, DataType)>) -> SchemaRef {
    let fields = columns
        .into_iter()
        .map(|(name, data_type)| Field::new(name, data_type, true))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

pub fn ensure_supported_type(name: &str, data_type: &DataType) -> Result<(), String> {
    match data_type {
        DataType::Boolean
        | DataType::Int64
        | DataType::Float64
        | DataType::Utf8
        | DataType::Binary => Ok(()),
        other => Err(format!("column {name} has unsupported type {other:?}")),
    }
}

fn build_column(col: usize, data_type: &DataType, rows: &[Row]) -> Result<ArrayRef, String> {
    let values = rows.iter().map(|r| &r.datums()[col]);
    if let Some(bad) = rows.iter().map(|r| &r.datums()[col]).find(|d| !d.fits(data_type)) {
        return Err(format!(
            "column {col} expects {data_type:?}, got value {bad:?}"
        ));
    }
    let array: ArrayRef = match data_type {
        DataType::Boolean => Arc::new(
            values
                .map(|d| match d {
                    Datum::Boolean(v) => Some(*v),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(values.map(Datum::as_i64).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(
            values
                .map(|d| match d {
                    Datum::Float64(v) => Some(*v),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(values.map(Datum::as_str).collect::<StringArray>()),
        DataType::Binary => Arc::new(
            values
                .map(|d| match d {
                    Datum::Binary(v) => Some(v.as_slice()),
                    _ => None,
                })
                .collect::<BinaryArray>(),
        ),
        other => return Err(format!("column {col} has unsupported type {other:?}")),
    };
    Ok(array)
}

fn datum_at(col: usize, array: &ArrayRef, idx: usize) -> Result<Datum, String> {
    if array.is_null(idx) {
        return Ok(Datum::Null);
    }
    let mismatch = || format!("column {col} type mismatch for {:?}", array.data_type());
    let datum = match array.data_type() {
        DataType::Boolean => Datum::Boolean(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Int64 => Datum::Int64(
            array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Float64 => Datum::Float64(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Utf8 => Datum::Utf8(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(mismatch)?
                .value(idx)
                .to_string(),
        ),
        DataType::Binary => Datum::Binary(
            array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(mismatch)?
                .value(idx)
                .to_vec(),
        ),
        other => return Err(format!("column {col} has unsupported type {other:?}")),
    };
    Ok(datum)
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaRef {
        nullable_schema([
            ("k", DataType::Utf8),
            ("n", DataType::Int64),
            ("x", DataType::Float64),
            ("b", DataType::Boolean),
            ("s", DataType::Binary),
        ])
    }

    #[test]
    fn rows_convert_to_columns_and_back() {
        let rows = vec![
            Row::new(vec![
                Datum::Utf8("a".to_string()),
                Datum::Int64(1),
                Datum::Float64(0.5),
                Datum::Boolean(true),
                Datum::Binary(vec![1, 2]),
            ]),
            Row::new(vec![
                Datum::Null,
                Datum::Null,
                Datum::Float64(f64::NAN),
                Datum::Null,
                Datum::Binary(Vec::new()),
            ]),
        ];
        let chunk = Chunk::from_rows(schema(), &rows).unwrap();
        assert_eq!(chunk.len(), 2);
        let back = chunk.to_rows().unwrap();
        assert_eq!(back[0], rows[0]);
        assert!(back[1].datums()[0].is_null());
        assert!(back[1].datums()[2].group_eq(&Datum::Float64(f64::NAN)));
        assert_eq!(back[1].datums()[4], Datum::Binary(Vec::new()));
    }

    #[test]
    fn zero_column_chunk_keeps_row_count() {
        let empty = Arc::new(Schema::empty());
        let rows = vec![Row::default(), Row::default(), Row::default()];
        let chunk = Chunk::from_rows(empty, &rows).unwrap();
        assert_eq!(chunk.len(), 3);
        assert_eq!(chunk.to_rows().unwrap().len(), 3);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let rows = vec![Row::new(vec![
            Datum::Int64(1),
            Datum::Int64(1),
            Datum::Float64(0.0),
            Datum::Boolean(false),
            Datum::Null,
        ])];
        let err = Chunk::from_rows(schema(), &rows).unwrap_err();
        assert!(err.contains("column 0"), "err={err}");

        let short = vec![Row::new(vec![Datum::Null])];
        assert!(Chunk::from_rows(schema(), &short).is_err());
    }

    #[test]
    fn unsupported_column_type_is_rejected() {
        let schema = nullable_schema([("d", DataType::Date32)]);
        let batch = RecordBatch::new_empty(schema);
        assert!(Chunk::try_new(batch).is_err());
    }
}
