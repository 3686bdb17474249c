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
//! In-memory values source.
//!
//! Responsibilities:
//! - Produces a fixed set of chunks in order, sliced to the runtime batch size.
//! - Supports re-opening so parents that reset can replay the same input.
//!
//! Key exported interfaces:
//! - Types: `ValuesSource`.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::exec::row::Row;
use crate::exec::operators::RowSource;
use crate::runtime::runtime_state::RuntimeState;

/// Source that emits literal chunks.
#[derive(Debug)]
pub struct ValuesSource {
    name: String,
    schema: SchemaRef,
    chunks: Vec<Chunk>,
    next_chunk: usize,
    offset: usize,
    opened: bool,
}

impl ValuesSource {
    pub fn new(schema: SchemaRef, chunks: Vec<Chunk>, node_id: i32) -> Self {
        let name = if node_id >= 0 {
            format!("ValuesSource (id={node_id})")
        } else {
            "ValuesSource".to_string()
        };
        Self {
            name,
            schema,
            chunks,
            next_chunk: 0,
            offset: 0,
            opened: false,
        }
    }

    pub fn from_rows(schema: SchemaRef, rows: &[Row], node_id: i32) -> Result<Self, String> {
        let chunk = Chunk::from_rows(schema.clone(), rows)?;
        Ok(Self::new(schema, vec![chunk], node_id))
    }

    pub fn num_rows(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }
}

impl RowSource for ValuesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn open(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.next_chunk = 0;
        self.offset = 0;
        self.opened = true;
        Ok(())
    }

    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String> {
        if !self.opened {
            return Err(format!("{} is not open", self.name));
        }
        let batch_size = state.batch_size().max(1);
        while let Some(chunk) = self.chunks.get(self.next_chunk) {
            if self.offset >= chunk.len() {
                self.next_chunk += 1;
                self.offset = 0;
                continue;
            }
            let len = batch_size.min(chunk.len() - self.offset);
            let batch = chunk.slice(self.offset, len);
            self.offset += len;
            return Ok(Some(batch));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;
    use crate::exec::row::Datum;
    use arrow::datatypes::DataType;

    #[test]
    fn emits_batches_and_replays_after_reopen() {
        let schema = nullable_schema([("v", DataType::Int64)]);
        let rows: Vec<Row> = (0..10).map(|i| Row::new(vec![Datum::Int64(i)])).collect();
        let mut source = ValuesSource::from_rows(schema, &rows, 1).unwrap();
        assert_eq!(source.num_rows(), 10);
        let state = RuntimeState::new().with_batch_size(4);

        assert!(source.next_batch(&state).is_err());
        for _ in 0..2 {
            source.open(&state).unwrap();
            let mut sizes = Vec::new();
            let mut seen = Vec::new();
            while let Some(chunk) = source.next_batch(&state).unwrap() {
                sizes.push(chunk.len());
                seen.extend(chunk.to_rows().unwrap());
            }
            assert_eq!(sizes, vec![4, 4, 2]);
            assert_eq!(seen, rows);
            source.close();
        }
    }
}
