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
//! Hash partitions of the aggregation build.
//!
//! A partition owns its group hash table, the aggregated row stream holding
//! one intermediate tuple per group, and (once spilled) the unaggregated
//! stream collecting input rows that arrived after the spill. Partitions live
//! in a `PartitionPool` and are addressed by `PartitionId` from the current
//! partition set and the done/spilled queues.

use crate::exec::expr::agg::AggFnContext;
use crate::exec::hash_table::group_table::GroupHashTable;
use crate::exec::spill::row_stream::RowStream;

use super::error::AggError;
use super::tuple::TupleLayout;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct PartitionId(usize);

#[derive(Debug)]
pub(super) struct Partition {
    pub(super) level: usize,
    pub(super) idx: usize,
    hash_table: Option<GroupHashTable>,
    pub(super) aggregated: RowStream,
    pub(super) unaggregated: Option<RowStream>,
    pub(super) contexts: Vec<AggFnContext>,
    spilled: bool,
    closed: bool,
}

impl Partition {
    pub(super) fn new(
        level: usize,
        idx: usize,
        hash_table: Option<GroupHashTable>,
        aggregated: RowStream,
        unaggregated: Option<RowStream>,
        contexts: Vec<AggFnContext>,
    ) -> Self {
        Self {
            level,
            idx,
            hash_table,
            aggregated,
            unaggregated,
            contexts,
            spilled: false,
            closed: false,
        }
    }

    pub(super) fn is_spilled(&self) -> bool {
        self.spilled
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(super) fn hash_table(&self) -> Option<&GroupHashTable> {
        debug_assert!(
            !self.spilled || self.hash_table.is_none(),
            "spilled partition {}/{} still owns a hash table",
            self.level,
            self.idx
        );
        self.hash_table.as_ref()
    }

    pub(super) fn hash_table_mut(&mut self) -> Option<&mut GroupHashTable> {
        self.hash_table.as_mut()
    }

    pub(super) fn num_groups(&self) -> usize {
        self.hash_table().map_or(0, GroupHashTable::len)
    }

    /// Rows held by the partition: groups while in memory, stored aggregated
    /// plus unaggregated rows once spilled.
    pub(super) fn num_rows(&self) -> usize {
        if self.spilled {
            self.aggregated.num_rows() + self.unaggregated.as_ref().map_or(0, RowStream::num_rows)
        } else {
            self.num_groups()
        }
    }

    /// Memory that spilling this partition would give back.
    pub(super) fn in_mem_bytes(&self) -> i64 {
        let stream = i64::try_from(self.aggregated.bytes_in_mem()).unwrap_or(i64::MAX);
        let table = self.hash_table.as_ref().map_or(0, GroupHashTable::current_mem_size);
        let arena: i64 = self.contexts.iter().map(AggFnContext::allocated_bytes).sum();
        stream.saturating_add(table).saturating_add(arena)
    }

    /// Moves every group into `target` with its states serialized. The
    /// aggregated stream is left holding empty rows.
    pub(super) fn serialize_groups(
        &mut self,
        layout: &TupleLayout,
        target: &mut RowStream,
    ) -> Result<(), AggError> {
        let Some(table) = self.hash_table.as_ref() else {
            return Ok(());
        };
        let rows: Vec<u32> = table.iter().collect();
        for idx in rows {
            let mut tuple = self.aggregated.take_row(idx as usize).ok_or_else(|| {
                AggError::Internal(format!(
                    "partition {}/{} lost group row {idx}",
                    self.level, self.idx
                ))
            })?;
            layout.serialize_tuple(&mut self.contexts, &mut tuple)?;
            if !target.try_reserve(tuple.estimated_bytes())? {
                return Err(AggError::Internal(format!(
                    "serialize stream {} has no write buffer",
                    target.label()
                )));
            }
            target.push(tuple);
        }
        Ok(())
    }

    /// Writes the partition out and drops its in-memory structures. Returns the
    /// bytes given back.
    pub(super) fn spill(&mut self) -> Result<i64, AggError> {
        let freed = self.in_mem_bytes();
        for ctx in &mut self.contexts {
            ctx.free_all();
        }
        self.hash_table = None;
        self.aggregated.unpin()?;
        if let Some(unaggregated) = self.unaggregated.as_mut() {
            unaggregated.unpin()?;
            // A missing write buffer is retried when the first row is appended.
            let _ = unaggregated.prepare_for_write()?;
        }
        self.spilled = true;
        Ok(freed)
    }

    /// Flushes both streams and returns their buffers.
    pub(super) fn seal(&mut self) -> Result<(), AggError> {
        self.aggregated.seal()?;
        if let Some(unaggregated) = self.unaggregated.as_mut() {
            unaggregated.seal()?;
        }
        Ok(())
    }

    pub(super) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for ctx in &mut self.contexts {
            ctx.free_all();
        }
        self.hash_table = None;
        self.aggregated.close();
        if let Some(unaggregated) = self.unaggregated.as_mut() {
            unaggregated.close();
        }
    }

    pub(super) fn report_line(&self, total_rows: u64) -> String {
        let rows = self.num_rows() as u64;
        let fraction = if total_rows == 0 {
            0.0
        } else {
            rows as f64 / total_rows as f64
        };
        format!(
            "{}/{} spilled={} rows={} ({:.2}%) aggregated={} unaggregated={}",
            self.level,
            self.idx,
            self.spilled,
            rows,
            fraction * 100.0,
            self.aggregated.num_rows(),
            self.unaggregated.as_ref().map_or(0, RowStream::num_rows)
        )
    }
}

/// Owner of every live partition.
#[derive(Debug, Default)]
pub(super) struct PartitionPool {
    slots: Vec<Option<Partition>>,
}

impl PartitionPool {
    pub(super) fn insert(&mut self, partition: Partition) -> PartitionId {
        if let Some(pos) = self.slots.iter().position(Option::is_none) {
            self.slots[pos] = Some(partition);
            return PartitionId(pos);
        }
        self.slots.push(Some(partition));
        PartitionId(self.slots.len() - 1)
    }

    pub(super) fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(super) fn get_mut(&mut self, id: PartitionId) -> Option<&mut Partition> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub(super) fn remove(&mut self, id: PartitionId) -> Option<Partition> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.slots.iter().flatten()
    }

    pub(super) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Closes and drops every partition.
    pub(super) fn clear(&mut self) {
        for partition in self.slots.iter_mut().flatten() {
            partition.close();
        }
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;
    use crate::exec::row::{Datum, Row};
    use crate::exec::spill::spiller::{SpillStorageConfig, Spiller, SpillerHandle};
    use crate::runtime::buffer_pool::{BufferPool, BufferPoolClient};
    use crate::runtime::mem_tracker::MemTracker;
    use arrow::datatypes::DataType;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, BufferPoolClient, SpillerHandle) {
        let temp = tempdir().unwrap();
        let spiller = Arc::new(Spiller::new_with_storage(SpillStorageConfig::in_dir(temp.path())).unwrap());
        let pool = BufferPool::new(256, MemTracker::new_root("test"));
        (temp, pool.register_client("agg"), spiller)
    }

    fn partition(client: &BufferPoolClient, spiller: &SpillerHandle, idx: usize) -> Partition {
        let schema = nullable_schema([("k", DataType::Int64), ("c", DataType::Int64)]);
        let aggregated = RowStream::new("agg", schema.clone(), client.clone(), spiller.clone(), None);
        let unaggregated = RowStream::new("unagg", schema, client.clone(), spiller.clone(), None);
        let table = GroupHashTable::try_new(client, 16);
        Partition::new(0, idx, table, aggregated, Some(unaggregated), Vec::new())
    }

    #[test]
    fn spill_frees_table_and_keeps_rows() {
        let (_temp, client, spiller) = setup();
        let mut p = partition(&client, &spiller, 3);
        for i in 0..10 {
            let row = Row::new(vec![Datum::Int64(i), Datum::Int64(1)]);
            assert!(p.aggregated.try_reserve(row.estimated_bytes()).unwrap());
            let idx = p.aggregated.push(row);
            assert!(p.hash_table_mut().unwrap().insert(i as u64, idx as u32));
        }
        assert_eq!(p.num_rows(), 10);
        // One 256-byte page of rows plus 16 buckets of 16 bytes.
        assert_eq!(p.in_mem_bytes(), 512);
        let freed = p.spill().unwrap();
        assert_eq!(freed, 512);
        assert!(p.is_spilled());
        assert!(p.hash_table().is_none());
        assert_eq!(p.num_rows(), 10);
        assert!(p.report_line(20).contains("spilled=true"));

        p.seal().unwrap();
        assert_eq!(client.buffers_in_use(), 0);
        p.close();
        assert!(p.is_closed());
    }

    #[test]
    fn pool_reuses_freed_slots() {
        let (_temp, client, spiller) = setup();
        let mut pool = PartitionPool::default();
        let a = pool.insert(partition(&client, &spiller, 0));
        let b = pool.insert(partition(&client, &spiller, 1));
        assert_ne!(a, b);
        assert_eq!(pool.remove(a).map(|p| p.idx), Some(0));
        assert!(pool.get(a).is_none());
        let c = pool.insert(partition(&client, &spiller, 2));
        assert_eq!(c, a);
        assert_eq!(pool.get_mut(c).map(|p| p.idx), Some(2));
        assert_eq!(pool.len(), 2);
        pool.clear();
        assert_eq!(pool.len(), 0);
        assert_eq!(client.consumed_bytes(), 0);
    }
}
