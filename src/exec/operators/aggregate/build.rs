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
//! Partitioned build: hashing rows into the current partition set, spilling
//! under memory pressure, and repartitioning spilled partitions.

use std::sync::Arc;

use crate::exec::expr::agg::AggFnContext;
use crate::exec::hash_table::group_table::GroupHashTable;
use crate::exec::hash_table::hash::GroupKeyHasher;
use crate::exec::row::{Datum, Row};
use crate::exec::spill::row_stream::RowStream;
use crate::partagg_logging::{debug, warn};
use crate::runtime::profile::ScopedTimer;
use crate::runtime::runtime_state::RuntimeState;

use super::error::AggError;
use super::partition::{Partition, PartitionId};
use super::tuple::TupleLayout;
use super::{AggregateOperator, MAX_PARTITION_DEPTH, PARTITION_FANOUT, partition_index};

impl AggregateOperator {
    /// Aggregates a batch into the current partition set. `aggregated` rows
    /// are intermediate tuples replayed from a spilled partition.
    pub(super) fn process_batch(&mut self, rows: Vec<Row>, aggregated: bool) -> Result<(), AggError> {
        self.check_and_resize_hash_partitions(rows.len())?;
        let layout = Arc::clone(&self.layout);
        let hasher = Arc::clone(&self.options.hasher);
        for row in rows {
            self.process_row(&layout, hasher.as_ref(), row, aggregated)?;
        }
        Ok(())
    }

    fn process_row(
        &mut self,
        layout: &TupleLayout,
        hasher: &dyn GroupKeyHasher,
        row: Row,
        aggregated: bool,
    ) -> Result<(), AggError> {
        let key = layout.grouping_key(&row, aggregated);
        let hash = hasher.hash_key(&key, self.partition_level);
        let id = self.hash_partitions[partition_index(hash)];
        let partition = self.partition_mut(id)?;
        if partition.is_spilled() {
            return self.append_spilled_row(id, row, aggregated);
        }

        let found = partition.hash_table().and_then(|table| {
            table.find(hash, |idx| {
                partition
                    .aggregated
                    .row(idx as usize)
                    .is_some_and(|tuple| layout.key_matches(tuple, &key))
            })
        });
        match found {
            Some(idx) => {
                let tuple = partition.aggregated.row_mut(idx as usize).ok_or_else(|| {
                    AggError::Internal(format!(
                        "partition {}/{} lost group row {idx}",
                        partition.level, partition.idx
                    ))
                })?;
                layout.update_tuple(&mut partition.contexts, tuple, &row, aggregated)
            }
            None => self.add_intermediate_tuple(layout, id, key, hash, row, aggregated),
        }
    }

    /// Adds a new group to an in-memory partition, spilling partitions until
    /// its row fits. Falls back to appending the row unaggregated if the
    /// target partition itself gets spilled.
    fn add_intermediate_tuple(
        &mut self,
        layout: &TupleLayout,
        id: PartitionId,
        key: Vec<Datum>,
        hash: u64,
        row: Row,
        aggregated: bool,
    ) -> Result<(), AggError> {
        let partition = self.partition_mut(id)?;
        let tuple = layout.init_tuple(&mut partition.contexts, key)?;
        loop {
            let partition = self.partition_mut(id)?;
            if partition.is_spilled() {
                return self.append_spilled_row(id, row, aggregated);
            }
            if partition.aggregated.try_reserve(tuple.estimated_bytes())? {
                let idx = partition.aggregated.push(tuple);
                let stored = partition.aggregated.row_mut(idx).ok_or_else(|| {
                    AggError::Internal(format!("group row {idx} missing after append"))
                })?;
                layout.update_tuple(&mut partition.contexts, stored, &row, aggregated)?;
                let inserted = u32::try_from(idx).ok().is_some_and(|row_idx| {
                    partition
                        .hash_table_mut()
                        .is_some_and(|table| table.insert(hash, row_idx))
                });
                if !inserted {
                    return Err(AggError::Internal(format!(
                        "hash table of partition {}/{} is full after resize",
                        partition.level, partition.idx
                    )));
                }
                return Ok(());
            }
            if !self.spill_partition()? {
                return Err(AggError::Internal(
                    "no partition left to spill for a new group".to_string(),
                ));
            }
        }
    }

    fn append_spilled_row(
        &mut self,
        id: PartitionId,
        row: Row,
        aggregated: bool,
    ) -> Result<(), AggError> {
        loop {
            let partition = self.partition_mut(id)?;
            let stream = if aggregated {
                &mut partition.aggregated
            } else {
                partition.unaggregated.as_mut().ok_or_else(|| {
                    AggError::Internal("spilled partition has no unaggregated stream".to_string())
                })?
            };
            if stream.try_reserve(row.estimated_bytes())? {
                stream.push(row);
                return Ok(());
            }
            if !self.spill_partition()? {
                return Err(self.mem_limit_error());
            }
        }
    }

    /// Spills the in-memory partition of the current set with the largest
    /// footprint. Returns false when every partition is already spilled.
    pub(super) fn spill_partition(&mut self) -> Result<bool, AggError> {
        let victim = self
            .hash_partitions
            .iter()
            .filter_map(|&id| self.partitions.get(id).map(|p| (id, p)))
            .filter(|(_, p)| !p.is_spilled() && !p.is_closed())
            .max_by_key(|(_, p)| p.in_mem_bytes())
            .map(|(id, _)| id);
        let Some(id) = victim else {
            return Ok(false);
        };
        self.spill(id)?;
        Ok(true)
    }

    /// Spills one partition and returns the bytes it held in memory.
    pub(super) fn spill(&mut self, id: PartitionId) -> Result<i64, AggError> {
        let layout = Arc::clone(&self.layout);
        let freed = self.partition(id)?.in_mem_bytes();
        if layout.needs_serialize && self.partition(id)?.num_groups() > 0 {
            let mut scratch = self
                .serialize_stream
                .take()
                .ok_or_else(|| AggError::Internal("serialize stream is missing".to_string()))?;
            let partition = self.partition_mut(id)?;
            partition.serialize_groups(&layout, &mut scratch)?;
            let mut old = std::mem::replace(&mut partition.aggregated, scratch);
            old.close();
            self.serialize_stream = Some(self.new_serialize_stream()?);
        }
        let partition = self.partition_mut(id)?;
        partition.spill()?;
        let (level, idx, rows) = (partition.level, partition.idx, partition.aggregated.num_rows());
        self.counters.spilled_partitions.add(1);
        debug!(
            "aggregation node {} spilled partition {level}/{idx}: groups={rows} freed_bytes={freed}",
            self.node.node_id
        );
        Ok(freed)
    }

    pub(super) fn new_serialize_stream(&self) -> Result<RowStream, AggError> {
        let mut stream = self.new_stream("serialize", self.layout.intermediate_schema.clone());
        stream.unpin()?;
        if !stream.prepare_for_write()? {
            return Err(self.mem_limit_error());
        }
        Ok(stream)
    }

    /// Grows every in-memory table to take `num_rows` more groups, spilling
    /// the largest partition whenever a table cannot grow.
    fn check_and_resize_hash_partitions(&mut self, num_rows: usize) -> Result<(), AggError> {
        for id in self.hash_partitions.clone() {
            loop {
                let resize_time = self.counters.ht_resize_time.clone();
                let Some(table) = self.partition_mut(id)?.hash_table_mut() else {
                    break;
                };
                let resized = {
                    let _timer = ScopedTimer::new(resize_time);
                    table.check_and_resize(num_rows)
                };
                if resized {
                    break;
                }
                if !self.spill_partition()? {
                    return Err(AggError::Internal(
                        "no partition left to spill while growing hash tables".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Creates the set of `PARTITION_FANOUT` partitions at `level` for `rows`
    /// incoming rows.
    pub(super) fn create_hash_partitions(&mut self, level: usize, rows: u64) -> Result<(), AggError> {
        if level >= MAX_PARTITION_DEPTH {
            warn!(
                "aggregation node {} cannot repartition {rows} rows: level {level} reaches the \
                 maximum partition depth {MAX_PARTITION_DEPTH}",
                self.node.node_id
            );
            return Err(AggError::MaxPartitionDepth {
                node_id: self.node.node_id,
                level,
                rows,
            });
        }
        debug_assert!(self.hash_partitions.is_empty());
        self.partition_level = level;
        let streaming = self.node.is_streaming_preagg;
        let mut spilled_at_creation = 0;
        for idx in 0..PARTITION_FANOUT {
            let table = GroupHashTable::try_new(&self.client, self.options.hash_table_initial_buckets);
            let aggregated = self.new_stream(
                format!("aggregated {level}/{idx}"),
                self.layout.intermediate_schema.clone(),
            );
            let unaggregated = (!streaming).then(|| {
                self.new_stream(
                    format!("unaggregated {level}/{idx}"),
                    self.layout.input_schema.clone(),
                )
            });
            let contexts = self
                .base_contexts
                .iter()
                .map(AggFnContext::clone_for_partition)
                .collect();
            let mut partition = Partition::new(level, idx, table, aggregated, unaggregated, contexts);
            if partition.hash_table().is_none() && !streaming {
                partition.spill()?;
                self.counters.spilled_partitions.add(1);
                spilled_at_creation += 1;
            }
            let id = self.partitions.insert(partition);
            self.hash_partitions.push(id);
        }
        self.counters.partitions_created.add(PARTITION_FANOUT as i64);
        self.counters.max_partition_level.set(level as i64);
        debug!(
            "aggregation node {} created {PARTITION_FANOUT} partitions at level {level} \
             for {rows} rows ({spilled_at_creation} spilled without a hash table)",
            self.node.node_id
        );
        Ok(())
    }

    /// Retires the current partition set: in-memory partitions queue for
    /// output, spilled ones are sealed and queued ahead of older spilled
    /// partitions so repartitioning proceeds depth first.
    pub(super) fn move_hash_partitions(&mut self, num_input_rows: u64) -> Result<(), AggError> {
        self.record_hash_buckets()?;
        let level = self.partition_level;
        let mut largest = 0u64;
        let mut report = Vec::with_capacity(PARTITION_FANOUT);
        let mut spilled = Vec::new();
        for id in std::mem::take(&mut self.hash_partitions) {
            let partition = self.partition_mut(id)?;
            let rows = partition.num_rows() as u64;
            largest = largest.max(rows);
            report.push(partition.report_line(num_input_rows));
            if rows == 0 {
                partition.close();
                self.partitions.remove(id);
            } else if partition.is_spilled() {
                partition.seal()?;
                spilled.push(id);
            } else {
                self.output.done.push_back(id);
            }
        }
        for id in spilled.into_iter().rev() {
            self.output.spilled.push_front(id);
        }
        if num_input_rows > 0 {
            let percent = largest.saturating_mul(100) / num_input_rows;
            self.counters
                .largest_partition_percent
                .set(i64::try_from(percent).unwrap_or(i64::MAX));
        }
        debug!(
            "aggregation node {} partition distribution at level {level} over {num_input_rows} rows:\n{}",
            self.node.node_id,
            report.join("\n")
        );
        Ok(())
    }

    pub(super) fn record_hash_buckets(&self) -> Result<(), AggError> {
        let mut buckets = 0usize;
        for &id in &self.hash_partitions {
            buckets += self.partition(id)?.hash_table().map_or(0, GroupHashTable::num_buckets);
        }
        self.counters
            .hash_buckets
            .set(i64::try_from(buckets).unwrap_or(i64::MAX));
        Ok(())
    }

    /// Makes the next partition ready for output. Spilled partitions are
    /// brought back whole when they hold only aggregated rows and fit,
    /// otherwise repartitioned one level deeper. Returns false once nothing
    /// is left.
    pub(super) fn next_partition(&mut self, state: &RuntimeState) -> Result<bool, AggError> {
        loop {
            if let Some(id) = self.output.done.pop_front() {
                let partition = self.partition(id)?;
                if partition.is_closed() {
                    self.partitions.remove(id);
                    continue;
                }
                let cursor = partition
                    .hash_table()
                    .map(|table| table.iter().collect())
                    .unwrap_or_default();
                self.set_output_partition(id, cursor);
                return Ok(true);
            }
            let Some(&id) = self.output.spilled.front() else {
                return Ok(false);
            };
            self.check_cancelled(state)?;
            if self.try_pin_spilled(id)? {
                self.output.spilled.pop_front();
                let rows = self.partition(id)?.aggregated.num_rows();
                let cursor = (0..rows).filter_map(|idx| u32::try_from(idx).ok()).collect();
                self.set_output_partition(id, cursor);
                return Ok(true);
            }
            self.repartition(state, id)?;
        }
    }

    fn set_output_partition(&mut self, id: PartitionId, cursor: Vec<u32>) {
        self.output.current = Some(id);
        self.output.cursor = cursor;
        self.output.cursor_pos = 0;
    }

    fn try_pin_spilled(&mut self, id: PartitionId) -> Result<bool, AggError> {
        let node_id = self.node.node_id;
        let partition = self.partition_mut(id)?;
        if partition.unaggregated.as_ref().is_some_and(|s| s.num_rows() > 0) {
            return Ok(false);
        }
        if !partition.aggregated.pin()? {
            return Ok(false);
        }
        self.counters.pinned_partitions.add(1);
        let partition = self.partition(id)?;
        debug!(
            "aggregation node {node_id} brought spilled partition {}/{} back into memory: groups={}",
            partition.level,
            partition.idx,
            partition.aggregated.num_rows()
        );
        Ok(true)
    }

    /// Replays a spilled partition into a fresh partition set one level down.
    fn repartition(&mut self, state: &RuntimeState, id: PartitionId) -> Result<(), AggError> {
        let (level, idx, rows) = {
            let partition = self.partition(id)?;
            (partition.level, partition.idx, partition.num_rows() as u64)
        };
        debug!(
            "aggregation node {} repartitioning partition {level}/{idx}: rows={rows}",
            self.node.node_id
        );
        self.create_hash_partitions(level + 1, rows)?;
        self.counters.num_repartitions.add(1);

        let mut source = self
            .partitions
            .remove(id)
            .ok_or_else(|| AggError::Internal(format!("spilled partition {level}/{idx} is gone")))?;
        self.output.spilled.pop_front();
        let mut replayed = self.process_stream(state, &mut source.aggregated, true)?;
        if let Some(stream) = source.unaggregated.as_mut() {
            replayed += self.process_stream(state, stream, false)?;
        }
        source.close();
        self.counters
            .rows_repartitioned
            .add(i64::try_from(replayed).unwrap_or(i64::MAX));

        let largest_spilled = self
            .hash_partitions
            .iter()
            .filter_map(|&pid| self.partitions.get(pid))
            .filter(|p| p.is_spilled())
            .map(|p| p.num_rows() as u64)
            .max()
            .unwrap_or(0);
        if rows > 0 && largest_spilled == rows {
            warn!(
                "aggregation node {} could not split partition {level}/{idx}: all {rows} rows \
                 landed in one spilled partition at level {}",
                self.node.node_id,
                level + 1
            );
            return Err(AggError::RepartitionNoProgress {
                node_id: self.node.node_id,
                level: level + 1,
                rows,
            });
        }
        self.move_hash_partitions(rows)
    }

    /// Feeds every row of `stream` through the build, spilling in the current
    /// set until a read buffer can be leased. Returns the rows replayed.
    fn process_stream(
        &mut self,
        state: &RuntimeState,
        stream: &mut RowStream,
        aggregated: bool,
    ) -> Result<u64, AggError> {
        while !stream.prepare_for_read()? {
            if !self.spill_partition()? {
                return Err(self.mem_limit_error());
            }
        }
        let mut replayed = 0u64;
        while let Some(rows) = stream.next_batch(self.batch_size)? {
            self.check_cancelled(state)?;
            replayed += rows.len() as u64;
            let _timer = ScopedTimer::new(self.counters.build_time.clone());
            self.process_batch(rows, aggregated)?;
        }
        stream.close();
        Ok(replayed)
    }
}

