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
//! Partitioned hash aggregation with spilling and streaming pre-aggregation.
//!
//! Responsibilities:
//! - Groups input rows by key into 16 hash partitions per level, each with its
//!   own hash table, aggregated row stream and function contexts.
//! - Spills the largest partition when memory runs out and later rebuilds
//!   spilled partitions by repartitioning them one level deeper.
//! - In streaming pre-aggregation mode, reduces what fits in memory and passes
//!   the remaining rows through as intermediate tuples.
//! - Aggregates without grouping keys into a single row.
//!
//! Key exported interfaces:
//! - Types: `AggregateOperator`, `AggregateOptions`, `AggError`.
//! - Traits: `PreaggExpansionPolicy` with the default `ReductionFactorPolicy`.
//!
//! Current limitations:
//! - Repartitioning gives up after `MAX_PARTITION_DEPTH` levels or when a pass
//!   fails to split a partition; heavily skewed keys surface as errors.

mod build;
mod error;
mod partition;
mod streaming;
mod tuple;

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::common::config;
use crate::exec::chunk::Chunk;
use crate::exec::expr::agg::{AggFnContext, AggFnEvaluator};
use crate::exec::hash_table::hash::{GroupKeyHasher, SeededKeyHasher};
use crate::exec::node::aggregate::AggregateNode;
use crate::exec::operators::RowSource;
use crate::exec::row::Row;
use crate::exec::spill::SpillProfile;
use crate::exec::spill::row_stream::RowStream;
use crate::exec::spill::spiller::{Spiller, SpillerHandle};
use crate::partagg_logging::{debug, info};
use crate::runtime::buffer_pool::{BufferPool, BufferPoolClient};
use crate::runtime::profile::{CounterRef, RuntimeProfile, ScopedTimer, TUnit};
use crate::runtime::runtime_state::RuntimeState;

pub use error::AggError;
pub use streaming::{ExpansionDecision, PreaggExpansionPolicy, PreaggStats, ReductionFactorPolicy};

use partition::{Partition, PartitionId, PartitionPool};
use tuple::TupleLayout;

/// Partitions created per level.
pub const PARTITION_FANOUT: usize = 16;
/// Hash bits consumed by partition selection at each level.
pub const NUM_PARTITIONING_BITS: u32 = 4;
/// Partition levels `0..MAX_PARTITION_DEPTH` may be created.
pub const MAX_PARTITION_DEPTH: usize = 16;

fn partition_index(hash: u64) -> usize {
    (hash >> (u64::BITS - NUM_PARTITIONING_BITS)) as usize
}

/// Tunables that are not part of the plan.
#[derive(Clone, Debug)]
pub struct AggregateOptions {
    pub hash_table_initial_buckets: usize,
    pub hasher: Arc<dyn GroupKeyHasher>,
    pub expansion_policy: Arc<dyn PreaggExpansionPolicy>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            hash_table_initial_buckets: config::hash_table_initial_buckets(),
            hasher: Arc::new(SeededKeyHasher),
            expansion_policy: Arc::new(ReductionFactorPolicy::from_config()),
        }
    }
}

impl AggregateOptions {
    pub fn with_hash_table_initial_buckets(mut self, buckets: usize) -> Self {
        self.hash_table_initial_buckets = buckets.max(1);
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn GroupKeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_expansion_policy(mut self, policy: Arc<dyn PreaggExpansionPolicy>) -> Self {
        self.expansion_policy = policy;
        self
    }
}

#[derive(Clone, Debug)]
struct AggCounters {
    partitions_created: CounterRef,
    max_partition_level: CounterRef,
    rows_repartitioned: CounterRef,
    num_repartitions: CounterRef,
    spilled_partitions: CounterRef,
    pinned_partitions: CounterRef,
    largest_partition_percent: CounterRef,
    hash_buckets: CounterRef,
    passthrough_rows: CounterRef,
    reduction_factor_estimate: CounterRef,
    reduction_factor_threshold: CounterRef,
    input_row_count: CounterRef,
    rows_returned: CounterRef,
    build_time: CounterRef,
    ht_resize_time: CounterRef,
    get_results_time: CounterRef,
    streaming_time: CounterRef,
}

impl AggCounters {
    fn new(profile: &RuntimeProfile) -> Self {
        Self {
            partitions_created: profile.add_counter("PartitionsCreated", TUnit::UNIT),
            max_partition_level: profile.add_high_water_mark_counter("MaxPartitionLevel", TUnit::UNIT),
            rows_repartitioned: profile.add_counter("RowsRepartitioned", TUnit::UNIT),
            num_repartitions: profile.add_counter("NumRepartitions", TUnit::UNIT),
            spilled_partitions: profile.add_counter("SpilledPartitions", TUnit::UNIT),
            pinned_partitions: profile.add_counter("PinnedPartitions", TUnit::UNIT),
            largest_partition_percent: profile
                .add_high_water_mark_counter("LargestPartitionPercent", TUnit::UNIT),
            hash_buckets: profile.add_high_water_mark_counter("HashBuckets", TUnit::UNIT),
            passthrough_rows: profile.add_counter("PassthroughRows", TUnit::UNIT),
            reduction_factor_estimate: profile
                .add_counter("ReductionFactorEstimate", TUnit::DOUBLE_VALUE),
            reduction_factor_threshold: profile
                .add_counter("ReductionFactorThresholdToExpand", TUnit::DOUBLE_VALUE),
            input_row_count: profile.add_counter("InputRowCount", TUnit::UNIT),
            rows_returned: profile.add_counter("RowsReturned", TUnit::UNIT),
            build_time: profile.add_timer("BuildTime"),
            ht_resize_time: profile.add_timer("HTResizeTime"),
            get_results_time: profile.add_timer("GetResultsTime"),
            streaming_time: profile.add_timer("StreamingTime"),
        }
    }
}

/// Progress of one run, cleared by `reset`.
#[derive(Debug, Default)]
struct OutputState {
    done: VecDeque<PartitionId>,
    spilled: VecDeque<PartitionId>,
    current: Option<PartitionId>,
    cursor: Vec<u32>,
    cursor_pos: usize,
    child_eos: bool,
    input_rows: u64,
    passthrough_rows: u64,
    rows_returned: usize,
    growth_halted: bool,
    eos: bool,
}

#[derive(Debug)]
struct Singleton {
    tuple: Row,
    contexts: Vec<AggFnContext>,
}

/// Grouping aggregation over a child `RowSource`.
///
/// Call `open` to consume the input (blocking modes) and `get_next` until it
/// reports end of stream; `close` gives back every buffer.
pub struct AggregateOperator {
    name: String,
    node: AggregateNode,
    layout: Arc<TupleLayout>,
    options: AggregateOptions,
    child: Box<dyn RowSource>,
    client: BufferPoolClient,
    spiller: SpillerHandle,
    profile: RuntimeProfile,
    counters: AggCounters,
    spill_profile: SpillProfile,
    base_contexts: Vec<AggFnContext>,
    min_reservation: i64,
    batch_size: usize,
    opened: bool,
    partitions: PartitionPool,
    hash_partitions: Vec<PartitionId>,
    partition_level: usize,
    serialize_stream: Option<RowStream>,
    singleton: Option<Singleton>,
    output: OutputState,
}

impl AggregateOperator {
    /// Validates the plan against the child and sets up memory, spill storage
    /// and profile counters.
    pub fn prepare(
        node: AggregateNode,
        child: Box<dyn RowSource>,
        options: AggregateOptions,
        state: &RuntimeState,
    ) -> Result<Self, AggError> {
        let functions = node.resolve_functions()?;
        let child_schema = child.schema();
        if child_schema.fields().len() != node.input_schema.fields().len() {
            return Err(AggError::Internal(format!(
                "aggregation node {} expects {} input columns, child {} produces {}",
                node.node_id,
                node.input_schema.fields().len(),
                child.name(),
                child_schema.fields().len()
            )));
        }
        let evaluators = node
            .functions
            .iter()
            .zip(&functions)
            .map(|(func, resolved)| {
                AggFnEvaluator::new(Arc::clone(resolved), func.input.clone(), func.input_is_intermediate)
            })
            .collect();
        let needs_serialize = functions.iter().any(|f| f.needs_serialize());
        let layout = Arc::new(TupleLayout {
            group_by: node.group_by.clone(),
            evaluators,
            input_schema: node.input_schema.clone(),
            intermediate_schema: node.intermediate_schema(&functions),
            output_schema: node.output_schema(&functions),
            need_finalize: node.need_finalize,
            needs_serialize,
        });

        let name = format!("AGGREGATION_NODE (id={})", node.node_id);
        let pool = BufferPool::new(state.buffer_size(), Arc::clone(state.mem_tracker()));
        let client = pool.register_client(format!("PartitionedAggregation (id={})", node.node_id));
        let profile = RuntimeProfile::new(name.clone());
        let counters = AggCounters::new(&profile);
        let spill_profile = SpillProfile::new(&profile);
        let spiller = Arc::new(Spiller::new_with_storage(state.spill_storage()?)?);
        let base_contexts = layout.new_contexts(client.tracker());
        let min_reservation = if node.is_grouping() && !node.is_streaming_preagg {
            2 * PARTITION_FANOUT as i64 + 1 + i64::from(needs_serialize)
        } else {
            0
        };
        debug!(
            "prepared {name}: keys={} functions={} streaming={} min_reservation={min_reservation}",
            node.group_by.len(),
            functions.len(),
            node.is_streaming_preagg
        );

        Ok(Self {
            name,
            node,
            layout,
            options,
            child,
            client,
            spiller,
            profile,
            counters,
            spill_profile,
            base_contexts,
            min_reservation,
            batch_size: state.batch_size(),
            opened: false,
            partitions: PartitionPool::default(),
            hash_partitions: Vec::new(),
            partition_level: 0,
            serialize_stream: None,
            singleton: None,
            output: OutputState::default(),
        })
    }

    /// Opens the child and claims the minimum reservation. Blocking modes
    /// consume the whole input here.
    pub fn open(&mut self, state: &RuntimeState) -> Result<(), AggError> {
        self.clear_run();
        self.batch_size = state.batch_size();
        self.child.open(state)?;
        self.opened = true;
        if !self.client.reserve(self.min_reservation) {
            return Err(self.mem_limit_error());
        }

        if !self.node.is_grouping() {
            let mut contexts: Vec<AggFnContext> = self
                .base_contexts
                .iter()
                .map(AggFnContext::clone_for_partition)
                .collect();
            let tuple = self.layout.init_tuple(&mut contexts, Vec::new())?;
            self.singleton = Some(Singleton { tuple, contexts });
            return self.consume_child(state);
        }

        if self.node.is_streaming_preagg {
            return self.create_hash_partitions(0, 0);
        }

        if self.layout.needs_serialize {
            self.serialize_stream = Some(self.new_serialize_stream()?);
        }
        self.create_hash_partitions(0, 0)?;
        self.consume_child(state)?;
        let input_rows = self.output.input_rows;
        self.move_hash_partitions(input_rows)
    }

    fn consume_child(&mut self, state: &RuntimeState) -> Result<(), AggError> {
        while let Some(chunk) = self.child.next_batch(state)? {
            self.check_cancelled(state)?;
            let rows = chunk.to_rows()?;
            self.counters.input_row_count.add(rows.len() as i64);
            self.output.input_rows += rows.len() as u64;
            let _timer = ScopedTimer::new(self.counters.build_time.clone());
            if self.node.is_grouping() {
                self.process_batch(rows, false)?;
            } else {
                self.update_singleton(&rows)?;
            }
        }
        self.output.child_eos = true;
        self.child.close();
        Ok(())
    }

    fn update_singleton(&mut self, rows: &[Row]) -> Result<(), AggError> {
        let singleton = self
            .singleton
            .as_mut()
            .ok_or_else(|| AggError::Internal("aggregation state is not initialised".to_string()))?;
        for row in rows {
            self.layout
                .update_tuple(&mut singleton.contexts, &mut singleton.tuple, row, false)?;
        }
        Ok(())
    }

    /// Fills `out` with the next output rows. Returns true once the output is
    /// exhausted; rows placed in `out` are valid either way.
    pub fn get_next(&mut self, state: &RuntimeState, out: &mut Vec<Row>) -> Result<bool, AggError> {
        out.clear();
        self.check_cancelled(state)?;
        if self.output.eos {
            return Ok(true);
        }
        if !self.opened {
            return Err(AggError::Internal(format!("{} is not open", self.name)));
        }
        let _timer = ScopedTimer::new(self.counters.get_results_time.clone());
        let remaining = self
            .node
            .limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.output.rows_returned));
        let max_rows = self.batch_size.min(remaining);
        let mut eos = if max_rows == 0 {
            true
        } else if !self.node.is_grouping() {
            self.output_singleton(out)?
        } else if self.node.is_streaming_preagg {
            self.get_next_streaming(state, out, max_rows)?
        } else {
            self.output_partitions(state, out, max_rows)?
        };
        if out.len() >= remaining {
            out.truncate(remaining);
            eos = true;
        }
        self.output.rows_returned += out.len();
        self.counters.rows_returned.add(out.len() as i64);
        self.output.eos = eos;
        Ok(eos)
    }

    /// `get_next` as a chunk in the output layout; `None` at end of stream.
    pub fn next_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, AggError> {
        let mut rows = Vec::new();
        loop {
            if self.output.eos {
                return Ok(None);
            }
            let eos = self.get_next(state, &mut rows)?;
            if !rows.is_empty() {
                return Ok(Some(Chunk::from_rows(self.layout.output_schema.clone(), &rows)?));
            }
            if eos {
                return Ok(None);
            }
        }
    }

    fn output_singleton(&mut self, out: &mut Vec<Row>) -> Result<bool, AggError> {
        if let Some(mut singleton) = self.singleton.take() {
            out.push(self.layout.output_tuple(&mut singleton.contexts, singleton.tuple)?);
        }
        Ok(true)
    }

    fn get_next_streaming(
        &mut self,
        state: &RuntimeState,
        out: &mut Vec<Row>,
        max_rows: usize,
    ) -> Result<bool, AggError> {
        while !self.output.child_eos && out.is_empty() {
            match self.child.next_batch(state)? {
                Some(chunk) => {
                    self.check_cancelled(state)?;
                    let rows = chunk.to_rows()?;
                    self.counters.input_row_count.add(rows.len() as i64);
                    self.process_streaming_batch(rows, out)?;
                }
                None => {
                    self.output.child_eos = true;
                    self.child.close();
                    let input_rows = self.output.input_rows;
                    self.move_hash_partitions(input_rows)?;
                }
            }
        }
        if !out.is_empty() {
            return Ok(false);
        }
        self.output_partitions(state, out, max_rows)
    }

    /// Emits groups partition by partition, closing each one once drained.
    fn output_partitions(
        &mut self,
        state: &RuntimeState,
        out: &mut Vec<Row>,
        max_rows: usize,
    ) -> Result<bool, AggError> {
        let layout = Arc::clone(&self.layout);
        loop {
            if out.len() >= max_rows {
                return Ok(false);
            }
            let Some(id) = self.output.current else {
                if !self.next_partition(state)? {
                    return Ok(true);
                }
                continue;
            };
            let partition = self
                .partitions
                .get_mut(id)
                .ok_or_else(|| AggError::Internal(format!("output partition {id:?} is gone")))?;
            while self.output.cursor_pos < self.output.cursor.len() && out.len() < max_rows {
                let idx = self.output.cursor[self.output.cursor_pos];
                self.output.cursor_pos += 1;
                let tuple = partition.aggregated.take_row(idx as usize).ok_or_else(|| {
                    AggError::Internal(format!("output row {idx} missing from partition"))
                })?;
                out.push(layout.output_tuple(&mut partition.contexts, tuple)?);
            }
            if self.output.cursor_pos >= self.output.cursor.len() {
                partition.close();
                self.partitions.remove(id);
                self.output.current = None;
                self.output.cursor.clear();
                self.output.cursor_pos = 0;
            }
        }
    }

    /// Drops the state of the current run so `open` can start over. The
    /// buffer reservation is kept.
    pub fn reset(&mut self) {
        self.clear_run();
        self.child.close();
        self.opened = false;
    }

    /// Releases every buffer, file and reservation, and closes the child.
    pub fn close(&mut self) {
        self.release_resources();
        self.child.close();
        self.opened = false;
    }

    pub fn output_schema(&self) -> SchemaRef {
        self.layout.output_schema.clone()
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    /// Groups currently held in memory across all partitions.
    pub fn num_hash_table_groups(&self) -> usize {
        self.partitions.iter().map(Partition::num_groups).sum()
    }

    pub fn preagg_growth_halted(&self) -> bool {
        self.output.growth_halted
    }

    fn clear_run(&mut self) {
        self.partitions.clear();
        self.hash_partitions.clear();
        self.partition_level = 0;
        self.serialize_stream = None;
        self.singleton = None;
        self.output = OutputState::default();
        for ctx in &mut self.base_contexts {
            ctx.free_all();
        }
    }

    fn release_resources(&mut self) {
        self.clear_run();
        self.output.eos = true;
        self.client.release_reservation();
    }

    pub(super) fn check_cancelled(&mut self, state: &RuntimeState) -> Result<(), AggError> {
        if !state.is_cancelled() {
            return Ok(());
        }
        info!("{} cancelled, releasing partitions and buffers", self.name);
        self.release_resources();
        self.child.close();
        Err(AggError::Cancelled)
    }

    fn mem_limit_error(&self) -> AggError {
        AggError::MemLimitTooLow {
            node_id: self.node.node_id,
            required_buffers: self.min_reservation,
            buffer_size: self.client.buffer_size(),
        }
    }

    fn new_stream(&self, label: impl Into<String>, schema: SchemaRef) -> RowStream {
        RowStream::new(
            label,
            schema,
            self.client.clone(),
            Arc::clone(&self.spiller),
            Some(self.spill_profile.clone()),
        )
    }

    fn partition(&self, id: PartitionId) -> Result<&Partition, AggError> {
        self.partitions
            .get(id)
            .ok_or_else(|| AggError::Internal(format!("partition {id:?} is not live")))
    }

    fn partition_mut(&mut self, id: PartitionId) -> Result<&mut Partition, AggError> {
        self.partitions
            .get_mut(id)
            .ok_or_else(|| AggError::Internal(format!("partition {id:?} is not live")))
    }
}

impl RowSource for AggregateOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaRef {
        self.output_schema()
    }

    fn open(&mut self, state: &RuntimeState) -> Result<(), String> {
        AggregateOperator::open(self, state).map_err(|e| e.to_string())
    }

    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String> {
        self.next_chunk(state).map_err(|e| e.to_string())
    }

    fn close(&mut self) {
        AggregateOperator::close(self);
    }
}

impl Drop for AggregateOperator {
    fn drop(&mut self) {
        self.release_resources();
    }
}
