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
//! Streaming pre-aggregation.
//!
//! Each input batch is aggregated into the partition hash tables as far as
//! they have room. Rows for new groups that do not fit are passed through as
//! single-row intermediate tuples; nothing is ever spilled. Before a batch
//! that would overflow a table, the expansion policy decides whether the
//! observed reduction justifies growing the tables. Once it declines, growth
//! stays off for the rest of the run.

use std::fmt;
use std::sync::Arc;

use crate::common::app_config::StreamingReductionLevel;
use crate::common::config;
use crate::exec::row::Row;
use crate::partagg_logging::info;
use crate::runtime::profile::ScopedTimer;

use super::error::AggError;
use super::{AggregateOperator, partition_index};

/// What the expansion policy sees about the run so far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreaggStats {
    /// Bytes of bucket directories across all partition tables.
    pub ht_mem_bytes: i64,
    /// Groups held across all partition tables.
    pub ht_rows: u64,
    /// Input rows consumed before the current batch.
    pub input_rows: u64,
    /// Input rows that were emitted without aggregation.
    pub passthrough_rows: u64,
    pub estimated_input_cardinality: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpansionDecision {
    pub expand: bool,
    pub estimated_reduction: f64,
    pub min_reduction: f64,
}

/// Decides whether streaming hash tables may keep growing.
pub trait PreaggExpansionPolicy: Send + Sync + fmt::Debug {
    fn should_expand(&self, stats: &PreaggStats) -> ExpansionDecision;
}

/// Grows the tables while the estimated reduction factor (input rows per
/// group) beats the minimum configured for the current table size.
///
/// With a planner cardinality estimate `N` and `n` rows aggregated so far at an
/// observed reduction `r`, the reduction over the whole input is extrapolated
/// as `1 + (N / n) * (r - 1)`.
#[derive(Clone, Debug)]
pub struct ReductionFactorPolicy {
    levels: Vec<StreamingReductionLevel>,
}

impl ReductionFactorPolicy {
    pub fn new(mut levels: Vec<StreamingReductionLevel>) -> Self {
        levels.sort_by_key(|level| level.min_ht_mem_bytes);
        Self { levels }
    }

    pub fn from_config() -> Self {
        Self::new(config::streaming_min_reduction())
    }

    fn min_reduction(&self, ht_mem_bytes: i64) -> f64 {
        self.levels
            .iter()
            .filter(|level| level.min_ht_mem_bytes <= ht_mem_bytes)
            .last()
            .map_or(0.0, |level| level.min_reduction)
    }
}

impl Default for ReductionFactorPolicy {
    fn default() -> Self {
        Self::from_config()
    }
}

impl PreaggExpansionPolicy for ReductionFactorPolicy {
    fn should_expand(&self, stats: &PreaggStats) -> ExpansionDecision {
        let min_reduction = self.min_reduction(stats.ht_mem_bytes);
        let aggregated = stats.input_rows.saturating_sub(stats.passthrough_rows);
        if stats.ht_rows == 0 || aggregated == 0 {
            return ExpansionDecision {
                expand: true,
                estimated_reduction: 0.0,
                min_reduction,
            };
        }
        let current = aggregated as f64 / stats.ht_rows as f64;
        let expected = stats
            .estimated_input_cardinality
            .unwrap_or(0)
            .max(0)
            .unsigned_abs()
            .saturating_sub(stats.passthrough_rows);
        let estimated_reduction = if aggregated >= expected {
            current
        } else {
            1.0 + (expected as f64 / aggregated as f64) * (current - 1.0)
        };
        ExpansionDecision {
            expand: estimated_reduction > min_reduction,
            estimated_reduction,
            min_reduction,
        }
    }
}

impl AggregateOperator {
    /// Aggregates one child batch, pushing passed-through tuples to `out`.
    pub(super) fn process_streaming_batch(
        &mut self,
        rows: Vec<Row>,
        out: &mut Vec<Row>,
    ) -> Result<(), AggError> {
        let _timer = ScopedTimer::new(self.counters.streaming_time.clone());
        let layout = Arc::clone(&self.layout);
        let hasher = Arc::clone(&self.options.hasher);
        let mut capacity = self.remaining_capacity()?;
        if !self.output.growth_halted && capacity.iter().any(|&c| c < rows.len()) {
            self.expand_or_halt(rows.len(), &mut capacity)?;
        }
        let num_rows = rows.len() as u64;
        for row in rows {
            let key = layout.grouping_key(&row, false);
            let hash = hasher.hash_key(&key, 0);
            let slot = partition_index(hash);
            let id = self.hash_partitions[slot];
            let partition = self.partition_mut(id)?;

            let found = partition.hash_table().and_then(|table| {
                table.find(hash, |idx| {
                    partition
                        .aggregated
                        .row(idx as usize)
                        .is_some_and(|tuple| layout.key_matches(tuple, &key))
                })
            });
            if let Some(idx) = found {
                let tuple = partition.aggregated.row_mut(idx as usize).ok_or_else(|| {
                    AggError::Internal(format!("streaming partition lost group row {idx}"))
                })?;
                layout.update_tuple(&mut partition.contexts, tuple, &row, false)?;
                continue;
            }

            let mut tuple = layout.init_tuple(&mut partition.contexts, key)?;
            layout.update_tuple(&mut partition.contexts, &mut tuple, &row, false)?;
            if capacity[slot] > 0 && partition.aggregated.try_reserve(tuple.estimated_bytes())? {
                let idx = partition.aggregated.push(tuple);
                let inserted = partition
                    .hash_table_mut()
                    .is_some_and(|table| table.insert(hash, idx as u32));
                if !inserted {
                    return Err(AggError::Internal(format!(
                        "streaming partition {slot} rejected an insert within its capacity"
                    )));
                }
                capacity[slot] -= 1;
            } else {
                layout.serialize_tuple(&mut partition.contexts, &mut tuple)?;
                out.push(tuple);
                self.output.passthrough_rows += 1;
                self.counters.passthrough_rows.add(1);
            }
        }
        self.output.input_rows += num_rows;
        Ok(())
    }

    /// Inserts each partition table can take before it must grow; zero once
    /// growth has been halted.
    fn remaining_capacity(&self) -> Result<Vec<usize>, AggError> {
        self.hash_partitions
            .iter()
            .map(|&id| {
                let partition = self.partition(id)?;
                Ok(match partition.hash_table() {
                    Some(table) if !self.output.growth_halted => table.num_inserts_before_resize(),
                    _ => 0,
                })
            })
            .collect()
    }

    fn expand_or_halt(&mut self, num_rows: usize, capacity: &mut Vec<usize>) -> Result<(), AggError> {
        let mut stats = PreaggStats {
            ht_mem_bytes: 0,
            ht_rows: 0,
            input_rows: self.output.input_rows,
            passthrough_rows: self.output.passthrough_rows,
            estimated_input_cardinality: self.node.estimated_input_cardinality,
        };
        for &id in &self.hash_partitions {
            if let Some(table) = self.partition(id)?.hash_table() {
                stats.ht_mem_bytes += table.current_mem_size();
                stats.ht_rows += table.len() as u64;
            }
        }
        let decision = self.options.expansion_policy.should_expand(&stats);
        self.counters
            .reduction_factor_estimate
            .set_double(decision.estimated_reduction);
        self.counters
            .reduction_factor_threshold
            .set_double(decision.min_reduction);

        if decision.expand {
            let _timer = ScopedTimer::new(self.counters.ht_resize_time.clone());
            for id in self.hash_partitions.clone() {
                if let Some(table) = self.partition_mut(id)?.hash_table_mut() {
                    // A table that cannot grow keeps its size and passes rows through.
                    let _ = table.check_and_resize(num_rows);
                }
            }
            self.record_hash_buckets()?;
            *capacity = self.remaining_capacity()?;
        } else {
            self.output.growth_halted = true;
            capacity.iter_mut().for_each(|c| *c = 0);
            info!(
                "aggregation node {} stops growing streaming hash tables: \
                 groups={} input_rows={} estimated_reduction={:.2} min_reduction={:.2}",
                self.node.node_id,
                stats.ht_rows,
                stats.input_rows,
                decision.estimated_reduction,
                decision.min_reduction
            );
        }
        Ok(())
    }
}
