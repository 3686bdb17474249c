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
//! Layout of aggregate-state rows and the per-row function calls on them.
//!
//! An intermediate tuple is the grouping key followed by one state per
//! aggregate function. Rows replayed from an aggregated stream already have
//! that shape and are merged; input rows are folded with update (or merge for
//! a merge aggregation).

use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::exec::expr::SlotRef;
use crate::exec::expr::agg::{AggFnContext, AggFnEvaluator};
use crate::exec::row::{Datum, Row};
use crate::runtime::mem_tracker::MemTracker;

use super::error::AggError;

#[derive(Debug)]
pub(super) struct TupleLayout {
    pub(super) group_by: Vec<SlotRef>,
    pub(super) evaluators: Vec<AggFnEvaluator>,
    pub(super) input_schema: SchemaRef,
    pub(super) intermediate_schema: SchemaRef,
    pub(super) output_schema: SchemaRef,
    pub(super) need_finalize: bool,
    pub(super) needs_serialize: bool,
}

impl TupleLayout {
    pub(super) fn num_keys(&self) -> usize {
        self.group_by.len()
    }

    pub(super) fn new_contexts(&self, parent: &Arc<MemTracker>) -> Vec<AggFnContext> {
        self.evaluators
            .iter()
            .map(|_| AggFnContext::new(parent))
            .collect()
    }

    pub(super) fn grouping_key(&self, row: &Row, aggregated: bool) -> Vec<Datum> {
        if aggregated {
            row.datums()
                .iter()
                .take(self.num_keys())
                .cloned()
                .collect()
        } else {
            self.group_by.iter().map(|slot| slot.eval(row).clone()).collect()
        }
    }

    pub(super) fn key_matches(&self, tuple: &Row, key: &[Datum]) -> bool {
        tuple.datums().len() >= key.len()
            && tuple
                .datums()
                .iter()
                .zip(key)
                .all(|(stored, probe)| stored.group_eq(probe))
    }

    /// A fresh tuple for `key` with every state initialised.
    pub(super) fn init_tuple(
        &self,
        contexts: &mut [AggFnContext],
        key: Vec<Datum>,
    ) -> Result<Row, AggError> {
        let mut datums = key;
        datums.reserve(self.evaluators.len());
        for (evaluator, ctx) in self.evaluators.iter().zip(contexts.iter_mut()) {
            let state = evaluator
                .init(ctx)
                .map_err(|e| AggError::function(evaluator.name(), e))?;
            datums.push(state);
        }
        Ok(Row::new(datums))
    }

    /// Folds `row` into `tuple`.
    pub(super) fn update_tuple(
        &self,
        contexts: &mut [AggFnContext],
        tuple: &mut Row,
        row: &Row,
        aggregated: bool,
    ) -> Result<(), AggError> {
        let num_keys = self.num_keys();
        let states = tuple
            .datums_mut()
            .get_mut(num_keys..)
            .ok_or_else(|| AggError::Internal("aggregate tuple is narrower than its key".into()))?;
        for (i, ((evaluator, ctx), state)) in self
            .evaluators
            .iter()
            .zip(contexts.iter_mut())
            .zip(states.iter_mut())
            .enumerate()
        {
            let result = if aggregated {
                let src = row.get(num_keys + i).ok_or_else(|| {
                    AggError::Internal(format!("aggregated row is missing state column {i}"))
                })?;
                evaluator.merge(ctx, state, src)
            } else {
                evaluator.add(ctx, state, row)
            };
            result.map_err(|e| AggError::function(evaluator.name(), e))?;
        }
        Ok(())
    }

    pub(super) fn serialize_tuple(
        &self,
        contexts: &mut [AggFnContext],
        tuple: &mut Row,
    ) -> Result<(), AggError> {
        let num_keys = self.num_keys();
        let states = tuple.datums_mut().iter_mut().skip(num_keys);
        for ((evaluator, ctx), state) in self.evaluators.iter().zip(contexts.iter_mut()).zip(states) {
            evaluator
                .serialize(ctx, state)
                .map_err(|e| AggError::function(evaluator.name(), e))?;
        }
        Ok(())
    }

    pub(super) fn finalize_tuple(
        &self,
        contexts: &mut [AggFnContext],
        tuple: Row,
    ) -> Result<Row, AggError> {
        let num_keys = self.num_keys();
        let mut datums = tuple.into_datums();
        let states = datums.split_off(num_keys.min(datums.len()));
        for ((evaluator, ctx), state) in self.evaluators.iter().zip(contexts.iter_mut()).zip(states) {
            let value = evaluator
                .finalize(ctx, state)
                .map_err(|e| AggError::function(evaluator.name(), e))?;
            datums.push(value);
        }
        Ok(Row::new(datums))
    }

    /// The row emitted for a finished group: finalized, or serialized when the
    /// output feeds another aggregation.
    pub(super) fn output_tuple(
        &self,
        contexts: &mut [AggFnContext],
        mut tuple: Row,
    ) -> Result<Row, AggError> {
        if self.need_finalize {
            self.finalize_tuple(contexts, tuple)
        } else {
            self.serialize_tuple(contexts, &mut tuple)?;
            Ok(tuple)
        }
    }
}
