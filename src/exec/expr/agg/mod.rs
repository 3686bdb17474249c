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
//! Aggregate function interface and evaluation helpers.
//!
//! Responsibilities:
//! - Defines `AggregateFunction`, the init/update/merge/serialize/finalize contract.
//! - Provides `AggFnContext`, the per-partition execution context with an
//!   allocation arena tracked against the operator's memory tracker.
//! - Binds a function to its input slot in `AggFnEvaluator`.
//!
//! Key exported interfaces:
//! - Types: `AggregateFunction`, `AggFnContext`, `AggFnEvaluator`.
//! - Functions: `build_function`.

mod functions;

pub use functions::build_function;

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::DataType;

use crate::exec::expr::SlotRef;
use crate::exec::row::{Datum, Row};
use crate::runtime::mem_tracker::MemTracker;

/// One aggregate function. States are `Datum`s of `intermediate_type`.
pub trait AggregateFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn intermediate_type(&self) -> DataType;

    fn output_type(&self) -> DataType;

    /// Whether states must pass through `serialize` before they leave memory.
    fn needs_serialize(&self) -> bool {
        false
    }

    /// Whether `finalize` changes the state's shape.
    fn needs_finalize(&self) -> bool {
        self.intermediate_type() != self.output_type()
    }

    fn init(&self, ctx: &mut AggFnContext) -> Result<Datum, String>;

    fn update(&self, ctx: &mut AggFnContext, state: &mut Datum, input: &Datum)
    -> Result<(), String>;

    fn merge(&self, ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String>;

    fn serialize(&self, _ctx: &mut AggFnContext, _state: &mut Datum) -> Result<(), String> {
        Ok(())
    }

    fn finalize(&self, ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String>;
}

/// Execution context of one function within one partition.
///
/// Variable-length state owned by a partition is accounted here rather than in
/// the row stream; the arena is emptied when the partition spills or closes.
#[derive(Debug)]
pub struct AggFnContext {
    parent: Arc<MemTracker>,
    arena: Arc<MemTracker>,
}

impl AggFnContext {
    pub fn new(parent: &Arc<MemTracker>) -> Self {
        Self {
            parent: Arc::clone(parent),
            arena: MemTracker::new_child("AggFnArena", parent),
        }
    }

    /// A fresh context with an empty arena under the same parent tracker.
    pub fn clone_for_partition(&self) -> Self {
        Self::new(&self.parent)
    }

    pub fn track_allocation(&mut self, bytes: i64) {
        if bytes > 0 {
            self.arena.consume(bytes);
        }
    }

    /// Returns up to `bytes` to the arena; never drives it below zero.
    pub fn free(&mut self, bytes: i64) {
        let bytes = bytes.min(self.arena.current());
        if bytes > 0 {
            self.arena.release(bytes);
        }
    }

    pub fn free_all(&mut self) {
        let current = self.arena.current();
        if current > 0 {
            self.arena.release(current);
        }
    }

    pub fn allocated_bytes(&self) -> i64 {
        self.arena.current()
    }
}

impl Drop for AggFnContext {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// An aggregate function bound to its input slot.
///
/// A merge evaluator consumes intermediate states (the second phase of a
/// two-phase aggregation) so every input row is merged rather than updated.
#[derive(Clone, Debug)]
pub struct AggFnEvaluator {
    function: Arc<dyn AggregateFunction>,
    input: Option<SlotRef>,
    is_merge: bool,
}

impl AggFnEvaluator {
    pub fn new(function: Arc<dyn AggregateFunction>, input: Option<SlotRef>, is_merge: bool) -> Self {
        Self {
            function,
            input,
            is_merge,
        }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn input_value<'a>(&self, row: &'a Row) -> &'a Datum {
        static NULL: Datum = Datum::Null;
        match self.input.as_ref() {
            Some(slot) => slot.eval(row),
            None => &NULL,
        }
    }

    pub fn init(&self, ctx: &mut AggFnContext) -> Result<Datum, String> {
        self.function.init(ctx)
    }

    /// Folds one input row: update for raw input, merge for intermediate input.
    pub fn add(&self, ctx: &mut AggFnContext, state: &mut Datum, row: &Row) -> Result<(), String> {
        let value = self.input_value(row);
        if self.is_merge {
            self.function.merge(ctx, state, value)
        } else {
            self.function.update(ctx, state, value)
        }
    }

    pub fn merge(&self, ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        self.function.merge(ctx, state, src)
    }

    pub fn serialize(&self, ctx: &mut AggFnContext, state: &mut Datum) -> Result<(), String> {
        self.function.serialize(ctx, state)
    }

    pub fn finalize(&self, ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        self.function.finalize(ctx, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_bytes_roll_up_to_parent_and_free_on_drop() {
        let parent = MemTracker::new_root("agg");
        let mut ctx = AggFnContext::new(&parent);
        ctx.track_allocation(100);
        assert_eq!(ctx.allocated_bytes(), 100);
        assert_eq!(parent.current(), 100);
        ctx.free(30);
        assert_eq!(ctx.allocated_bytes(), 70);
        ctx.free(1000);
        assert_eq!(ctx.allocated_bytes(), 0);

        let mut other = ctx.clone_for_partition();
        other.track_allocation(10);
        assert_eq!(ctx.allocated_bytes(), 0);
        drop(other);
        assert_eq!(parent.current(), 0);
    }

    #[test]
    fn merge_evaluator_merges_input_rows() {
        let parent = MemTracker::new_root("agg");
        let mut ctx = AggFnContext::new(&parent);
        let count = build_function("count", Some(&DataType::Int64), None, false).unwrap();
        let update = AggFnEvaluator::new(count.clone(), Some(SlotRef::new(0, DataType::Int64)), false);
        let merge = AggFnEvaluator::new(count, Some(SlotRef::new(0, DataType::Int64)), true);

        let row = Row::new(vec![Datum::Int64(5)]);
        let mut state = update.init(&mut ctx).unwrap();
        update.add(&mut ctx, &mut state, &row).unwrap();
        assert_eq!(state, Datum::Int64(1));
        merge.add(&mut ctx, &mut state, &row).unwrap();
        assert_eq!(state, Datum::Int64(6));
    }
}
