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
//! Pull-based execution operators.
//!
//! Responsibilities:
//! - Defines `RowSource`, the open/next/close protocol every operator exposes
//!   to its parent.
//! - Provides the aggregation operator and an in-memory values source.
//!
//! Key exported interfaces:
//! - Traits: `RowSource`.
//! - Types: `AggregateOperator`, `AggregateOptions`, `ValuesSource`.
//!
//! Current limitations:
//! - Operators are driven from a single thread; there is no pipeline scheduler.

use arrow::datatypes::SchemaRef;

use crate::exec::chunk::Chunk;
use crate::runtime::runtime_state::RuntimeState;

pub mod aggregate;
mod values_source;

pub use aggregate::{
    AggError, AggregateOperator, AggregateOptions, ExpansionDecision, PreaggExpansionPolicy,
    PreaggStats, ReductionFactorPolicy,
};
pub use values_source::ValuesSource;

/// Producer of row batches for a parent operator.
///
/// `open` may be called again after `close` to replay the input from the start.
pub trait RowSource {
    fn name(&self) -> &str;

    fn schema(&self) -> SchemaRef;

    fn open(&mut self, state: &RuntimeState) -> Result<(), String>;

    /// Next batch of at most `state.batch_size()` rows, or `None` at end of input.
    fn next_batch(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String>;

    fn close(&mut self);
}
