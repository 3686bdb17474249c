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
use arrow::datatypes::DataType;

use crate::exec::row::Datum;

use super::super::{AggFnContext, AggregateFunction};
use super::common::expect_i64;

/// Sums its input and charges the same number of bytes to the arena; serialize
/// and finalize give the bytes back, so a finished query leaves the arena empty.
#[derive(Debug)]
pub(super) struct MemTestAgg;

impl MemTestAgg {
    pub(super) fn new(input_type: &DataType) -> Result<Self, String> {
        if input_type != &DataType::Int64 {
            return Err(format!("mem_test does not support input type {input_type:?}"));
        }
        Ok(Self)
    }

    fn release(ctx: &mut AggFnContext, state: &mut Datum) -> Result<(), String> {
        if state.is_null() {
            *state = Datum::Int64(0);
            return Ok(());
        }
        ctx.free(expect_i64("mem_test", state)?);
        Ok(())
    }
}

impl AggregateFunction for MemTestAgg {
    fn name(&self) -> &str {
        "mem_test"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn needs_serialize(&self) -> bool {
        true
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Int64(0))
    }

    fn update(&self, ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        if input.is_null() {
            return Ok(());
        }
        let bytes = expect_i64("mem_test", input)?;
        ctx.track_allocation(bytes);
        let total = if state.is_null() {
            bytes
        } else {
            expect_i64("mem_test", state)? + bytes
        };
        *state = Datum::Int64(total);
        Ok(())
    }

    fn merge(&self, ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        self.update(ctx, state, src)
    }

    fn serialize(&self, ctx: &mut AggFnContext, state: &mut Datum) -> Result<(), String> {
        Self::release(ctx, state)
    }

    fn finalize(&self, ctx: &mut AggFnContext, mut state: Datum) -> Result<Datum, String> {
        Self::release(ctx, &mut state)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ctx;
    use super::*;

    #[test]
    fn arena_returns_to_zero_after_finalize() {
        let mut ctx = ctx();
        let f = MemTestAgg::new(&DataType::Int64).unwrap();
        let mut state = f.init(&mut ctx).unwrap();
        f.update(&mut ctx, &mut state, &Datum::Int64(100)).unwrap();
        f.update(&mut ctx, &mut state, &Datum::Int64(28)).unwrap();
        assert_eq!(ctx.allocated_bytes(), 128);
        assert_eq!(f.finalize(&mut ctx, state).unwrap(), Datum::Int64(128));
        assert_eq!(ctx.allocated_bytes(), 0);
    }
}
