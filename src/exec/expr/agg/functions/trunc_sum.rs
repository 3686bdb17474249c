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
use super::common::{ensure_numeric, expect_f64};

/// Double running sum, truncated to BIGINT on finalize.
#[derive(Debug)]
pub(super) struct TruncSumAgg;

impl TruncSumAgg {
    pub(super) fn new(input_type: &DataType) -> Result<Self, String> {
        ensure_numeric("trunc_sum", input_type)?;
        Ok(Self)
    }

    fn add(state: &mut Datum, value: &Datum) -> Result<(), String> {
        let value = if value.is_null() {
            0.0
        } else {
            expect_f64("trunc_sum", value)?
        };
        *state = Datum::Float64(expect_f64("trunc_sum", state)? + value);
        Ok(())
    }
}

impl AggregateFunction for TruncSumAgg {
    fn name(&self) -> &str {
        "trunc_sum"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Float64
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Float64(0.0))
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        Self::add(state, input)
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        Self::add(state, src)
    }

    fn finalize(&self, _ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        Ok(Datum::Int64(expect_f64("trunc_sum", &state)? as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ctx;
    use super::*;

    #[test]
    fn truncates_the_double_total() {
        let mut ctx = ctx();
        let f = TruncSumAgg::new(&DataType::Float64).unwrap();
        let mut state = f.init(&mut ctx).unwrap();
        f.update(&mut ctx, &mut state, &Datum::Float64(1.75)).unwrap();
        f.merge(&mut ctx, &mut state, &Datum::Float64(0.5)).unwrap();
        assert!(f.needs_finalize());
        assert_eq!(f.finalize(&mut ctx, state).unwrap(), Datum::Int64(2));
    }
}
