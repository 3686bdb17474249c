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

#[derive(Debug)]
pub(super) struct CountNullsAgg;

impl AggregateFunction for CountNullsAgg {
    fn name(&self) -> &str {
        "count_nulls"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Int64(0))
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        if input.is_null() {
            *state = Datum::Int64(expect_i64("count_nulls", state)? + 1);
        }
        Ok(())
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        let total = expect_i64("count_nulls", state)? + expect_i64("count_nulls", src)?;
        *state = Datum::Int64(total);
        Ok(())
    }

    fn finalize(&self, _ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ctx;
    use super::*;

    #[test]
    fn counts_null_inputs() {
        let mut ctx = ctx();
        let f = CountNullsAgg;
        let mut state = f.init(&mut ctx).unwrap();
        for v in [Datum::Null, Datum::Int64(1), Datum::Null] {
            f.update(&mut ctx, &mut state, &v).unwrap();
        }
        f.merge(&mut ctx, &mut state, &Datum::Int64(3)).unwrap();
        assert_eq!(state, Datum::Int64(5));
    }
}
