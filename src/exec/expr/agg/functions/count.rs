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

/// `count(expr)` counts non-null inputs; `count(*)` counts rows.
#[derive(Debug)]
pub(super) struct CountAgg {
    count_all: bool,
}

impl CountAgg {
    pub(super) fn new(count_all: bool) -> Self {
        Self { count_all }
    }
}

impl AggregateFunction for CountAgg {
    fn name(&self) -> &str {
        if self.count_all { "count(*)" } else { "count" }
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
        if self.count_all || !input.is_null() {
            *state = Datum::Int64(expect_i64(self.name(), state)? + 1);
        }
        Ok(())
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        if src.is_null() {
            return Ok(());
        }
        let total = expect_i64(self.name(), state)? + expect_i64(self.name(), src)?;
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
    fn counts_non_null_inputs_only() {
        let mut ctx = ctx();
        let count = CountAgg::new(false);
        let mut state = count.init(&mut ctx).unwrap();
        for v in [Datum::Int64(1), Datum::Null, Datum::Utf8("x".into())] {
            count.update(&mut ctx, &mut state, &v).unwrap();
        }
        assert_eq!(state, Datum::Int64(2));

        let star = CountAgg::new(true);
        let mut all = star.init(&mut ctx).unwrap();
        star.update(&mut ctx, &mut all, &Datum::Null).unwrap();
        star.merge(&mut ctx, &mut all, &Datum::Int64(4)).unwrap();
        assert_eq!(star.finalize(&mut ctx, all).unwrap(), Datum::Int64(5));
    }
}
