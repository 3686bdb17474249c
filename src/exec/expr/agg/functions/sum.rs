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
use super::common::{ensure_numeric, expect_f64, expect_i64};

/// `sum` over BIGINT (wrapping) or DOUBLE; NULL until a non-null input arrives.
#[derive(Debug)]
pub(super) struct SumAgg {
    data_type: DataType,
}

impl SumAgg {
    pub(super) fn new(input_type: &DataType) -> Result<Self, String> {
        ensure_numeric("sum", input_type)?;
        Ok(Self {
            data_type: input_type.clone(),
        })
    }

    fn add(&self, state: &mut Datum, value: &Datum) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let next = match (&self.data_type, &*state) {
            (DataType::Int64, Datum::Null) => Datum::Int64(expect_i64("sum", value)?),
            (DataType::Int64, current) => {
                Datum::Int64(expect_i64("sum", current)?.wrapping_add(expect_i64("sum", value)?))
            }
            (_, Datum::Null) => Datum::Float64(expect_f64("sum", value)?),
            (_, current) => Datum::Float64(expect_f64("sum", current)? + expect_f64("sum", value)?),
        };
        *state = next;
        Ok(())
    }
}

impl AggregateFunction for SumAgg {
    fn name(&self) -> &str {
        "sum"
    }

    fn intermediate_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn output_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Null)
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        self.add(state, input)
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        self.add(state, src)
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
    fn sum_skips_nulls_and_stays_null_without_input() {
        let mut ctx = ctx();
        let sum = SumAgg::new(&DataType::Int64).unwrap();
        let mut state = sum.init(&mut ctx).unwrap();
        sum.update(&mut ctx, &mut state, &Datum::Null).unwrap();
        assert_eq!(state, Datum::Null);
        sum.update(&mut ctx, &mut state, &Datum::Int64(3)).unwrap();
        sum.merge(&mut ctx, &mut state, &Datum::Int64(4)).unwrap();
        assert_eq!(state, Datum::Int64(7));

        let dsum = SumAgg::new(&DataType::Float64).unwrap();
        let mut d = dsum.init(&mut ctx).unwrap();
        dsum.update(&mut ctx, &mut d, &Datum::Float64(1.5)).unwrap();
        dsum.merge(&mut ctx, &mut d, &Datum::Float64(2.0)).unwrap();
        assert_eq!(d, Datum::Float64(3.5));
    }
}
