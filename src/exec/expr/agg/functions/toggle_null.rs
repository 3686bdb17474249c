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

/// Flips between NULL and 1 on every input row; exercises NULL intermediate states.
#[derive(Debug)]
pub(super) struct ToggleNullAgg;

impl AggregateFunction for ToggleNullAgg {
    fn name(&self) -> &str {
        "toggle_null"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Null)
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, _input: &Datum) -> Result<(), String> {
        *state = if state.is_null() {
            Datum::Int64(1)
        } else {
            Datum::Null
        };
        Ok(())
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        *state = if src.is_null() != state.is_null() {
            Datum::Int64(1)
        } else {
            Datum::Null
        };
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
    fn parity_survives_merge() {
        let mut ctx = ctx();
        let f = ToggleNullAgg;
        let mut a = f.init(&mut ctx).unwrap();
        for _ in 0..3 {
            f.update(&mut ctx, &mut a, &Datum::Null).unwrap();
        }
        assert_eq!(a, Datum::Int64(1));
        let mut b = f.init(&mut ctx).unwrap();
        f.update(&mut ctx, &mut b, &Datum::Null).unwrap();
        f.merge(&mut ctx, &mut a, &b).unwrap();
        assert_eq!(a, Datum::Null, "four updates in total");
    }
}
