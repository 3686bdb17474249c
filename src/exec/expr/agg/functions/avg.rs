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

const STATE_LEN: usize = 16;

/// `avg` keeps a 16-byte binary state: f64 sum then i64 count, little endian.
#[derive(Debug)]
pub(super) struct AvgAgg;

impl AvgAgg {
    pub(super) fn new(input_type: &DataType, input_is_intermediate: bool) -> Result<Self, String> {
        if input_is_intermediate {
            if input_type != &DataType::Binary {
                return Err(format!(
                    "avg merge expects a BINARY intermediate, got {input_type:?}"
                ));
            }
        } else {
            ensure_numeric("avg", input_type)?;
        }
        Ok(Self)
    }
}

fn decode(state: &Datum) -> Result<(f64, i64), String> {
    let bytes = state
        .as_bytes()
        .filter(|b| b.len() == STATE_LEN)
        .ok_or_else(|| format!("avg state must be {STATE_LEN} bytes, got {state:?}"))?;
    let mut sum = [0u8; 8];
    let mut count = [0u8; 8];
    sum.copy_from_slice(&bytes[..8]);
    count.copy_from_slice(&bytes[8..]);
    Ok((f64::from_le_bytes(sum), i64::from_le_bytes(count)))
}

fn encode(sum: f64, count: i64) -> Datum {
    let mut bytes = Vec::with_capacity(STATE_LEN);
    bytes.extend_from_slice(&sum.to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    Datum::Binary(bytes)
}

impl AggregateFunction for AvgAgg {
    fn name(&self) -> &str {
        "avg"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Float64
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(encode(0.0, 0))
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        if input.is_null() {
            return Ok(());
        }
        let (sum, count) = decode(state)?;
        *state = encode(sum + expect_f64("avg", input)?, count + 1);
        Ok(())
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        if src.is_null() {
            return Ok(());
        }
        let (sum, count) = decode(state)?;
        let (src_sum, src_count) = decode(src)?;
        *state = encode(sum + src_sum, count + src_count);
        Ok(())
    }

    fn finalize(&self, _ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        let (sum, count) = decode(&state)?;
        if count == 0 {
            return Ok(Datum::Null);
        }
        Ok(Datum::Float64(sum / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ctx;
    use super::*;

    #[test]
    fn averages_across_update_and_merge() {
        let mut ctx = ctx();
        let avg = AvgAgg::new(&DataType::Int64, false).unwrap();
        let mut a = avg.init(&mut ctx).unwrap();
        avg.update(&mut ctx, &mut a, &Datum::Int64(2)).unwrap();
        avg.update(&mut ctx, &mut a, &Datum::Null).unwrap();
        let mut b = avg.init(&mut ctx).unwrap();
        avg.update(&mut ctx, &mut b, &Datum::Int64(4)).unwrap();
        avg.update(&mut ctx, &mut b, &Datum::Int64(6)).unwrap();
        avg.merge(&mut ctx, &mut a, &b).unwrap();
        assert_eq!(avg.finalize(&mut ctx, a).unwrap(), Datum::Float64(4.0));

        let empty = avg.init(&mut ctx).unwrap();
        assert_eq!(avg.finalize(&mut ctx, empty).unwrap(), Datum::Null);
        assert!(AvgAgg::new(&DataType::Int64, true).is_err());
    }
}
