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

const DEFAULT_SEPARATOR: &str = ", ";

/// `group_concat(str [, sep])`. The growing string is charged to the
/// partition arena and handed back on serialize or finalize.
#[derive(Debug)]
pub(super) struct GroupConcatAgg {
    separator: String,
}

impl GroupConcatAgg {
    pub(super) fn new(input_type: &DataType, separator: Option<&Datum>) -> Result<Self, String> {
        if input_type != &DataType::Utf8 {
            return Err(format!(
                "group_concat does not support input type {input_type:?}"
            ));
        }
        let separator = match separator {
            None => DEFAULT_SEPARATOR.to_string(),
            Some(Datum::Utf8(sep)) => sep.clone(),
            Some(other) => {
                return Err(format!(
                    "group_concat separator must be a string, got {other:?}"
                ));
            }
        };
        Ok(Self { separator })
    }

    fn append(&self, ctx: &mut AggFnContext, state: &mut Datum, value: &Datum) -> Result<(), String> {
        let text = match value {
            Datum::Null => return Ok(()),
            Datum::Utf8(text) => text,
            other => return Err(format!("group_concat expects a string, got {other:?}")),
        };
        let added = match state {
            Datum::Utf8(current) => {
                current.push_str(&self.separator);
                current.push_str(text);
                self.separator.len() + text.len()
            }
            Datum::Null => {
                *state = Datum::Utf8(text.clone());
                text.len()
            }
            other => return Err(format!("group_concat state must be a string, got {other:?}")),
        };
        ctx.track_allocation(added as i64);
        Ok(())
    }
}

impl AggregateFunction for GroupConcatAgg {
    fn name(&self) -> &str {
        "group_concat"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Utf8
    }

    fn output_type(&self) -> DataType {
        DataType::Utf8
    }

    fn needs_serialize(&self) -> bool {
        true
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Null)
    }

    fn update(&self, ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        self.append(ctx, state, input)
    }

    fn merge(&self, ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        self.append(ctx, state, src)
    }

    fn serialize(&self, ctx: &mut AggFnContext, state: &mut Datum) -> Result<(), String> {
        ctx.free(state.heap_bytes() as i64);
        Ok(())
    }

    fn finalize(&self, ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        ctx.free(state.heap_bytes() as i64);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ctx;
    use super::*;

    #[test]
    fn concatenates_and_accounts_arena_bytes() {
        let mut ctx = ctx();
        let concat = GroupConcatAgg::new(&DataType::Utf8, Some(&Datum::Utf8("|".into()))).unwrap();
        let mut state = concat.init(&mut ctx).unwrap();
        for v in ["a", "bb"] {
            concat.update(&mut ctx, &mut state, &Datum::Utf8(v.into())).unwrap();
        }
        concat.update(&mut ctx, &mut state, &Datum::Null).unwrap();
        concat.merge(&mut ctx, &mut state, &Datum::Utf8("c".into())).unwrap();
        assert_eq!(state, Datum::Utf8("a|bb|c".into()));
        assert_eq!(ctx.allocated_bytes(), 6);
        assert_eq!(
            concat.finalize(&mut ctx, state).unwrap(),
            Datum::Utf8("a|bb|c".into())
        );
        assert_eq!(ctx.allocated_bytes(), 0);
    }
}
