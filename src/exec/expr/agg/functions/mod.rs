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
use std::sync::Arc;

use arrow::datatypes::DataType;

use crate::exec::row::Datum;

use super::AggregateFunction;

mod avg;
mod common;
mod count;
mod count_nulls;
mod fail_after;
mod group_concat;
mod max;
mod mem_test;
mod min;
mod sum;
mod toggle_null;
mod trunc_sum;

/// Resolve an aggregate function by name.
///
/// `input_type` is the type of the input slot, or `None` for `count(*)`. When
/// `input_is_intermediate` is set the input slot carries intermediate states of
/// the function (merge phase) rather than raw values. `constant` is the
/// function's constant argument (the `group_concat` separator, the
/// `fail_after` threshold).
pub fn build_function(
    name: &str,
    input_type: Option<&DataType>,
    constant: Option<&Datum>,
    input_is_intermediate: bool,
) -> Result<Arc<dyn AggregateFunction>, String> {
    let lower = name.to_ascii_lowercase();
    let function: Arc<dyn AggregateFunction> = match lower.as_str() {
        "count" => Arc::new(count::CountAgg::new(input_type.is_none())),
        "sum" => Arc::new(sum::SumAgg::new(require_input(&lower, input_type)?)?),
        "min" => Arc::new(min::MinAgg::new(require_input(&lower, input_type)?)?),
        "max" => Arc::new(max::MaxAgg::new(require_input(&lower, input_type)?)?),
        "avg" => Arc::new(avg::AvgAgg::new(
            require_input(&lower, input_type)?,
            input_is_intermediate,
        )?),
        "group_concat" => Arc::new(group_concat::GroupConcatAgg::new(
            require_input(&lower, input_type)?,
            constant,
        )?),
        "trunc_sum" => Arc::new(trunc_sum::TruncSumAgg::new(require_input(
            &lower, input_type,
        )?)?),
        "toggle_null" => Arc::new(toggle_null::ToggleNullAgg),
        "count_nulls" => Arc::new(count_nulls::CountNullsAgg),
        "mem_test" => Arc::new(mem_test::MemTestAgg::new(require_input(&lower, input_type)?)?),
        "fail_after" => Arc::new(fail_after::FailAfterAgg::new(constant)?),
        _ => return Err(format!("unsupported aggregate function: {name}")),
    };
    Ok(function)
}

fn require_input<'a>(name: &str, input_type: Option<&'a DataType>) -> Result<&'a DataType, String> {
    input_type.ok_or_else(|| format!("{name} requires an input argument"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtins_and_rejects_unknown_names() {
        let f = build_function("SUM", Some(&DataType::Int64), None, false).unwrap();
        assert_eq!(f.name(), "sum");
        assert_eq!(f.output_type(), DataType::Int64);
        let star = build_function("count", None, None, false).unwrap();
        assert_eq!(star.name(), "count(*)");
        assert!(build_function("median", Some(&DataType::Int64), None, false).is_err());
        assert!(build_function("sum", None, None, false).is_err());
        assert!(build_function("sum", Some(&DataType::Utf8), None, false).is_err());
    }

    #[test]
    fn finalize_flags_follow_types() {
        let avg = build_function("avg", Some(&DataType::Int64), None, false).unwrap();
        assert!(avg.needs_finalize());
        assert_eq!(avg.intermediate_type(), DataType::Binary);
        let count = build_function("count", Some(&DataType::Utf8), None, false).unwrap();
        assert!(!count.needs_finalize());
        let concat = build_function("group_concat", Some(&DataType::Utf8), None, false).unwrap();
        assert!(concat.needs_serialize());
    }
}
