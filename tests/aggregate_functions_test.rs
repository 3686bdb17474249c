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
//! Aggregate functions with variable-length or tracked state, driven through
//! the operator under memory pressure.
mod common;

use arrow::datatypes::DataType;
use partagg::exec::chunk::nullable_schema;
use partagg::exec::expr::SlotRef;
use partagg::exec::node::aggregate::{AggFunction, AggregateNode};
use partagg::exec::operators::AggError;
use partagg::exec::row::{Datum, Row};

use crate::common::*;

const TIGHT_MEM_LIMIT: i64 = 200 * 1024;

#[test]
fn test_mem_test_state_is_released_after_spilling() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), TIGHT_MEM_LIMIT);
    let rows: Vec<Row> = scrambled_rows(12_000, 3_000)
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let key = row.get(0).cloned().unwrap_or(Datum::Null);
            Row::new(vec![key, Datum::Int64((i % 3) as i64)])
        })
        .collect();
    let node = AggregateNode::new(1, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![
            AggFunction::count_star(),
            AggFunction::new("mem_test", Some(SlotRef::new(1, DataType::Int64))),
        ]);

    let (out, op) = assert_ok!(aggregate(node, &rows, small_table_options(), &state));

    assert!(counter(&op, "SpilledPartitions") > 0);
    assert_eq!(sorted(out), expected_count_sum(&rows));
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_failing_function_aborts_the_query() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = scrambled_rows(1_000, 10);
    let node = AggregateNode::new(1, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![AggFunction::new("fail_after", None).with_constant(Datum::Int64(100))]);

    let err = assert_err!(aggregate(node, &rows, small_table_options(), &state).map(|(out, _)| out));

    match err {
        AggError::AggregateFunction { function, .. } => assert_eq!(function, "fail_after"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_group_concat_survives_spilling() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), TIGHT_MEM_LIMIT);
    let schema = nullable_schema([("k", DataType::Int64), ("s", DataType::Utf8)]);
    let keys = 1_500i64;
    let rows: Vec<Row> = (0..6_000i64)
        .map(|i| Row::new(vec![Datum::Int64(i % keys), Datum::Utf8(format!("v{i}"))]))
        .collect();
    let node = AggregateNode::new(1, schema)
        .with_group_by(group_by_k())
        .with_functions(vec![AggFunction::new(
            "group_concat",
            Some(SlotRef::new(1, DataType::Utf8)),
        )]);

    let (out, op) = assert_ok!(aggregate(node, &rows, small_table_options(), &state));

    assert!(counter(&op, "SpilledPartitions") > 0);
    assert_eq!(out.len(), keys as usize);
    for row in &out {
        let key = row.get(0).and_then(Datum::as_i64).expect("key");
        let mut parts: Vec<String> = row
            .get(1)
            .and_then(Datum::as_str)
            .expect("concatenated value")
            .split(", ")
            .map(str::to_string)
            .collect();
        parts.sort();
        let mut expected: Vec<String> = (0..4).map(|j| format!("v{}", key + j * keys)).collect();
        expected.sort();
        assert_eq!(parts, expected);
    }
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_min_max_and_null_handling() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = vec![
        Row::new(vec![Datum::Int64(1), Datum::Int64(7)]),
        Row::new(vec![Datum::Int64(1), Datum::Null]),
        Row::new(vec![Datum::Int64(1), Datum::Int64(-3)]),
        Row::new(vec![Datum::Null, Datum::Int64(5)]),
        Row::new(vec![Datum::Null, Datum::Null]),
    ];
    let node = AggregateNode::new(1, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![
            AggFunction::new("min", Some(SlotRef::new(1, DataType::Int64))),
            AggFunction::new("max", Some(SlotRef::new(1, DataType::Int64))),
            AggFunction::new("count", Some(SlotRef::new(1, DataType::Int64))),
            AggFunction::new("count_nulls", Some(SlotRef::new(1, DataType::Int64))),
        ]);

    let (out, _) = assert_ok!(aggregate(node, &rows, small_table_options(), &state));

    assert_eq!(
        sorted(out),
        sorted(vec![
            Row::new(vec![
                Datum::Int64(1),
                Datum::Int64(-3),
                Datum::Int64(7),
                Datum::Int64(2),
                Datum::Int64(1),
            ]),
            Row::new(vec![
                Datum::Null,
                Datum::Int64(5),
                Datum::Int64(5),
                Datum::Int64(1),
                Datum::Int64(1),
            ]),
        ])
    );
}

#[test]
fn test_unknown_function_is_rejected_at_prepare() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let node = AggregateNode::new(1, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![AggFunction::new("median", Some(SlotRef::new(1, DataType::Int64)))]);

    let result = partagg::exec::operators::AggregateOperator::prepare(
        node,
        values_source(kv_schema(), &[]),
        small_table_options(),
        &state,
    );

    assert!(result.is_err());
}
