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
//! Streaming pre-aggregation: pass-through once growth stops, and two-phase
//! plans that merge the partial results.
mod common;

use std::sync::Arc;

use arrow::datatypes::DataType;
use partagg::common::app_config::StreamingReductionLevel;
use partagg::exec::expr::SlotRef;
use partagg::exec::node::aggregate::{AggFunction, AggregateNode};
use partagg::exec::operators::{AggregateOperator, ReductionFactorPolicy};
use partagg::exec::row::{Datum, Row};

use crate::common::*;

fn strict_policy() -> Arc<ReductionFactorPolicy> {
    Arc::new(ReductionFactorPolicy::new(vec![StreamingReductionLevel {
        min_ht_mem_bytes: 0,
        min_reduction: 1.5,
    }]))
}

fn kv_functions() -> Vec<AggFunction> {
    vec![
        AggFunction::count_star(),
        AggFunction::new("sum", Some(SlotRef::new(1, DataType::Int64))),
        AggFunction::new("avg", Some(SlotRef::new(1, DataType::Int64))),
    ]
}

fn preagg_node(node_id: i32, estimate: Option<i64>) -> AggregateNode {
    AggregateNode::new(node_id, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(kv_functions())
        .streaming(estimate)
}

#[test]
fn test_streaming_reduces_few_keys() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = scrambled_rows(10_000, 5);
    let node = AggregateNode::new(1, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![
            AggFunction::count_star(),
            AggFunction::new("sum", Some(SlotRef::new(1, DataType::Int64))),
        ])
        .streaming(Some(10_000));

    let (out, op) = assert_ok!(aggregate(node, &rows, small_table_options(), &state));

    assert_eq!(sorted(out), expected_count_sum(&rows));
    assert_eq!(counter(&op, "PassthroughRows"), 0);
    assert!(!op.preagg_growth_halted());
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_streaming_passes_distinct_keys_through_after_halting() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = distinct_rows(20_000);
    let source = values_source(kv_schema(), &rows);
    let options = small_table_options().with_expansion_policy(strict_policy());

    let mut op = assert_ok!(AggregateOperator::prepare(
        preagg_node(1, None),
        source,
        options,
        &state
    ));
    assert_ok!(op.open(&state));

    let mut out = Vec::new();
    let mut batch = Vec::new();
    let mut groups_at_halt: Option<usize> = None;
    loop {
        let eos = assert_ok!(op.get_next(&state, &mut batch));
        out.append(&mut batch);
        if op.preagg_growth_halted() {
            let groups = op.num_hash_table_groups();
            if let Some(previous) = groups_at_halt {
                assert!(groups <= previous, "groups grew after halting: {previous} -> {groups}");
            }
            groups_at_halt = Some(groups);
        }
        if eos {
            break;
        }
    }
    op.close();

    assert!(op.preagg_growth_halted());
    assert_eq!(out.len(), rows.len());
    assert!(counter(&op, "PassthroughRows") > 0);
    assert_eq!(counter(&op, "RowsReturned"), rows.len() as i64);
    for row in &out {
        assert_eq!(row.get(1), Some(&Datum::Int64(1)));
    }
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_streaming_under_memory_pressure_passes_rows_through() {
    let rows = scrambled_rows(20_000, 3_000);
    for mem_limit in [2 * 1024, 32 * 1024, 256 * 1024] {
        let dir = tempfile::tempdir().unwrap();
        let state = spill_state(dir.path(), mem_limit);
        let node = AggregateNode::new(1, kv_schema())
            .with_group_by(group_by_k())
            .with_functions(vec![
                AggFunction::count_star(),
                AggFunction::new("sum", Some(SlotRef::new(1, DataType::Int64))),
            ])
            .streaming(None);

        let (out, op) = assert_ok!(aggregate(node, &rows, small_table_options(), &state));

        // Partial groups for one key may repeat; merging them restores the totals.
        let mut merged = std::collections::BTreeMap::<i64, (i64, i64)>::new();
        for row in &out {
            let key = row.get(0).and_then(Datum::as_i64).expect("key");
            let count = row.get(1).and_then(Datum::as_i64).expect("count");
            let sum = row.get(2).and_then(Datum::as_i64).expect("sum");
            let entry = merged.entry(key).or_insert((0, 0));
            entry.0 += count;
            entry.1 += sum;
        }
        let merged: Vec<Row> = merged
            .into_iter()
            .map(|(k, (count, sum))| {
                Row::new(vec![Datum::Int64(k), Datum::Int64(count), Datum::Int64(sum)])
            })
            .collect();
        assert_eq!(sorted(merged), expected_count_sum(&rows), "mem_limit={mem_limit}");
        assert_eq!(counter(&op, "InputRowCount"), 20_000);
        assert!(out.len() >= 3_000);
        assert_eq!(state.mem_tracker().current(), 0);
    }
}

#[test]
fn test_two_phase_plan_matches_single_phase() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = scrambled_rows(30_000, 8_000);

    let phase1 = assert_ok!(AggregateOperator::prepare(
        preagg_node(1, Some(30_000)),
        values_source(kv_schema(), &rows),
        small_table_options().with_expansion_policy(strict_policy()),
        &state
    ));
    let intermediate = phase1.output_schema();
    let merges: Vec<AggFunction> = kv_functions()
        .iter()
        .enumerate()
        .map(|(idx, func)| {
            let column = idx + 1;
            func.merge_of(column, intermediate.field(column).data_type().clone())
        })
        .collect();
    let merge_node = AggregateNode::new(2, intermediate.clone())
        .with_group_by(vec![SlotRef::new(0, DataType::Int64)])
        .with_functions(merges);
    let mut phase2 = assert_ok!(AggregateOperator::prepare(
        merge_node,
        Box::new(phase1),
        small_table_options(),
        &state
    ));
    assert_ok!(phase2.open(&state));
    let two_phase = assert_ok!(drain(&mut phase2, &state));
    phase2.close();

    let single_node = AggregateNode::new(3, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(kv_functions());
    let (single_phase, _) = assert_ok!(aggregate(single_node, &rows, small_table_options(), &state));

    assert_eq!(two_phase.len(), 8_000);
    assert_eq!(sorted(two_phase), sorted(single_phase));
    assert_eq!(state.mem_tracker().current(), 0);
}

#[test]
fn test_streaming_output_is_intermediate() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let rows = vec![
        Row::new(vec![Datum::Int64(1), Datum::Int64(2)]),
        Row::new(vec![Datum::Int64(1), Datum::Int64(4)]),
    ];

    let (out, op) = assert_ok!(aggregate(
        preagg_node(1, None),
        &rows,
        small_table_options(),
        &state
    ));

    let schema = op.output_schema();
    assert_eq!(schema.fields().len(), 4);
    assert_eq!(schema.field(3).data_type(), &DataType::Binary);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get(1), Some(&Datum::Int64(2)));
    assert_eq!(out[0].get(2), Some(&Datum::Int64(6)));
}

#[test]
fn test_streaming_rejects_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let state = spill_state(dir.path(), -1);
    let node = preagg_node(1, None).with_need_finalize(true);

    let result = AggregateOperator::prepare(
        node,
        values_source(kv_schema(), &[]),
        small_table_options(),
        &state,
    );

    assert!(result.is_err());
}
