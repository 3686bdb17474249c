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
//! Operator defaults picked up from a `partagg.toml`.
mod common;

use partagg::common::app_config::{PartAggConfig, StreamingReductionLevel};
use partagg::exec::operators::AggregateOptions;
use partagg::runtime::runtime_state::RuntimeState;

use crate::common::*;

#[test]
fn test_config_file_is_parsed() {
    let test_config = TestConfig::new().unwrap();

    let cfg = assert_ok!(PartAggConfig::load_from_file(&test_config.config_path));

    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.runtime.batch_size, 256);
    assert_eq!(cfg.runtime.buffer_size_bytes, 4096);
    assert_eq!(cfg.aggregate.hash_table_initial_buckets, 64);
    assert_eq!(
        cfg.aggregate.streaming_min_reduction,
        vec![
            StreamingReductionLevel {
                min_ht_mem_bytes: 0,
                min_reduction: 0.0,
            },
            StreamingReductionLevel {
                min_ht_mem_bytes: 262144,
                min_reduction: 1.1,
            },
        ]
    );
    assert_eq!(cfg.spill.ipc_compression, "lz4");
}

#[test]
fn test_unsorted_reduction_levels_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
[aggregate]
streaming_min_reduction = [
  { min_ht_mem_bytes = 1024, min_reduction = 2.0 },
  { min_ht_mem_bytes = 0, min_reduction = 1.0 },
]
"#,
    )
    .unwrap();

    let err = assert_err!(PartAggConfig::load_from_file(&path));

    assert!(format!("{err:#}").contains("sorted"));
}

#[test]
fn test_spilling_with_configured_storage() {
    let test_config = TestConfig::new().unwrap();
    test_config.init_logging();
    assert_ok!(test_config.load_config());

    let state = RuntimeState::new().with_mem_limit(200 * 1024);
    assert_eq!(state.batch_size(), 256);
    assert_eq!(state.buffer_size(), 4096);
    let rows = scrambled_rows(20_000, 5_000);

    let (out, op) = assert_ok!(aggregate(
        count_sum_node(1),
        &rows,
        AggregateOptions::default(),
        &state
    ));

    assert!(counter(&op, "SpilledPartitions") > 0);
    assert_eq!(sorted(out), expected_count_sum(&rows));
    assert_eq!(count_files(&test_config.temp_dir.path().join("spill")), 0);
}
