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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use arrow::datatypes::{DataType, SchemaRef};
use partagg::exec::chunk::{Chunk, nullable_schema};
use partagg::exec::expr::SlotRef;
use partagg::exec::node::aggregate::{AggFunction, AggregateNode};
use partagg::exec::operators::{
    AggError, AggregateOperator, AggregateOptions, RowSource, ValuesSource,
};
use partagg::exec::row::{Datum, Row};
use partagg::exec::spill::spiller::SpillStorageConfig;
use partagg::partagg_config;
use partagg::partagg_logging;
use partagg::runtime::runtime_state::RuntimeState;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_partagg.toml");
        let spill_dir = temp_dir.path().join("spill");

        let config_content = format!(
            r#"
log_level = "debug"

[runtime]
batch_size = 256
buffer_size_bytes = 4096
mem_limit_bytes = -1

[aggregate]
hash_table_initial_buckets = 64
streaming_min_reduction = [
  {{ min_ht_mem_bytes = 0, min_reduction = 0.0 }},
  {{ min_ht_mem_bytes = 262144, min_reduction = 1.1 }},
]

[spill]
local_dirs = ["{}"]
block_size_bytes = 1048576
ipc_compression = "lz4"
"#,
            spill_dir.display()
        );

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        partagg_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static partagg_config::PartAggConfig> {
        partagg_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}

/// `(k BIGINT, v BIGINT)`.
pub fn kv_schema() -> SchemaRef {
    nullable_schema([("k", DataType::Int64), ("v", DataType::Int64)])
}

/// Prime multiplier; coprime to every key count used in tests, so
/// `i * SCRAMBLE % keys` visits each key once per `keys` consecutive rows.
const SCRAMBLE: u128 = 2_654_435_761;

/// `rows` rows over `min(rows, keys)` distinct keys, visited in a scrambled but
/// deterministic order. `v` cycles through 0..100.
pub fn scrambled_rows(rows: usize, keys: usize) -> Vec<Row> {
    let keys = keys.max(1) as u128;
    (0..rows as u128)
        .map(|i| {
            let key = i * SCRAMBLE % keys;
            Row::new(vec![Datum::Int64(key as i64), Datum::Int64((i % 100) as i64)])
        })
        .collect()
}

/// Every key exactly once.
pub fn distinct_rows(rows: usize) -> Vec<Row> {
    scrambled_rows(rows, rows)
}

pub fn values_source(schema: SchemaRef, rows: &[Row]) -> Box<dyn RowSource> {
    let chunks = rows
        .chunks(1024)
        .map(|page| Chunk::from_rows(schema.clone(), page).expect("build chunk"))
        .collect();
    Box::new(ValuesSource::new(schema, chunks, 0))
}

pub fn group_by_k() -> Vec<SlotRef> {
    vec![SlotRef::new(0, DataType::Int64)]
}

/// `SELECT k, count(*), sum(v) GROUP BY k`.
pub fn count_sum_node(node_id: i32) -> AggregateNode {
    AggregateNode::new(node_id, kv_schema())
        .with_group_by(group_by_k())
        .with_functions(vec![
            AggFunction::count_star(),
            AggFunction::new("sum", Some(SlotRef::new(1, DataType::Int64))),
        ])
}

/// Runtime state with small buffers, spilling into `dir`.
pub fn spill_state(dir: &Path, mem_limit: i64) -> RuntimeState {
    RuntimeState::new()
        .with_batch_size(256)
        .with_buffer_size(4096)
        .with_mem_limit(mem_limit)
        .with_spill_storage(SpillStorageConfig::in_dir(dir))
}

pub fn small_table_options() -> AggregateOptions {
    AggregateOptions::default().with_hash_table_initial_buckets(64)
}

/// Drains an opened operator.
pub fn drain(op: &mut AggregateOperator, state: &RuntimeState) -> Result<Vec<Row>, AggError> {
    let mut all = Vec::new();
    let mut batch = Vec::new();
    loop {
        let eos = op.get_next(state, &mut batch)?;
        all.append(&mut batch);
        if eos {
            return Ok(all);
        }
    }
}

/// Prepares, opens and drains an aggregation over `rows`, closing it afterwards.
pub fn aggregate(
    node: AggregateNode,
    rows: &[Row],
    options: AggregateOptions,
    state: &RuntimeState,
) -> Result<(Vec<Row>, AggregateOperator), AggError> {
    let source = values_source(node.input_schema.clone(), rows);
    let mut op = AggregateOperator::prepare(node, source, options, state)?;
    let result = op.open(state).and_then(|_| drain(&mut op, state));
    op.close();
    result.map(|rows| (rows, op))
}

/// Rows in a canonical order for comparisons.
pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_cached_key(|row| format!("{row:?}"));
    rows
}

pub fn counter(op: &AggregateOperator, name: &str) -> i64 {
    op.profile().find_counter_value(name).unwrap_or(0)
}

/// Files left under `dir`, recursively.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() { count_files(&path) } else { 1 }
        })
        .sum()
}

/// Expected `(k, count, sum)` rows for `rows`, computed directly.
pub fn expected_count_sum(rows: &[Row]) -> Vec<Row> {
    let mut groups = std::collections::BTreeMap::<i64, (i64, i64)>::new();
    for row in rows {
        let key = row.get(0).and_then(Datum::as_i64).expect("key");
        let value = row.get(1).and_then(Datum::as_i64).expect("value");
        let entry = groups.entry(key).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += value;
    }
    sorted(
        groups
            .into_iter()
            .map(|(k, (count, sum))| Row::new(vec![Datum::Int64(k), Datum::Int64(count), Datum::Int64(sum)]))
            .collect(),
    )
}
