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
use std::env;
use std::process;

use partagg::exec::chunk::{Chunk, nullable_schema};
use partagg::exec::expr::SlotRef;
use partagg::exec::node::aggregate::{AggFunction, AggregateNode};
use partagg::exec::operators::{AggError, AggregateOperator, AggregateOptions, ValuesSource};
use partagg::exec::row::{Datum, Row};
use partagg::partagg_config;
use partagg::partagg_logging;
use partagg::runtime::runtime_state::RuntimeState;

use arrow::datatypes::DataType;

struct RunArgs {
    rows: usize,
    keys: usize,
    mem_limit: Option<i64>,
    buffer_size: Option<usize>,
    streaming: bool,
    config_path: Option<String>,
}

fn usage() {
    eprintln!(
        "Usage: partagg run [--rows N] [--keys K] [--mem-limit BYTES] [--buffer-size BYTES] \
         [--streaming] [--config PATH]"
    );
    eprintln!("  run      - Aggregate synthetic rows with count(*), sum(v) grouped by key");
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let raw = value.ok_or_else(|| format!("missing value for {flag}"))?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid value for {flag}: '{raw}'"))
}

fn parse_args(args: &[String]) -> Result<RunArgs, String> {
    let mut idx = 1usize;
    if args.get(idx).is_some_and(|s| !s.starts_with('-')) {
        let mode = args[idx].as_str();
        if mode != "run" {
            return Err(format!("unknown mode: {mode}"));
        }
        idx += 1;
    }
    let mut parsed = RunArgs {
        rows: 1_000_000,
        keys: 1_000,
        mem_limit: None,
        buffer_size: None,
        streaming: false,
        config_path: None,
    };
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "--rows" => {
                idx += 1;
                parsed.rows = parse_value(arg, args.get(idx))?;
            }
            "--keys" => {
                idx += 1;
                parsed.keys = parse_value::<usize>(arg, args.get(idx))?.max(1);
            }
            "--mem-limit" => {
                idx += 1;
                parsed.mem_limit = Some(parse_value(arg, args.get(idx))?);
            }
            "--buffer-size" => {
                idx += 1;
                parsed.buffer_size = Some(parse_value(arg, args.get(idx))?);
            }
            "--streaming" => parsed.streaming = true,
            "--config" | "-c" => {
                idx += 1;
                parsed.config_path = Some(parse_value(arg, args.get(idx))?);
            }
            "--help" | "-h" => {
                usage();
                process::exit(0);
            }
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        idx += 1;
    }
    Ok(parsed)
}

fn synthetic_chunks(rows: usize, keys: usize, batch: usize) -> Result<Vec<Chunk>, String> {
    let schema = nullable_schema([("k", DataType::Int64), ("v", DataType::Int64)]);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < rows {
        let end = (start + batch).min(rows);
        let page: Vec<Row> = (start..end)
            .map(|i| {
                // A prime multiplier permutes keys over each run of `keys` rows.
                let key = (i as u128 * 2_654_435_761 % keys as u128) as i64;
                Row::new(vec![Datum::Int64(key), Datum::Int64(i as i64)])
            })
            .collect();
        chunks.push(Chunk::from_rows(schema.clone(), &page)?);
        start = end;
    }
    Ok(chunks)
}

fn open_and_drain(op: &mut AggregateOperator, state: &RuntimeState) -> Result<usize, AggError> {
    op.open(state)?;
    let mut groups = 0usize;
    let mut batch = Vec::new();
    loop {
        let eos = op.get_next(state, &mut batch)?;
        groups += batch.len();
        if eos {
            return Ok(groups);
        }
    }
}

fn run(args: RunArgs) -> Result<(), String> {
    let cfg = match args.config_path.as_deref() {
        Some(path) => Some(partagg_config::init_from_path(path).map_err(|e| format!("{e:#}"))?),
        None => partagg_config::init_from_env_or_default().ok(),
    };
    match cfg {
        Some(cfg) => partagg_logging::init_with_level(cfg.effective_log_filter()),
        None => partagg_logging::init(),
    }

    let mut state = RuntimeState::new();
    if let Some(limit) = args.mem_limit {
        state = state.with_mem_limit(limit);
    }
    if let Some(size) = args.buffer_size {
        state = state.with_buffer_size(size);
    }

    let schema = nullable_schema([("k", DataType::Int64), ("v", DataType::Int64)]);
    let chunks = synthetic_chunks(args.rows, args.keys, state.batch_size())?;
    let source = ValuesSource::new(schema.clone(), chunks, 0);
    let mut node = AggregateNode::new(1, schema)
        .with_group_by(vec![SlotRef::new(0, DataType::Int64)])
        .with_functions(vec![
            AggFunction::count_star(),
            AggFunction::new("sum", Some(SlotRef::new(1, DataType::Int64))),
        ]);
    if args.streaming {
        node = node.streaming(Some(args.rows as i64));
    }

    let mut op = AggregateOperator::prepare(node, Box::new(source), AggregateOptions::default(), &state)
        .map_err(|e| e.to_string())?;
    let result = open_and_drain(&mut op, &state);
    op.close();
    let groups = result.map_err(|e| e.to_string())?;

    println!("output rows: {groups}");
    println!("{}", op.profile().pretty_print());
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}");
            usage();
            process::exit(1);
        }
    };
    if let Err(err) = run(parsed) {
        eprintln!("partagg failed: {err}");
        process::exit(1);
    }
}
