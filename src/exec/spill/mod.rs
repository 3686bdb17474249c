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
//! Spill storage for aggregation row streams.
//!
//! Responsibilities:
//! - Encodes pages of rows as Arrow IPC messages and groups them into block files.
//! - Places block files round robin across the configured local directories.
//! - Backs `RowStream`, the buffer-leasing append-only stream partitions write to.
//!
//! Current limitations:
//! - Local disk only; blocks are written synchronously on the operator thread.

pub mod block_format;
pub mod block_manager;
pub mod dir_manager;
pub mod ipc_serde;
pub mod row_stream;
pub mod spill_stream;
pub mod spiller;

use crate::runtime::profile::{CounterRef, RuntimeProfile, TUnit};

#[derive(Clone, Debug)]
pub struct SpillProfile {
    pub spill_rows: CounterRef,
    pub spill_bytes: CounterRef,
    pub spill_time: CounterRef,
    pub restore_rows: CounterRef,
    pub restore_time: CounterRef,
    pub spill_block_count: CounterRef,
}

impl SpillProfile {
    pub fn new(profile: &RuntimeProfile) -> Self {
        let profile = profile.child("Spill");
        Self {
            spill_rows: profile.add_counter("SpillRows", TUnit::UNIT),
            spill_bytes: profile.add_counter("SpillBytes", TUnit::BYTES),
            spill_time: profile.add_timer("SpillTime"),
            restore_rows: profile.add_counter("RestoreRows", TUnit::UNIT),
            restore_time: profile.add_timer("RestoreTime"),
            spill_block_count: profile.add_counter("SpillBlockCount", TUnit::UNIT),
        }
    }
}
