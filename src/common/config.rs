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
use crate::common::app_config::{StreamingReductionLevel, default_streaming_min_reduction};
use crate::partagg_config::config as partagg_app_config;

pub(crate) fn batch_size() -> usize {
    partagg_app_config()
        .ok()
        .map(|c| c.runtime.batch_size)
        .unwrap_or(4096)
}

pub(crate) fn buffer_size_bytes() -> usize {
    partagg_app_config()
        .ok()
        .map(|c| c.runtime.buffer_size_bytes)
        .unwrap_or(1024 * 1024)
}

pub(crate) fn mem_limit_bytes() -> i64 {
    partagg_app_config()
        .ok()
        .map(|c| c.runtime.mem_limit_bytes)
        .unwrap_or(-1)
}

pub(crate) fn hash_table_initial_buckets() -> usize {
    partagg_app_config()
        .ok()
        .map(|c| c.aggregate.hash_table_initial_buckets)
        .unwrap_or(1024)
}

pub(crate) fn streaming_min_reduction() -> Vec<StreamingReductionLevel> {
    partagg_app_config()
        .ok()
        .map(|c| c.aggregate.streaming_min_reduction.clone())
        .unwrap_or_else(default_streaming_min_reduction)
}

pub(crate) fn spill_local_dirs() -> Vec<String> {
    let dirs = partagg_app_config()
        .ok()
        .map(|c| c.spill.local_dirs.clone())
        .unwrap_or_default();
    if !dirs.is_empty() {
        return dirs;
    }
    let fallback = std::env::temp_dir().join("partagg-spill");
    vec![fallback.to_string_lossy().into_owned()]
}

pub(crate) fn spill_block_size_bytes() -> u64 {
    partagg_app_config()
        .ok()
        .map(|c| c.spill.block_size_bytes)
        .unwrap_or(128 * 1024 * 1024)
}

pub(crate) fn spill_ipc_compression() -> String {
    partagg_app_config()
        .ok()
        .map(|c| c.spill.ipc_compression.clone())
        .unwrap_or_else(|| "lz4".to_string())
}
