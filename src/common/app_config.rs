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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<PartAggConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static PartAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = PartAggConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config was not installed"))
}

pub fn init_from_env_or_default() -> Result<&'static PartAggConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = PartAggConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config was not installed"))
}

pub fn config() -> Result<&'static PartAggConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("PARTAGG_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("partagg.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $PARTAGG_CONFIG or create ./partagg.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct PartAggConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "partagg=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub aggregate: AggregateConfig,

    #[serde(default)]
    pub spill: SpillStorageConfig,
}

impl PartAggConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: PartAggConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("validate config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Log filter handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }

    fn validate(&self) -> Result<()> {
        if self.runtime.batch_size == 0 {
            return Err(anyhow!("runtime.batch_size must be positive"));
        }
        if self.runtime.buffer_size_bytes == 0 {
            return Err(anyhow!("runtime.buffer_size_bytes must be positive"));
        }
        if !self.aggregate.hash_table_initial_buckets.is_power_of_two() {
            return Err(anyhow!(
                "aggregate.hash_table_initial_buckets must be a power of two, got {}",
                self.aggregate.hash_table_initial_buckets
            ));
        }
        let levels = &self.aggregate.streaming_min_reduction;
        if levels.is_empty() {
            return Err(anyhow!("aggregate.streaming_min_reduction must not be empty"));
        }
        if levels
            .windows(2)
            .any(|w| w[0].min_ht_mem_bytes >= w[1].min_ht_mem_bytes)
        {
            return Err(anyhow!(
                "aggregate.streaming_min_reduction must be sorted by min_ht_mem_bytes"
            ));
        }
        Ok(())
    }
}

impl Default for PartAggConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            aggregate: AggregateConfig::default(),
            spill: SpillStorageConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: usize,
    /// Byte limit of the operator memory tracker; negative means unlimited.
    #[serde(default = "default_mem_limit_bytes")]
    pub mem_limit_bytes: i64,
}

fn default_batch_size() -> usize {
    4096
}

fn default_buffer_size_bytes() -> usize {
    1024 * 1024
}

fn default_mem_limit_bytes() -> i64 {
    -1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            buffer_size_bytes: default_buffer_size_bytes(),
            mem_limit_bytes: default_mem_limit_bytes(),
        }
    }
}

/// One step of the streaming pre-aggregation growth table: once the hash tables
/// hold at least `min_ht_mem_bytes`, they must reduce the input by at least
/// `min_reduction` to keep growing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StreamingReductionLevel {
    pub min_ht_mem_bytes: i64,
    pub min_reduction: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AggregateConfig {
    #[serde(default = "default_hash_table_initial_buckets")]
    pub hash_table_initial_buckets: usize,
    #[serde(default = "default_streaming_min_reduction")]
    pub streaming_min_reduction: Vec<StreamingReductionLevel>,
}

fn default_hash_table_initial_buckets() -> usize {
    1024
}

pub(crate) fn default_streaming_min_reduction() -> Vec<StreamingReductionLevel> {
    vec![
        // Expand up to the L2 cache size of the hash tables regardless of reduction.
        StreamingReductionLevel {
            min_ht_mem_bytes: 0,
            min_reduction: 0.0,
        },
        StreamingReductionLevel {
            min_ht_mem_bytes: 256 * 1024,
            min_reduction: 1.1,
        },
        StreamingReductionLevel {
            min_ht_mem_bytes: 2 * 1024 * 1024,
            min_reduction: 2.0,
        },
    ]
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            hash_table_initial_buckets: default_hash_table_initial_buckets(),
            streaming_min_reduction: default_streaming_min_reduction(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpillStorageConfig {
    #[serde(default)]
    pub local_dirs: Vec<String>,
    #[serde(default = "default_spill_block_size_bytes")]
    pub block_size_bytes: u64,
    #[serde(default = "default_spill_ipc_compression")]
    pub ipc_compression: String,
}

fn default_spill_block_size_bytes() -> u64 {
    128 * 1024 * 1024
}

fn default_spill_ipc_compression() -> String {
    "lz4".to_string()
}

impl Default for SpillStorageConfig {
    fn default() -> Self {
        Self {
            local_dirs: Vec::new(),
            block_size_bytes: default_spill_block_size_bytes(),
            ipc_compression: default_spill_ipc_compression(),
        }
    }
}
