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
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::config;
use crate::exec::spill::spiller::SpillStorageConfig;
use crate::partagg_logging::debug;
use crate::runtime::mem_tracker::MemTracker;

/// Shared flag through which a consumer asks running operators to stop.
#[derive(Clone, Debug, Default)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// RuntimeState is the per-execution context handed to every operator call.
///
/// It carries the batch size, the memory-limited root tracker, the buffer size
/// used by the buffer pool, spill storage settings and the cancellation flag.
/// Values default to the loaded config and can be overridden with the
/// `with_*` builders.
#[derive(Debug)]
pub struct RuntimeState {
    batch_size: usize,
    buffer_size: usize,
    mem_tracker: Arc<MemTracker>,
    spill_storage: Option<SpillStorageConfig>,
    cancellation: CancellationHandle,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            batch_size: config::batch_size().max(1),
            buffer_size: config::buffer_size_bytes().max(1),
            mem_tracker: MemTracker::new_root_with_limit("query", config::mem_limit_bytes()),
            spill_storage: None,
            cancellation: CancellationHandle::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Replace the root tracker with one limited to `limit` bytes (negative = unlimited).
    pub fn with_mem_limit(mut self, limit: i64) -> Self {
        self.mem_tracker = MemTracker::new_root_with_limit("query", limit);
        self
    }

    pub fn with_spill_storage(mut self, storage: SpillStorageConfig) -> Self {
        self.spill_storage = Some(storage);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    /// Spill storage settings: explicit override, else the app config.
    pub fn spill_storage(&self) -> Result<SpillStorageConfig, String> {
        match self.spill_storage.as_ref() {
            Some(storage) => Ok(storage.clone()),
            None => SpillStorageConfig::from_app_config(),
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        let cancelled = self.cancellation.is_cancelled();
        if cancelled {
            debug!("runtime state observed cancellation");
        }
        cancelled
    }
}
