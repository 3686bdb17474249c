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
//! Fixed-size buffer leasing on top of `MemTracker` limits.
//!
//! A `BufferPool` hands out buffers of one size to registered clients. Each client
//! may hold a reservation: reserved buffers are paid for up front and are always
//! grantable, further buffers are granted only while the tracker limit allows.
//! The client also exposes raw byte accounting for structures that are not
//! buffer-shaped (hash table directories).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::runtime::mem_tracker::MemTracker;

#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    tracker: Arc<MemTracker>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, tracker: Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            buffer_size: buffer_size.max(1),
            tracker,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    pub fn register_client(self: &Arc<Self>, label: impl Into<String>) -> BufferPoolClient {
        let tracker = MemTracker::new_child(label, &self.tracker);
        BufferPoolClient {
            inner: Arc::new(ClientInner {
                pool: Arc::clone(self),
                tracker,
                reserved: AtomicI64::new(0),
                in_use: AtomicI64::new(0),
            }),
        }
    }
}

struct ClientInner {
    pool: Arc<BufferPool>,
    tracker: Arc<MemTracker>,
    reserved: AtomicI64,
    in_use: AtomicI64,
}

impl ClientInner {
    fn buffer_bytes(&self) -> i64 {
        i64::try_from(self.pool.buffer_size).unwrap_or(i64::MAX)
    }

    fn return_buffer(&self) {
        let remaining = self.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining >= self.reserved.load(Ordering::Acquire) {
            self.tracker.release(self.buffer_bytes());
        }
    }
}

/// Handle through which one operator leases buffers and accounts memory.
///
/// Cloning yields another handle to the same client.
#[derive(Clone)]
pub struct BufferPoolClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for BufferPoolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPoolClient")
            .field("label", &self.inner.tracker.label())
            .field("reserved", &self.reserved_buffers())
            .field("in_use", &self.buffers_in_use())
            .field("bytes", &self.inner.tracker.current())
            .finish()
    }
}

impl BufferPoolClient {
    pub fn buffer_size(&self) -> usize {
        self.inner.pool.buffer_size
    }

    pub fn tracker(&self) -> &Arc<MemTracker> {
        &self.inner.tracker
    }

    pub fn reserved_buffers(&self) -> i64 {
        self.inner.reserved.load(Ordering::Acquire)
    }

    pub fn buffers_in_use(&self) -> i64 {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Reserved buffers that are not currently leased.
    pub fn unused_reservation(&self) -> i64 {
        (self.reserved_buffers() - self.buffers_in_use()).max(0)
    }

    /// Grow the reservation to at least `buffers`. Returns false, leaving the
    /// reservation unchanged, when the memory limit cannot cover it.
    pub fn reserve(&self, buffers: i64) -> bool {
        let reserved = self.reserved_buffers();
        if buffers <= reserved {
            return true;
        }
        let in_use = self.buffers_in_use();
        let extra = buffers.max(in_use) - reserved.max(in_use);
        if !self
            .inner
            .tracker
            .try_consume(extra.saturating_mul(self.inner.buffer_bytes()))
        {
            return false;
        }
        self.inner.reserved.store(buffers, Ordering::Release);
        true
    }

    /// Drop the reservation. Leased buffers stay charged until returned.
    pub fn release_reservation(&self) {
        let reserved = self.inner.reserved.swap(0, Ordering::AcqRel);
        let in_use = self.buffers_in_use();
        let surplus = reserved.max(in_use) - in_use;
        self.inner
            .tracker
            .release(surplus.saturating_mul(self.inner.buffer_bytes()));
    }

    /// Lease one buffer, drawing from the reservation first. `None` signals memory
    /// pressure; the caller must pick a fallback.
    pub fn try_acquire(&self) -> Option<Buffer> {
        let in_use = self.buffers_in_use();
        if in_use >= self.reserved_buffers()
            && !self.inner.tracker.try_consume(self.inner.buffer_bytes())
        {
            return None;
        }
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        Some(Buffer {
            client: Arc::clone(&self.inner),
        })
    }

    /// Account `bytes` of non-buffer memory against the limit.
    pub fn try_consume(&self, bytes: i64) -> bool {
        self.inner.tracker.try_consume(bytes)
    }

    pub fn release(&self, bytes: i64) {
        self.inner.tracker.release(bytes);
    }

    /// Bytes currently charged to this client: buffers, reservation and raw bytes.
    pub fn consumed_bytes(&self) -> i64 {
        self.inner.tracker.current()
    }
}

/// A leased buffer. Dropping it returns the lease to its client.
pub struct Buffer {
    client: Arc<ClientInner>,
}

impl Buffer {
    pub fn size(&self) -> usize {
        self.client.pool.buffer_size
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("size", &self.size()).finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.client.return_buffer();
    }
}
