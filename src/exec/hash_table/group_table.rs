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
//! Hash table mapping grouping keys to aggregate-state rows.
//!
//! The table stores `(hash, row index)` buckets; the rows themselves live in the
//! owning partition's aggregated row stream and key equality is delegated to
//! the caller. Capacity is managed explicitly in power-of-two bucket counts so
//! memory can be accounted through the buffer pool client before the table
//! grows: the table never exceeds a fill factor of 0.75 and a failed resize
//! leaves it unchanged.

use hashbrown::HashTable;

use crate::runtime::buffer_pool::BufferPoolClient;

/// Accounted size of one bucket: 8-byte hash plus row reference and padding.
pub const BUCKET_BYTES: i64 = 16;
pub const MAX_FILL_FACTOR: f64 = 0.75;

/// Partition selection consumes the top bits of the hash; the table probes on
/// the remaining bits, rotated to the top where hashbrown takes its tag bits.
const PARTITIONING_BITS: u32 = 4;

#[derive(Clone, Copy, Debug)]
struct Bucket {
    hash: u64,
    row: u32,
}

fn table_hash(hash: u64) -> u64 {
    hash.rotate_left(PARTITIONING_BITS)
}

fn max_fill(num_buckets: usize) -> usize {
    (num_buckets as f64 * MAX_FILL_FACTOR) as usize
}

pub struct GroupHashTable {
    table: HashTable<Bucket>,
    num_buckets: usize,
    charged_bytes: i64,
    client: BufferPoolClient,
}

impl std::fmt::Debug for GroupHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHashTable")
            .field("len", &self.len())
            .field("num_buckets", &self.num_buckets)
            .field("charged_bytes", &self.charged_bytes)
            .finish()
    }
}

impl GroupHashTable {
    /// Allocate a table with `initial_buckets` (rounded up to a power of two).
    /// Returns `None` when the client cannot account the directory memory.
    pub fn try_new(client: &BufferPoolClient, initial_buckets: usize) -> Option<Self> {
        let num_buckets = initial_buckets.max(1).next_power_of_two();
        let bytes = num_buckets as i64 * BUCKET_BYTES;
        if !client.try_consume(bytes) {
            return None;
        }
        Some(Self {
            table: HashTable::with_capacity(max_fill(num_buckets)),
            num_buckets,
            charged_bytes: bytes,
            client: client.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Bytes of directory memory charged to the buffer pool client.
    pub fn current_mem_size(&self) -> i64 {
        self.charged_bytes
    }

    /// Inserts that fit without growing the directory.
    pub fn num_inserts_before_resize(&self) -> usize {
        max_fill(self.num_buckets).saturating_sub(self.len())
    }

    /// Make room for `num_rows` more inserts, doubling the directory as needed.
    /// Returns false, leaving the table as is, if the memory is not available.
    pub fn check_and_resize(&mut self, num_rows: usize) -> bool {
        let needed = self.len().saturating_add(num_rows);
        if needed <= max_fill(self.num_buckets) {
            return true;
        }
        let mut target = self.num_buckets;
        while max_fill(target) < needed {
            target = target.saturating_mul(2);
        }
        self.resize(target)
    }

    pub fn resize(&mut self, num_buckets: usize) -> bool {
        let num_buckets = num_buckets.max(1).next_power_of_two();
        if num_buckets <= self.num_buckets {
            return true;
        }
        let new_bytes = num_buckets as i64 * BUCKET_BYTES;
        if !self.client.try_consume(new_bytes - self.charged_bytes) {
            return false;
        }
        self.charged_bytes = new_bytes;
        self.num_buckets = num_buckets;
        let additional = max_fill(num_buckets).saturating_sub(self.len());
        self.table.reserve(additional, |b| table_hash(b.hash));
        true
    }

    /// Row index of the group whose stored hash is `hash` and for which `eq` holds.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(u32) -> bool) -> Option<u32> {
        self.table
            .find(table_hash(hash), |b| b.hash == hash && eq(b.row))
            .map(|b| b.row)
    }

    /// Insert a new group. Returns false when the table is at its fill limit;
    /// callers are expected to `check_and_resize` first.
    pub fn insert(&mut self, hash: u64, row: u32) -> bool {
        if self.num_inserts_before_resize() == 0 {
            return false;
        }
        self.table
            .insert_unique(table_hash(hash), Bucket { hash, row }, |b| table_hash(b.hash));
        true
    }

    /// Row indexes of all groups, in table order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.table.iter().map(|b| b.row)
    }
}

impl Drop for GroupHashTable {
    fn drop(&mut self) {
        self.client.release(self.charged_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer_pool::BufferPool;
    use crate::runtime::mem_tracker::MemTracker;

    fn client(limit: i64) -> BufferPoolClient {
        BufferPool::new(1024, MemTracker::new_root_with_limit("test", limit)).register_client("ht")
    }

    #[test]
    fn insert_and_find_with_caller_equality() {
        let client = client(-1);
        let mut table = GroupHashTable::try_new(&client, 16).unwrap();
        let keys = (0..12u64).map(|i| i * 7919).collect::<Vec<_>>();
        for (row, key) in keys.iter().enumerate() {
            assert!(table.insert(*key, row as u32));
        }
        assert_eq!(table.num_inserts_before_resize(), 0);
        assert!(!table.insert(99, 99));
        for (row, key) in keys.iter().enumerate() {
            assert_eq!(table.find(*key, |r| r == row as u32), Some(row as u32));
            assert_eq!(table.find(*key, |_| false), None);
        }
        let mut rows = table.iter().collect::<Vec<_>>();
        rows.sort();
        assert_eq!(rows, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn colliding_hashes_are_told_apart_by_equality() {
        let client = client(-1);
        let mut table = GroupHashTable::try_new(&client, 64).unwrap();
        for row in 0..20u32 {
            assert!(table.insert(42, row));
        }
        for row in 0..20u32 {
            assert_eq!(table.find(42, |r| r == row), Some(row));
        }
    }

    #[test]
    fn resize_is_accounted_and_can_fail() {
        let client = client(16 * 64);
        let mut table = GroupHashTable::try_new(&client, 32).unwrap();
        assert_eq!(client.consumed_bytes(), 32 * BUCKET_BYTES);
        assert!(table.check_and_resize(24));
        assert_eq!(table.num_buckets(), 32);
        assert!(table.check_and_resize(40));
        assert_eq!(table.num_buckets(), 64);
        assert_eq!(client.consumed_bytes(), 64 * BUCKET_BYTES);
        assert!(!table.check_and_resize(100));
        assert_eq!(table.num_buckets(), 64);
        drop(table);
        assert_eq!(client.consumed_bytes(), 0);
    }

    #[test]
    fn allocation_fails_without_memory() {
        let client = client(100);
        assert!(GroupHashTable::try_new(&client, 1024).is_none());
        assert_eq!(client.consumed_bytes(), 0);
    }
}
