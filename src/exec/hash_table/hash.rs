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
use std::fmt;

use crate::exec::row::Datum;

/// Per-level hash seeds. Each repartitioning level hashes with a different
/// seed so rows that collided into one partition spread out at the next level.
pub const LEVEL_SEEDS: [u64; 17] = [
    0x9e3779b97f4a7c15,
    0xc2b2ae3d27d4eb4f,
    0x165667b19e3779f9,
    0xd6e8feb86659fd93,
    0xa0761d6478bd642f,
    0xe7037ed1a0b428db,
    0x8ebc6af09c88c6e3,
    0x589965cc75374cc3,
    0x1d8e4e27c47d124f,
    0xbf58476d1ce4e5b9,
    0x94d049bb133111eb,
    0xff51afd7ed558ccd,
    0xc4ceb9fe1a85ec53,
    0x87c37b91114253d5,
    0x4cf5ad432745937f,
    0x52dce729da3ed5a3,
    0x38495ab5d2e7b4f1,
];

/// Hashes a grouping key for a given partitioning level.
///
/// Implementations must be deterministic: the same key at the same level always
/// yields the same hash.
pub trait GroupKeyHasher: Send + Sync + fmt::Debug {
    fn hash_key(&self, key: &[Datum], level: usize) -> u64;
}

/// Default hasher: seeded per level, with a final avalanche so the high bits
/// used for partition selection are well mixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeededKeyHasher;

impl GroupKeyHasher for SeededKeyHasher {
    fn hash_key(&self, key: &[Datum], level: usize) -> u64 {
        let seed = LEVEL_SEEDS[level.min(LEVEL_SEEDS.len() - 1)];
        let mut acc = seed;
        for datum in key {
            acc = combine_hash(acc, hash_datum_with_seed(seed, datum));
        }
        mix_u64(acc)
    }
}

pub(crate) fn hash_datum_with_seed(seed: u64, datum: &Datum) -> u64 {
    match datum {
        Datum::Null => hash_null_with_seed(seed),
        Datum::Boolean(v) => hash_u64_with_seed(seed, *v as u64 + 1),
        Datum::Int64(v) => hash_u64_with_seed(seed, *v as u64),
        Datum::Float64(v) => hash_u64_with_seed(seed, canonical_f64_bits(*v)),
        Datum::Utf8(v) => hash_bytes_with_seed(seed, v.as_bytes()),
        Datum::Binary(v) => hash_bytes_with_seed(seed, v),
    }
}

pub(crate) fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    acc ^ value_hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

pub(crate) fn hash_u64_with_seed(seed: u64, value: u64) -> u64 {
    mix_u64(seed ^ value)
}

pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    mix_u64(hash ^ bytes.len() as u64)
}

pub(crate) fn hash_null_with_seed(seed: u64) -> u64 {
    hash_u64_with_seed(seed, 0x9e3779b97f4a7c15)
}

/// Bit pattern used for hashing and grouping floats: all NaNs share one
/// pattern and `-0.0` maps to `0.0`.
pub(crate) fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i64) -> Vec<Datum> {
        vec![Datum::Int64(i), Datum::Utf8(format!("k{i}"))]
    }

    #[test]
    fn hash_is_deterministic_per_level() {
        let hasher = SeededKeyHasher;
        for i in 0..100 {
            assert_eq!(hasher.hash_key(&key(i), 0), hasher.hash_key(&key(i), 0));
            assert_eq!(hasher.hash_key(&key(i), 5), hasher.hash_key(&key(i), 5));
        }
        assert_ne!(hasher.hash_key(&key(1), 0), hasher.hash_key(&key(1), 1));
    }

    #[test]
    fn high_bits_cover_all_partitions() {
        let hasher = SeededKeyHasher;
        for level in [0usize, 1, 16] {
            let mut seen = [0usize; 16];
            for i in 0..4096 {
                seen[(hasher.hash_key(&key(i), level) >> 60) as usize] += 1;
            }
            assert!(seen.iter().all(|&n| n > 150), "level {level}: {seen:?}");
        }
    }

    #[test]
    fn equal_floats_hash_equal() {
        let hasher = SeededKeyHasher;
        assert_eq!(
            hasher.hash_key(&[Datum::Float64(0.0)], 0),
            hasher.hash_key(&[Datum::Float64(-0.0)], 0)
        );
        assert_eq!(
            hasher.hash_key(&[Datum::Float64(f64::NAN)], 3),
            hasher.hash_key(&[Datum::Float64(-f64::NAN)], 3)
        );
        assert_ne!(
            hasher.hash_key(&[Datum::Null], 0),
            hasher.hash_key(&[Datum::Int64(0)], 0)
        );
    }
}
