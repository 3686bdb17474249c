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
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::runtime::mem_tracker::MemTracker;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TUnit {
    UNIT,
    BYTES,
    TIME_NS,
    DOUBLE_VALUE,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterKind {
    /// Plain value; `add` and `set` both apply.
    Plain,
    /// Keeps the largest value ever set.
    HighWaterMark,
}

#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

pub type Profiler = RuntimeProfile;

#[derive(Debug)]
struct RuntimeProfileInner {
    name: RwLock<String>,
    counters: Mutex<HashMap<String, CounterRef>>,
    counter_order: Mutex<Vec<String>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
    child_map: Mutex<HashMap<String, RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                counters: Mutex::new(HashMap::new()),
                counter_order: Mutex::new(Vec::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
                child_map: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .child_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn add_child(&self, child: RuntimeProfile) {
        let child_name = child.name();
        {
            let mut map = self
                .inner
                .child_map
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&child_name) {
                return;
            }
            map.insert(child_name, child.clone());
        }
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// Return the named child, creating it on first use.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        if let Some(existing) = self.get_child(&name) {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        self.add_counter_with_kind(name, unit, CounterKind::Plain)
    }

    pub fn add_high_water_mark_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        self.add_counter_with_kind(name, unit, CounterKind::HighWaterMark)
    }

    pub fn add_counter_with_kind(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        kind: CounterKind,
    ) -> CounterRef {
        let name = name.into();
        let mut guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = guard.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit, kind));
        guard.insert(name.clone(), Arc::clone(&counter));
        self.inner
            .counter_order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name);
        counter
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Value of the named counter in this profile or any descendant, depth first.
    pub fn find_counter_value(&self, name: &str) -> Option<i64> {
        if let Some(counter) = self.get_counter(name) {
            return Some(counter.value());
        }
        self.children()
            .iter()
            .find_map(|child| child.find_counter_value(name))
    }

    pub fn counter_add(&self, name: &str, unit: TUnit, delta: i64) {
        self.add_counter(name.to_string(), unit).add(delta);
    }

    pub fn counter_set(&self, name: &str, unit: TUnit, value: i64) {
        self.add_counter(name.to_string(), unit).set(value);
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TUnit::TIME_NS)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    /// Indented text rendering of the profile tree.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{}:", self.name());
        let info_strings = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (key, value) in info_strings {
            let _ = writeln!(out, "{indent}   {key}: {value}");
        }
        let order = self
            .inner
            .counter_order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for name in order {
            if let Some(counter) = self.get_counter(&name) {
                let _ = writeln!(out, "{indent}   - {name}: {}", counter.display_value());
            }
        }
        for child in self.children() {
            child.pretty_print_into(out, depth + 1);
        }
    }
}

pub type CounterRef = Arc<Counter>;

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: TUnit,
    kind: CounterKind,
    value: AtomicI64,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: TUnit, kind: CounterKind) -> Self {
        Self {
            name: name.into(),
            unit,
            kind,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> TUnit {
        self.unit
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        match self.kind {
            CounterKind::Plain => self.value.store(value, Ordering::Relaxed),
            CounterKind::HighWaterMark => {
                self.value.fetch_max(value, Ordering::Relaxed);
            }
        }
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// DOUBLE_VALUE counters keep the f64 bit pattern in the i64 slot.
    pub fn set_double(&self, value: f64) {
        self.value.store(value.to_bits() as i64, Ordering::Relaxed);
    }

    pub fn double_value(&self) -> f64 {
        f64::from_bits(self.value() as u64)
    }

    fn display_value(&self) -> String {
        match self.unit {
            TUnit::UNIT => self.value().to_string(),
            TUnit::BYTES => format!("{} B", self.value()),
            TUnit::TIME_NS => format!("{:.3}ms", self.value() as f64 / 1_000_000.0),
            TUnit::DOUBLE_VALUE => format!("{:.2}", self.double_value()),
        }
    }
}

pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ns = clamp_u128_to_i64(self.start.elapsed().as_nanos());
        self.counter.add(elapsed_ns);
    }
}

pub fn attach_mem_tracker_tree(profile: &RuntimeProfile, root: &Arc<MemTracker>) {
    let mem_root = profile.child("MemTracker");
    fill_mem_tracker_profile(&mem_root, root);
}

fn fill_mem_tracker_profile(profile: &RuntimeProfile, tracker: &Arc<MemTracker>) {
    profile.add_info_string("Label", tracker.label());
    profile.counter_set("CurrentMemoryBytes", TUnit::BYTES, tracker.current());
    profile.counter_set("PeakMemoryBytes", TUnit::BYTES, tracker.peak());
    for child in tracker.children() {
        let child_profile = profile.child(child.label().to_string());
        fill_mem_tracker_profile(&child_profile, &child);
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_water_mark_keeps_maximum() {
        let profile = RuntimeProfile::new("agg");
        let c = profile.add_high_water_mark_counter("LargestPartitionPercent", TUnit::UNIT);
        c.set(40);
        c.set(10);
        assert_eq!(c.value(), 40);
        c.set(70);
        assert_eq!(profile.find_counter_value("LargestPartitionPercent"), Some(70));
    }

    #[test]
    fn counters_are_found_in_children() {
        let profile = RuntimeProfile::new("agg");
        let spill = profile.child("Spill");
        spill.counter_add("SpillRows", TUnit::UNIT, 3);
        spill.counter_add("SpillRows", TUnit::UNIT, 4);
        assert_eq!(profile.find_counter_value("SpillRows"), Some(7));
        assert_eq!(profile.find_counter_value("Missing"), None);

        let d = profile.add_counter("ReductionFactorEstimate", TUnit::DOUBLE_VALUE);
        d.set_double(1.25);
        assert_eq!(d.double_value(), 1.25);
        let text = profile.pretty_print();
        assert!(text.contains("ReductionFactorEstimate: 1.25"));
        assert!(text.contains("SpillRows: 7"));
    }
}
