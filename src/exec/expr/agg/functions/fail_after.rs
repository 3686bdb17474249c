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
use std::sync::atomic::{AtomicI64, Ordering};

use arrow::datatypes::DataType;

use crate::exec::row::Datum;

use super::super::{AggFnContext, AggregateFunction};

/// Counts rows like `count(*)` but fails once more than `limit` updates have
/// been applied across all partitions.
#[derive(Debug)]
pub(super) struct FailAfterAgg {
    limit: i64,
    updates: AtomicI64,
}

impl FailAfterAgg {
    pub(super) fn new(limit: Option<&Datum>) -> Result<Self, String> {
        let limit = limit
            .and_then(Datum::as_i64)
            .ok_or_else(|| "fail_after requires a BIGINT constant argument".to_string())?;
        Ok(Self {
            limit,
            updates: AtomicI64::new(0),
        })
    }
}

impl AggregateFunction for FailAfterAgg {
    fn name(&self) -> &str {
        "fail_after"
    }

    fn intermediate_type(&self) -> DataType {
        DataType::Int64
    }

    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Int64(0))
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, _input: &Datum) -> Result<(), String> {
        let seen = self.updates.fetch_add(1, Ordering::AcqRel) + 1;
        if seen > self.limit {
            return Err(format!("fail_after: failing after {} updates", self.limit));
        }
        *state = Datum::Int64(state.as_i64().unwrap_or(0) + 1);
        Ok(())
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        *state = Datum::Int64(state.as_i64().unwrap_or(0) + src.as_i64().unwrap_or(0));
        Ok(())
    }

    fn finalize(&self, _ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        Ok(state)
    }
}
