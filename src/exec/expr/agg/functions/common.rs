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
use std::cmp::Ordering;

use arrow::datatypes::DataType;

use crate::exec::row::Datum;

/// Ordering of two non-null values of the same type, as used by min/max.
pub(super) fn compare_values(a: &Datum, b: &Datum) -> Result<Ordering, String> {
    match (a, b) {
        (Datum::Boolean(a), Datum::Boolean(b)) => Ok(a.cmp(b)),
        (Datum::Int64(a), Datum::Int64(b)) => Ok(a.cmp(b)),
        (Datum::Float64(a), Datum::Float64(b)) => Ok(a.total_cmp(b)),
        (Datum::Utf8(a), Datum::Utf8(b)) => Ok(a.cmp(b)),
        (Datum::Binary(a), Datum::Binary(b)) => Ok(a.cmp(b)),
        _ => Err(format!("cannot compare {a:?} with {b:?}")),
    }
}

/// Replace `state` with `input` when the state is NULL or `input` orders as `keep`.
pub(super) fn replace_if(state: &mut Datum, input: &Datum, keep: Ordering) -> Result<(), String> {
    if input.is_null() {
        return Ok(());
    }
    if state.is_null() || compare_values(input, state)? == keep {
        *state = input.clone();
    }
    Ok(())
}

pub(super) fn ensure_numeric(name: &str, data_type: &DataType) -> Result<(), String> {
    match data_type {
        DataType::Int64 | DataType::Float64 => Ok(()),
        other => Err(format!("{name} does not support input type {other:?}")),
    }
}

pub(super) fn expect_i64(name: &str, value: &Datum) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("{name} expects a BIGINT value, got {value:?}"))
}

pub(super) fn expect_f64(name: &str, value: &Datum) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{name} expects a numeric value, got {value:?}"))
}
