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

use crate::exec::chunk::ensure_supported_type;
use crate::exec::row::Datum;

use super::super::{AggFnContext, AggregateFunction};
use super::common::replace_if;

#[derive(Debug)]
pub(super) struct MinAgg {
    data_type: DataType,
}

impl MinAgg {
    pub(super) fn new(input_type: &DataType) -> Result<Self, String> {
        ensure_supported_type("min", input_type)?;
        Ok(Self {
            data_type: input_type.clone(),
        })
    }
}

impl AggregateFunction for MinAgg {
    fn name(&self) -> &str {
        "min"
    }

    fn intermediate_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn output_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn init(&self, _ctx: &mut AggFnContext) -> Result<Datum, String> {
        Ok(Datum::Null)
    }

    fn update(&self, _ctx: &mut AggFnContext, state: &mut Datum, input: &Datum) -> Result<(), String> {
        replace_if(state, input, Ordering::Less)
    }

    fn merge(&self, _ctx: &mut AggFnContext, state: &mut Datum, src: &Datum) -> Result<(), String> {
        replace_if(state, src, Ordering::Less)
    }

    fn finalize(&self, _ctx: &mut AggFnContext, state: Datum) -> Result<Datum, String> {
        Ok(state)
    }
}
