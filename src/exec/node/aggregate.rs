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
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::exec::expr::SlotRef;
use crate::exec::expr::agg::{AggregateFunction, build_function};
use crate::exec::row::Datum;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AggFunction {
    /// Lowercased function name (e.g. "sum", "count").
    pub name: String,
    /// Input column; `None` means a COUNT(*)-style aggregate.
    pub input: Option<SlotRef>,
    /// Whether this aggregate consumes intermediate states from a previous aggregation stage.
    pub input_is_intermediate: bool,
    /// Constant argument, such as the `group_concat` separator.
    pub constant: Option<Datum>,
}

impl AggFunction {
    pub fn new(name: impl Into<String>, input: Option<SlotRef>) -> Self {
        Self {
            name: name.into(),
            input,
            input_is_intermediate: false,
            constant: None,
        }
    }

    pub fn count_star() -> Self {
        Self::new("count", None)
    }

    /// The same function consuming this function's intermediate column at `index`.
    pub fn merge_of(&self, index: usize, intermediate_type: DataType) -> Self {
        Self {
            name: self.name.clone(),
            input: Some(SlotRef::new(index, intermediate_type)),
            input_is_intermediate: true,
            constant: self.constant.clone(),
        }
    }

    pub fn with_constant(mut self, constant: Datum) -> Self {
        self.constant = Some(constant);
        self
    }

    pub fn resolve(&self) -> Result<Arc<dyn AggregateFunction>, String> {
        build_function(
            &self.name,
            self.input.as_ref().map(|slot| &slot.data_type),
            self.constant.as_ref(),
            self.input_is_intermediate,
        )
    }
}

/// Plan of one grouping aggregation.
///
/// Input rows follow `input_schema`. Intermediate rows are the grouping keys
/// followed by one state column per function; output rows are the grouping
/// keys followed by one finalized (or, without `need_finalize`, intermediate)
/// column per function.
#[derive(Clone, Debug)]
pub struct AggregateNode {
    pub node_id: i32,
    pub input_schema: SchemaRef,
    pub group_by: Vec<SlotRef>,
    pub functions: Vec<AggFunction>,
    pub need_finalize: bool,
    /// Streaming pre-aggregation: reduce what fits, pass the rest through.
    pub is_streaming_preagg: bool,
    /// Planner estimate of the input row count, if any.
    pub estimated_input_cardinality: Option<i64>,
    pub limit: Option<usize>,
}

impl AggregateNode {
    pub fn new(node_id: i32, input_schema: SchemaRef) -> Self {
        Self {
            node_id,
            input_schema,
            group_by: Vec::new(),
            functions: Vec::new(),
            need_finalize: true,
            is_streaming_preagg: false,
            estimated_input_cardinality: None,
            limit: None,
        }
    }

    pub fn with_group_by(mut self, group_by: Vec<SlotRef>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_functions(mut self, functions: Vec<AggFunction>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_need_finalize(mut self, need_finalize: bool) -> Self {
        self.need_finalize = need_finalize;
        self
    }

    pub fn streaming(mut self, estimated_input_cardinality: Option<i64>) -> Self {
        self.is_streaming_preagg = true;
        self.need_finalize = false;
        self.estimated_input_cardinality = estimated_input_cardinality;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_grouping(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Validates the plan against its input and resolves every function.
    pub fn resolve_functions(&self) -> Result<Vec<Arc<dyn AggregateFunction>>, String> {
        if self.is_streaming_preagg && self.need_finalize {
            return Err("streaming pre-aggregation cannot finalize".to_string());
        }
        if self.is_streaming_preagg && !self.is_grouping() {
            return Err("streaming pre-aggregation requires grouping keys".to_string());
        }
        for slot in &self.group_by {
            slot.validate(&self.input_schema)?;
        }
        self.functions
            .iter()
            .map(|func| {
                if let Some(slot) = func.input.as_ref() {
                    slot.validate(&self.input_schema)?;
                }
                func.resolve()
                    .map_err(|e| format!("aggregate node {}: {e}", self.node_id))
            })
            .collect()
    }

    pub fn intermediate_schema(&self, functions: &[Arc<dyn AggregateFunction>]) -> SchemaRef {
        self.schema_with(functions, |f| f.intermediate_type())
    }

    pub fn output_schema(&self, functions: &[Arc<dyn AggregateFunction>]) -> SchemaRef {
        if self.need_finalize {
            self.schema_with(functions, |f| f.output_type())
        } else {
            self.intermediate_schema(functions)
        }
    }

    fn schema_with(
        &self,
        functions: &[Arc<dyn AggregateFunction>],
        column_type: impl Fn(&dyn AggregateFunction) -> DataType,
    ) -> SchemaRef {
        let mut fields = Vec::with_capacity(self.group_by.len() + functions.len());
        for slot in &self.group_by {
            let name = self.input_schema.field(slot.index).name().clone();
            fields.push(Field::new(name, slot.data_type.clone(), true));
        }
        for (idx, func) in functions.iter().enumerate() {
            let name = format!("{}_{}", func.name().trim_end_matches("(*)"), idx);
            fields.push(Field::new(name, column_type(func.as_ref()), true));
        }
        Arc::new(Schema::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;

    fn input() -> SchemaRef {
        nullable_schema([("k", DataType::Utf8), ("v", DataType::Int64)])
    }

    #[test]
    fn layouts_follow_finalize_flag() {
        let node = AggregateNode::new(1, input())
            .with_group_by(vec![SlotRef::new(0, DataType::Utf8)])
            .with_functions(vec![
                AggFunction::count_star(),
                AggFunction::new("avg", Some(SlotRef::new(1, DataType::Int64))),
            ]);
        let functions = node.resolve_functions().unwrap();
        let intermediate = node.intermediate_schema(&functions);
        assert_eq!(intermediate.fields().len(), 3);
        assert_eq!(intermediate.field(0).name(), "k");
        assert_eq!(intermediate.field(1).name(), "count_0");
        assert_eq!(intermediate.field(2).data_type(), &DataType::Binary);
        let output = node.output_schema(&functions);
        assert_eq!(output.field(2).data_type(), &DataType::Float64);

        let merge = node.functions[1].merge_of(2, DataType::Binary);
        assert!(merge.input_is_intermediate);
        assert_eq!(merge.resolve().unwrap().output_type(), DataType::Float64);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        let bad_slot = AggregateNode::new(1, input())
            .with_functions(vec![AggFunction::new("sum", Some(SlotRef::new(0, DataType::Int64)))]);
        assert!(bad_slot.resolve_functions().is_err());

        let ungrouped_streaming = AggregateNode::new(2, input())
            .with_functions(vec![AggFunction::count_star()])
            .streaming(None);
        assert!(ungrouped_streaming.resolve_functions().is_err());
    }
}
