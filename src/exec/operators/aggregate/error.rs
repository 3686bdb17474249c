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

/// Failures surfaced by the aggregation operator.
///
/// Memory pressure that can be relieved by spilling never appears here; only
/// conditions that abort the query do.
#[derive(Debug, Clone, PartialEq)]
pub enum AggError {
    /// The minimum buffer reservation could not be obtained.
    MemLimitTooLow {
        node_id: i32,
        required_buffers: i64,
        buffer_size: usize,
    },
    /// An aggregate function reported a failure.
    AggregateFunction { function: String, message: String },
    /// Repartitioning would exceed the maximum partition depth.
    MaxPartitionDepth {
        node_id: i32,
        level: usize,
        rows: u64,
    },
    /// Repartitioning a spilled partition did not split it: one child partition
    /// received every row and spilled again.
    RepartitionNoProgress {
        node_id: i32,
        level: usize,
        rows: u64,
    },
    Cancelled,
    Internal(String),
}

impl AggError {
    /// Severe key skew: the partition could not be split any further.
    pub fn is_depth_exhaustion(&self) -> bool {
        matches!(
            self,
            AggError::MaxPartitionDepth { .. } | AggError::RepartitionNoProgress { .. }
        )
    }

    pub(crate) fn function(function: &str, message: String) -> Self {
        AggError::AggregateFunction {
            function: function.to_string(),
            message,
        }
    }
}

impl fmt::Display for AggError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggError::MemLimitTooLow {
                node_id,
                required_buffers,
                buffer_size,
            } => write!(
                f,
                "memory limit too low for aggregation node {node_id}: \
                 requires {required_buffers} buffers of {buffer_size} bytes"
            ),
            AggError::AggregateFunction { function, message } => {
                write!(f, "aggregate function {function} failed: {message}")
            }
            AggError::MaxPartitionDepth {
                node_id,
                level,
                rows,
            } => write!(
                f,
                "aggregation node {node_id} cannot repartition {rows} rows: \
                 level {level} reaches the maximum partition depth"
            ),
            AggError::RepartitionNoProgress {
                node_id,
                level,
                rows,
            } => write!(
                f,
                "aggregation node {node_id} failed to split {rows} rows at level {level}; \
                 the grouping keys are too skewed"
            ),
            AggError::Cancelled => write!(f, "aggregation cancelled"),
            AggError::Internal(message) => write!(f, "aggregation internal error: {message}"),
        }
    }
}

impl std::error::Error for AggError {}

impl From<String> for AggError {
    fn from(message: String) -> Self {
        AggError::Internal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_classification() {
        let err = AggError::MemLimitTooLow {
            node_id: 3,
            required_buffers: 33,
            buffer_size: 1024,
        };
        assert!(err.to_string().contains("33 buffers of 1024 bytes"));
        assert!(!err.is_depth_exhaustion());
        assert!(
            AggError::RepartitionNoProgress {
                node_id: 1,
                level: 1,
                rows: 10
            }
            .is_depth_exhaustion()
        );
        let internal: AggError = "boom".to_string().into();
        assert_eq!(internal, AggError::Internal("boom".to_string()));
    }
}
