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
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use arrow::datatypes::{Schema, SchemaRef};

use crate::exec::row::Row;
use crate::exec::spill::block_format::{
    BlockHeader, MessageIndexEntry, read_block_header, read_block_index,
};
use crate::exec::spill::ipc_serde::{IpcSerde, schema_hash};

/// Sequential reader over the messages of one sealed block file.
#[derive(Debug)]
pub struct SpillStream {
    file: File,
    schema: SchemaRef,
    index: Vec<MessageIndexEntry>,
    position: usize,
    ipc: IpcSerde,
}

impl SpillStream {
    pub fn open(path: impl AsRef<Path>, schema: SchemaRef) -> Result<Self, String> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| format!("open spill file {} failed: {e}", path.display()))?;
        let header = read_block_header(&mut file)?;
        validate_schema_hash(&header, schema.as_ref())?;
        let index = read_block_index(&mut file, &header)?;
        let ipc = IpcSerde::new(header.codec)?;
        Ok(Self {
            file,
            schema,
            index,
            position: 0,
            ipc,
        })
    }

    pub fn remaining_messages(&self) -> usize {
        self.index.len() - self.position
    }

    /// Decodes the next message, or `None` once the block is exhausted.
    pub fn next_rows(&mut self) -> Result<Option<Vec<Row>>, String> {
        let Some(entry) = self.index.get(self.position) else {
            return Ok(None);
        };
        let length = usize::try_from(entry.length)
            .map_err(|_| "spill message length overflows usize".to_string())?;
        let offset = entry.offset;
        self.position += 1;

        let mut buf = vec![0u8; length];
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| format!("seek spill message failed: {e}"))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| format!("read spill message failed: {e}"))?;
        self.ipc.decode_rows(self.schema.clone(), &buf).map(Some)
    }
}

fn validate_schema_hash(header: &BlockHeader, schema: &Schema) -> Result<(), String> {
    if header.schema_hash != schema_hash(schema) {
        return Err("spill schema hash mismatch".to_string());
    }
    Ok(())
}
