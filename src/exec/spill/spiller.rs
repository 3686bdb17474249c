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
use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::common::config;
use crate::exec::row::Row;
use crate::exec::spill::block_manager::{BlockManager, BlockWriter, SpillFile};
use crate::exec::spill::dir_manager::DirManager;
use crate::exec::spill::ipc_serde::{EncodedMessage, IpcSerde, SpillCodec, schema_hash};
use crate::exec::spill::spill_stream::SpillStream;

#[derive(Debug, Clone)]
pub struct SpillStorageConfig {
    pub local_dirs: Vec<PathBuf>,
    pub block_size_bytes: u64,
    pub ipc_compression: SpillCodec,
}

impl SpillStorageConfig {
    pub fn from_app_config() -> Result<Self, String> {
        let local_dirs = config::spill_local_dirs()
            .into_iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        let ipc_compression = SpillCodec::parse(&config::spill_ipc_compression())?;
        Ok(Self {
            local_dirs,
            block_size_bytes: config::spill_block_size_bytes(),
            ipc_compression,
        })
    }

    /// Local storage rooted at a single directory, uncompressed.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dirs: vec![dir.into()],
            block_size_bytes: config::spill_block_size_bytes(),
            ipc_compression: SpillCodec::None,
        }
    }
}

/// Encodes row pages and places them into block files.
#[derive(Debug)]
pub struct Spiller {
    block_manager: BlockManager,
    ipc: IpcSerde,
}

pub type SpillerHandle = Arc<Spiller>;

impl Spiller {
    pub fn new_with_storage(storage: SpillStorageConfig) -> Result<Self, String> {
        let dir_manager = Arc::new(DirManager::new(storage.local_dirs)?);
        let block_manager = BlockManager::new(dir_manager, storage.block_size_bytes);
        let ipc = IpcSerde::new(storage.ipc_compression)?;
        Ok(Self { block_manager, ipc })
    }

    pub fn new_from_config() -> Result<Self, String> {
        Self::new_with_storage(SpillStorageConfig::from_app_config()?)
    }

    pub fn codec(&self) -> SpillCodec {
        self.ipc.codec()
    }

    pub fn block_size_bytes(&self) -> u64 {
        self.block_manager.block_size_bytes()
    }

    pub fn create_writer(&self, schema: &SchemaRef) -> Result<BlockWriter, String> {
        self.block_manager
            .create_writer(self.ipc.codec(), schema_hash(schema.as_ref()))
    }

    pub fn encode_rows(&self, schema: SchemaRef, rows: &[Row]) -> Result<EncodedMessage, String> {
        self.ipc.encode_rows(schema, rows)
    }

    pub fn open_stream(&self, schema: SchemaRef, file: &SpillFile) -> Result<SpillStream, String> {
        SpillStream::open(&file.path, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;
    use crate::exec::row::Datum;
    use arrow::datatypes::DataType;
    use tempfile::tempdir;

    fn page(start: i64, len: i64) -> Vec<Row> {
        (start..start + len)
            .map(|i| Row::new(vec![Datum::Int64(i), Datum::Utf8(format!("g{}", i % 3))]))
            .collect()
    }

    #[test]
    fn pages_roundtrip_through_block_file() {
        let schema = nullable_schema([("a", DataType::Int64), ("b", DataType::Utf8)]);
        let temp = tempdir().unwrap();
        let storage = SpillStorageConfig {
            local_dirs: vec![temp.path().to_path_buf()],
            block_size_bytes: 128 * 1024 * 1024,
            ipc_compression: SpillCodec::Lz4,
        };
        let spiller = Spiller::new_with_storage(storage).unwrap();

        let mut writer = spiller.create_writer(&schema).unwrap();
        writer
            .append(&spiller.encode_rows(schema.clone(), &page(0, 3)).unwrap())
            .unwrap();
        writer
            .append(&spiller.encode_rows(schema.clone(), &page(3, 2)).unwrap())
            .unwrap();
        let file = writer.finish().unwrap();
        assert_eq!(file.num_rows(), 5);

        let mut stream = spiller.open_stream(schema.clone(), &file).unwrap();
        assert_eq!(stream.remaining_messages(), 2);
        assert_eq!(stream.next_rows().unwrap().unwrap(), page(0, 3));
        assert_eq!(stream.next_rows().unwrap().unwrap(), page(3, 2));
        assert!(stream.next_rows().unwrap().is_none());
    }

    #[test]
    fn reading_with_another_layout_fails() {
        let schema = nullable_schema([("a", DataType::Int64), ("b", DataType::Utf8)]);
        let other = nullable_schema([("a", DataType::Float64)]);
        let temp = tempdir().unwrap();
        let spiller = Spiller::new_with_storage(SpillStorageConfig::in_dir(temp.path())).unwrap();
        let mut writer = spiller.create_writer(&schema).unwrap();
        writer
            .append(&spiller.encode_rows(schema, &page(0, 1)).unwrap())
            .unwrap();
        let file = writer.finish().unwrap();
        assert!(spiller.open_stream(other, &file).is_err());
    }
}
