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
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::exec::spill::block_format::{
    BLOCK_HEADER_LEN, BlockHeader, BlockMeta, MESSAGE_INDEX_ENTRY_LEN, MessageIndexEntry,
    write_block_header, write_block_index,
};
use crate::exec::spill::dir_manager::DirManager;
use crate::exec::spill::ipc_serde::{EncodedMessage, SpillCodec};

const CREATE_RETRIES: usize = 3;

/// Allocates uniquely named block files across the spill directories.
#[derive(Debug)]
pub struct BlockManager {
    dir_manager: Arc<DirManager>,
    block_size_bytes: u64,
    next_id: AtomicU64,
    pid: u32,
}

impl BlockManager {
    pub fn new(dir_manager: Arc<DirManager>, block_size_bytes: u64) -> Self {
        Self {
            dir_manager,
            block_size_bytes,
            next_id: AtomicU64::new(0),
            pid: std::process::id(),
        }
    }

    pub fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes
    }

    fn create_block_file(&self) -> Result<(PathBuf, File), String> {
        let mut attempts = 0;
        loop {
            let dir = self.dir_manager.next_dir();
            let id = self.next_id.fetch_add(1, Ordering::AcqRel);
            let path = dir.join(format!("spill_{:x}_{:x}.ipc", self.pid, id));
            let file = OpenOptions::new()
                .create_new(true)
                .read(true)
                .write(true)
                .open(&path);
            match file {
                Ok(file) => return Ok((path, file)),
                Err(err)
                    if err.kind() == std::io::ErrorKind::AlreadyExists
                        && attempts < CREATE_RETRIES =>
                {
                    attempts += 1;
                }
                Err(err) => {
                    return Err(format!(
                        "create spill file {} failed: {err}",
                        path.display()
                    ));
                }
            }
        }
    }

    /// Opens a new block file with a placeholder header.
    pub fn create_writer(&self, codec: SpillCodec, schema_hash: u64) -> Result<BlockWriter, String> {
        let (path, mut file) = self.create_block_file()?;
        let header = BlockHeader::new(codec, schema_hash);
        if let Err(e) = write_block_header(&mut file, &header) {
            remove_spill_file(&path);
            return Err(e);
        }
        Ok(BlockWriter {
            path,
            file,
            header,
            index: Vec::new(),
            offset: BLOCK_HEADER_LEN as u64,
        })
    }
}

/// A block file being appended to. Messages are written as they arrive; the
/// index and final header go out in [`BlockWriter::finish`].
#[derive(Debug)]
pub struct BlockWriter {
    path: PathBuf,
    file: File,
    header: BlockHeader,
    index: Vec<MessageIndexEntry>,
    offset: u64,
}

impl BlockWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_messages(&self) -> usize {
        self.index.len()
    }

    /// Bytes the sealed block would occupy, index included.
    pub fn bytes_written(&self) -> u64 {
        self.offset + (self.index.len() * MESSAGE_INDEX_ENTRY_LEN) as u64
    }

    pub fn append(&mut self, encoded: &EncodedMessage) -> Result<(), String> {
        self.file
            .write_all(&encoded.bytes)
            .map_err(|e| format!("write spill message to {} failed: {e}", self.path.display()))?;
        let length = encoded.bytes.len() as u64;
        self.index.push(MessageIndexEntry {
            offset: self.offset,
            length,
            num_rows: encoded.num_rows,
            num_cols: encoded.num_cols,
        });
        self.offset = self
            .offset
            .checked_add(length)
            .ok_or_else(|| "spill block size overflow".to_string())?;
        Ok(())
    }

    /// Writes the message index, rewrites the header and returns the sealed block.
    pub fn finish(mut self) -> Result<SpillFile, String> {
        let index_offset = self.offset;
        write_block_index(&mut self.file, &self.index)?;
        self.header.num_messages = u32::try_from(self.index.len())
            .map_err(|_| "spill block message count overflows u32".to_string())?;
        self.header.index_offset = index_offset;
        self.header.index_length = (self.index.len() * MESSAGE_INDEX_ENTRY_LEN) as u64;

        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| format!("seek spill header failed: {e}"))?;
        write_block_header(&mut self.file, &self.header)?;
        self.file
            .flush()
            .map_err(|e| format!("flush spill file {} failed: {e}", self.path.display()))?;
        Ok(SpillFile {
            path: self.path,
            meta: BlockMeta {
                header: self.header,
                index: self.index,
            },
        })
    }

    /// Drops a partially written block and deletes its file.
    pub fn discard(self) {
        let path = self.path;
        drop(self.file);
        remove_spill_file(&path);
    }
}

/// A sealed block file on disk.
#[derive(Debug, Clone)]
pub struct SpillFile {
    pub path: PathBuf,
    pub meta: BlockMeta,
}

impl SpillFile {
    pub fn num_rows(&self) -> u64 {
        self.meta.num_rows()
    }

    pub fn size_bytes(&self) -> u64 {
        self.meta.header.index_offset + self.meta.header.index_length
    }

    pub fn remove(&self) {
        remove_spill_file(&self.path);
    }
}

fn remove_spill_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        crate::partagg_logging::warn!("remove spill file {} failed: {err}", path.display());
    }
}
