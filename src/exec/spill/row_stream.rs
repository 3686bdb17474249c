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
//! Append-only row stream backed by leased buffers and spill block files.
//!
//! A stream starts pinned: every row stays in memory, addressable by the index
//! returned from [`RowStream::push`], and each buffer-sized slice of row bytes
//! holds one buffer lease. Unpinning writes the rows out and from then on keeps
//! a single write page in memory; full pages are encoded as Arrow IPC messages
//! into block files. Reading replays the disk pages in write order followed by
//! the rows still in memory.

use std::collections::VecDeque;

use arrow::datatypes::SchemaRef;

use crate::exec::row::Row;
use crate::exec::spill::SpillProfile;
use crate::exec::spill::block_manager::{BlockWriter, SpillFile};
use crate::exec::spill::spill_stream::SpillStream;
use crate::exec::spill::spiller::SpillerHandle;
use crate::partagg_logging::debug;
use crate::runtime::buffer_pool::{Buffer, BufferPoolClient};
use crate::runtime::profile::ScopedTimer;

#[derive(Debug, Default)]
struct ReadCursor {
    next_file: usize,
    current: Option<SpillStream>,
    pending: VecDeque<Row>,
    mem_pos: usize,
}

#[derive(Debug)]
pub struct RowStream {
    label: String,
    schema: SchemaRef,
    client: BufferPoolClient,
    spiller: SpillerHandle,
    profile: Option<SpillProfile>,
    pinned: bool,
    rows: Vec<Row>,
    mem_bytes: usize,
    disk_bytes: usize,
    write_buffers: Vec<Buffer>,
    read_buffer: Option<Buffer>,
    num_rows: usize,
    writer: Option<BlockWriter>,
    files: Vec<SpillFile>,
    cursor: Option<ReadCursor>,
    closed: bool,
}

impl RowStream {
    pub fn new(
        label: impl Into<String>,
        schema: SchemaRef,
        client: BufferPoolClient,
        spiller: SpillerHandle,
        profile: Option<SpillProfile>,
    ) -> Self {
        Self {
            label: label.into(),
            schema,
            client,
            spiller,
            profile,
            pinned: true,
            rows: Vec::new(),
            mem_bytes: 0,
            disk_bytes: 0,
            write_buffers: Vec::new(),
            read_buffer: None,
            num_rows: 0,
            writer: None,
            files: Vec::new(),
            cursor: None,
            closed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Rows appended over the lifetime of the stream.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Bytes of leased buffers currently held for this stream.
    pub fn bytes_in_mem(&self) -> usize {
        let buffers = self.write_buffers.len() + usize::from(self.read_buffer.is_some());
        buffers * self.client.buffer_size()
    }

    /// Leases the write page up front. Returns false when no buffer is available.
    pub fn prepare_for_write(&mut self) -> Result<bool, String> {
        self.ensure_open()?;
        if !self.write_buffers.is_empty() {
            return Ok(true);
        }
        match self.client.try_acquire() {
            Some(buffer) => {
                self.write_buffers.push(buffer);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Makes room for a row of `bytes`. Returns false when a buffer is needed and
    /// none can be leased; the stream is left unchanged in that case.
    pub fn try_reserve(&mut self, bytes: usize) -> Result<bool, String> {
        self.ensure_open()?;
        let buffer_size = self.client.buffer_size();
        if self.pinned {
            while self.mem_bytes + bytes > self.write_buffers.len() * buffer_size {
                match self.client.try_acquire() {
                    Some(buffer) => self.write_buffers.push(buffer),
                    None => return Ok(false),
                }
            }
            return Ok(true);
        }
        if !self.rows.is_empty() && self.mem_bytes + bytes > buffer_size {
            self.flush_page()?;
        }
        self.prepare_for_write()
    }

    /// Appends a row after a successful [`RowStream::try_reserve`]. The returned
    /// index addresses the row while the stream stays pinned.
    pub fn push(&mut self, row: Row) -> usize {
        self.mem_bytes += row.estimated_bytes();
        self.rows.push(row);
        self.num_rows += 1;
        self.rows.len() - 1
    }

    pub fn row(&self, idx: usize) -> Option<&Row> {
        debug_assert!(self.pinned, "row access on unpinned stream {}", self.label);
        self.rows.get(idx)
    }

    pub fn row_mut(&mut self, idx: usize) -> Option<&mut Row> {
        debug_assert!(self.pinned, "row access on unpinned stream {}", self.label);
        self.rows.get_mut(idx)
    }

    /// Moves a row out, leaving an empty row behind. Used when emitting results.
    pub fn take_row(&mut self, idx: usize) -> Option<Row> {
        self.rows.get_mut(idx).map(std::mem::take)
    }

    /// Writes all in-memory rows to disk and keeps at most one write page.
    pub fn unpin(&mut self) -> Result<(), String> {
        self.ensure_open()?;
        if !self.pinned {
            return Ok(());
        }
        self.pinned = false;
        self.flush_page()?;
        self.write_buffers.truncate(1);
        debug!(
            "row stream {} unpinned: rows={} files={}",
            self.label,
            self.num_rows,
            self.files.len()
        );
        Ok(())
    }

    /// Finishes writing: flushes the write page, seals the open block and
    /// returns every buffer.
    pub fn seal(&mut self) -> Result<(), String> {
        self.ensure_open()?;
        if !self.pinned {
            self.flush_page()?;
        }
        self.finish_block()?;
        self.write_buffers.clear();
        Ok(())
    }

    /// Positions the read cursor at the first row. Returns false when the
    /// stream has disk data and no read buffer can be leased.
    pub fn prepare_for_read(&mut self) -> Result<bool, String> {
        self.ensure_open()?;
        if !self.pinned {
            self.flush_page()?;
        }
        self.finish_block()?;
        if !self.files.is_empty() && self.read_buffer.is_none() {
            match self.client.try_acquire() {
                Some(buffer) => self.read_buffer = Some(buffer),
                None => return Ok(false),
            }
        }
        self.cursor = Some(ReadCursor::default());
        Ok(true)
    }

    /// Next run of at most `max_rows` rows in append order. Calling
    /// [`RowStream::prepare_for_read`] again restarts from the first row.
    pub fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>, String> {
        self.ensure_open()?;
        let max_rows = max_rows.max(1);
        let mut cursor = self
            .cursor
            .take()
            .ok_or_else(|| format!("row stream {} is not prepared for read", self.label))?;
        let result = self.read_from(&mut cursor, max_rows);
        self.cursor = Some(cursor);
        result
    }

    fn read_from(
        &mut self,
        cursor: &mut ReadCursor,
        max_rows: usize,
    ) -> Result<Option<Vec<Row>>, String> {
        loop {
            if !cursor.pending.is_empty() {
                let n = max_rows.min(cursor.pending.len());
                return Ok(Some(cursor.pending.drain(..n).collect()));
            }
            if let Some(stream) = cursor.current.as_mut() {
                let _timer = self
                    .profile
                    .as_ref()
                    .map(|p| ScopedTimer::new(p.restore_time.clone()));
                match stream.next_rows()? {
                    Some(rows) => {
                        if let Some(profile) = self.profile.as_ref() {
                            profile.restore_rows.add(rows.len() as i64);
                        }
                        cursor.pending.extend(rows);
                    }
                    None => cursor.current = None,
                }
                continue;
            }
            if let Some(file) = self.files.get(cursor.next_file) {
                cursor.current = Some(self.spiller.open_stream(self.schema.clone(), file)?);
                cursor.next_file += 1;
                continue;
            }
            if cursor.mem_pos < self.rows.len() {
                let end = (cursor.mem_pos + max_rows).min(self.rows.len());
                let batch = self.rows[cursor.mem_pos..end].to_vec();
                cursor.mem_pos = end;
                return Ok(Some(batch));
            }
            return Ok(None);
        }
    }

    /// Reads every spilled row back into leased buffers and makes rows
    /// addressable again. The buffers are leased before any file is read;
    /// returns false, leaving the stream unpinned, when they cannot be.
    pub fn pin(&mut self) -> Result<bool, String> {
        self.ensure_open()?;
        if self.pinned {
            return Ok(true);
        }
        self.flush_page()?;
        self.finish_block()?;
        let bytes = self.disk_bytes;
        let needed = bytes.div_ceil(self.client.buffer_size());
        let held = self.write_buffers.len();
        while self.write_buffers.len() < needed {
            match self.client.try_acquire() {
                Some(buffer) => self.write_buffers.push(buffer),
                None => {
                    self.write_buffers.truncate(held);
                    return Ok(false);
                }
            }
        }
        let mut rows = Vec::with_capacity(self.num_rows);
        for file in &self.files {
            let mut stream = self.spiller.open_stream(self.schema.clone(), file)?;
            while let Some(page) = stream.next_rows()? {
                rows.extend(page);
            }
        }
        if let Some(profile) = self.profile.as_ref() {
            profile.restore_rows.add(rows.len() as i64);
        }
        for file in self.files.drain(..) {
            file.remove();
        }
        self.read_buffer = None;
        self.cursor = None;
        self.rows = rows;
        self.mem_bytes = bytes;
        self.disk_bytes = 0;
        self.pinned = true;
        Ok(true)
    }

    /// Releases all memory and deletes the stream's block files.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cursor = None;
        self.rows = Vec::new();
        self.mem_bytes = 0;
        self.disk_bytes = 0;
        self.write_buffers.clear();
        self.read_buffer = None;
        if let Some(writer) = self.writer.take() {
            writer.discard();
        }
        for file in self.files.drain(..) {
            file.remove();
        }
    }

    fn ensure_open(&self) -> Result<(), String> {
        if self.closed {
            return Err(format!("row stream {} is closed", self.label));
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), String> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let _timer = self
            .profile
            .as_ref()
            .map(|p| ScopedTimer::new(p.spill_time.clone()));
        let buffer_size = self.client.buffer_size();
        let rows = std::mem::take(&mut self.rows);
        let mut start = 0;
        while start < rows.len() {
            let mut end = start;
            let mut page_bytes = 0;
            while end < rows.len() {
                let bytes = rows[end].estimated_bytes();
                if end > start && page_bytes + bytes > buffer_size {
                    break;
                }
                page_bytes += bytes;
                end += 1;
            }
            self.write_page(&rows[start..end])?;
            self.disk_bytes += page_bytes;
            start = end;
        }
        self.mem_bytes = 0;
        Ok(())
    }

    fn write_page(&mut self, rows: &[Row]) -> Result<(), String> {
        let encoded = self.spiller.encode_rows(self.schema.clone(), rows)?;
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => self.writer.insert(self.spiller.create_writer(&self.schema)?),
        };
        writer.append(&encoded)?;
        let roll_over = writer.bytes_written() >= self.spiller.block_size_bytes();
        if let Some(profile) = self.profile.as_ref() {
            profile.spill_rows.add(rows.len() as i64);
            profile.spill_bytes.add(encoded.bytes.len() as i64);
        }
        if roll_over {
            self.finish_block()?;
        }
        Ok(())
    }

    fn finish_block(&mut self) -> Result<(), String> {
        if let Some(writer) = self.writer.take() {
            let file = writer.finish()?;
            if let Some(profile) = self.profile.as_ref() {
                profile.spill_block_count.add(1);
            }
            self.files.push(file);
        }
        Ok(())
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.close();
    }
}
