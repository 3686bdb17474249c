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
//! On-disk layout of one spill block file.
//!
//! ```text
//! [header: 40 bytes][ipc message 0][ipc message 1]...[index: 32 bytes per message]
//! ```
//! The header is written as a placeholder when the block is created and
//! rewritten with the final message count and index location when the block is
//! sealed. All integers are little endian.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::exec::spill::ipc_serde::SpillCodec;

const BLOCK_MAGIC: [u8; 4] = *b"SPIL";
const BLOCK_VERSION: u16 = 1;
pub const BLOCK_HEADER_LEN: usize = 40;
pub const MESSAGE_INDEX_ENTRY_LEN: usize = 32;

/// Little-endian field reader over a fixed-size byte slice.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self, what: &str) -> Result<[u8; N], String> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| format!("spill block truncated while reading {what}"))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8, String> {
        Ok(self.take::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, String> {
        Ok(u16::from_le_bytes(self.take(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, String> {
        Ok(u32::from_le_bytes(self.take(what)?))
    }

    fn u64(&mut self, what: &str) -> Result<u64, String> {
        Ok(u64::from_le_bytes(self.take(what)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub codec: SpillCodec,
    pub num_messages: u32,
    pub index_offset: u64,
    pub index_length: u64,
    pub schema_hash: u64,
}

impl BlockHeader {
    pub fn new(codec: SpillCodec, schema_hash: u64) -> Self {
        Self {
            codec,
            num_messages: 0,
            index_offset: 0,
            index_length: 0,
            schema_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut buf = [0u8; BLOCK_HEADER_LEN];
        buf[..4].copy_from_slice(&BLOCK_MAGIC);
        buf[4..6].copy_from_slice(&BLOCK_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&(BLOCK_HEADER_LEN as u16).to_le_bytes());
        buf[8] = self.codec.as_u8();
        // bytes 9..12 reserved
        buf[12..16].copy_from_slice(&self.num_messages.to_le_bytes());
        buf[16..24].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_length.to_le_bytes());
        buf[32..40].copy_from_slice(&self.schema_hash.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, String> {
        let mut r = FieldReader::new(buf);
        if r.take::<4>("magic")? != BLOCK_MAGIC {
            return Err("spill block header magic mismatch".to_string());
        }
        let version = r.u16("version")?;
        if version != BLOCK_VERSION {
            return Err(format!("unsupported spill block version: {version}"));
        }
        let header_len = r.u16("header length")?;
        if header_len as usize != BLOCK_HEADER_LEN {
            return Err(format!(
                "unsupported spill block header length: {header_len}"
            ));
        }
        let codec = SpillCodec::try_from(r.u8("codec")?)?;
        if r.take::<3>("reserved")? != [0u8; 3] {
            return Err("spill block header reserved bytes must be 0".to_string());
        }
        Ok(Self {
            codec,
            num_messages: r.u32("message count")?,
            index_offset: r.u64("index offset")?,
            index_length: r.u64("index length")?,
            schema_hash: r.u64("schema hash")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageIndexEntry {
    pub offset: u64,
    pub length: u64,
    pub num_rows: u32,
    pub num_cols: u16,
}

impl MessageIndexEntry {
    pub fn to_bytes(&self) -> [u8; MESSAGE_INDEX_ENTRY_LEN] {
        let mut buf = [0u8; MESSAGE_INDEX_ENTRY_LEN];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_rows.to_le_bytes());
        buf[20..22].copy_from_slice(&self.num_cols.to_le_bytes());
        // bytes 22..32 reserved
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, String> {
        let mut r = FieldReader::new(buf);
        let entry = Self {
            offset: r.u64("message offset")?,
            length: r.u64("message length")?,
            num_rows: r.u32("message rows")?,
            num_cols: r.u16("message columns")?,
        };
        if r.take::<10>("reserved")? != [0u8; 10] {
            return Err("spill message index reserved bytes must be 0".to_string());
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub header: BlockHeader,
    pub index: Vec<MessageIndexEntry>,
}

impl BlockMeta {
    pub fn num_rows(&self) -> u64 {
        self.index.iter().map(|e| e.num_rows as u64).sum()
    }
}

pub fn write_block_header<W: Write>(writer: &mut W, header: &BlockHeader) -> Result<(), String> {
    writer
        .write_all(&header.to_bytes())
        .map_err(|e| format!("write spill block header failed: {e}"))
}

pub fn read_block_header<R: Read>(reader: &mut R) -> Result<BlockHeader, String> {
    let mut buf = [0u8; BLOCK_HEADER_LEN];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("read spill block header failed: {e}"))?;
    BlockHeader::from_bytes(&buf)
}

pub fn write_block_index<W: Write>(
    writer: &mut W,
    entries: &[MessageIndexEntry],
) -> Result<(), String> {
    for entry in entries {
        writer
            .write_all(&entry.to_bytes())
            .map_err(|e| format!("write spill block index failed: {e}"))?;
    }
    Ok(())
}

pub fn read_block_index<R: Read + Seek>(
    reader: &mut R,
    header: &BlockHeader,
) -> Result<Vec<MessageIndexEntry>, String> {
    if header.index_length % MESSAGE_INDEX_ENTRY_LEN as u64 != 0 {
        return Err("spill block index length is not aligned".to_string());
    }
    let entry_count = (header.index_length / MESSAGE_INDEX_ENTRY_LEN as u64) as usize;
    if entry_count != header.num_messages as usize {
        return Err(format!(
            "spill block index holds {entry_count} entries, header says {}",
            header.num_messages
        ));
    }
    if entry_count == 0 {
        return Ok(Vec::new());
    }
    reader
        .seek(SeekFrom::Start(header.index_offset))
        .map_err(|e| format!("seek to spill block index failed: {e}"))?;
    let mut entries = Vec::with_capacity(entry_count);
    let mut buf = [0u8; MESSAGE_INDEX_ENTRY_LEN];
    for _ in 0..entry_count {
        reader
            .read_exact(&mut buf)
            .map_err(|e| format!("read spill block index entry failed: {e}"))?;
        entries.push(MessageIndexEntry::from_bytes(&buf)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_and_index_survive_encoding() {
        let header = BlockHeader {
            codec: SpillCodec::Lz4,
            num_messages: 2,
            index_offset: 1000,
            index_length: 64,
            schema_hash: 0xdead_beef,
        };
        assert_eq!(BlockHeader::from_bytes(&header.to_bytes()).unwrap(), header);

        let entries = vec![
            MessageIndexEntry {
                offset: 40,
                length: 500,
                num_rows: 10,
                num_cols: 3,
            },
            MessageIndexEntry {
                offset: 540,
                length: 460,
                num_rows: 7,
                num_cols: 3,
            },
        ];
        let mut file = vec![0u8; 1000];
        write_block_index(&mut file, &entries).unwrap();
        let read = read_block_index(&mut Cursor::new(file), &header).unwrap();
        assert_eq!(read, entries);
        let meta = BlockMeta {
            header,
            index: read,
        };
        assert_eq!(meta.num_rows(), 17);
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let mut bytes = BlockHeader::new(SpillCodec::None, 1).to_bytes();
        bytes[0] = b'X';
        assert!(BlockHeader::from_bytes(&bytes).is_err());
        assert!(BlockHeader::from_bytes(&bytes[..10]).is_err());

        let mut bytes = BlockHeader::new(SpillCodec::None, 1).to_bytes();
        bytes[10] = 1;
        assert!(BlockHeader::from_bytes(&bytes).is_err());
    }
}
