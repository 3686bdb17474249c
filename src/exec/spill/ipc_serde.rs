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
//! Arrow IPC encoding of spilled row pages.
//!
//! Each page of rows becomes one self-contained IPC record-batch message
//! (metadata + body, no schema message); the reader supplies the schema, which
//! is checked against the hash stored in the block header.

use std::fmt;

use arrow::array::RecordBatch;
use arrow::buffer::Buffer;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileDecoder;
use arrow::ipc::writer::{
    CompressionContext, DictionaryTracker, EncodedData, IpcDataGenerator, IpcWriteOptions,
    write_message,
};
use arrow::ipc::{Block, CompressionType, MetadataVersion};

use crate::exec::chunk::Chunk;
use crate::exec::row::Row;

const IPC_ALIGNMENT: usize = 64;
const CONTINUATION_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpillCodec {
    None,
    Lz4,
    Zstd,
}

impl SpillCodec {
    pub fn as_u8(self) -> u8 {
        match self {
            SpillCodec::None => 0,
            SpillCodec::Lz4 => 1,
            SpillCodec::Zstd => 2,
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SpillCodec::None),
            "lz4" => Ok(SpillCodec::Lz4),
            "zstd" => Ok(SpillCodec::Zstd),
            _ => Err(format!("unsupported spill ipc compression: {value}")),
        }
    }

    fn compression(self) -> Option<CompressionType> {
        match self {
            SpillCodec::None => None,
            SpillCodec::Lz4 => Some(CompressionType::LZ4_FRAME),
            SpillCodec::Zstd => Some(CompressionType::ZSTD),
        }
    }
}

impl TryFrom<u8> for SpillCodec {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SpillCodec::None),
            1 => Ok(SpillCodec::Lz4),
            2 => Ok(SpillCodec::Zstd),
            _ => Err(format!("unknown spill codec value: {value}")),
        }
    }
}

impl fmt::Display for SpillCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpillCodec::None => write!(f, "none"),
            SpillCodec::Lz4 => write!(f, "lz4"),
            SpillCodec::Zstd => write!(f, "zstd"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedMessage {
    pub bytes: Vec<u8>,
    pub num_rows: u32,
    pub num_cols: u16,
}

#[derive(Debug, Clone)]
pub struct IpcSerde {
    codec: SpillCodec,
    write_options: IpcWriteOptions,
}

impl IpcSerde {
    pub fn new(codec: SpillCodec) -> Result<Self, String> {
        let options = IpcWriteOptions::try_new(IPC_ALIGNMENT, false, MetadataVersion::V5)
            .map_err(map_arrow_err)?;
        let write_options = options
            .try_with_compression(codec.compression())
            .map_err(map_arrow_err)?;
        Ok(Self {
            codec,
            write_options,
        })
    }

    pub fn codec(&self) -> SpillCodec {
        self.codec
    }

    pub fn encode_rows(&self, schema: SchemaRef, rows: &[Row]) -> Result<EncodedMessage, String> {
        let chunk = Chunk::from_rows(schema, rows)?;
        self.encode_record_batch(&chunk.batch)
    }

    pub fn decode_rows(&self, schema: SchemaRef, message: &[u8]) -> Result<Vec<Row>, String> {
        let batch = self.decode_record_batch(schema, message)?;
        Chunk::try_new(batch)?.to_rows()
    }

    pub fn encode_record_batch(&self, batch: &RecordBatch) -> Result<EncodedMessage, String> {
        let data_gen = IpcDataGenerator::default();
        let mut dictionary_tracker = DictionaryTracker::new(false);
        let mut compression_context = CompressionContext::default();
        let (encoded_dictionaries, encoded_message) = data_gen
            .encode(
                batch,
                &mut dictionary_tracker,
                &self.write_options,
                &mut compression_context,
            )
            .map_err(map_arrow_err)?;
        if !encoded_dictionaries.is_empty() {
            return Err("dictionary batch messages are not supported in spill IPC".to_string());
        }

        let bytes = write_encoded_message(encoded_message, &self.write_options)?;
        let num_rows = u32::try_from(batch.num_rows())
            .map_err(|_| "record batch row count overflows u32".to_string())?;
        let num_cols = u16::try_from(batch.num_columns())
            .map_err(|_| "record batch column count overflows u16".to_string())?;
        Ok(EncodedMessage {
            bytes,
            num_rows,
            num_cols,
        })
    }

    pub fn decode_record_batch(
        &self,
        schema: SchemaRef,
        message: &[u8],
    ) -> Result<RecordBatch, String> {
        let metadata_len = ipc_metadata_len(message)?;
        if metadata_len > message.len() {
            return Err("ipc message metadata length exceeds buffer size".to_string());
        }
        let body_len = message.len() - metadata_len;
        let block = Block::new(0, metadata_len as i32, body_len as i64);
        let buffer = Buffer::from(message.to_vec());
        FileDecoder::new(schema, MetadataVersion::V5)
            .read_record_batch(&block, &buffer)
            .map_err(map_arrow_err)?
            .ok_or_else(|| "ipc message did not contain a record batch".to_string())
    }
}

/// FNV-1a over the schema's display form; guards against reading a block with
/// the wrong row layout.
pub fn schema_hash(schema: &Schema) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    schema
        .to_string()
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

fn write_encoded_message(
    encoded: EncodedData,
    options: &IpcWriteOptions,
) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let (meta, body) = write_message(&mut buffer, encoded, options).map_err(map_arrow_err)?;
    let total = meta + body;
    if buffer.len() != total {
        return Err(format!(
            "ipc encoded message length mismatch: expected {total} bytes, got {}",
            buffer.len()
        ));
    }
    Ok(buffer)
}

fn read_i32_le(bytes: &[u8]) -> Result<i32, String> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| "ipc message is too small to contain a header".to_string())?;
    Ok(i32::from_le_bytes(raw))
}

fn ipc_metadata_len(message: &[u8]) -> Result<usize, String> {
    let (prefix_size, meta_len) = if message.len() >= 8 && message[..4] == CONTINUATION_MARKER {
        (8usize, read_i32_le(&message[4..])?)
    } else {
        (4usize, read_i32_le(message)?)
    };
    if meta_len < 0 {
        return Err("ipc message has negative metadata length".to_string());
    }
    let raw = prefix_size
        .checked_add(meta_len as usize)
        .ok_or_else(|| "ipc metadata length overflow".to_string())?;
    Ok(raw.div_ceil(IPC_ALIGNMENT) * IPC_ALIGNMENT)
}

fn map_arrow_err(err: ArrowError) -> String {
    format!("arrow ipc error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::chunk::nullable_schema;
    use crate::exec::row::Datum;
    use arrow::datatypes::DataType;

    fn rows() -> Vec<Row> {
        (0..50)
            .map(|i| {
                Row::new(vec![
                    Datum::Int64(i),
                    if i % 7 == 0 {
                        Datum::Null
                    } else {
                        Datum::Utf8(format!("value-{i}"))
                    },
                ])
            })
            .collect()
    }

    #[test]
    fn encoded_pages_decode_with_every_codec() {
        let schema = nullable_schema([("k", DataType::Int64), ("v", DataType::Utf8)]);
        for codec in [SpillCodec::None, SpillCodec::Lz4, SpillCodec::Zstd] {
            let serde = IpcSerde::new(codec).unwrap();
            let encoded = serde.encode_rows(schema.clone(), &rows()).unwrap();
            assert_eq!(encoded.num_rows, 50);
            assert_eq!(encoded.num_cols, 2);
            let decoded = serde.decode_rows(schema.clone(), &encoded.bytes).unwrap();
            assert_eq!(decoded, rows(), "codec {codec}");
        }
    }

    #[test]
    fn codec_names_parse() {
        assert_eq!(SpillCodec::parse(" LZ4 ").unwrap(), SpillCodec::Lz4);
        assert!(SpillCodec::parse("snappy").is_err());
        assert_eq!(SpillCodec::try_from(2).unwrap(), SpillCodec::Zstd);
    }

    #[test]
    fn schema_hash_tracks_layout() {
        let a = nullable_schema([("k", DataType::Int64)]);
        let b = nullable_schema([("k", DataType::Utf8)]);
        assert_ne!(schema_hash(&a), schema_hash(&b));
        assert_eq!(schema_hash(&a), schema_hash(&a.as_ref().clone()));
    }
}
