//! Read and write [MCAP](https://mcap.dev) files: a self-contained, append-only container for
//! heterogeneous timestamped messages, their schemas, attachments and metadata.
//!
//! This crate covers the on-wire format itself: [`records`] and [`chunk`] implement byte-exact
//! (de)serialization, [`read::StreamReader`] replays a file in the order records appear on disk,
//! [`indexed::IndexedReader`] replays it in log-time order using the trailing summary/index, and
//! [`writer::Writer`] produces spec-valid files. Message payloads are opaque bytes to this
//! crate; interpreting them (ROS, protobuf, JSON, ...) is left to the caller.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod channels;
pub mod chunk;
pub mod error;
pub mod indexed;
pub mod io_utils;
pub mod lexer;
pub mod read;
pub mod records;
pub mod writer;

pub use chunk::Compression;
pub use error::{McapError, McapResult};
pub use indexed::{IndexedReader, Summary};
pub use read::{ReadOptions, StreamReader};
pub use writer::{WriteOptions, Writer};

/// The fixed 8-byte sequence that opens and closes every MCAP file.
pub const MAGIC: [u8; 8] = [0x89, b'M', b'C', b'A', b'P', 0x30, b'\r', b'\n'];

/// A message type, identified by a nonzero ID and described by an encoding-specific blob
/// (protobuf `FileDescriptorSet`, JSON Schema, ROS message definition, ...).
///
/// `data` is opaque to this crate; it's handed back verbatim to whoever decodes messages on a
/// channel that references this schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema<'a> {
    pub id: u16,
    pub name: String,
    pub encoding: String,
    pub data: Cow<'a, [u8]>,
}

/// A topic bound to a message encoding and, optionally, a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel<'a> {
    pub id: u16,
    pub schema: Option<Arc<Schema<'a>>>,
    pub topic: String,
    pub message_encoding: String,
    pub metadata: BTreeMap<String, String>,
}

/// One timestamped message on a [`Channel`].
///
/// `data` is opaque to this crate and interpreted according to the channel's
/// `message_encoding` and schema.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    pub channel: Arc<Channel<'a>>,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
    pub data: Cow<'a, [u8]>,
}

/// An opaque blob attached to the file outside of any channel (e.g. a calibration file, a video).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<'a> {
    pub log_time: u64,
    pub create_time: u64,
    pub name: String,
    pub content_type: String,
    pub data: Cow<'a, [u8]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// End-to-end scenario 2 from the format's testable properties: three messages on one
    /// chunked, LZ4-compressed channel, read back both fully and through a time window.
    #[test]
    fn three_messages_chunked_lz4_round_trip() {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(
                std::io::Cursor::new(&mut buf),
                WriteOptions::new()
                    .chunk_size(1)
                    .compression(Some(Compression::Lz4))
                    .include_crc(true),
            )
            .unwrap();
            let schema_id = writer.add_schema("S", "proto", b"x").unwrap();
            let channel_id = writer
                .add_channel(schema_id, "/t", "proto", &BTreeMap::new())
                .unwrap();
            for (seq, t) in [(1u32, 10u64), (2, 11), (3, 12)] {
                writer
                    .write_to_known_channel(
                        &records::MessageHeader {
                            channel_id,
                            sequence: seq,
                            log_time: t,
                            publish_time: t,
                        },
                        b"x",
                    )
                    .unwrap();
            }
            writer.close().unwrap();
        }

        let mut reader = IndexedReader::new(std::io::Cursor::new(buf)).unwrap();
        let topics = HashSet::new();
        let windowed = reader.read_messages(&topics, 11, 12).unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].1.sequence, 2);

        let all = reader.read_messages(&topics, 0, 100).unwrap();
        let seqs: Vec<_> = all.iter().map(|(_, m)| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn empty_file_round_trips() {
        let mut buf = Vec::new();
        {
            let mut writer =
                Writer::new(std::io::Cursor::new(&mut buf), WriteOptions::new().profile("ros1"))
                    .unwrap();
            writer.close().unwrap();
        }

        let reader = StreamReader::new(std::io::Cursor::new(buf.clone()));
        let messages: Vec<_> = reader.collect::<McapResult<Vec<_>>>().unwrap();
        assert!(messages.is_empty());

        let mut indexed = IndexedReader::new(std::io::Cursor::new(buf)).unwrap();
        let got = indexed.read_messages(&HashSet::new(), 0, u64::MAX).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn byte_identical_on_repeated_writes() {
        let make = || {
            let mut buf = Vec::new();
            let mut writer = Writer::new(
                std::io::Cursor::new(&mut buf),
                WriteOptions::new()
                    .chunk_size(1024)
                    .compression(Some(Compression::Lz4))
                    .include_crc(true),
            )
            .unwrap();
            let schema_id = writer.add_schema("S", "proto", b"x").unwrap();
            let channel_id = writer
                .add_channel(schema_id, "/t", "proto", &BTreeMap::new())
                .unwrap();
            for (seq, t) in [(1u32, 10u64), (2, 11)] {
                writer
                    .write_to_known_channel(
                        &records::MessageHeader {
                            channel_id,
                            sequence: seq,
                            log_time: t,
                            publish_time: t,
                        },
                        b"x",
                    )
                    .unwrap();
            }
            writer.close().unwrap();
            buf
        };
        assert_eq!(make(), make());
    }
}
