//! The writer (C7): produces a spec-valid MCAP file by interleaving records into a data section,
//! accumulating chunks and their message indexes, and closing out with a summary, summary-offset
//! table and footer.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{self, Write};

use bimap::BiHashMap;
use binrw::BinWrite;
use byteorder::{WriteBytesExt, LE};
use crc32fast::Hasher;

use crate::chunk::{Compression, Compressor};
use crate::error::{McapError, McapResult};
use crate::io_utils::{CountingCrcWriter, CountingWriter};
use crate::records::{
    self, op, write_record, AttachmentHeader, AttachmentIndex, ChunkHeader, ChunkIndex, DataEnd,
    Header, MessageHeader, MessageIndex, MessageIndexEntry, Metadata, MetadataIndex, Record,
    Statistics, SummaryOffset,
};
use crate::{Attachment, Message, MAGIC};

/// Options controlling how a [`Writer`] lays out the file it produces.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    profile: String,
    library: String,
    chunked: bool,
    chunk_size: u64,
    compression: Option<Compression>,
    include_crc: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            profile: String::new(),
            library: concat!("mcap-rs-", env!("CARGO_PKG_VERSION")).to_string(),
            chunked: true,
            chunk_size: 1024 * 768,
            #[cfg(feature = "zstd")]
            compression: Some(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            compression: None,
            include_crc: true,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The profile recorded in the file's `Header`.
    pub fn profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = profile.into();
        self
    }

    /// Whether Schema/Channel/Message records are accumulated into chunks (`true`, the default)
    /// or written directly to the data section (`false`).
    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    /// Target uncompressed size of a chunk. After writing a message, if the current chunk's
    /// uncompressed size exceeds this, the chunk is flushed.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Compression applied to chunk payloads. `None` stores chunks uncompressed.
    pub fn compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    /// Whether to compute and emit chunk and summary CRCs.
    pub fn include_crc(mut self, include_crc: bool) -> Self {
        self.include_crc = include_crc;
        self
    }
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct SchemaKey {
    name: String,
    encoding: String,
    data: Vec<u8>,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct ChannelKey {
    topic: String,
    schema_id: u16,
    message_encoding: String,
    metadata: BTreeMap<String, String>,
}

/// Accumulates one open chunk's uncompressed bytes (for CRC purposes), compressed bytes, and
/// per-channel message index, per the writer's chunk-flushing protocol.
struct ChunkAccumulator {
    uncompressed: CountingCrcWriter<Compressor>,
    indexes: BTreeMap<u16, Vec<MessageIndexEntry>>,
    start_time: u64,
    end_time: u64,
}

impl ChunkAccumulator {
    fn new(compression: Option<Compression>) -> McapResult<Self> {
        Ok(Self {
            uncompressed: CountingCrcWriter::new(Compressor::new(compression)?),
            indexes: BTreeMap::new(),
            start_time: u64::MAX,
            end_time: 0,
        })
    }

    fn is_empty(&self) -> bool {
        self.uncompressed.position() == 0
    }
}

/// Produces a spec-valid MCAP file on the given sink.
///
/// The writer's internal chunk/compressor state is not thread-safe; use one `Writer` per file
/// from a single thread. Dropping a `Writer` without calling [`close`](Self::close) leaves behind
/// a valid *prefix* of an MCAP file: there is no trailing magic or summary, so readers will treat
/// it as truncated, though the streaming reader can still recover every complete record up to
/// that point.
pub struct Writer<W: Write> {
    sink: CountingWriter<W>,
    options: WriteOptions,
    schemas: BiHashMap<SchemaKey, u16>,
    channels: BiHashMap<ChannelKey, u16>,
    next_schema_id: u16,
    next_channel_id: u16,
    chunk: Option<ChunkAccumulator>,
    chunk_indexes: Vec<ChunkIndex>,
    attachment_indexes: Vec<AttachmentIndex>,
    metadata_indexes: Vec<MetadataIndex>,
    message_bounds: Option<(u64, u64)>,
    channel_message_counts: BTreeMap<u16, u64>,
    finished: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(sink: W, options: WriteOptions) -> McapResult<Self> {
        let mut sink = CountingWriter::new(sink);
        sink.write_all(&MAGIC)?;
        write_record(
            &mut sink,
            &Record::Header(Header {
                profile: options.profile.clone(),
                library: options.library.clone(),
            }),
        )?;
        Ok(Self {
            sink,
            options,
            schemas: BiHashMap::new(),
            channels: BiHashMap::new(),
            next_schema_id: 1,
            next_channel_id: 0,
            chunk: None,
            chunk_indexes: Vec::new(),
            attachment_indexes: Vec::new(),
            metadata_indexes: Vec::new(),
            message_bounds: None,
            channel_message_counts: BTreeMap::new(),
            finished: false,
        })
    }

    /// Adds a schema, returning its ID. Schemas with identical content return the ID already
    /// assigned to them.
    pub fn add_schema(&mut self, name: &str, encoding: &str, data: &[u8]) -> McapResult<u16> {
        let key = SchemaKey {
            name: name.to_string(),
            encoding: encoding.to_string(),
            data: data.to_vec(),
        };
        if let Some(&id) = self.schemas.get_by_left(&key) {
            return Ok(id);
        }
        if self.next_schema_id == 0 {
            return Err(McapError::TooManySchemas);
        }
        let id = self.next_schema_id;
        self.next_schema_id = self
            .next_schema_id
            .checked_add(1)
            .ok_or(McapError::TooManySchemas)?;
        self.schemas.insert(key, id);
        self.write_schema_record(
            records::SchemaHeader {
                id,
                name: name.to_string(),
                encoding: encoding.to_string(),
            },
            Cow::Borrowed(data),
        )?;
        Ok(id)
    }

    fn write_schema_record(
        &mut self,
        header: records::SchemaHeader,
        data: Cow<[u8]>,
    ) -> McapResult<()> {
        if self.options.chunked {
            let chunk = self.current_chunk()?;
            write_record(&mut chunk.uncompressed, &Record::Schema { header, data })?;
        } else {
            write_record(&mut self.sink, &Record::Schema { header, data })?;
        }
        Ok(())
    }

    /// Adds a channel, returning its ID. Channels with identical content return the ID already
    /// assigned to them.
    pub fn add_channel(
        &mut self,
        schema_id: u16,
        topic: &str,
        message_encoding: &str,
        metadata: &BTreeMap<String, String>,
    ) -> McapResult<u16> {
        if schema_id != 0 && !self.schemas.contains_right(&schema_id) {
            return Err(McapError::UnknownSchema(topic.to_string(), schema_id));
        }
        let key = ChannelKey {
            topic: topic.to_string(),
            schema_id,
            message_encoding: message_encoding.to_string(),
            metadata: metadata.clone(),
        };
        if let Some(&id) = self.channels.get_by_left(&key) {
            return Ok(id);
        }
        while self.channels.contains_right(&self.next_channel_id) {
            if self.next_channel_id == u16::MAX {
                return Err(McapError::TooManyChannels);
            }
            self.next_channel_id += 1;
        }
        let id = self.next_channel_id;
        self.next_channel_id = self.next_channel_id.saturating_add(1);
        self.channels.insert(key, id);
        self.write_channel_record(records::Channel {
            id,
            schema_id,
            topic: topic.to_string(),
            message_encoding: message_encoding.to_string(),
            metadata: metadata.clone(),
        })?;
        Ok(id)
    }

    fn write_channel_record(&mut self, channel: records::Channel) -> McapResult<()> {
        if self.options.chunked {
            let chunk = self.current_chunk()?;
            write_record(&mut chunk.uncompressed, &Record::Channel(channel))?;
        } else {
            write_record(&mut self.sink, &Record::Channel(channel))?;
        }
        Ok(())
    }

    /// Writes `message`, registering its channel (and schema, if any) if they haven't been
    /// written yet.
    pub fn write(&mut self, message: &Message) -> McapResult<()> {
        if !self.channels.contains_right(&message.channel.id) {
            let schema_id = match &message.channel.schema {
                Some(schema) => {
                    if !self.schemas.contains_right(&schema.id) {
                        self.write_schema_record(
                            records::SchemaHeader {
                                id: schema.id,
                                name: schema.name.clone(),
                                encoding: schema.encoding.clone(),
                            },
                            Cow::Borrowed(schema.data.as_ref()),
                        )?;
                        self.schemas.insert(
                            SchemaKey {
                                name: schema.name.clone(),
                                encoding: schema.encoding.clone(),
                                data: schema.data.clone().into_owned(),
                            },
                            schema.id,
                        );
                    }
                    schema.id
                }
                None => 0,
            };
            self.write_channel_record(records::Channel {
                id: message.channel.id,
                schema_id,
                topic: message.channel.topic.clone(),
                message_encoding: message.channel.message_encoding.clone(),
                metadata: message.channel.metadata.clone(),
            })?;
            self.channels.insert(
                ChannelKey {
                    topic: message.channel.topic.clone(),
                    schema_id,
                    message_encoding: message.channel.message_encoding.clone(),
                    metadata: message.channel.metadata.clone(),
                },
                message.channel.id,
            );
        }

        self.write_to_known_channel(
            &MessageHeader {
                channel_id: message.channel.id,
                sequence: message.sequence,
                log_time: message.log_time,
                publish_time: message.publish_time,
            },
            &message.data,
        )
    }

    /// Writes a message to an already-registered channel, skipping the dedup lookups `write`
    /// does for you.
    pub fn write_to_known_channel(&mut self, header: &MessageHeader, data: &[u8]) -> McapResult<()> {
        if !self.channels.contains_right(&header.channel_id) {
            return Err(McapError::UnknownChannel(header.sequence, header.channel_id));
        }

        self.message_bounds = Some(match self.message_bounds {
            None => (header.log_time, header.log_time),
            Some((start, end)) => (start.min(header.log_time), end.max(header.log_time)),
        });
        *self.channel_message_counts.entry(header.channel_id).or_insert(0) += 1;

        if self.options.chunked {
            let chunk = self.current_chunk()?;
            chunk.start_time = chunk.start_time.min(header.log_time);
            chunk.end_time = chunk.end_time.max(header.log_time);
            chunk
                .indexes
                .entry(header.channel_id)
                .or_default()
                .push(MessageIndexEntry {
                    log_time: header.log_time,
                    offset: chunk.uncompressed.position(),
                });
            write_record(
                &mut chunk.uncompressed,
                &Record::Message {
                    header: *header,
                    data: Cow::Borrowed(data),
                },
            )?;
            if chunk.uncompressed.position() > self.options.chunk_size {
                self.flush_chunk()?;
            }
        } else {
            write_record(
                &mut self.sink,
                &Record::Message {
                    header: *header,
                    data: Cow::Borrowed(data),
                },
            )?;
        }
        Ok(())
    }

    fn current_chunk(&mut self) -> McapResult<&mut ChunkAccumulator> {
        if self.chunk.is_none() {
            self.chunk = Some(ChunkAccumulator::new(self.options.compression)?);
        }
        Ok(self.chunk.as_mut().expect("just inserted"))
    }

    /// Finishes the current chunk, if one is open and non-empty, emitting its `Chunk` record,
    /// per-channel `MessageIndex` records, and a `ChunkIndex` summary entry.
    pub fn flush_chunk(&mut self) -> McapResult<()> {
        let Some(chunk) = self.chunk.take() else {
            return Ok(());
        };
        if chunk.is_empty() {
            return Ok(());
        }

        let uncompressed_size = chunk.uncompressed.position();
        let (compressor, uncompressed_crc) = chunk.uncompressed.finalize();
        let compression_name = compressor.name();
        let compressed = compressor.finish()?;

        let chunk_offset = self.sink.position();
        let header = ChunkHeader {
            message_start_time: if chunk.start_time == u64::MAX { 0 } else { chunk.start_time },
            message_end_time: chunk.end_time,
            uncompressed_size,
            uncompressed_crc: if self.options.include_crc { uncompressed_crc } else { 0 },
            compression: compression_name.to_string(),
            compressed_size: compressed.len() as u64,
        };
        write_record(
            &mut self.sink,
            &Record::Chunk {
                header: header.clone(),
                data: Cow::Borrowed(&compressed),
            },
        )?;
        let chunk_length = self.sink.position() - chunk_offset;

        let mut message_index_offsets = BTreeMap::new();
        let index_start = self.sink.position();
        for (&channel_id, mut entries) in chunk.indexes.iter().map(|(k, v)| (k, v.clone())) {
            entries.sort_by_key(|e| e.log_time);
            let offset = self.sink.position();
            message_index_offsets.insert(channel_id, offset);
            write_record(
                &mut self.sink,
                &Record::MessageIndex(MessageIndex {
                    channel_id,
                    records: entries,
                }),
            )?;
        }
        let message_index_length = self.sink.position() - index_start;

        self.chunk_indexes.push(ChunkIndex {
            message_start_time: header.message_start_time,
            message_end_time: header.message_end_time,
            chunk_start_offset: chunk_offset,
            chunk_length,
            message_index_offsets,
            message_index_length,
            compression: header.compression,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
        });

        Ok(())
    }

    /// Writes an attachment. Finishes the current chunk first: attachments must not appear
    /// inside one.
    pub fn write_attachment(&mut self, attachment: &Attachment) -> McapResult<()> {
        self.flush_chunk()?;

        let header = AttachmentHeader {
            log_time: attachment.log_time,
            create_time: attachment.create_time,
            name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
        };

        let mut header_buf = Vec::new();
        header
            .write_options(&mut io::Cursor::new(&mut header_buf), binrw::Endian::Little, ())
            .map_err(McapError::Parse)?;

        let mut hasher = Hasher::new();
        hasher.update(&header_buf);
        hasher.update(&(attachment.data.len() as u64).to_le_bytes());
        hasher.update(&attachment.data);
        let crc = hasher.finalize();

        let offset = self.sink.position();
        write_record(
            &mut self.sink,
            &Record::Attachment {
                header,
                data: Cow::Borrowed(attachment.data.as_ref()),
                crc,
            },
        )?;
        let length = self.sink.position() - offset;

        self.attachment_indexes.push(AttachmentIndex {
            offset,
            length,
            log_time: attachment.log_time,
            create_time: attachment.create_time,
            data_size: attachment.data.len() as u64,
            name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
        });
        Ok(())
    }

    /// Writes a metadata record. Finishes the current chunk first.
    pub fn write_metadata(&mut self, metadata: &Metadata) -> McapResult<()> {
        self.flush_chunk()?;
        let offset = self.sink.position();
        write_record(&mut self.sink, &Record::Metadata(metadata.clone()))?;
        let length = self.sink.position() - offset;
        self.metadata_indexes.push(MetadataIndex {
            offset,
            length,
            name: metadata.name.clone(),
        });
        Ok(())
    }

    /// Finishes the current chunk, writes the summary section, summary-offset table and footer,
    /// and writes the trailing magic. Subsequent writes are errors.
    pub fn close(&mut self) -> McapResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.flush_chunk()?;
        write_record(&mut self.sink, &Record::DataEnd(DataEnd::default()))?;

        let message_bounds = self.message_bounds.unwrap_or((0, 0));
        let stats = Statistics {
            message_count: self.channel_message_counts.values().sum(),
            schema_count: self.schemas.len() as u16,
            channel_count: self.channels.len() as u32,
            attachment_count: self.attachment_indexes.len() as u32,
            metadata_count: self.metadata_indexes.len() as u32,
            chunk_count: self.chunk_indexes.len() as u32,
            message_start_time: message_bounds.0,
            message_end_time: message_bounds.1,
            channel_message_counts: std::mem::take(&mut self.channel_message_counts),
        };

        let mut schemas: Vec<_> = self
            .schemas
            .iter()
            .map(|(key, &id)| Record::Schema {
                header: records::SchemaHeader {
                    id,
                    name: key.name.clone(),
                    encoding: key.encoding.clone(),
                },
                data: Cow::Owned(key.data.clone()),
            })
            .collect();
        schemas.sort_by_key(|r| match r {
            Record::Schema { header, .. } => header.id,
            _ => unreachable!(),
        });

        let mut channels: Vec<_> = self
            .channels
            .iter()
            .map(|(key, &id)| records::Channel {
                id,
                schema_id: key.schema_id,
                topic: key.topic.clone(),
                message_encoding: key.message_encoding.clone(),
                metadata: key.metadata.clone(),
            })
            .collect();
        channels.sort_by_key(|c| c.id);

        let summary_start = self.sink.position();
        let mut ccw = CountingCrcWriter::new(&mut self.sink);
        let mut offsets = Vec::new();

        let schemas_start = summary_start;
        for s in &schemas {
            write_record(&mut ccw, s)?;
        }
        let schemas_end = summary_start + ccw.position();
        push_offset(&mut offsets, op::SCHEMA, schemas_start, schemas_end);

        let channels_start = schemas_end;
        for c in channels {
            write_record(&mut ccw, &Record::Channel(c))?;
        }
        let channels_end = summary_start + ccw.position();
        push_offset(&mut offsets, op::CHANNEL, channels_start, channels_end);

        let chunk_indexes_start = channels_end;
        let chunk_indexes = std::mem::take(&mut self.chunk_indexes);
        for ci in chunk_indexes {
            write_record(&mut ccw, &Record::ChunkIndex(ci))?;
        }
        let chunk_indexes_end = summary_start + ccw.position();
        push_offset(&mut offsets, op::CHUNK_INDEX, chunk_indexes_start, chunk_indexes_end);

        let attachment_indexes_start = chunk_indexes_end;
        let attachment_indexes = std::mem::take(&mut self.attachment_indexes);
        for ai in attachment_indexes {
            write_record(&mut ccw, &Record::AttachmentIndex(ai))?;
        }
        let attachment_indexes_end = summary_start + ccw.position();
        push_offset(
            &mut offsets,
            op::ATTACHMENT_INDEX,
            attachment_indexes_start,
            attachment_indexes_end,
        );

        let metadata_indexes_start = attachment_indexes_end;
        let metadata_indexes = std::mem::take(&mut self.metadata_indexes);
        for mi in metadata_indexes {
            write_record(&mut ccw, &Record::MetadataIndex(mi))?;
        }
        let metadata_indexes_end = summary_start + ccw.position();
        push_offset(
            &mut offsets,
            op::METADATA_INDEX,
            metadata_indexes_start,
            metadata_indexes_end,
        );

        let stats_start = metadata_indexes_end;
        write_record(&mut ccw, &Record::Statistics(stats))?;
        let stats_end = summary_start + ccw.position();
        push_offset(&mut offsets, op::STATISTICS, stats_start, stats_end);

        let summary_offset_start = stats_end;
        for offset in offsets {
            write_record(&mut ccw, &Record::SummaryOffset(offset))?;
        }

        // The footer's CRC covers the whole summary section, the summary-offset records, and the
        // footer's own first two fields, so we keep feeding the same CRC writer through those
        // bytes before pulling out the final checksum.
        let summary_crc = finish_footer_crc(ccw, summary_start, summary_offset_start)?;
        let summary_crc = if self.options.include_crc { summary_crc } else { 0 };

        self.sink.write_u32::<LE>(summary_crc)?;
        self.sink.write_all(&MAGIC)?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Writes a `Footer` record's opcode, length and its two leading fields through `ccw`, returning
/// the resulting CRC. The trailing `summary_crc` field itself is written separately by the
/// caller, since it covers everything written through `ccw` but not itself.
fn finish_footer_crc<W: Write>(
    mut ccw: CountingCrcWriter<&mut CountingWriter<W>>,
    summary_start: u64,
    summary_offset_start: u64,
) -> McapResult<u32> {
    ccw.write_u8(op::FOOTER)?;
    ccw.write_u64::<LE>(20)?;
    ccw.write_u64::<LE>(summary_start)?;
    ccw.write_u64::<LE>(summary_offset_start)?;
    let (_, summary_crc) = ccw.finalize();
    Ok(summary_crc)
}

fn push_offset(offsets: &mut Vec<SummaryOffset>, opcode: u8, start: u64, end: u64) {
    if end > start {
        offsets.push(SummaryOffset {
            group_opcode: opcode,
            group_start: start,
            group_length: end - start,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::StreamReader;
    use std::io::Cursor;

    #[test]
    fn unchunked_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(Cursor::new(&mut buf), WriteOptions::new().chunked(false)).unwrap();
            let schema_id = w.add_schema("S", "proto", b"x").unwrap();
            let channel_id = w.add_channel(schema_id, "/t", "proto", &BTreeMap::new()).unwrap();
            w.write_to_known_channel(
                &MessageHeader {
                    channel_id,
                    sequence: 1,
                    log_time: 1,
                    publish_time: 1,
                },
                b"hi",
            )
            .unwrap();
            w.close().unwrap();
        }

        let reader = StreamReader::new(Cursor::new(buf));
        let messages: Vec<_> = reader.collect::<McapResult<Vec<_>>>().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&*messages[0].1.data, b"hi");
    }

    #[test]
    fn too_many_channels_is_rejected() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf), WriteOptions::new()).unwrap();
        for i in 0..=u16::MAX {
            w.add_channel(0, &format!("/{i}"), "json", &BTreeMap::new()).unwrap();
            if i == u16::MAX {
                break;
            }
        }
        let err = w.add_channel(0, "/overflow", "json", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, McapError::TooManyChannels));
    }

    #[test]
    fn attachment_and_metadata_counted_in_statistics() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf), WriteOptions::new()).unwrap();
        w.write_attachment(&Attachment {
            log_time: 1,
            create_time: 1,
            name: "a".into(),
            content_type: "text/plain".into(),
            data: Cow::Borrowed(b"hello"),
        })
        .unwrap();
        w.write_metadata(&Metadata {
            name: "m".into(),
            metadata: BTreeMap::new(),
        })
        .unwrap();
        w.close().unwrap();

        let mut reader = crate::indexed::IndexedReader::new(Cursor::new(buf)).unwrap();
        let stats = reader.summary().statistics.clone().unwrap();
        assert_eq!(stats.attachment_count, 1);
        assert_eq!(stats.metadata_count, 1);
    }

    #[test]
    fn duplicate_schema_reuses_id() {
        let mut buf = Vec::new();
        let mut w = Writer::new(Cursor::new(&mut buf), WriteOptions::new()).unwrap();
        let a = w.add_schema("S", "proto", b"x").unwrap();
        let b = w.add_schema("S", "proto", b"x").unwrap();
        assert_eq!(a, b);
    }
}
