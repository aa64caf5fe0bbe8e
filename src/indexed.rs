//! The random-access indexed reader (C6): locates chunks via the footer/summary, merges
//! per-channel message indexes across overlapping chunks, and yields messages in non-decreasing
//! `log_time` order for a requested topic set and time window.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crc32fast::Hasher;

use crate::channels::ChannelAccumulator;
use crate::chunk::decompress_chunk;
use crate::error::{McapError, McapResult};
use crate::lexer::read_framed;
use crate::records::{
    self, op, parse_record, AttachmentIndex, ChunkIndex, Footer, MetadataIndex, Record,
    RECORD_HEADER_LEN,
};
use crate::{Attachment, Channel, Message, MAGIC};

/// Footer record length including its own opcode/length framing.
const FOOTER_RECORD_LEN: u64 = RECORD_HEADER_LEN + 8 + 8 + 4;

/// Schemas, channels and every *Index record collected from a file's summary section.
#[derive(Debug, Default)]
pub struct Summary {
    pub statistics: Option<records::Statistics>,
    pub chunk_indexes: Vec<ChunkIndex>,
    pub attachment_indexes: Vec<records::AttachmentIndex>,
    pub metadata_indexes: Vec<records::MetadataIndex>,
    channels: ChannelAccumulator<'static>,
}

impl Summary {
    pub fn channel(&self, id: u16) -> Option<Arc<Channel<'static>>> {
        self.channels.get(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel<'static>>> {
        self.channels.channels()
    }
}

/// Reads an MCAP file in random-access order using its footer and summary section.
pub struct IndexedReader<S> {
    source: S,
    footer: Footer,
    summary: Summary,
}

impl<S: Read + Seek> IndexedReader<S> {
    /// Opens `source`, reading and validating the footer and summary. Fails with
    /// [`McapError::NotIndexed`] if the file has no summary section.
    pub fn new(mut source: S) -> McapResult<Self> {
        let file_len = source.seek(SeekFrom::End(0))?;
        if file_len < (MAGIC.len() as u64) * 2 + FOOTER_RECORD_LEN {
            return Err(McapError::UnexpectedEof);
        }

        source.seek(SeekFrom::End(-(MAGIC.len() as i64)))?;
        let mut end_magic = [0u8; 8];
        source.read_exact(&mut end_magic)?;
        if end_magic != MAGIC {
            return Err(McapError::BadMagic);
        }

        let footer_start = file_len - MAGIC.len() as u64 - FOOTER_RECORD_LEN;
        source.seek(SeekFrom::Start(footer_start))?;
        let mut footer_buf = vec![0u8; FOOTER_RECORD_LEN as usize];
        source.read_exact(&mut footer_buf)?;
        let footer = match parse_record(footer_buf[0], &footer_buf[RECORD_HEADER_LEN as usize..])?
        {
            Record::Footer(f) => f,
            _ => return Err(McapError::UnexpectedToken("expected Footer".into())),
        };

        if footer.summary_start == 0 {
            return Err(McapError::NotIndexed);
        }

        let summary_len = footer_start - footer.summary_start;
        source.seek(SeekFrom::Start(footer.summary_start))?;
        let mut summary_buf = vec![0u8; summary_len as usize];
        source.read_exact(&mut summary_buf)?;

        if footer.summary_crc != 0 {
            let mut hasher = Hasher::new();
            hasher.update(&summary_buf);
            // The footer's own opcode and content-length bytes are part of the CRC, exactly as
            // the writer feeds them through `finish_footer_crc` before the two fields below.
            hasher.update(&[op::FOOTER]);
            hasher.update(&20u64.to_le_bytes());
            hasher.update(&footer.summary_start.to_le_bytes());
            hasher.update(&footer.summary_offset_start.to_le_bytes());
            let calculated = hasher.finalize();
            if calculated != footer.summary_crc {
                return Err(McapError::BadSummaryCrc {
                    saved: footer.summary_crc,
                    calculated,
                });
            }
        }

        let summary = parse_summary(&summary_buf)?;

        Ok(Self {
            source,
            footer,
            summary,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Reads messages on `topics` (empty ⇒ all channels) within `[start, end)`, in non-decreasing
    /// `log_time` order.
    pub fn read_messages(
        &mut self,
        topics: &HashSet<String>,
        start: u64,
        end: u64,
    ) -> McapResult<Vec<(Arc<Channel<'static>>, Message<'static>)>> {
        let relevant_channels: HashSet<u16> = self
            .summary
            .channels()
            .filter(|c| topics.is_empty() || topics.contains(&c.topic))
            .map(|c| c.id)
            .collect();

        let mut selected: Vec<&ChunkIndex> = self
            .summary
            .chunk_indexes
            .iter()
            .filter(|ci| {
                ci.message_start_time <= end
                    && ci.message_end_time >= start
                    && ci
                        .message_index_offsets
                        .keys()
                        .any(|id| relevant_channels.contains(id))
            })
            .collect();
        selected.sort_by_key(|ci| ci.message_start_time);

        // Group into maximal runs of overlapping chunks ("chunk sets"): a chunk joins the
        // current set if its start time falls before the set's running max end time.
        let mut chunk_sets: Vec<Vec<&ChunkIndex>> = Vec::new();
        let mut current_max_end = 0u64;
        for ci in selected {
            if let Some(set) = chunk_sets.last_mut() {
                if ci.message_start_time < current_max_end {
                    set.push(ci);
                    current_max_end = current_max_end.max(ci.message_end_time);
                    continue;
                }
            }
            current_max_end = ci.message_end_time;
            chunk_sets.push(vec![ci]);
        }

        let mut out = Vec::new();
        for set in chunk_sets {
            self.read_chunk_set(&set, &relevant_channels, start, end, &mut out)?;
        }
        Ok(out)
    }

    fn read_chunk_set(
        &mut self,
        set: &[&ChunkIndex],
        relevant_channels: &HashSet<u16>,
        start: u64,
        end: u64,
        out: &mut Vec<(Arc<Channel<'static>>, Message<'static>)>,
    ) -> McapResult<()> {
        // (index into `set`, offset_in_chunk, log_time)
        let mut entries: Vec<(usize, u64, u64)> = Vec::new();

        for (set_idx, ci) in set.iter().enumerate() {
            for (&channel_id, &offset) in &ci.message_index_offsets {
                if !relevant_channels.contains(&channel_id) {
                    continue;
                }
                let message_index = self.read_message_index_at(offset)?;
                for entry in message_index.records {
                    if entry.log_time >= start && entry.log_time < end {
                        entries.push((set_idx, entry.offset, entry.log_time));
                    }
                }
            }
        }

        // Stable sort by log_time; ties keep (chunk set order, then offset) from insertion
        // order above, which is exactly the tie-break the spec calls for.
        entries.sort_by_key(|&(_, _, log_time)| log_time);

        let mut active_chunk: Option<(u64, Vec<u8>)> = None;
        for (set_idx, offset, _) in entries {
            let ci = set[set_idx];
            if active_chunk
                .as_ref()
                .map(|(start, _)| *start != ci.chunk_start_offset)
                .unwrap_or(true)
            {
                active_chunk = Some((ci.chunk_start_offset, self.load_chunk(ci)?));
            }
            let (_, buffer) = active_chunk.as_ref().expect("just set");
            let message = self.parse_message_at(buffer, offset)?;
            let channel = self
                .summary
                .channel(message.channel_id)
                .ok_or(McapError::UnknownChannel(message.sequence, message.channel_id))?;
            out.push((
                channel.clone(),
                Message {
                    channel,
                    sequence: message.sequence,
                    log_time: message.log_time,
                    publish_time: message.publish_time,
                    data: message.data,
                },
            ));
        }
        Ok(())
    }

    /// Reads the attachment pointed to by `index`, validating its trailing CRC if present.
    pub fn read_attachment(&mut self, index: &AttachmentIndex) -> McapResult<Attachment<'static>> {
        self.source.seek(SeekFrom::Start(index.offset))?;
        let mut record_buf = vec![0u8; index.length as usize];
        self.source.read_exact(&mut record_buf)?;
        if record_buf[0] != op::ATTACHMENT {
            return Err(McapError::BadIndex);
        }
        let body = &record_buf[RECORD_HEADER_LEN as usize..];
        match parse_record(op::ATTACHMENT, body)? {
            Record::Attachment { header, data, crc } => {
                if crc != 0 {
                    // `body` is `header || data_len(u64) || data || crc(u32)`; the CRC covers
                    // everything up to (not including) its own trailing four bytes.
                    let mut hasher = Hasher::new();
                    hasher.update(&body[..body.len() - 4]);
                    let calculated = hasher.finalize();
                    if calculated != crc {
                        return Err(McapError::BadAttachmentCrc { saved: crc, calculated });
                    }
                }
                Ok(Attachment {
                    log_time: header.log_time,
                    create_time: header.create_time,
                    name: header.name,
                    content_type: header.content_type,
                    data: std::borrow::Cow::Owned(data.into_owned()),
                })
            }
            _ => Err(McapError::BadIndex),
        }
    }

    /// Reads the metadata record pointed to by `index`.
    pub fn read_metadata(&mut self, index: &MetadataIndex) -> McapResult<records::Metadata> {
        self.source.seek(SeekFrom::Start(index.offset))?;
        let mut record_buf = vec![0u8; index.length as usize];
        self.source.read_exact(&mut record_buf)?;
        if record_buf[0] != op::METADATA {
            return Err(McapError::BadIndex);
        }
        let body = &record_buf[RECORD_HEADER_LEN as usize..];
        match parse_record(op::METADATA, body)? {
            Record::Metadata(m) => Ok(m),
            _ => Err(McapError::BadIndex),
        }
    }

    fn read_message_index_at(&mut self, offset: u64) -> McapResult<records::MessageIndex> {
        self.source.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        self.source.read_exact(&mut header)?;
        if header[0] != op::MESSAGE_INDEX {
            return Err(McapError::BadIndex);
        }
        let len = u64::from_le_bytes(header[1..9].try_into().expect("8 bytes"));
        let mut body = vec![0u8; len as usize];
        self.source.read_exact(&mut body)?;
        match parse_record(op::MESSAGE_INDEX, &body)? {
            Record::MessageIndex(mi) => Ok(mi),
            _ => Err(McapError::BadIndex),
        }
    }

    fn load_chunk(&mut self, ci: &ChunkIndex) -> McapResult<Vec<u8>> {
        self.source.seek(SeekFrom::Start(ci.chunk_start_offset))?;
        let mut record_buf = vec![0u8; ci.chunk_length as usize];
        self.source.read_exact(&mut record_buf)?;
        let opcode = record_buf[0];
        if opcode != op::CHUNK {
            return Err(McapError::BadIndex);
        }
        let body = &record_buf[RECORD_HEADER_LEN as usize..];
        match parse_record(op::CHUNK, body)? {
            Record::Chunk { header, data } => decompress_chunk(
                &header.compression,
                &data,
                header.uncompressed_size,
                header.uncompressed_crc,
            ),
            _ => Err(McapError::BadIndex),
        }
    }

    fn parse_message_at(
        &self,
        buffer: &[u8],
        offset: u64,
    ) -> McapResult<OwnedMessageRecord> {
        let offset = offset as usize;
        if buffer.len() < offset + RECORD_HEADER_LEN as usize {
            return Err(McapError::BadIndex);
        }
        let opcode = buffer[offset];
        if opcode != op::MESSAGE {
            return Err(McapError::BadIndex);
        }
        let len =
            u64::from_le_bytes(buffer[offset + 1..offset + 9].try_into().expect("8 bytes")) as usize;
        let start = offset + RECORD_HEADER_LEN as usize;
        if buffer.len() < start + len {
            return Err(McapError::BadIndex);
        }
        match parse_record(op::MESSAGE, &buffer[start..start + len])? {
            Record::Message { header, data } => Ok(OwnedMessageRecord {
                channel_id: header.channel_id,
                sequence: header.sequence,
                log_time: header.log_time,
                publish_time: header.publish_time,
                data: std::borrow::Cow::Owned(data.into_owned()),
            }),
            _ => Err(McapError::BadIndex),
        }
    }
}

struct OwnedMessageRecord {
    channel_id: u16,
    sequence: u32,
    log_time: u64,
    publish_time: u64,
    data: std::borrow::Cow<'static, [u8]>,
}

/// Walks `buf` (the bytes from `summary_start` to `footer_start`) as a flat run of
/// opcode-framed records. This is deliberately not driven through the [`crate::lexer::Lexer`],
/// which only terminates cleanly at a trailing magic: the summary section has no magic of its
/// own, and the records it holds (Schema/Channel/Statistics/*Index/SummaryOffset) are never
/// chunked, so the lexer's chunk-descent machinery buys nothing here.
fn parse_summary(buf: &[u8]) -> McapResult<Summary> {
    let mut summary = Summary::default();
    let mut pos = 0usize;
    while pos < buf.len() {
        let (opcode, body, consumed) = read_framed(&buf[pos..])?;
        match parse_record(opcode, body)?.into_owned() {
            Record::Schema { header, data } => summary.channels.add_schema(header, data)?,
            Record::Channel(chan) => summary.channels.add_channel(chan)?,
            Record::Statistics(stats) => summary.statistics = Some(stats),
            Record::ChunkIndex(ci) => summary.chunk_indexes.push(ci),
            Record::AttachmentIndex(ai) => summary.attachment_indexes.push(ai),
            Record::MetadataIndex(mi) => summary.metadata_indexes.push(mi),
            Record::SummaryOffset(_) => {}
            Record::Unknown { opcode, .. } => {
                log::debug!("skipping unrecognized record {opcode:#04x} in summary section");
            }
            other => {
                return Err(McapError::UnexpectedToken(format!(
                    "unexpected record in summary: opcode {:#04x}",
                    other.opcode()
                )))
            }
        }
        pos += consumed;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{WriteOptions, Writer};
    use crate::Schema as McapSchema;
    use std::borrow::Cow;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Arc as StdArc;

    fn build_file() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(
                Cursor::new(&mut buf),
                WriteOptions::new().chunk_size(1).compression(None),
            )
            .unwrap();
            let schema = StdArc::new(McapSchema {
                id: 1,
                name: "S".into(),
                encoding: "proto".into(),
                data: Cow::Borrowed(&b"x"[..]),
            });
            let channel = StdArc::new(Channel {
                id: 7,
                schema: Some(schema),
                topic: "/t".into(),
                message_encoding: "proto".into(),
                metadata: Default::default(),
            });
            for (seq, t) in [(1u32, 10u64), (2, 11), (3, 12)] {
                writer
                    .write(&Message {
                        channel: channel.clone(),
                        sequence: seq,
                        log_time: t,
                        publish_time: t,
                        data: Cow::Borrowed(b"x"),
                    })
                    .unwrap();
            }
            writer.close().unwrap();
        }
        buf
    }

    #[test]
    fn reads_messages_in_time_order_windowed() {
        let bytes = build_file();
        let mut reader = IndexedReader::new(Cursor::new(bytes)).unwrap();
        let topics = HashSet::new();
        let got = reader.read_messages(&topics, 11, 12).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].1.sequence, 2);
    }

    #[test]
    fn reads_all_messages_in_order() {
        let bytes = build_file();
        let mut reader = IndexedReader::new(Cursor::new(bytes)).unwrap();
        let topics = HashSet::new();
        let got = reader.read_messages(&topics, 0, 100).unwrap();
        let seqs: Vec<_> = got.iter().map(|(_, m)| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn reads_attachment_and_metadata_by_index() {
        let mut buf = Vec::new();
        {
            let mut writer =
                Writer::new(Cursor::new(&mut buf), WriteOptions::new().chunk_size(1)).unwrap();
            writer
                .write_attachment(&crate::Attachment {
                    log_time: 5,
                    create_time: 5,
                    name: "calib.bin".into(),
                    content_type: "application/octet-stream".into(),
                    data: Cow::Borrowed(&[1, 2, 3, 4]),
                })
                .unwrap();
            writer
                .write_metadata(&records::Metadata {
                    name: "run_info".into(),
                    metadata: BTreeMap::from([("operator".to_string(), "alice".to_string())]),
                })
                .unwrap();
            writer.close().unwrap();
        }

        let mut reader = IndexedReader::new(Cursor::new(buf)).unwrap();
        let attachment_index = reader.summary().attachment_indexes[0].clone();
        let attachment = reader.read_attachment(&attachment_index).unwrap();
        assert_eq!(attachment.name, "calib.bin");
        assert_eq!(&*attachment.data, &[1, 2, 3, 4]);

        let metadata_index = reader.summary().metadata_indexes[0].clone();
        let metadata = reader.read_metadata(&metadata_index).unwrap();
        assert_eq!(metadata.name, "run_info");
        assert_eq!(metadata.metadata.get("operator").map(String::as_str), Some("alice"));
    }

    #[test]
    fn non_indexed_file_errors() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        crate::records::write_record(
            &mut buf,
            &Record::Header(records::Header {
                profile: "".into(),
                library: "".into(),
            }),
        )
        .unwrap();
        crate::records::write_record(&mut buf, &Record::Footer(Default::default())).unwrap();
        buf.extend_from_slice(&MAGIC);

        let err = IndexedReader::new(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, McapError::NotIndexed));
    }
}
