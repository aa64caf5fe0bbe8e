//! Raw records parsed from (or serialized to) an MCAP file.
//!
//! These mirror the on-wire layout described in the MCAP specification byte for byte. Most
//! users want the higher-level [`Channel`](crate::Channel), [`Schema`](crate::Schema) and
//! [`Message`](crate::Message) types produced by [`StreamReader`](crate::StreamReader) and
//! [`IndexedReader`](crate::IndexedReader) instead.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Cursor;

use binrw::{BinRead, BinResult, BinWrite};

use crate::error::{McapError, McapResult};

/// Record opcodes.
///
/// Opcodes in the range `0x01-0x7F` are reserved for the MCAP format; `0x80-0xFF` are free for
/// application extensions. Unrecognized opcodes are always skippable, since every record is
/// length-prefixed.
pub mod op {
    pub const HEADER: u8 = 0x01;
    pub const FOOTER: u8 = 0x02;
    pub const SCHEMA: u8 = 0x03;
    pub const CHANNEL: u8 = 0x04;
    pub const MESSAGE: u8 = 0x05;
    pub const CHUNK: u8 = 0x06;
    pub const MESSAGE_INDEX: u8 = 0x07;
    pub const CHUNK_INDEX: u8 = 0x08;
    pub const ATTACHMENT: u8 = 0x09;
    pub const ATTACHMENT_INDEX: u8 = 0x0A;
    pub const STATISTICS: u8 = 0x0B;
    pub const METADATA: u8 = 0x0C;
    pub const METADATA_INDEX: u8 = 0x0D;
    pub const SUMMARY_OFFSET: u8 = 0x0E;
    pub const DATA_END: u8 = 0x0F;
}

/// Length, in bytes, of a record's framing: one opcode byte plus an 8-byte length.
pub const RECORD_HEADER_LEN: u64 = 1 + 8;

#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
struct McapString {
    #[br(temp)]
    #[bw(calc = inner.len() as u32)]
    len: u32,
    #[br(count = len, try_map = String::from_utf8)]
    #[bw(map = |s: &String| s.as_bytes())]
    inner: String,
}

#[binrw::writer(writer, endian)]
fn write_string(s: &String) -> BinResult<()> {
    (s.len() as u32).write_options(writer, endian, ())?;
    s.as_bytes().write_options(writer, endian, ())?;
    Ok(())
}

#[binrw::parser(reader, endian)]
fn parse_string_map() -> BinResult<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    let byte_len: u32 = BinRead::read_options(reader, endian, ())?;
    let pos = reader.stream_position()?;
    while (reader.stream_position()? - pos) < byte_len as u64 {
        let k = McapString::read_options(reader, endian, ())?;
        let v = McapString::read_options(reader, endian, ())?;
        parsed.insert(k.inner, v.inner);
    }
    Ok(parsed)
}

#[binrw::writer(writer, endian)]
fn write_string_map(s: &BTreeMap<String, String>) -> BinResult<()> {
    let byte_len: usize = s.iter().map(|(k, v)| 4 + k.len() + 4 + v.len()).sum();
    (byte_len as u32).write_options(writer, endian, ())?;
    for (k, v) in s {
        write_string(k, writer, endian, ())?;
        write_string(v, writer, endian, ())?;
    }
    Ok(())
}

#[binrw::parser(reader, endian)]
fn parse_int_map() -> BinResult<BTreeMap<u16, u64>> {
    let mut parsed = BTreeMap::new();
    let byte_len: u32 = BinRead::read_options(reader, endian, ())?;
    let pos = reader.stream_position()?;
    while (reader.stream_position()? - pos) < byte_len as u64 {
        let k: u16 = BinRead::read_options(reader, endian, ())?;
        let v: u64 = BinRead::read_options(reader, endian, ())?;
        parsed.insert(k, v);
    }
    Ok(parsed)
}

#[binrw::writer(writer, endian)]
fn write_int_map(s: &BTreeMap<u16, u64>) -> BinResult<()> {
    let byte_len = s.len() * (2 + 8);
    (byte_len as u32).write_options(writer, endian, ())?;
    for (k, v) in s {
        k.write_options(writer, endian, ())?;
        v.write_options(writer, endian, ())?;
    }
    Ok(())
}

#[binrw::parser(reader, endian)]
fn parse_index_entries() -> BinResult<Vec<MessageIndexEntry>> {
    let mut parsed = Vec::new();
    let byte_len: u32 = BinRead::read_options(reader, endian, ())?;
    let pos = reader.stream_position()?;
    while (reader.stream_position()? - pos) < byte_len as u64 {
        parsed.push(MessageIndexEntry::read_options(reader, endian, ())?);
    }
    Ok(parsed)
}

#[binrw::writer(writer, endian)]
fn write_index_entries(v: &Vec<MessageIndexEntry>) -> BinResult<()> {
    let byte_len = v.len() * (8 + 8);
    (byte_len as u32).write_options(writer, endian, ())?;
    for e in v {
        e.write_options(writer, endian, ())?;
    }
    Ok(())
}

/// `Header` (opcode `0x01`). The first record in every data section.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct Header {
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub profile: String,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub library: String,
}

/// `Footer` (opcode `0x02`). The last record before the trailing magic.
///
/// `Footer` does not go through the usual [`BinRead`]/[`BinWrite`] machinery when serialized by
/// the writer, because `summary_crc` covers bytes that include this record's own first two
/// fields; see [`crate::writer`].
#[binrw::binrw]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[brw(little)]
pub struct Footer {
    pub summary_start: u64,
    pub summary_offset_start: u64,
    pub summary_crc: u32,
}

/// Fixed-size header of a `Schema` record (opcode `0x03`); the schema's `data` payload follows
/// as a length-prefixed byte string and is kept out of this struct so it can be borrowed without
/// copying.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct SchemaHeader {
    pub id: u16,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub name: String,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub encoding: String,
}

/// `Channel` (opcode `0x04`).
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct Channel {
    pub id: u16,
    pub schema_id: u16,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub topic: String,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub message_encoding: String,
    #[br(parse_with = parse_string_map)]
    #[bw(write_with = write_string_map)]
    pub metadata: BTreeMap<String, String>,
}

/// Fixed-size header of a `Message` record (opcode `0x05`); the message payload is the remainder
/// of the record and is not represented here.
#[binrw::binrw]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct MessageHeader {
    pub channel_id: u16,
    pub sequence: u32,
    pub log_time: u64,
    pub publish_time: u64,
}

impl MessageHeader {
    /// Number of bytes this header occupies on the wire (not including the message payload).
    pub const SERIALIZED_LEN: u64 = 2 + 4 + 8 + 8;
}

/// Fixed-size header of a `Chunk` record (opcode `0x06`); `records` (the compressed or raw
/// payload) follows as a length-prefixed byte string.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct ChunkHeader {
    pub message_start_time: u64,
    pub message_end_time: u64,
    pub uncompressed_size: u64,
    pub uncompressed_crc: u32,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub compression: String,
    pub compressed_size: u64,
}

/// One `(log_time, offset)` pair inside a [`MessageIndex`].
#[binrw::binrw]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[brw(little)]
pub struct MessageIndexEntry {
    pub log_time: u64,
    /// Byte offset of the indexed `Message` record within the chunk's *decompressed* bytes.
    pub offset: u64,
}

/// `MessageIndex` (opcode `0x07`). Emitted once per channel immediately after the `Chunk` it
/// indexes.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct MessageIndex {
    pub channel_id: u16,
    #[br(parse_with = parse_index_entries)]
    #[bw(write_with = write_index_entries)]
    pub records: Vec<MessageIndexEntry>,
}

/// `ChunkIndex` (opcode `0x08`). Summary-section record locating one chunk and its message
/// indexes.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct ChunkIndex {
    pub message_start_time: u64,
    pub message_end_time: u64,
    pub chunk_start_offset: u64,
    pub chunk_length: u64,
    #[br(parse_with = parse_int_map)]
    #[bw(write_with = write_int_map)]
    pub message_index_offsets: BTreeMap<u16, u64>,
    pub message_index_length: u64,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub compression: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl ChunkIndex {
    /// Byte offset, from the start of the file, at which the chunk's (possibly compressed)
    /// `records` payload begins.
    pub fn compressed_data_offset(&self) -> McapResult<u64> {
        self.chunk_start_offset
            .checked_add(
                RECORD_HEADER_LEN
                    + 8 // message_start_time
                    + 8 // message_end_time
                    + 8 // uncompressed_size
                    + 4 // uncompressed_crc
                    + 4 + self.compression.len() as u64 // compression string
                    + 8, // compressed_size
            )
            .ok_or(McapError::BadChunkStartOffset(self.chunk_start_offset))
    }
}

/// Fixed-size header of an `Attachment` record (opcode `0x09`); `data` follows as a
/// length-prefixed byte string, then a trailing `u32` CRC over everything preceding it in the
/// record.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct AttachmentHeader {
    pub log_time: u64,
    pub create_time: u64,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub name: String,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub content_type: String,
}

/// `AttachmentIndex` (opcode `0x0A`).
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct AttachmentIndex {
    pub offset: u64,
    pub length: u64,
    pub log_time: u64,
    pub create_time: u64,
    pub data_size: u64,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub name: String,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub content_type: String,
}

/// `Statistics` (opcode `0x0B`). One per file, written once at close time.
#[binrw::binrw]
#[derive(Debug, Default, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct Statistics {
    pub message_count: u64,
    pub schema_count: u16,
    pub channel_count: u32,
    pub attachment_count: u32,
    pub metadata_count: u32,
    pub chunk_count: u32,
    pub message_start_time: u64,
    pub message_end_time: u64,
    #[br(parse_with = parse_int_map)]
    #[bw(write_with = write_int_map)]
    pub channel_message_counts: BTreeMap<u16, u64>,
}

/// `Metadata` (opcode `0x0C`). An arbitrary name/value bag, unrelated to any channel.
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct Metadata {
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub name: String,
    #[br(parse_with = parse_string_map)]
    #[bw(write_with = write_string_map)]
    pub metadata: BTreeMap<String, String>,
}

/// `MetadataIndex` (opcode `0x0D`).
#[binrw::binrw]
#[derive(Debug, Clone, Eq, PartialEq)]
#[brw(little)]
pub struct MetadataIndex {
    pub offset: u64,
    pub length: u64,
    #[br(map = |s: McapString| s.inner)]
    #[bw(write_with = write_string)]
    pub name: String,
}

/// `SummaryOffset` (opcode `0x0E`). Points at one contiguous run of same-opcode records within
/// the summary section.
#[binrw::binrw]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[brw(little)]
pub struct SummaryOffset {
    pub group_opcode: u8,
    pub group_start: u64,
    pub group_length: u64,
}

/// `DataEnd` (opcode `0x0F`). Marks the end of the data section.
#[binrw::binrw]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[brw(little)]
pub struct DataEnd {
    pub data_section_crc: u32,
}

/// A parsed record together with its borrowed payload, if any.
///
/// Large binary payloads (schema definitions, message data, chunk bodies, attachment data) are
/// returned as [`Cow::Borrowed`] slices into the input whenever the source allows it, so reading
/// a record does not imply copying its data.
#[derive(Debug, Clone)]
pub enum Record<'a> {
    Header(Header),
    Footer(Footer),
    Schema {
        header: SchemaHeader,
        data: Cow<'a, [u8]>,
    },
    Channel(Channel),
    Message {
        header: MessageHeader,
        data: Cow<'a, [u8]>,
    },
    Chunk {
        header: ChunkHeader,
        data: Cow<'a, [u8]>,
    },
    MessageIndex(MessageIndex),
    ChunkIndex(ChunkIndex),
    Attachment {
        header: AttachmentHeader,
        data: Cow<'a, [u8]>,
        crc: u32,
    },
    AttachmentIndex(AttachmentIndex),
    Statistics(Statistics),
    Metadata(Metadata),
    MetadataIndex(MetadataIndex),
    SummaryOffset(SummaryOffset),
    DataEnd(DataEnd),
    /// A record with an opcode this crate does not know how to interpret. Carried along
    /// unmodified so that a reader copying records elsewhere can round-trip it.
    Unknown { opcode: u8, data: Cow<'a, [u8]> },
}

impl Record<'_> {
    /// The opcode this record was (or would be) framed with.
    pub fn opcode(&self) -> u8 {
        match self {
            Record::Header(_) => op::HEADER,
            Record::Footer(_) => op::FOOTER,
            Record::Schema { .. } => op::SCHEMA,
            Record::Channel(_) => op::CHANNEL,
            Record::Message { .. } => op::MESSAGE,
            Record::Chunk { .. } => op::CHUNK,
            Record::MessageIndex(_) => op::MESSAGE_INDEX,
            Record::ChunkIndex(_) => op::CHUNK_INDEX,
            Record::Attachment { .. } => op::ATTACHMENT,
            Record::AttachmentIndex(_) => op::ATTACHMENT_INDEX,
            Record::Statistics(_) => op::STATISTICS,
            Record::Metadata(_) => op::METADATA,
            Record::MetadataIndex(_) => op::METADATA_INDEX,
            Record::SummaryOffset(_) => op::SUMMARY_OFFSET,
            Record::DataEnd(_) => op::DATA_END,
            Record::Unknown { opcode, .. } => *opcode,
        }
    }

    /// Returns an owned copy of this record with no outstanding borrows.
    pub fn into_owned(self) -> Record<'static> {
        match self {
            Record::Header(r) => Record::Header(r),
            Record::Footer(r) => Record::Footer(r),
            Record::Schema { header, data } => Record::Schema {
                header,
                data: Cow::Owned(data.into_owned()),
            },
            Record::Channel(r) => Record::Channel(r),
            Record::Message { header, data } => Record::Message {
                header,
                data: Cow::Owned(data.into_owned()),
            },
            Record::Chunk { header, data } => Record::Chunk {
                header,
                data: Cow::Owned(data.into_owned()),
            },
            Record::MessageIndex(r) => Record::MessageIndex(r),
            Record::ChunkIndex(r) => Record::ChunkIndex(r),
            Record::Attachment { header, data, crc } => Record::Attachment {
                header,
                data: Cow::Owned(data.into_owned()),
                crc,
            },
            Record::AttachmentIndex(r) => Record::AttachmentIndex(r),
            Record::Statistics(r) => Record::Statistics(r),
            Record::Metadata(r) => Record::Metadata(r),
            Record::MetadataIndex(r) => Record::MetadataIndex(r),
            Record::SummaryOffset(r) => Record::SummaryOffset(r),
            Record::DataEnd(r) => Record::DataEnd(r),
            Record::Unknown { opcode, data } => Record::Unknown {
                opcode,
                data: Cow::Owned(data.into_owned()),
            },
        }
    }
}

/// Parses a record's content from `body`, given the opcode already read from its framing.
///
/// `body` must be exactly `content_length` bytes; a shortfall surfaces as a [`binrw::Error`]
/// from the underlying field reads, and trailing bytes beyond what the record's fields consume
/// are silently ignored for forward-compatible fields (none are currently defined).
pub fn parse_record(opcode: u8, body: &[u8]) -> McapResult<Record<'_>> {
    use byteorder::{ReadBytesExt, LE};

    macro_rules! read {
        ($ty:ty) => {{
            let mut cur = Cursor::new(body);
            <$ty as BinRead>::read_options(&mut cur, binrw::Endian::Little, ())?
        }};
    }

    Ok(match opcode {
        op::HEADER => Record::Header(read!(Header)),
        op::FOOTER => Record::Footer(read!(Footer)),
        op::SCHEMA => {
            let mut cur = Cursor::new(body);
            let header: SchemaHeader = BinRead::read_options(&mut cur, binrw::Endian::Little, ())?;
            let data_len = cur.read_u32::<LE>()? as usize;
            let rest = &body[cur.position() as usize..];
            if data_len > rest.len() {
                return Err(McapError::BadSchemaLength {
                    header: data_len as u32,
                    available: rest.len() as u32,
                });
            }
            Record::Schema {
                header,
                data: Cow::Borrowed(&rest[..data_len]),
            }
        }
        op::CHANNEL => Record::Channel(read!(Channel)),
        op::MESSAGE => {
            let mut cur = Cursor::new(body);
            let header: MessageHeader = BinRead::read_options(&mut cur, binrw::Endian::Little, ())?;
            let data = &body[cur.position() as usize..];
            Record::Message {
                header,
                data: Cow::Borrowed(data),
            }
        }
        op::CHUNK => {
            let mut cur = Cursor::new(body);
            let header: ChunkHeader = BinRead::read_options(&mut cur, binrw::Endian::Little, ())?;
            let rest = &body[cur.position() as usize..];
            if header.compressed_size > rest.len() as u64 {
                return Err(McapError::BadChunkLength {
                    header: header.compressed_size,
                    available: rest.len() as u64,
                });
            }
            Record::Chunk {
                header,
                data: Cow::Borrowed(&rest[..header.compressed_size as usize]),
            }
        }
        op::MESSAGE_INDEX => Record::MessageIndex(read!(MessageIndex)),
        op::CHUNK_INDEX => Record::ChunkIndex(read!(ChunkIndex)),
        op::ATTACHMENT => {
            let mut cur = Cursor::new(body);
            let header: AttachmentHeader =
                BinRead::read_options(&mut cur, binrw::Endian::Little, ())?;
            let data_len = cur.read_u64::<LE>()? as usize;
            let data_start = cur.position() as usize;
            if data_start + data_len + 4 > body.len() {
                return Err(McapError::BadChunkLength {
                    header: data_len as u64,
                    available: (body.len() - data_start) as u64,
                });
            }
            let data = &body[data_start..data_start + data_len];
            let crc = u32::from_le_bytes(
                body[data_start + data_len..data_start + data_len + 4]
                    .try_into()
                    .expect("exactly 4 bytes"),
            );
            Record::Attachment {
                header,
                data: Cow::Borrowed(data),
                crc,
            }
        }
        op::ATTACHMENT_INDEX => Record::AttachmentIndex(read!(AttachmentIndex)),
        op::STATISTICS => Record::Statistics(read!(Statistics)),
        op::METADATA => Record::Metadata(read!(Metadata)),
        op::METADATA_INDEX => Record::MetadataIndex(read!(MetadataIndex)),
        op::SUMMARY_OFFSET => Record::SummaryOffset(read!(SummaryOffset)),
        op::DATA_END => Record::DataEnd(read!(DataEnd)),
        other => {
            log::debug!("skipping record with unrecognized opcode {other:#04x} ({} bytes)", body.len());
            Record::Unknown {
                opcode: other,
                data: Cow::Borrowed(body),
            }
        }
    })
}

/// Serializes `record` to `out`, writing its opcode and length framing as well as its content.
///
/// `Unknown` records are re-emitted verbatim under their original opcode, which is how a tool
/// that doesn't understand a future record kind can still copy it through untouched.
pub fn write_record<W: std::io::Write>(out: &mut W, record: &Record<'_>) -> McapResult<()> {
    use byteorder::WriteBytesExt;

    fn framed<W: std::io::Write>(out: &mut W, opcode: u8, body: &[u8]) -> McapResult<()> {
        out.write_u8(opcode)?;
        out.write_all(&(body.len() as u64).to_le_bytes())?;
        out.write_all(body)?;
        Ok(())
    }

    macro_rules! encode {
        ($v:expr) => {{
            let mut buf = Vec::new();
            $v.write_options(&mut Cursor::new(&mut buf), binrw::Endian::Little, ())?;
            buf
        }};
    }

    match record {
        Record::Header(h) => framed(out, op::HEADER, &encode!(h))?,
        Record::Footer(f) => framed(out, op::FOOTER, &encode!(f))?,
        Record::Schema { header, data } => {
            let mut body = encode!(header);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            framed(out, op::SCHEMA, &body)?
        }
        Record::Channel(c) => framed(out, op::CHANNEL, &encode!(c))?,
        Record::Message { header, data } => {
            let mut body = encode!(header);
            body.extend_from_slice(data);
            framed(out, op::MESSAGE, &body)?
        }
        Record::Chunk { header, data } => {
            let mut body = encode!(header);
            body.extend_from_slice(data);
            framed(out, op::CHUNK, &body)?
        }
        Record::MessageIndex(mi) => framed(out, op::MESSAGE_INDEX, &encode!(mi))?,
        Record::ChunkIndex(ci) => framed(out, op::CHUNK_INDEX, &encode!(ci))?,
        Record::Attachment { header, data, crc } => {
            let mut body = encode!(header);
            body.extend_from_slice(&(data.len() as u64).to_le_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(&crc.to_le_bytes());
            framed(out, op::ATTACHMENT, &body)?
        }
        Record::AttachmentIndex(ai) => framed(out, op::ATTACHMENT_INDEX, &encode!(ai))?,
        Record::Statistics(s) => framed(out, op::STATISTICS, &encode!(s))?,
        Record::Metadata(m) => framed(out, op::METADATA, &encode!(m))?,
        Record::MetadataIndex(mi) => framed(out, op::METADATA_INDEX, &encode!(mi))?,
        Record::SummaryOffset(so) => framed(out, op::SUMMARY_OFFSET, &encode!(so))?,
        Record::DataEnd(de) => framed(out, op::DATA_END, &encode!(de))?,
        Record::Unknown { opcode, data } => framed(out, *opcode, data)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let header = Header {
            profile: "ros1".into(),
            library: "test".into(),
        };
        let mut buf = Vec::new();
        header
            .write_options(&mut Cursor::new(&mut buf), binrw::Endian::Little, ())
            .unwrap();
        let back: Header = BinRead::read_options(&mut Cursor::new(&buf), binrw::Endian::Little, ())
            .unwrap();
        assert_eq!(header, back);
    }

    #[test]
    fn message_header_len_matches_encoding() {
        let header = MessageHeader {
            channel_id: 7,
            sequence: 1,
            log_time: 10,
            publish_time: 10,
        };
        let mut buf = Vec::new();
        header
            .write_options(&mut Cursor::new(&mut buf), binrw::Endian::Little, ())
            .unwrap();
        assert_eq!(buf.len() as u64, MessageHeader::SERIALIZED_LEN);
    }

    #[test]
    fn channel_round_trip_via_record() {
        let channel = Channel {
            id: 7,
            schema_id: 1,
            topic: "/t".into(),
            message_encoding: "proto".into(),
            metadata: BTreeMap::from([("a".to_string(), "b".to_string())]),
        };
        let mut buf = Vec::new();
        write_record(&mut buf, &Record::Channel(channel.clone())).unwrap();
        // skip opcode + length framing
        let body = &buf[9..];
        match parse_record(op::CHANNEL, body).unwrap() {
            Record::Channel(parsed) => assert_eq!(parsed, channel),
            other => panic!("expected Channel, got {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_round_trips() {
        let mut buf = Vec::new();
        write_record(
            &mut buf,
            &Record::Unknown {
                opcode: 0x99,
                data: Cow::Borrowed(&[]),
            },
        )
        .unwrap();
        assert_eq!(buf, vec![0x99, 0, 0, 0, 0, 0, 0, 0, 0]);
    }
}
