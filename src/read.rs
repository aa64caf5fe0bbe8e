//! The streaming reader (C5): pulls messages out of the lexer in file order, tracking channels
//! and schemas as they're declared and filtering by topic and time window.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use crate::channels::ChannelAccumulator;
use crate::error::McapResult;
use crate::lexer::{Lexer, LexerOptions};
use crate::records::Record;
use crate::{Channel, Message};

/// Options controlling which messages a [`StreamReader`] yields.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Topics to include. An empty set means "all topics".
    pub topics: HashSet<String>,
    /// Inclusive lower bound on `log_time`, in nanoseconds.
    pub start: u64,
    /// Exclusive upper bound on `log_time`, in nanoseconds. `u64::MAX` means unbounded.
    pub end: u64,
    /// Validate chunk CRCs while descending into them.
    pub validate_crc: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self {
            topics: HashSet::new(),
            start: 0,
            end: u64::MAX,
            validate_crc: true,
        }
    }

    pub fn topics<I: IntoIterator<Item = String>>(mut self, topics: I) -> Self {
        self.topics = topics.into_iter().collect();
        self
    }

    pub fn start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    pub fn end(mut self, end: u64) -> Self {
        self.end = end;
        self
    }

    pub fn validate_crc(mut self, validate: bool) -> Self {
        self.validate_crc = validate;
        self
    }

    fn accepts(&self, topic: &str, log_time: u64) -> bool {
        (self.topics.is_empty() || self.topics.contains(topic))
            && log_time >= self.start
            && log_time < self.end
    }
}

/// Reads an MCAP file's data section from start to end, in the order records appear on disk.
///
/// This does *not* guarantee log-time order across chunk boundaries; callers that need ordered
/// playback should use [`IndexedReader`](crate::indexed::IndexedReader) instead. Messages whose
/// channel hasn't been declared yet are an error (they can't be decoded); [`StreamReader`] has no
/// access to the summary, so it can only know about channels it has already seen.
pub struct StreamReader<R> {
    lexer: Lexer<R>,
    channels: ChannelAccumulator<'static>,
    options: ReadOptions,
    done: bool,
}

impl<R: Read> StreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, ReadOptions::new())
    }

    pub fn with_options(reader: R, options: ReadOptions) -> Self {
        let lexer = Lexer::new(
            reader,
            LexerOptions::default()
                .validate_crc(options.validate_crc)
                .emit_chunks(false),
        );
        Self {
            lexer,
            channels: ChannelAccumulator::default(),
            options,
            done: false,
        }
    }

    /// The header, if it's been read yet (it's always the first record).
    pub fn channel(&self, channel_id: u16) -> Option<Arc<Channel<'static>>> {
        self.channels.get(channel_id)
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = McapResult<(Arc<Channel<'static>>, Message<'static>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let record = match self.lexer.next_record() {
                Some(Ok(r)) => r,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            match record {
                Record::Schema { header, data } => {
                    if let Err(e) = self.channels.add_schema(header, data) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                Record::Channel(chan) => {
                    if let Err(e) = self.channels.add_channel(chan) {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                Record::Message { header, data } => {
                    let channel = match self.channels.get(header.channel_id) {
                        Some(c) => c,
                        None => {
                            log::debug!(
                                "dropping message with sequence {} on undeclared channel {}",
                                header.sequence,
                                header.channel_id
                            );
                            continue;
                        }
                    };
                    if !self.options.accepts(&channel.topic, header.log_time) {
                        continue;
                    }
                    let message = Message {
                        channel: channel.clone(),
                        sequence: header.sequence,
                        log_time: header.log_time,
                        publish_time: header.publish_time,
                        data,
                    };
                    return Some(Ok((channel, message)));
                }
                Record::Footer(_) => {
                    self.done = true;
                    return None;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{write_record, Channel as RawChannel, Header, MessageHeader};
    use crate::MAGIC;
    use std::borrow::Cow;
    use std::collections::BTreeMap;

    fn sample_file() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        write_record(
            &mut out,
            &Record::Header(Header {
                profile: "".into(),
                library: "".into(),
            }),
        )
        .unwrap();
        write_record(
            &mut out,
            &Record::Channel(RawChannel {
                id: 7,
                schema_id: 0,
                topic: "/t".into(),
                message_encoding: "json".into(),
                metadata: BTreeMap::new(),
            }),
        )
        .unwrap();
        for (seq, t) in [(1u32, 10u64), (2, 11), (3, 12)] {
            write_record(
                &mut out,
                &Record::Message {
                    header: MessageHeader {
                        channel_id: 7,
                        sequence: seq,
                        log_time: t,
                        publish_time: t,
                    },
                    data: Cow::Borrowed(b"x"),
                },
            )
            .unwrap();
        }
        write_record(&mut out, &Record::Footer(Default::default())).unwrap();
        out.extend_from_slice(&MAGIC);
        out
    }

    #[test]
    fn yields_messages_in_file_order() {
        let bytes = sample_file();
        let reader = StreamReader::new(std::io::Cursor::new(bytes));
        let messages: Vec<_> = reader.map(|r| r.unwrap().1.sequence).collect();
        assert_eq!(messages, vec![1, 2, 3]);
    }

    #[test]
    fn filters_by_time_window() {
        let bytes = sample_file();
        let reader = StreamReader::with_options(
            std::io::Cursor::new(bytes),
            ReadOptions::new().start(11).end(12),
        );
        let messages: Vec<_> = reader.map(|r| r.unwrap().1.sequence).collect();
        assert_eq!(messages, vec![2]);
    }

    #[test]
    fn crc_corruption_in_chunk_is_detected() {
        // End-to-end scenario 3: a chunk's uncompressed CRC is included, then one byte inside
        // its records payload is flipped. A validating streaming reader must surface
        // `BadChunkCrc` once it descends into that chunk, having already yielded the Header.
        use crate::error::McapError;

        let mut inner = Vec::new();
        write_record(
            &mut inner,
            &Record::Message {
                header: MessageHeader {
                    channel_id: 7,
                    sequence: 1,
                    log_time: 10,
                    publish_time: 10,
                },
                data: Cow::Borrowed(b"hello"),
            },
        )
        .unwrap();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&inner);
        let crc = hasher.finalize();

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        write_record(
            &mut out,
            &Record::Header(Header {
                profile: "".into(),
                library: "".into(),
            }),
        )
        .unwrap();

        // The chunk's `data` bytes are `inner` verbatim, written last within the Chunk record;
        // record their exact position so the corruption below lands inside them.
        let data_start = out.len() + crate::records::RECORD_HEADER_LEN as usize
            + 8 /* message_start_time */
            + 8 /* message_end_time */
            + 8 /* uncompressed_size */
            + 4 /* uncompressed_crc */
            + 4 /* compression string length prefix, empty string */
            + 8 /* compressed_size */;
        write_record(
            &mut out,
            &Record::Chunk {
                header: crate::records::ChunkHeader {
                    message_start_time: 10,
                    message_end_time: 10,
                    uncompressed_size: inner.len() as u64,
                    uncompressed_crc: crc,
                    compression: "".into(),
                    compressed_size: inner.len() as u64,
                },
                data: Cow::Owned(inner.clone()),
            },
        )
        .unwrap();
        write_record(&mut out, &Record::Footer(Default::default())).unwrap();
        out.extend_from_slice(&MAGIC);

        assert_eq!(&out[data_start..data_start + inner.len()], &inner[..]);
        out[data_start] ^= 0xFF;

        let reader = StreamReader::new(std::io::Cursor::new(out));
        let results: Vec<_> = reader.collect();
        // The Header isn't surfaced by this message-only iterator; the very first item pulled
        // is the chunk descent, which now fails its CRC check.
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(McapError::BadChunkCrc { .. })));
    }

    #[test]
    fn empty_file_yields_nothing() {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        write_record(
            &mut out,
            &Record::Header(Header {
                profile: "ros1".into(),
                library: "".into(),
            }),
        )
        .unwrap();
        write_record(&mut out, &Record::Footer(Default::default())).unwrap();
        out.extend_from_slice(&MAGIC);

        let reader = StreamReader::new(std::io::Cursor::new(out));
        let messages: Vec<_> = reader.collect::<McapResult<Vec<_>>>().unwrap();
        assert!(messages.is_empty());
    }
}
