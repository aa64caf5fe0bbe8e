//! The stateful tokenizer (C4) that turns a byte stream into a sequence of records.
//!
//! A [`Lexer`] drives itself through `magic → record loop → magic`, optionally descending
//! transparently into [`Chunk`](crate::records::Record::Chunk) payloads so callers see a flat
//! stream of `Schema`/`Channel`/`Message` records regardless of whether they were chunked.

use std::io::Read;

use byteorder::{ReadBytesExt, LE};
use enumset::{enum_set, EnumSet, EnumSetType};

use crate::chunk::decompress_chunk;
use crate::error::{McapError, McapResult};
use crate::records::{self, op, parse_record, Record};
use crate::MAGIC;

/// Structural toggles for a [`Lexer`]. More may be added in future releases.
#[derive(EnumSetType, Debug)]
enum Flag {
    /// Skip reading and validating the leading magic bytes. Used when lexing the already-sliced
    /// contents of a chunk.
    SkipMagic,
    /// Skip validating each chunk's `uncompressed_crc` as it's decompressed.
    SkipCrcValidation,
    /// Surface `Chunk` tokens themselves instead of transparently descending into them. Used by
    /// readers that locate chunks via the summary and decompress them on their own terms.
    EmitChunks,
}

#[derive(Debug, Clone)]
pub struct LexerOptions {
    flags: EnumSet<Flag>,
}

impl Default for LexerOptions {
    fn default() -> Self {
        Self {
            flags: enum_set!(),
        }
    }
}

impl LexerOptions {
    fn with_flag(mut self, flag: Flag, v: bool) -> Self {
        if v {
            self.flags.insert(flag);
        } else {
            self.flags.remove(flag);
        }
        self
    }

    pub fn skip_magic(self, v: bool) -> Self {
        self.with_flag(Flag::SkipMagic, v)
    }
    pub fn validate_crc(self, v: bool) -> Self {
        self.with_flag(Flag::SkipCrcValidation, !v)
    }
    pub fn emit_chunks(self, v: bool) -> Self {
        self.with_flag(Flag::EmitChunks, v)
    }

    fn skip_magic_set(&self) -> bool {
        self.flags.contains(Flag::SkipMagic)
    }
    fn validate_crc_set(&self) -> bool {
        !self.flags.contains(Flag::SkipCrcValidation)
    }
    fn emit_chunks_set(&self) -> bool {
        self.flags.contains(Flag::EmitChunks)
    }
}

enum State {
    Start,
    Data,
    /// Lexing the decompressed bytes of a chunk; `pos` is the read cursor into `buffer`.
    InChunk { buffer: Vec<u8>, pos: usize },
    ExpectEndMagic,
    End,
    Lost,
}

/// Pulls one record at a time out of a [`Read`] implementation.
pub struct Lexer<R> {
    reader: R,
    state: State,
    options: LexerOptions,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R, options: LexerOptions) -> Self {
        let state = if options.skip_magic_set() {
            State::Data
        } else {
            State::Start
        };
        Self {
            reader,
            state,
            options,
        }
    }

    /// Reads the next record, returning `None` at the trailing magic (end of stream).
    pub fn next_record(&mut self) -> Option<McapResult<Record<'static>>> {
        loop {
            match &mut self.state {
                State::Start => {
                    let mut magic = [0u8; 8];
                    if let Err(e) = self.reader.read_exact(&mut magic) {
                        self.state = State::Lost;
                        return Some(Err(e.into()));
                    }
                    if magic != MAGIC {
                        self.state = State::Lost;
                        return Some(Err(McapError::BadMagic));
                    }
                    self.state = State::Data;
                }
                State::Data => match self.read_outer_record() {
                    Ok(Some(Record::Chunk { header, data })) => {
                        if self.options.emit_chunks_set() {
                            return Some(Ok(Record::Chunk { header, data }));
                        }
                        let uncompressed_crc = if self.options.validate_crc_set() {
                            header.uncompressed_crc
                        } else {
                            0
                        };
                        match decompress_chunk(
                            &header.compression,
                            &data,
                            header.uncompressed_size,
                            uncompressed_crc,
                        ) {
                            Ok(buffer) => self.state = State::InChunk { buffer, pos: 0 },
                            Err(e) => {
                                self.state = State::Lost;
                                return Some(Err(e));
                            }
                        }
                    }
                    Ok(Some(Record::Footer(footer))) => {
                        self.state = State::ExpectEndMagic;
                        return Some(Ok(Record::Footer(footer)));
                    }
                    Ok(Some(record)) => return Some(Ok(record)),
                    Ok(None) => {
                        self.state = State::Lost;
                        return Some(Err(McapError::UnexpectedEof));
                    }
                    Err(e) => {
                        self.state = State::Lost;
                        return Some(Err(e));
                    }
                },
                State::InChunk { buffer, pos } => {
                    if *pos >= buffer.len() {
                        self.state = State::Data;
                        continue;
                    }
                    match read_framed(&buffer[*pos..]) {
                        Ok((opcode, body, consumed)) => {
                            if opcode == op::CHUNK {
                                self.state = State::Lost;
                                return Some(Err(McapError::NestedChunk));
                            }
                            let record = match parse_record(opcode, body) {
                                Ok(r) => r.into_owned(),
                                Err(e) => {
                                    self.state = State::Lost;
                                    return Some(Err(e));
                                }
                            };
                            *pos += consumed;
                            return Some(Ok(record));
                        }
                        Err(e) => {
                            self.state = State::Lost;
                            return Some(Err(e));
                        }
                    }
                }
                State::ExpectEndMagic => {
                    let mut magic = [0u8; 8];
                    let result = self.reader.read_exact(&mut magic);
                    self.state = State::End;
                    return match result {
                        Ok(()) if magic == MAGIC => None,
                        Ok(()) => Some(Err(McapError::BadMagic)),
                        Err(e) => Some(Err(e.into())),
                    };
                }
                State::End => return None,
                State::Lost => return Some(Err(McapError::Exhausted)),
            }
        }
    }

    /// Reads one opcode-framed record straight off `self.reader`. `Ok(None)` means the stream
    /// ended with no bytes at all where a record was expected (a truncated file).
    fn read_outer_record(&mut self) -> McapResult<Option<Record<'static>>> {
        let mut opcode_buf = [0u8; 1];
        match self.reader.read(&mut opcode_buf)? {
            0 => return Ok(None),
            _ => {}
        }
        let opcode = opcode_buf[0];
        let len = self.reader.read_u64::<LE>()?;
        let mut body = vec![0u8; len as usize];
        self.reader.read_exact(&mut body)?;
        Ok(Some(parse_record(opcode, &body)?.into_owned()))
    }
}

/// Reads one opcode-framed record from the front of `buf`, returning `(opcode, body, total
/// bytes consumed including framing)`.
pub(crate) fn read_framed(buf: &[u8]) -> McapResult<(u8, &[u8], usize)> {
    if buf.len() < records::RECORD_HEADER_LEN as usize {
        return Err(McapError::ShortBuffer);
    }
    let opcode = buf[0];
    let len = u64::from_le_bytes(buf[1..9].try_into().expect("exactly 8 bytes")) as usize;
    let start = records::RECORD_HEADER_LEN as usize;
    if buf.len() < start + len {
        return Err(McapError::ShortBuffer);
    }
    Ok((opcode, &buf[start..start + len], start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{write_record, Header};
    use std::io::Cursor;

    fn mcap_bytes(records: &[Record]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        for r in records {
            write_record(&mut out, r).unwrap();
        }
        out.extend_from_slice(&MAGIC);
        out
    }

    #[test]
    fn header_then_footer() {
        let bytes = mcap_bytes(&[
            Record::Header(Header {
                profile: "ros1".into(),
                library: "".into(),
            }),
            Record::Footer(Default::default()),
        ]);
        let mut lexer = Lexer::new(Cursor::new(bytes), LexerOptions::default());
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Header(_)
        ));
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Footer(_)
        ));
        assert!(lexer.next_record().is_none());
    }

    #[test]
    fn bad_start_magic_errors() {
        let mut lexer = Lexer::new(Cursor::new(vec![0u8; 8]), LexerOptions::default());
        assert!(matches!(
            lexer.next_record().unwrap().unwrap_err(),
            McapError::BadMagic
        ));
    }

    #[test]
    fn nested_chunk_is_rejected() {
        // Build a Chunk whose (uncompressed) records payload is itself a Chunk record. The
        // lexer must reject this while descending into the outer chunk rather than recursing.
        let mut inner_records = Vec::new();
        write_record(
            &mut inner_records,
            &Record::Chunk {
                header: records::ChunkHeader {
                    message_start_time: 0,
                    message_end_time: 0,
                    uncompressed_size: 0,
                    uncompressed_crc: 0,
                    compression: "".into(),
                    compressed_size: 0,
                },
                data: std::borrow::Cow::Borrowed(&[]),
            },
        )
        .unwrap();

        let bytes = mcap_bytes(&[
            Record::Header(Header {
                profile: "".into(),
                library: "".into(),
            }),
            Record::Chunk {
                header: records::ChunkHeader {
                    message_start_time: 0,
                    message_end_time: 0,
                    uncompressed_size: inner_records.len() as u64,
                    uncompressed_crc: 0,
                    compression: "".into(),
                    compressed_size: inner_records.len() as u64,
                },
                data: std::borrow::Cow::Borrowed(&inner_records),
            },
        ]);
        let mut lexer = Lexer::new(Cursor::new(bytes), LexerOptions::default());
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Header(_)
        ));
        assert!(matches!(
            lexer.next_record().unwrap().unwrap_err(),
            McapError::NestedChunk
        ));
    }

    #[test]
    fn unknown_opcode_is_skipped_by_nothing() {
        // Unknown opcodes come back as `Unknown` tokens rather than being silently dropped by the
        // lexer itself; it's the streaming reader's job to ignore kinds it doesn't care about.
        let bytes = mcap_bytes(&[
            Record::Header(Header {
                profile: "".into(),
                library: "".into(),
            }),
            Record::Unknown {
                opcode: 0x99,
                data: std::borrow::Cow::Borrowed(&[]),
            },
            Record::Footer(Default::default()),
        ]);
        let mut lexer = Lexer::new(Cursor::new(bytes), LexerOptions::default());
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Header(_)
        ));
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Unknown { opcode: 0x99, .. }
        ));
        assert!(matches!(
            lexer.next_record().unwrap().unwrap(),
            Record::Footer(_)
        ));
    }
}
