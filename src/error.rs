//! The error type returned by fallible operations in this crate.

use thiserror::Error;

/// An error that can occur while reading or writing MCAP data.
#[derive(Error, Debug)]
pub enum McapError {
    #[error("Bad magic number")]
    BadMagic,
    #[error("Expected more bytes than the buffer had remaining")]
    ShortBuffer,
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("Unexpected record kind {0:?} for the current state")]
    UnexpectedToken(String),
    #[error("Index points at data that doesn't match what it describes")]
    BadIndex,
    #[error("Chunk ran off the end of the file")]
    BadChunkLength { header: u64, available: u64 },
    #[error("Schema content ran off the end of its record")]
    BadSchemaLength { header: u32, available: u32 },
    #[error("Chunk's start offset of {0} is too large")]
    BadChunkStartOffset(u64),
    #[error("Record parse error")]
    Parse(#[from] binrw::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Schema ID {1} referenced by channel {0:?} is not defined")]
    UnknownSchema(String, u16),
    #[error("Channel ID {1} referenced by message with sequence {0} is not defined")]
    UnknownChannel(u32, u16),
    #[error("Schema with ID 0 is not allowed - ID 0 is reserved for 'no schema'")]
    InvalidSchemaId,
    #[error("Channel {0:?} was added more than once with different content")]
    ConflictingChannels(String),
    #[error("Schema {0:?} was added more than once with different content")]
    ConflictingSchemas(String),
    #[error("Too many schemas - schema IDs are u16, and 0 is reserved")]
    TooManySchemas,
    #[error("Too many channels - channel IDs are u16")]
    TooManyChannels,
    #[error("Unsupported compression format {0:?}")]
    UnsupportedCompression(String),
    #[error("Decompression error")]
    DecompressionError(#[source] std::io::Error),
    #[error("Chunk's CRC failed: expected {saved:08X}, calculated {calculated:08X}")]
    BadChunkCrc { saved: u32, calculated: u32 },
    #[error("Uncompressed chunk size {saved} does not match expected size {calculated}")]
    BadChunkSize { saved: u64, calculated: u64 },
    #[error("Attachment's CRC failed: expected {saved:08X}, calculated {calculated:08X}")]
    BadAttachmentCrc { saved: u32, calculated: u32 },
    #[error("Summary's CRC failed: expected {saved:08X}, calculated {calculated:08X}")]
    BadSummaryCrc { saved: u32, calculated: u32 },
    #[error("A Chunk record contains another Chunk record; chunks must not nest")]
    NestedChunk,
    #[error("File is not indexed (summary_start is 0)")]
    NotIndexed,
    #[error("Exhausted reader")]
    Exhausted,
}

/// A type alias for `Result<T, McapError>`.
pub type McapResult<T> = Result<T, McapError>;
