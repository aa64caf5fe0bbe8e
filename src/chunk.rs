//! Compression dispatch for chunk payloads (C3): turning a [`Chunk`](crate::records::Record::Chunk)
//! record's raw bytes into the framed records it contains, and the mirror-image streaming
//! compressor used by the writer.
//!
//! A chunk's `compression` field is one of the empty string (stored uncompressed), `"lz4"`, or
//! `"zstd"`. Any other non-empty value is rejected outright: this crate does not try to guess at
//! unknown codecs.

use std::io::{self, Read, Write};

use crc32fast::Hasher;

use crate::error::{McapError, McapResult};

/// A chunk compression algorithm recognized by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    #[cfg(feature = "lz4")]
    Lz4,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Compression {
    /// The string written to a chunk's `compression` field for this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "lz4")]
            Compression::Lz4 => "lz4",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }
}

/// Decompresses a chunk's `records` payload.
///
/// `compression` is the chunk's `compression` field; `data` is the (possibly compressed) bytes;
/// `uncompressed_size` is the expected length of the output. If `uncompressed_crc` is nonzero,
/// the decompressed bytes are checksummed and a mismatch is reported as [`McapError::BadChunkCrc`].
pub fn decompress_chunk(
    compression: &str,
    data: &[u8],
    uncompressed_size: u64,
    uncompressed_crc: u32,
) -> McapResult<Vec<u8>> {
    let decompressed = match compression {
        "" => data.to_vec(),
        #[cfg(feature = "lz4")]
        "lz4" => {
            let mut out = Vec::new();
            let mut decoder = lz4::Decoder::new(data)?;
            decoder
                .read_to_end(&mut out)
                .map_err(McapError::DecompressionError)?;
            out
        }
        #[cfg(feature = "zstd")]
        "zstd" => {
            let mut out = Vec::new();
            let mut decoder = zstd::Decoder::new(data)?;
            decoder
                .read_to_end(&mut out)
                .map_err(McapError::DecompressionError)?;
            out
        }
        other => return Err(McapError::UnsupportedCompression(other.to_string())),
    };

    if decompressed.len() as u64 != uncompressed_size {
        return Err(McapError::BadChunkSize {
            saved: uncompressed_size,
            calculated: decompressed.len() as u64,
        });
    }

    if uncompressed_crc != 0 {
        let mut hasher = Hasher::new();
        hasher.update(&decompressed);
        let calculated = hasher.finalize();
        if calculated != uncompressed_crc {
            return Err(McapError::BadChunkCrc {
                saved: uncompressed_crc,
                calculated,
            });
        }
    }

    Ok(decompressed)
}

/// A streaming compressor used by the writer to fill a chunk's compressed buffer.
///
/// Wraps an in-memory `Vec<u8>` sink rather than the file itself: the writer buffers an entire
/// chunk's compressed bytes in memory, then emits the whole `Chunk` record (with a header whose
/// sizes and CRC are only known once the chunk is closed) in one shot. This sidesteps needing a
/// seekable sink to patch a placeholder header in place.
pub enum Compressor {
    Null(Vec<u8>),
    #[cfg(feature = "lz4")]
    Lz4(lz4::Encoder<Vec<u8>>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::Encoder<'static, Vec<u8>>),
}

impl Compressor {
    pub fn new(compression: Option<Compression>) -> McapResult<Self> {
        Ok(match compression {
            None => Compressor::Null(Vec::new()),
            #[cfg(feature = "lz4")]
            Some(Compression::Lz4) => Compressor::Lz4(
                lz4::EncoderBuilder::new()
                    // The chunk as a whole already carries a CRC; a per-block checksum would be
                    // redundant and costs compatibility with some MCAP tooling.
                    .block_checksum(lz4::liblz4::BlockChecksum::NoBlockChecksum)
                    .build(Vec::new())?,
            ),
            #[cfg(feature = "zstd")]
            Some(Compression::Zstd) => Compressor::Zstd(zstd::Encoder::new(Vec::new(), 0)?),
        })
    }

    /// The string to record in the chunk header's `compression` field.
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::Null(_) => "",
            #[cfg(feature = "lz4")]
            Compressor::Lz4(_) => "lz4",
            #[cfg(feature = "zstd")]
            Compressor::Zstd(_) => "zstd",
        }
    }

    /// Finalizes the compression stream, returning the compressed bytes collected so far.
    pub fn finish(self) -> McapResult<Vec<u8>> {
        Ok(match self {
            Compressor::Null(buf) => buf,
            #[cfg(feature = "lz4")]
            Compressor::Lz4(enc) => {
                let (buf, result) = enc.finish();
                result?;
                buf
            }
            #[cfg(feature = "zstd")]
            Compressor::Zstd(enc) => enc.finish()?,
        })
    }
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Null(w) => w.write(buf),
            #[cfg(feature = "lz4")]
            Compressor::Lz4(w) => w.write(buf),
            #[cfg(feature = "zstd")]
            Compressor::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Null(w) => w.flush(),
            #[cfg(feature = "lz4")]
            Compressor::Lz4(w) => w.flush(),
            #[cfg(feature = "zstd")]
            Compressor::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_round_trips() {
        let data = b"hello chunk".to_vec();
        let mut hasher = Hasher::new();
        hasher.update(&data);
        let crc = hasher.finalize();
        let out = decompress_chunk("", &data, data.len() as u64, crc).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unsupported_compression_errors() {
        let err = decompress_chunk("brotli", &[], 0, 0).unwrap_err();
        assert!(matches!(err, McapError::UnsupportedCompression(name) if name == "brotli"));
    }

    #[test]
    fn bad_crc_is_detected() {
        let data = b"hello chunk".to_vec();
        let err = decompress_chunk("", &data, data.len() as u64, 0xDEAD_BEEF).unwrap_err();
        assert!(matches!(err, McapError::BadChunkCrc { .. }));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_round_trips() {
        let mut compressor = Compressor::new(Some(Compression::Lz4)).unwrap();
        compressor.write_all(b"hello lz4 chunk").unwrap();
        let compressed = compressor.finish().unwrap();
        let out = decompress_chunk("lz4", &compressed, 15, 0).unwrap();
        assert_eq!(out, b"hello lz4 chunk");
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_round_trips() {
        let mut compressor = Compressor::new(Some(Compression::Zstd)).unwrap();
        compressor.write_all(b"hello zstd chunk").unwrap();
        let compressed = compressor.finish().unwrap();
        let out = decompress_chunk("zstd", &compressed, 16, 0).unwrap();
        assert_eq!(out, b"hello zstd chunk");
    }
}
