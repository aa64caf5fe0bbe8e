//! Byte-level plumbing shared by the writer and chunk codec: counting/CRC wrappers around
//! [`std::io::Read`] and [`std::io::Write`].
//!
//! No component in this crate allocates on the hot path of reading a record's fixed fields; the
//! wrappers here only track position and checksum as bytes flow through.

use std::io::{self, Read, Write};

use crc32fast::Hasher;

/// Wraps a [`Read`] implementation, tracking both the number of bytes read and a running CRC32
/// (IEEE polynomial) over them.
pub struct CountingCrcReader<R> {
    inner: R,
    hasher: Hasher,
    count: u64,
}

impl<R: Read> CountingCrcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            count: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.count
    }

    /// Consumes the reader, returning the accumulated CRC32.
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for CountingCrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Wraps a [`Write`] implementation, tracking both the number of bytes written and a running
/// CRC32 over them. Used to compute a chunk's `uncompressed_crc` without buffering the whole
/// chunk twice.
pub struct CountingCrcWriter<W> {
    inner: W,
    hasher: Hasher,
    count: u64,
}

impl<W: Write> CountingCrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            count: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.count
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consumes the writer, returning the inner sink and the accumulated CRC32.
    pub fn finalize(self) -> (W, u32) {
        (self.inner, self.hasher.finalize())
    }

    /// Resets position and CRC state without touching the inner sink. Used between chunks so a
    /// single `CountingCrcWriter` can be reused across the life of a [`Writer`](crate::Writer).
    pub fn reset(&mut self) {
        self.hasher.reset();
        self.count = 0;
    }
}

impl<W: Write> Write for CountingCrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a [`Write`] implementation, tracking only the number of bytes written. Used by the
/// writer to know the current byte offset of an output stream that may not support [`Seek`].
pub struct CountingWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_crc_writer_tracks_position_and_crc() {
        let mut w = CountingCrcWriter::new(Vec::new());
        w.write_all(b"123456789").unwrap();
        assert_eq!(w.position(), 9);
        let (buf, crc) = w.finalize();
        assert_eq!(buf, b"123456789");
        // CRC-32/ISO-HDLC check value for the ASCII string "123456789".
        assert_eq!(crc, 0xCBF4_3926);
    }

    #[test]
    fn counting_crc_writer_reset_clears_state() {
        let mut w = CountingCrcWriter::new(Vec::new());
        w.write_all(b"abc").unwrap();
        w.reset();
        assert_eq!(w.position(), 0);
        w.write_all(b"123456789").unwrap();
        assert_eq!(w.finalize().1, 0xCBF4_3926);
    }
}
