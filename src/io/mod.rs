//! Byte channels archives are read from and written to.
//!
//! A [`ChannelInput`] is a random-access source: the parser jumps to the end of
//! central directory record, then to the central directory, then to each local
//! header on demand. A [`ChannelOutput`] is an append-only sink that knows how
//! many bytes it has taken, which is all the writer needs to record offsets.

mod http;
mod local;
mod memory;
mod slice;

pub use http::HttpRangeChannel;
pub use local::{FileChannelInput, FileChannelOutput};
pub use memory::{MemoryChannelInput, MemoryChannelOutput};
pub use slice::SliceChannel;

use std::io::{self, Read, Write};
use std::sync::Arc;

/// Chunk size for copies and streaming reads.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Random-access byte source.
///
/// `read_at` takes `&self` so that several entries of one archive can be read
/// from different threads at once.
pub trait ChannelInput: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which is only short at the end of the
    /// channel.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size of the channel in bytes.
    fn length(&self) -> u64;

    /// Fill `buf` from `offset`, failing if the range is not fully inside the channel.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| out_of_range(offset, buf.len() as u64, self.length()))?;
        if end > self.length() {
            return Err(out_of_range(offset, buf.len() as u64, self.length()));
        }

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel ended before the requested range",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read `length` bytes at `offset` into a new buffer.
    fn read(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

fn out_of_range(offset: u64, len: u64, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {len} bytes at offset {offset} exceeds channel length {size}"),
    )
}

impl<T: ChannelInput + ?Sized> ChannelInput for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn length(&self) -> u64 {
        (**self).length()
    }
}

impl<T: ChannelInput + ?Sized> ChannelInput for Box<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn length(&self) -> u64 {
        (**self).length()
    }
}

impl<T: ChannelInput + ?Sized> ChannelInput for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn length(&self) -> u64 {
        (**self).length()
    }
}

/// Append-only byte sink.
///
/// The writer owns its output for the whole write, so implementations need no
/// internal locking.
pub trait ChannelOutput {
    /// Append `data` to the channel.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Number of bytes written so far, relative to the start of the archive.
    fn current_offset(&self) -> u64;

    /// Flush and finalize. Writes after `close` fail.
    fn close(&mut self) -> io::Result<()>;
}

impl<T: ChannelOutput + ?Sized> ChannelOutput for &mut T {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn current_offset(&self) -> u64 {
        (**self).current_offset()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: ChannelOutput + ?Sized> ChannelOutput for Box<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn current_offset(&self) -> u64 {
        (**self).current_offset()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Sequential [`Read`] over a byte range of a channel.
pub struct ChannelReader<'a> {
    input: &'a dyn ChannelInput,
    position: u64,
    end: u64,
}

impl<'a> ChannelReader<'a> {
    /// Reader over `length` bytes starting at `offset`.
    pub fn new(input: &'a dyn ChannelInput, offset: u64, length: u64) -> Self {
        Self {
            input,
            position: offset,
            end: offset.saturating_add(length),
        }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }
}

impl Read for ChannelReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.input.read_at(self.position, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel ended before the requested range",
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

/// [`Write`] adapter so codecs can stream straight into a channel.
pub struct ChannelWriter<'a, O: ChannelOutput + ?Sized> {
    output: &'a mut O,
}

impl<'a, O: ChannelOutput + ?Sized> ChannelWriter<'a, O> {
    pub fn new(output: &'a mut O) -> Self {
        Self { output }
    }
}

impl<O: ChannelOutput + ?Sized> Write for ChannelWriter<'_, O> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copy `length` bytes at `offset` of `input` to the end of `output`.
///
/// Moves data in bounded chunks, so the range never has to fit in memory.
/// Returns the number of bytes copied.
pub fn copy_range<O: ChannelOutput + ?Sized>(
    input: &dyn ChannelInput,
    offset: u64,
    length: u64,
    output: &mut O,
) -> io::Result<u64> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| out_of_range(offset, length, input.length()))?;
    if end > input.length() {
        return Err(out_of_range(offset, length, input.length()));
    }

    let mut buf = vec![0u8; (length as usize).min(CHUNK_SIZE)];
    let mut position = offset;
    while position < end {
        let want = ((end - position) as usize).min(buf.len());
        input.read_exact_at(position, &mut buf[..want])?;
        output.write(&buf[..want])?;
        position += want as u64;
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_exact_at_rejects_ranges_past_the_end() {
        let input = MemoryChannelInput::new(b"0123456789".to_vec());
        let err = input.read(8, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(input.read(8, 2).unwrap(), b"89");
    }

    #[test]
    fn channel_reader_stops_at_range_end() {
        let input = MemoryChannelInput::new(b"hello, world".to_vec());
        let mut reader = ChannelReader::new(&input, 7, 5);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn copy_range_moves_bytes_across_chunks() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let input = MemoryChannelInput::new(data.clone());
        let mut output = MemoryChannelOutput::new();
        output.write(b"xx").unwrap();

        let copied = copy_range(&input, 5, data.len() as u64 - 5, &mut output).unwrap();
        assert_eq!(copied, data.len() as u64 - 5);
        assert_eq!(output.current_offset(), data.len() as u64 - 3);
        assert_eq!(&output.as_bytes()[2..], &data[5..]);
    }

    #[test]
    fn copy_range_fails_out_of_bounds() {
        let input = MemoryChannelInput::new(vec![0; 10]);
        let mut output = MemoryChannelOutput::new();
        assert!(copy_range(&input, 4, 7, &mut output).is_err());
        assert_eq!(output.current_offset(), 0);
    }
}
