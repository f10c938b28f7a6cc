use std::io;

use bytes::Bytes;

use super::{ChannelInput, ChannelOutput};

/// In-memory archive source.
///
/// Backed by [`Bytes`], so cloning the channel shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelInput {
    data: Bytes,
}

impl MemoryChannelInput {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl ChannelInput for MemoryChannelInput {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }
}

/// In-memory archive sink.
#[derive(Debug, Default)]
pub struct MemoryChannelOutput {
    buf: Vec<u8>,
    closed: bool,
}

impl MemoryChannelOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Turn the written bytes into a source for reading them back.
    pub fn into_input(self) -> MemoryChannelInput {
        MemoryChannelInput::new(self.buf)
    }
}

impl ChannelOutput for MemoryChannelOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to a closed channel",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn current_offset(&self) -> u64 {
        self.buf.len() as u64
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
