use std::io;

use super::ChannelInput;

/// A window onto part of another channel.
///
/// Offsets are relative to the start of the window, which lets an archive
/// stored inside another file (or inside another archive's stored entry) be
/// opened directly.
#[derive(Debug, Clone)]
pub struct SliceChannel<C> {
    inner: C,
    start: u64,
    len: u64,
}

impl<C: ChannelInput> SliceChannel<C> {
    /// Window of `len` bytes at `start`, clamped to the inner channel.
    pub fn new(inner: C, start: u64, len: u64) -> Self {
        let available = inner.length().saturating_sub(start);
        Self {
            len: len.min(available),
            start,
            inner,
        }
    }

    /// Everything from `start` to the end of the inner channel.
    pub fn from_offset(inner: C, start: u64) -> Self {
        let len = inner.length().saturating_sub(start);
        Self { inner, start, len }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: ChannelInput> ChannelInput for SliceChannel<C> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.len - offset) as usize;
        self.inner.read_at(self.start + offset, &mut buf[..want])
    }

    fn length(&self) -> u64 {
        self.len
    }
}
