//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use zipkit::{Archive, MemoryChannelInput, MemoryChannelOutput, WriteEntry, ZipWriter};

/// Writes `entries` to an in-memory archive and returns its bytes.
pub fn build(entries: Vec<WriteEntry<'_>>) -> Vec<u8> {
    let mut writer = ZipWriter::new(MemoryChannelOutput::new());
    for entry in entries {
        writer.write_entry(entry).expect("write entry");
    }
    writer.finish().expect("finish archive").into_inner()
}

/// Opens archive bytes that are expected to parse.
pub fn open(bytes: Vec<u8>) -> Archive<MemoryChannelInput> {
    Archive::open(MemoryChannelInput::new(bytes)).expect("open archive")
}

/// Attempts to open archive bytes.
pub fn try_open(bytes: Vec<u8>) -> zipkit::Result<Archive<MemoryChannelInput>> {
    Archive::open(MemoryChannelInput::new(bytes))
}

/// Deterministic, poorly compressible bytes (xorshift).
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Highly compressible text.
pub fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Offsets of every occurrence of `needle` in `haystack`.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| i)
        .collect()
}

/// Offset of the end of central directory record.
pub fn eocd_offset(bytes: &[u8]) -> usize {
    *find_all(bytes, b"PK\x05\x06").last().expect("eocd present")
}

/// Offset of the first central directory record.
pub fn cd_offset(bytes: &[u8]) -> usize {
    find_all(bytes, b"PK\x01\x02")[0]
}
