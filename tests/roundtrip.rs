//! Write-then-read round trips through memory channels.

mod common;

use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use zipkit::zip::writer::stored;
use zipkit::{CompressionMethod, DosDateTime, EntryData, WriteEntry};

use common::{build, find_all, noise, open, text};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

#[test]
fn entries_come_back_in_order_with_metadata() {
    let readme = text(10_000);
    let blob = noise(4096, 7);
    let bytes = build(vec![
        WriteEntry::directory("docs").modified(at(1_600_000_000)),
        WriteEntry::file("docs/readme.txt", &readme[..])
            .modified(at(1_700_000_001))
            .comment("the readme"),
        WriteEntry::file("bin/tool", &blob[..])
            .method(CompressionMethod::Stored)
            .unix_permissions(0o755),
    ]);

    let archive = open(bytes);
    let paths: Vec<_> = archive.iter().map(|e| e.path().into_owned()).collect();
    assert_eq!(paths, ["docs/", "docs/readme.txt", "bin/tool"]);

    let dir = archive.entry(0).unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.uncompressed_size, 0);
    assert_eq!(dir.read().unwrap(), b"");

    let file = archive.entry(1).unwrap();
    assert!(!file.is_dir());
    assert_eq!(file.compression_method, CompressionMethod::Deflate);
    assert_eq!(file.uncompressed_size, readme.len() as u64);
    assert!(file.compressed_size < file.uncompressed_size);
    assert_eq!(file.crc32, crc32fast::hash(&readme));
    assert_eq!(file.modified(), Some(at(1_700_000_001)));
    assert_eq!(file.comment, b"the readme");
    assert!(file.has_data_descriptor());
    assert_eq!(file.read().unwrap(), readme);

    let tool = archive.entry(2).unwrap();
    assert_eq!(tool.compression_method, CompressionMethod::Stored);
    assert_eq!(tool.compressed_size, blob.len() as u64);
    assert_eq!(tool.unix_mode(), Some(0o100755));
    assert!(!tool.has_data_descriptor());
    assert_eq!(archive.read_entry(&tool).unwrap(), blob);
}

#[test]
fn store_and_deflate_decompress_identically() {
    let content = text(50_000);
    let bytes = build(vec![
        WriteEntry::file("stored.txt", &content[..]).method(CompressionMethod::Stored),
        WriteEntry::file("deflated.txt", &content[..]).method(CompressionMethod::Deflate),
    ]);

    let archive = open(bytes);
    let stored = archive.by_path("stored.txt").unwrap();
    let deflated = archive.by_path("deflated.txt").unwrap();
    assert_ne!(stored.compressed_size, deflated.compressed_size);
    assert_eq!(stored.crc32, deflated.crc32);
    assert_eq!(stored.read().unwrap(), deflated.read().unwrap());
}

#[test]
fn empty_archive_is_only_an_end_record() {
    let bytes = build(Vec::new());
    assert_eq!(bytes.len(), 22);
    assert_eq!(&bytes[..4], b"PK\x05\x06");

    let archive = open(bytes);
    assert!(archive.is_empty());
    assert_eq!(archive.iter().count(), 0);
    assert!(archive.comment().is_empty());
}

#[test]
fn duplicate_paths_stay_distinct() {
    let bytes = build(vec![
        stored("same.txt", &b"one"[..]),
        stored("other.txt", &b"two"[..]),
        stored("same.txt", &b"three"[..]),
    ]);

    let archive = open(bytes);
    assert_eq!(archive.len(), 3);
    assert_eq!(archive.entry(0).unwrap().read().unwrap(), b"one");
    assert_eq!(archive.by_path("same.txt").unwrap().read().unwrap(), b"three");
}

#[test]
fn names_keep_their_bytes() {
    let legacy_name = vec![b'f', 0x82, 0xA0, b'.', b't', b'x', b't'];
    let bytes = build(vec![
        WriteEntry::file("données/résumé.txt", &b"utf8"[..]),
        WriteEntry::raw(legacy_name.clone(), EntryData::Bytes(b"legacy".to_vec().into())),
        WriteEntry::file("plain.txt", &b"ascii"[..]),
    ]);

    let archive = open(bytes);
    let utf8 = archive.entry(0).unwrap();
    assert!(utf8.is_utf8());
    assert_eq!(utf8.path(), "données/résumé.txt");

    let legacy = archive.entry(1).unwrap();
    assert!(!legacy.is_utf8());
    assert_eq!(legacy.path, legacy_name);
    assert_eq!(archive.by_path(&legacy_name).unwrap().read().unwrap(), b"legacy");

    assert!(!archive.entry(2).unwrap().is_utf8());
}

#[test]
fn streamed_entries_use_data_descriptors() {
    let content = noise(300_000, 42);
    let bytes = build(vec![
        WriteEntry::from_reader("stream.bin", Cursor::new(content.clone())),
        WriteEntry::from_reader("stream-stored.bin", &content[..1000])
            .method(CompressionMethod::Stored),
    ]);
    assert!(find_all(&bytes, b"PK\x07\x08").len() >= 2);

    let archive = open(bytes);
    let entry = archive.by_path("stream.bin").unwrap();
    assert!(entry.has_data_descriptor());
    assert_eq!(entry.uncompressed_size, content.len() as u64);

    let mut reader = entry.reader().unwrap();
    let mut head = vec![0u8; 1000];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(head, content[..1000]);
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, content[1000..]);

    let small = archive.by_path("stream-stored.bin").unwrap();
    assert_eq!(small.compressed_size, 1000);
    assert_eq!(small.read().unwrap(), content[..1000]);
}

#[test]
fn archive_comment_survives() {
    let mut writer = zipkit::ZipWriter::new(zipkit::MemoryChannelOutput::new())
        .comment("release 1.2")
        .compression_level(9);
    writer.write_entry(WriteEntry::file("a", &b"a"[..])).unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    assert!(bytes.ends_with(b"release 1.2"));

    let archive = open(bytes);
    assert_eq!(archive.comment(), b"release 1.2");
    assert_eq!(archive.len(), 1);
}

#[test]
fn timestamps_before_1980_use_the_extended_field() {
    let bytes = build(vec![
        WriteEntry::file("old.txt", &b"old"[..]).modified(at(86_400)),
        WriteEntry::file("dos-only.txt", &b"dos"[..])
            .last_modified(DosDateTime::new((44 << 9) | (3 << 5) | 15, (10 << 11) | (30 << 5))),
    ]);

    let archive = open(bytes);
    let old = archive.entry(0).unwrap();
    assert_eq!(old.last_modified, DosDateTime::MIN);
    assert_eq!(old.modified(), Some(at(86_400)));

    let dos = archive.entry(1).unwrap();
    assert_eq!(dos.modified_utc, None);
    let modified = dos.modified().unwrap();
    assert_eq!(modified.to_rfc3339(), "2024-03-15T10:30:00+00:00");
}

fn entry_strategy() -> impl Strategy<Value = (String, Vec<u8>, bool)> {
    (
        "[a-z]{1,8}(/[a-z0-9_.]{1,8}){0,2}",
        proptest::collection::vec(any::<u8>(), 0..2048),
        any::<bool>(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever goes in comes back out, in order.
    #[test]
    fn arbitrary_entries_round_trip(entries in proptest::collection::vec(entry_strategy(), 0..8)) {
        let writes = entries
            .iter()
            .map(|(path, data, store)| {
                let method = if *store {
                    CompressionMethod::Stored
                } else {
                    CompressionMethod::Deflate
                };
                WriteEntry::file(path, &data[..]).method(method)
            })
            .collect();
        let archive = open(build(writes));

        prop_assert_eq!(archive.len(), entries.len());
        for (entry, (path, data, _)) in archive.iter().zip(&entries) {
            prop_assert_eq!(entry.path(), path.as_str());
            prop_assert_eq!(entry.uncompressed_size, data.len() as u64);
            prop_assert_eq!(&entry.read().unwrap(), data);
        }
    }
}
