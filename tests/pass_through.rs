//! Copying entries between archives without recompressing them.

mod common;

use chrono::DateTime;
use zipkit::{
    Archive, ArchiveBuilder, ChannelInput, CompressionMethod, Error, FileChannelInput, FileChannelOutput,
    FormatError, MemoryChannelOutput, WriteEntry,
};

use common::{build, cd_offset, noise, open, text};

fn patch_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn source() -> Vec<u8> {
    build(vec![
        WriteEntry::file("text.txt", text(20_000))
            .modified(DateTime::from_timestamp(1_650_000_000, 0).unwrap())
            .comment("kept"),
        WriteEntry::file("noise.bin", noise(5000, 3)).method(CompressionMethod::Stored),
        WriteEntry::directory("empty"),
        WriteEntry::file("tagged.txt", &b"tagged"[..]).extra_field(0xCAFE, b"opaque"),
    ])
}

#[test]
fn compressed_bytes_are_copied_verbatim() {
    let original = open(source());
    let copy = ArchiveBuilder::from_archive(&original)
        .unwrap()
        .write_to(MemoryChannelOutput::new())
        .unwrap();
    let copy = open(copy.into_inner());

    assert_eq!(copy.len(), original.len());
    for (before, after) in original.iter().zip(copy.iter()) {
        assert_eq!(after.path, before.path);
        assert_eq!(after.compression_method, before.compression_method);
        assert_eq!(after.crc32, before.crc32);
        assert_eq!(after.compressed_size, before.compressed_size);
        assert_eq!(after.uncompressed_size, before.uncompressed_size);
        assert_eq!(after.modified(), before.modified());
        assert_eq!(after.external_attributes, before.external_attributes);
        assert_eq!(after.comment, before.comment);
        assert_eq!(after.extra, before.extra);
        assert_eq!(
            after.raw_payload().unwrap().read_compressed().unwrap(),
            before.raw_payload().unwrap().read_compressed().unwrap()
        );
        assert_eq!(after.read().unwrap(), before.read().unwrap());
    }
}

#[test]
fn opaque_extra_fields_survive() {
    let original = open(source());
    let tagged = original.by_path("tagged.txt").unwrap();
    assert_eq!(tagged.extra, b"\xFE\xCA\x06\x00opaque");
}

#[test]
fn edits_mix_copied_and_new_entries() {
    let original = open(source());
    let mut builder = ArchiveBuilder::from_archive(&original).unwrap();
    assert_eq!(builder.remove("noise.bin"), 1);
    assert!(builder.rename("text.txt", "docs/text.txt"));
    assert!(builder.replace("tagged.txt", WriteEntry::file("tagged.txt", &b"new"[..])));
    builder
        .push(WriteEntry::file("added.txt", &b"added"[..]))
        .set_comment("edited");

    let edited = open(builder.write_to(MemoryChannelOutput::new()).unwrap().into_inner());
    let paths: Vec<_> = edited.iter().map(|e| e.path().into_owned()).collect();
    assert_eq!(paths, ["docs/text.txt", "empty/", "tagged.txt", "added.txt"]);
    assert_eq!(edited.comment(), b"edited");
    assert_eq!(edited.by_path("docs/text.txt").unwrap().read().unwrap(), text(20_000));
    assert_eq!(edited.by_path("tagged.txt").unwrap().read().unwrap(), b"new");
    assert_eq!(edited.by_path("added.txt").unwrap().read().unwrap(), b"added");
}

#[test]
fn unknown_methods_copy_but_do_not_read() {
    let mut bytes = build(vec![WriteEntry::file("x.bin", &b"payload"[..])
        .method(CompressionMethod::Stored)]);
    let cd = cd_offset(&bytes);
    patch_u16(&mut bytes, 8, 99);
    patch_u16(&mut bytes, cd + 10, 99);

    let original = open(bytes);
    let entry = original.entry(0).unwrap();
    assert_eq!(entry.compression_method, CompressionMethod::Unknown(99));
    assert!(matches!(
        entry.read(),
        Err(Error::Format(FormatError::UnsupportedMethod(99)))
    ));

    let copy = ArchiveBuilder::from_archive(&original)
        .unwrap()
        .write_to(MemoryChannelOutput::new())
        .unwrap();
    let copy = open(copy.into_inner());
    let copied = copy.entry(0).unwrap();
    assert_eq!(copied.compression_method, CompressionMethod::Unknown(99));
    assert_eq!(copied.raw_payload().unwrap().read_compressed().unwrap(), b"payload");
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Marks the only entry of `bytes` as encrypted in both headers.
fn encrypt_flag(bytes: &mut [u8]) -> u16 {
    let cd = cd_offset(bytes);
    let flags = read_u16(bytes, 6) | 0x0001;
    patch_u16(bytes, 6, flags);
    patch_u16(bytes, cd + 8, flags);
    flags
}

#[test]
fn encrypted_entries_are_refused_but_copied() {
    let mut bytes = build(vec![WriteEntry::file("secret", &b"ciphertext"[..])
        .method(CompressionMethod::Stored)]);
    let flags = encrypt_flag(&mut bytes);
    assert_eq!(flags, 0x0001);

    let original = open(bytes);
    let entry = original.entry(0).unwrap();
    assert!(entry.is_encrypted());
    assert!(matches!(
        entry.read(),
        Err(Error::Format(FormatError::Encrypted))
    ));

    let copy = ArchiveBuilder::from_archive(&original)
        .unwrap()
        .write_to(MemoryChannelOutput::new())
        .unwrap()
        .into_inner();
    assert_eq!(read_u16(&copy, 6), flags);
    let copy = open(copy);
    assert_eq!(copy.entry(0).unwrap().flags, flags);
    assert_eq!(
        copy.entry(0).unwrap().raw_payload().unwrap().read_compressed().unwrap(),
        b"ciphertext"
    );
}

#[test]
fn encrypted_copies_keep_their_data_descriptor() {
    let mut bytes = build(vec![WriteEntry::file("secret.txt", text(4000))]);
    let flags = encrypt_flag(&mut bytes);
    assert_eq!(flags & 0x0008, 0x0008);

    let original = open(bytes);
    let source = original.entry(0).unwrap();
    let copy = ArchiveBuilder::from_archive(&original)
        .unwrap()
        .write_to(MemoryChannelOutput::new())
        .unwrap()
        .into_inner();

    // Local and central flags both match the source, and a descriptor
    // follows the copied data.
    assert_eq!(read_u16(&copy, 6), flags);
    let copy = open(copy);
    let copied = copy.entry(0).unwrap();
    assert_eq!(copied.flags, source.flags);
    assert_eq!(copied.crc32, source.crc32);
    let payload = copied.raw_payload().unwrap();
    let descriptor = payload.descriptor_offset.unwrap();
    assert_eq!(
        copy.channel().read(descriptor, 4).unwrap(),
        b"PK\x07\x08"
    );
    assert_eq!(
        payload.read_compressed().unwrap(),
        source.raw_payload().unwrap().read_compressed().unwrap()
    );
}

#[test]
fn plain_copies_drop_the_data_descriptor() {
    let original = open(build(vec![WriteEntry::file("plain.txt", text(4000))]));
    assert!(original.entry(0).unwrap().has_data_descriptor());

    let copy = open(
        ArchiveBuilder::from_archive(&original)
            .unwrap()
            .write_to(MemoryChannelOutput::new())
            .unwrap()
            .into_inner(),
    );
    let copied = copy.entry(0).unwrap();
    assert!(!copied.has_data_descriptor());
    assert_eq!(copied.raw_payload().unwrap().descriptor_offset, None);
    assert_eq!(copied.read().unwrap(), text(4000));
}

#[test]
fn repack_into_a_file() {
    let original = open(source());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repacked.zip");

    let mut builder = ArchiveBuilder::new();
    for entry in original.iter().filter(|e| !e.is_dir()) {
        builder.push(entry.pass_through().unwrap());
    }
    builder
        .write_to(FileChannelOutput::create(&path).unwrap())
        .unwrap();

    let repacked = Archive::open(FileChannelInput::open(&path).unwrap()).unwrap();
    assert_eq!(repacked.len(), 3);
    assert!(repacked.verify_all().iter().all(|r| r.is_ok()));
    assert_eq!(
        repacked.by_path("noise.bin").unwrap().read().unwrap(),
        noise(5000, 3)
    );
}
