//! Compressor registry and codecs

use db_backup::compressors::{Compressor, CompressorRegistry};
use db_backup::ByteStream;
use rstest::rstest;
use std::io::{Cursor, Read};
use test_utils::sample_dump;

fn stream(data: Vec<u8>) -> ByteStream {
    Box::new(Cursor::new(data))
}

fn drain(mut reader: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[rstest]
#[case("gzip", &[0x1f, 0x8b])]
#[case("bzip2", b"BZh")]
fn test_output_carries_format_magic(#[case] name: &str, #[case] magic: &[u8]) {
    let compressor = CompressorRegistry::with_defaults().get(name).unwrap();
    let compressed = drain(compressor.compress(stream(sample_dump())));
    assert!(compressed.starts_with(magic));
    assert!(compressed.len() < sample_dump().len());
}

#[test]
fn test_null_compressor_passes_bytes_through() {
    let compressor = CompressorRegistry::with_defaults().get("null").unwrap();
    assert_eq!(drain(compressor.compress(stream(sample_dump()))), sample_dump());
    assert_eq!(compressor.compressed_key("shop-1-backup.sql"), "shop-1-backup.sql");
}

#[rstest]
#[case("GZIP")]
#[case(" Gzip ")]
#[case("gzip")]
fn test_lookup_ignores_case(#[case] name: &str) {
    let compressor = CompressorRegistry::with_defaults().get(name).unwrap();
    assert_eq!(compressor.name(), "gzip");
}

#[rstest]
#[case("shop-1-backup.sql.gz", "gzip")]
#[case("nightly/shop-1-backup.sql.bz2", "bzip2")]
#[case("shop-1-backup.sql", "null")]
fn test_compressor_for_key(#[case] key: &str, #[case] expected: &str) {
    let compressor = CompressorRegistry::with_defaults().for_key(key).unwrap();
    assert_eq!(compressor.name(), expected);
}

#[test]
fn test_gzip_rejects_garbage() {
    let compressor = CompressorRegistry::with_defaults().get("gzip").unwrap();
    let mut out = Vec::new();
    let result = compressor
        .decompress(stream(b"plain text, not gzip".to_vec()))
        .read_to_end(&mut out);
    assert!(result.is_err());
}
