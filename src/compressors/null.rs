use super::Compressor;
use crate::ByteStream;

/// Identity codec: stores the dump as plain SQL
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCompressor;

impl Compressor for NullCompressor {
    fn name(&self) -> &'static str {
        "null"
    }

    fn extension(&self) -> Option<&'static str> {
        None
    }

    fn compress(&self, input: ByteStream) -> ByteStream {
        input
    }

    fn decompress(&self, input: ByteStream) -> ByteStream {
        input
    }
}
