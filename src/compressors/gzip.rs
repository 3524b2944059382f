//! Gzip compressor backed by flate2

use super::Compressor;
use crate::ByteStream;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;

#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extension(&self) -> Option<&'static str> {
        Some("gz")
    }

    fn compress(&self, input: ByteStream) -> ByteStream {
        Box::new(GzEncoder::new(input, self.level))
    }

    fn decompress(&self, input: ByteStream) -> ByteStream {
        Box::new(GzDecoder::new(input))
    }
}
