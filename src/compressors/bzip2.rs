use super::Compressor;
use crate::ByteStream;
use ::bzip2::read::{BzDecoder, BzEncoder};
use ::bzip2::Compression;

#[derive(Debug, Clone, Copy)]
pub struct Bzip2Compressor {
    level: Compression,
}

impl Default for Bzip2Compressor {
    fn default() -> Self {
        Self {
            level: Compression::best(),
        }
    }
}

impl Compressor for Bzip2Compressor {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn extension(&self) -> Option<&'static str> {
        Some("bz2")
    }

    fn compress(&self, input: ByteStream) -> ByteStream {
        Box::new(BzEncoder::new(input, self.level))
    }

    fn decompress(&self, input: ByteStream) -> ByteStream {
        Box::new(BzDecoder::new(input))
    }
}
