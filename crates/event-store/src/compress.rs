//! Optional snapshot payload compression.

use std::io::{Read, Write};

use cqrs_core::{CqrsError, CqrsResult};

use crate::types::CompressionKind;

/// Compresses/decompresses a snapshot's serialized payload before/after storage.
pub trait SnapshotCompressor: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn compress(&self, data: &[u8]) -> CqrsResult<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> CqrsResult<Vec<u8>>;
}

pub struct NoneCompressor;

impl SnapshotCompressor for NoneCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }
    fn compress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        Ok(data.to_vec())
    }
    fn decompress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

pub struct GzipCompressor;

impl SnapshotCompressor for GzipCompressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Gzip
    }

    fn compress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).map_err(|e| CqrsError::Serialization { message: e.to_string() })?;
        encoder.finish().map_err(|e| CqrsError::Serialization { message: e.to_string() })
    }

    fn decompress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        use flate2::read::GzDecoder;
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| CqrsError::Serialization { message: e.to_string() })?;
        Ok(out)
    }
}

pub struct Lz4Compressor;

impl SnapshotCompressor for Lz4Compressor {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lz4
    }

    fn compress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> CqrsResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| CqrsError::Serialization { message: e.to_string() })
    }
}

pub fn compressor_for(kind: CompressionKind) -> Box<dyn SnapshotCompressor> {
    match kind {
        CompressionKind::None => Box::new(NoneCompressor),
        CompressionKind::Gzip => Box::new(GzipCompressor),
        CompressionKind::Lz4 => Box::new(Lz4Compressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let c = GzipCompressor;
        let data = b"hello snapshot world".repeat(10);
        let compressed = c.compress(&data).unwrap();
        let decompressed = c.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn lz4_round_trips() {
        let c = Lz4Compressor;
        let data = b"hello snapshot world".repeat(10);
        let compressed = c.compress(&data).unwrap();
        let decompressed = c.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn none_is_identity() {
        let c = NoneCompressor;
        let data = b"raw".to_vec();
        assert_eq!(c.compress(&data).unwrap(), data);
        assert_eq!(c.decompress(&data).unwrap(), data);
    }
}
