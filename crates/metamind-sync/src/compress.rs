//! Payload compression: JSON → zlib → base64.
//!
//! Small payloads are sent as plain JSON text; zlib's header and base64's
//! 4/3 expansion make compression a loss below a few hundred bytes.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use metamind_protocol::{Codec, JsonCodec};
use serde_json::Value;

use crate::SyncError;

/// Serialized size (bytes) at or above which payloads are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

/// Encodes update payloads, compressing the large ones.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: usize,
    codec: JsonCodec,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}

impl Compressor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            codec: JsonCodec,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Serializes `data`, compressing if the JSON is at least `threshold`
    /// bytes long. Returns the text to send and whether it is compressed.
    ///
    /// # Errors
    /// `SyncError::Protocol` if `data` can't be serialized,
    /// `SyncError::Compress` if zlib fails.
    pub fn compress(&self, data: &Value) -> Result<(String, bool), SyncError> {
        let json = self.codec.encode_text(data)?;
        if json.len() < self.threshold {
            return Ok((json, false));
        }

        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(json.len() / 2),
            Compression::default(),
        );
        encoder
            .write_all(json.as_bytes())
            .map_err(SyncError::Compress)?;
        let compressed = encoder.finish().map_err(SyncError::Compress)?;

        Ok((STANDARD.encode(compressed), true))
    }

    /// Inverse of [`compress`](Self::compress).
    ///
    /// # Errors
    /// `SyncError::Decompress` for bad base64 or zlib data,
    /// `SyncError::Protocol` if the result isn't valid JSON.
    pub fn decompress(
        &self,
        data: &str,
        is_compressed: bool,
    ) -> Result<Value, SyncError> {
        if !is_compressed {
            return Ok(self.codec.decode(data.as_bytes())?);
        }

        let binary = STANDARD
            .decode(data)
            .map_err(|e| SyncError::Decompress(format!("invalid base64: {e}")))?;

        let mut json = Vec::new();
        ZlibDecoder::new(binary.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| SyncError::Decompress(format!("invalid zlib: {e}")))?;

        Ok(self.codec.decode(&json)?)
    }
}
