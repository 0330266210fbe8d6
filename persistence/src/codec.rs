//! Gzip + base64 codec and SHA-256 checksums for the session envelope.

use crate::error::Result;
use crate::error::StoreError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::Digest;
use sha2::Sha256;
use std::io::Read;
use std::io::Write;

/// Gzip-compress `data` and return it base64-encoded.
pub fn compress_to_base64(data: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

/// Reverse of [`compress_to_base64`]. Invalid base64 or gzip input surfaces
/// as corrupted data.
pub fn decompress_from_base64(encoded: &str) -> Result<Vec<u8>> {
    let compressed = BASE64
        .decode(encoded)
        .map_err(|e| StoreError::CorruptedData(format!("invalid base64 payload: {e}")))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StoreError::CorruptedData(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Constant-shape comparison of `data` against an expected hex digest.
pub fn verify_checksum(data: &[u8], expected_hex: &str) -> bool {
    sha256_hex(data).eq_ignore_ascii_case(expected_hex)
}
