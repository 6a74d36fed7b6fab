//! Frame decompression helpers for adapters with compressed payloads

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};

pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Raw deflate (no zlib header)
pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
