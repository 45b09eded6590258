//! FONT record codec.
//!
//! Embedded fonts are wrapped in a FONT record: a 24-byte header, an optional
//! XOR obfuscation over the first 1040 payload bytes, and optional zlib
//! deflate. The writer only produces deflated, unobfuscated records; the
//! reader handles both transforms.

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

use crate::error::{Error, Result};

const FONT_HEADER_LEN: usize = 24;
const FLAG_DEFLATE: u32 = 0b01;
const FLAG_OBFUSCATED: u32 = 0b10;
/// Obfuscation only ever touches this many leading bytes.
const XOR_EXTENT: usize = 1040;

/// Decode a FONT record into the bare font payload.
pub fn decode(record: &[u8]) -> Result<Vec<u8>> {
    if record.len() < FONT_HEADER_LEN {
        return Err(Error::CorruptFont(format!(
            "record truncated: {} bytes",
            record.len()
        )));
    }
    if &record[0..4] != b"FONT" {
        return Err(Error::bad_magic("FONT record", &record[0..4]));
    }

    let u32_at = |o: usize| u32::from_be_bytes([record[o], record[o + 1], record[o + 2], record[o + 3]]);
    let decoded_size = u32_at(4) as usize;
    let flags = u32_at(8);
    let data_offset = u32_at(12) as usize;
    let key_len = u32_at(16) as usize;
    let key_offset = u32_at(20) as usize;

    if data_offset > record.len() {
        return Err(Error::CorruptFont(format!(
            "data offset {data_offset} past record end"
        )));
    }
    let mut data = record[data_offset..].to_vec();

    if flags & FLAG_OBFUSCATED != 0 {
        if key_len == 0 || key_offset + key_len > record.len() {
            return Err(Error::CorruptFont(format!(
                "XOR key spans {key_offset}..{} past record end",
                key_offset + key_len
            )));
        }
        let key = &record[key_offset..key_offset + key_len];
        let extent = XOR_EXTENT.min(data.len());
        for (i, byte) in data.iter_mut().take(extent).enumerate() {
            *byte ^= key[i % key_len];
        }
    }

    if flags & FLAG_DEFLATE != 0 {
        let mut decoder = ZlibDecoder::new(&data[..]);
        let mut inflated = Vec::with_capacity(decoded_size);
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| Error::CorruptFont(format!("deflate stream: {e}")))?;
        data = inflated;
    }

    if data.len() != decoded_size {
        return Err(Error::CorruptFont(format!(
            "decoded {} bytes, header claims {decoded_size}",
            data.len()
        )));
    }

    debug!("decoded FONT record: {} bytes", data.len());
    Ok(data)
}

/// Encode a font payload: deflate only, no obfuscation key.
pub fn encode(font: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(font)?;
    let deflated = encoder.finish()?;

    let mut out = Vec::with_capacity(FONT_HEADER_LEN + deflated.len());
    out.extend_from_slice(b"FONT");
    out.extend_from_slice(&(font.len() as u32).to_be_bytes());
    out.extend_from_slice(&FLAG_DEFLATE.to_be_bytes());
    out.extend_from_slice(&(FONT_HEADER_LEN as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // key length
    out.extend_from_slice(&(FONT_HEADER_LEN as u32).to_be_bytes()); // key offset
    out.extend_from_slice(&deflated);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_font() -> Vec<u8> {
        let mut font = b"OTTO".to_vec();
        font.extend((0..2000u32).map(|i| (i % 251) as u8));
        font
    }

    #[test]
    fn roundtrip() {
        let font = sample_font();
        let record = encode(&font).unwrap();
        assert_eq!(&record[0..4], b"FONT");
        assert_eq!(decode(&record).unwrap(), font);
    }

    #[test]
    fn obfuscated_record_is_deobfuscated() {
        // Build an uncompressed, XOR-obfuscated record by hand.
        let font = sample_font();
        let key = [0x5A, 0xC3, 0x17];

        let mut payload = font.clone();
        let extent = XOR_EXTENT.min(payload.len());
        for (i, byte) in payload.iter_mut().take(extent).enumerate() {
            *byte ^= key[i % key.len()];
        }

        let data_offset = FONT_HEADER_LEN + key.len();
        let mut record = Vec::new();
        record.extend_from_slice(b"FONT");
        record.extend_from_slice(&(font.len() as u32).to_be_bytes());
        record.extend_from_slice(&FLAG_OBFUSCATED.to_be_bytes());
        record.extend_from_slice(&(data_offset as u32).to_be_bytes());
        record.extend_from_slice(&(key.len() as u32).to_be_bytes());
        record.extend_from_slice(&(FONT_HEADER_LEN as u32).to_be_bytes());
        record.extend_from_slice(&key);
        record.extend_from_slice(&payload);

        assert_eq!(decode(&record).unwrap(), font);
    }

    #[test]
    fn size_mismatch_rejected() {
        let mut record = encode(&sample_font()).unwrap();
        // Lie about the decoded size.
        record[4..8].copy_from_slice(&1u32.to_be_bytes());
        assert!(matches!(decode(&record), Err(Error::CorruptFont(_))));
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(
            decode(b"TNOF\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00"),
            Err(Error::UnsupportedMagic { .. })
        ));
    }

    #[test]
    fn truncated_record_rejected() {
        assert!(matches!(decode(b"FONT\x00"), Err(Error::CorruptFont(_))));
    }
}
