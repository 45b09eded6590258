//! EXTH extended-metadata block.
//!
//! EXTH is a tagged key/value list embedded in a MOBI record 0 directly after
//! the MOBI header. Records are kept in file order, duplicates included, so a
//! parsed block re-emits with the same shape.

use crate::error::{Error, Result};

pub const TAG_AUTHOR: u32 = 100;
pub const TAG_PUBLISHER: u32 = 101;
pub const TAG_DESCRIPTION: u32 = 103;
pub const TAG_SUBJECT: u32 = 105;
pub const TAG_PUBLISHING_DATE: u32 = 106;
pub const TAG_RIGHTS: u32 = 109;
pub const TAG_KF8_BOUNDARY: u32 = 121;

/// One EXTH record: a numeric tag and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthRecord {
    pub tag: u32,
    pub data: Vec<u8>,
}

impl ExthRecord {
    pub fn new(tag: u32, data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    /// Record carrying a UTF-8 string payload.
    pub fn string(tag: u32, value: &str) -> Self {
        Self::new(tag, value.as_bytes().to_vec())
    }

    /// Record carrying a big-endian u32 payload.
    pub fn u32(tag: u32, value: u32) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }
}

/// An ordered EXTH block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exth {
    pub records: Vec<ExthRecord>,
}

impl Exth {
    /// Parse an EXTH block at the start of `data`. Returns the block and the
    /// number of bytes it occupies (header plus padding, per the stored
    /// length field).
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 12 {
            return Err(Error::MalformedContainer(format!(
                "EXTH block truncated: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != b"EXTH" {
            return Err(Error::bad_magic("EXTH block", &data[0..4]));
        }

        let length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let record_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut records = Vec::with_capacity(record_count as usize);
        let mut pos = 12;
        for i in 0..record_count {
            if pos + 8 > data.len() {
                return Err(Error::MalformedContainer(format!(
                    "EXTH record {i} header past end of block"
                )));
            }
            let tag = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            let total_len =
                u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                    as usize;
            if total_len < 8 || pos + total_len > data.len() {
                return Err(Error::MalformedContainer(format!(
                    "EXTH record {i} claims {total_len} bytes"
                )));
            }
            records.push(ExthRecord::new(tag, data[pos + 8..pos + total_len].to_vec()));
            pos += total_len;
        }

        Ok((Self { records }, length.max(pos)))
    }

    /// Serialize the block: magic, length, record count, records, padded to a
    /// four-byte boundary. The length field covers the padding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for record in &self.records {
            body.extend_from_slice(&record.tag.to_be_bytes());
            body.extend_from_slice(&((record.data.len() + 8) as u32).to_be_bytes());
            body.extend_from_slice(&record.data);
        }
        while body.len() % 4 != 0 {
            body.push(0);
        }

        let mut out = Vec::with_capacity(12 + body.len());
        out.extend_from_slice(b"EXTH");
        out.extend_from_slice(&((12 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// First record with the given tag.
    pub fn get(&self, tag: u32) -> Option<&ExthRecord> {
        self.records.iter().find(|r| r.tag == tag)
    }

    /// First record with the given tag, decoded as a UTF-8 string.
    pub fn get_string(&self, tag: u32) -> Option<String> {
        self.get(tag)
            .map(|r| String::from_utf8_lossy(&r.data).into_owned())
    }

    /// First record with the given tag, decoded as a big-endian u32.
    pub fn get_u32(&self, tag: u32) -> Option<u32> {
        self.get(tag).and_then(|r| {
            if r.data.len() >= 4 {
                Some(u32::from_be_bytes([r.data[0], r.data[1], r.data[2], r.data[3]]))
            } else {
                None
            }
        })
    }

    /// All payloads for a repeatable tag, decoded as UTF-8 strings.
    pub fn get_strings(&self, tag: u32) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| String::from_utf8_lossy(&r.data).into_owned())
            .collect()
    }

    /// Drop every record carrying `tag`.
    pub fn remove(&mut self, tag: u32) {
        self.records.retain(|r| r.tag != tag);
    }

    pub fn push(&mut self, record: ExthRecord) {
        self.records.push(record);
    }
}
