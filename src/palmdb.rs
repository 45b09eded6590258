//! PalmDB container framing.
//!
//! A Mobipocket file is a Palm Database: a fixed 78-byte header, a record
//! directory of (offset, attributes, 24-bit uid) rows, and the record bodies
//! concatenated in directory order. Offsets are never stored on the in-memory
//! records; the writer derives them from the record sizes in a single pass.

use std::io::Read;

use log::debug;

use crate::error::{Error, Result};

const HEADER_LEN: usize = 78;
const DIRECTORY_ROW_LEN: usize = 8;

/// Database type for Mobipocket files.
pub const TYPE_BOOK: &[u8; 4] = b"BOOK";
/// Database creator for Mobipocket files.
pub const CREATOR_MOBI: &[u8; 4] = b"MOBI";

/// A single database record: raw bytes plus directory metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PalmDbRecord {
    pub attributes: u8,
    /// 24-bit unique id; the top byte is masked off on write.
    pub uid: u32,
    pub content: Vec<u8>,
}

impl PalmDbRecord {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            attributes: 0,
            uid: 0,
            content,
        }
    }
}

/// Parsed PalmDB header plus its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PalmDb {
    /// Database name, at most 31 bytes of ASCII.
    pub name: String,
    pub attributes: u16,
    pub version: u16,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u32,
    /// Modification time, seconds since the Unix epoch.
    pub modified_at: u32,
    /// Last backup time, seconds since the Unix epoch.
    pub backed_up_at: u32,
    pub modification_number: u32,
    pub appinfo_offset: u32,
    pub sortinfo_offset: u32,
    pub uid_seed: u32,
    pub next_record_list: u32,
    pub records: Vec<PalmDbRecord>,
}

impl Default for PalmDb {
    fn default() -> Self {
        Self {
            name: String::new(),
            attributes: 0,
            version: 0,
            created_at: 0,
            modified_at: 0,
            backed_up_at: 0,
            modification_number: 0,
            appinfo_offset: 0,
            sortinfo_offset: 0,
            uid_seed: 0,
            next_record_list: 0,
            records: Vec::new(),
        }
    }
}

impl PalmDb {
    /// Read a database from a byte stream. The whole stream is consumed;
    /// record boundaries are derived from consecutive directory offsets with
    /// end-of-file terminating the last record.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::parse(&data)
    }

    /// Parse a database from an in-memory byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedContainer(format!(
                "PalmDB header truncated: {} bytes",
                data.len()
            )));
        }

        let name_raw = &data[0..32];
        let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();

        let type_bytes = &data[60..64];
        if type_bytes != TYPE_BOOK {
            return Err(Error::bad_magic("PalmDB type", type_bytes));
        }
        let creator_bytes = &data[64..68];
        if creator_bytes != CREATOR_MOBI {
            return Err(Error::bad_magic("PalmDB creator", creator_bytes));
        }

        let record_count = u16::from_be_bytes([data[76], data[77]]) as usize;
        let dir_end = HEADER_LEN + record_count * DIRECTORY_ROW_LEN;
        if data.len() < dir_end {
            return Err(Error::MalformedContainer(format!(
                "record directory truncated: {record_count} entries, {} bytes",
                data.len()
            )));
        }

        let mut offsets = Vec::with_capacity(record_count);
        let mut attrs = Vec::with_capacity(record_count);
        let mut uids = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let row = HEADER_LEN + i * DIRECTORY_ROW_LEN;
            offsets.push(u32::from_be_bytes([
                data[row],
                data[row + 1],
                data[row + 2],
                data[row + 3],
            ]) as usize);
            attrs.push(data[row + 4]);
            uids.push(u32::from_be_bytes([0, data[row + 5], data[row + 6], data[row + 7]]));
        }

        let mut records = Vec::with_capacity(record_count);
        for i in 0..record_count {
            let start = offsets[i];
            let end = if i + 1 < record_count {
                offsets[i + 1]
            } else {
                data.len()
            };
            if start > end || end > data.len() {
                return Err(Error::MalformedContainer(format!(
                    "record {i} spans {start}..{end} past {} bytes",
                    data.len()
                )));
            }
            records.push(PalmDbRecord {
                attributes: attrs[i],
                uid: uids[i],
                content: data[start..end].to_vec(),
            });
        }

        debug!("parsed PalmDB {:?}: {} records", name, records.len());

        Ok(Self {
            name,
            attributes: u16::from_be_bytes([data[32], data[33]]),
            version: u16::from_be_bytes([data[34], data[35]]),
            created_at: u32::from_be_bytes([data[36], data[37], data[38], data[39]]),
            modified_at: u32::from_be_bytes([data[40], data[41], data[42], data[43]]),
            backed_up_at: u32::from_be_bytes([data[44], data[45], data[46], data[47]]),
            modification_number: u32::from_be_bytes([data[48], data[49], data[50], data[51]]),
            appinfo_offset: u32::from_be_bytes([data[52], data[53], data[54], data[55]]),
            sortinfo_offset: u32::from_be_bytes([data[56], data[57], data[58], data[59]]),
            uid_seed: u32::from_be_bytes([data[68], data[69], data[70], data[71]]),
            next_record_list: u32::from_be_bytes([data[72], data[73], data[74], data[75]]),
            records,
        })
    }

    /// Serialize the database: header, record directory, then bodies with no
    /// gaps. Directory offsets are recomputed from the record sizes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let dir_end = HEADER_LEN + self.records.len() * DIRECTORY_ROW_LEN;
        let body_len: usize = self.records.iter().map(|r| r.content.len()).sum();
        let mut out = Vec::with_capacity(dir_end + body_len);

        let mut name_bytes = [0u8; 32];
        let name = self.name.as_bytes();
        let copy = name.len().min(31);
        name_bytes[..copy].copy_from_slice(&name[..copy]);
        out.extend_from_slice(&name_bytes);

        out.extend_from_slice(&self.attributes.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.created_at.to_be_bytes());
        out.extend_from_slice(&self.modified_at.to_be_bytes());
        out.extend_from_slice(&self.backed_up_at.to_be_bytes());
        out.extend_from_slice(&self.modification_number.to_be_bytes());
        out.extend_from_slice(&self.appinfo_offset.to_be_bytes());
        out.extend_from_slice(&self.sortinfo_offset.to_be_bytes());
        out.extend_from_slice(TYPE_BOOK);
        out.extend_from_slice(CREATOR_MOBI);
        out.extend_from_slice(&self.uid_seed.to_be_bytes());
        out.extend_from_slice(&self.next_record_list.to_be_bytes());
        out.extend_from_slice(&(self.records.len() as u16).to_be_bytes());

        let mut offset = dir_end;
        for record in &self.records {
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            let uid = record.uid & 0x00FF_FFFF;
            out.push(record.attributes);
            out.push((uid >> 16) as u8);
            out.push((uid >> 8) as u8);
            out.push(uid as u8);
            offset += record.content.len();
        }

        for record in &self.records {
            out.extend_from_slice(&record.content);
        }

        debug!(
            "serialized PalmDB {:?}: {} records, {} bytes",
            self.name,
            self.records.len(),
            out.len()
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> PalmDb {
        PalmDb {
            name: "sample".into(),
            created_at: 1_000_000,
            modified_at: 1_000_001,
            uid_seed: 5,
            records: vec![
                PalmDbRecord {
                    attributes: 0,
                    uid: 0,
                    content: b"first record".to_vec(),
                },
                PalmDbRecord {
                    attributes: 0x40,
                    uid: 2,
                    content: Vec::new(),
                },
                PalmDbRecord {
                    attributes: 0,
                    uid: 4,
                    content: b"last".to_vec(),
                },
            ],
            ..PalmDb::default()
        }
    }

    #[test]
    fn roundtrip() {
        let db = sample_db();
        let bytes = db.to_bytes();
        let parsed = PalmDb::parse(&bytes).unwrap();
        assert_eq!(parsed, db);
    }

    #[test]
    fn directory_offsets_match_bodies() {
        let db = sample_db();
        let bytes = db.to_bytes();
        assert!(bytes.len() >= HEADER_LEN + DIRECTORY_ROW_LEN * db.records.len());

        let dir_end = HEADER_LEN + DIRECTORY_ROW_LEN * db.records.len();
        let mut expected = dir_end;
        for i in 0..db.records.len() {
            let row = HEADER_LEN + i * DIRECTORY_ROW_LEN;
            let offset = u32::from_be_bytes([
                bytes[row],
                bytes[row + 1],
                bytes[row + 2],
                bytes[row + 3],
            ]) as usize;
            assert_eq!(offset, expected);
            expected += db.records[i].content.len();
        }
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            PalmDb::parse(&[0u8; 10]),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn wrong_type_rejected() {
        let mut bytes = sample_db().to_bytes();
        bytes[60..64].copy_from_slice(b"TEXt");
        assert!(matches!(
            PalmDb::parse(&bytes),
            Err(Error::UnsupportedMagic { .. })
        ));
    }

    #[test]
    fn descending_offsets_rejected() {
        let db = sample_db();
        let mut bytes = db.to_bytes();
        // Point the second record past the third.
        let row = HEADER_LEN + DIRECTORY_ROW_LEN;
        bytes[row..row + 4].copy_from_slice(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            PalmDb::parse(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn long_names_truncate_to_31_bytes() {
        let mut db = sample_db();
        db.name = "x".repeat(40);
        let parsed = PalmDb::parse(&db.to_bytes()).unwrap();
        assert_eq!(parsed.name.len(), 31);
    }
}
