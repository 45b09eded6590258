//! MOBI record-0 header family: the PalmDOC preamble, the MOBI header, and
//! the FDST flow-demarcation record.
//!
//! Index-typed header fields use `0xFFFF_FFFF` as an "unset" sentinel on the
//! wire; they surface as `Option<u32>` here so nothing above this layer ever
//! compares against the sentinel.

use crate::error::{Error, Result};

/// "Unset index" sentinel used throughout MOBI headers.
pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// Fixed size of the MOBI header the writer emits, magic and length prefix
/// included.
pub const MOBI_HEADER_LEN: u32 = 264;

/// Text encoding accepted and emitted: UTF-8.
pub const ENCODING_UTF8: u32 = 65001;

fn opt(value: u32) -> Option<u32> {
    if value == NULL_INDEX {
        None
    } else {
        Some(value)
    }
}

fn unopt(value: Option<u32>) -> u32 {
    value.unwrap_or(NULL_INDEX)
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// 16-byte PalmDOC preamble at the top of record 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PalmDocPreamble {
    pub text_length: u32,
    pub text_record_count: u16,
    pub text_record_size: u16,
}

impl PalmDocPreamble {
    /// Parse and validate the preamble. Only compression 1 (none) and
    /// encryption 0 (none) are in scope.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::MalformedContainer(format!(
                "PalmDOC preamble truncated: {} bytes",
                data.len()
            )));
        }
        let compression = u16_at(data, 0);
        if compression != 1 {
            return Err(Error::UnsupportedCompression(compression));
        }
        let encryption = u16_at(data, 12);
        if encryption != 0 {
            return Err(Error::UnsupportedEncryption(encryption));
        }
        Ok(Self {
            text_length: u32_at(data, 4),
            text_record_count: u16_at(data, 8),
            text_record_size: u16_at(data, 10),
        })
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..2].copy_from_slice(&1u16.to_be_bytes());
        out[4..8].copy_from_slice(&self.text_length.to_be_bytes());
        out[8..10].copy_from_slice(&self.text_record_count.to_be_bytes());
        out[10..12].copy_from_slice(&self.text_record_size.to_be_bytes());
        // encryption and the two reserved halves stay zero
        out
    }
}

/// Parsed MOBI header from record 0 (or the KF8 boundary record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobiHeader {
    pub preamble: PalmDocPreamble,
    /// Stored header length, magic and length prefix included.
    pub header_length: u32,
    pub mobi_type: u32,
    pub uid: u32,
    pub version: u32,
    pub full_name_offset: u32,
    pub full_name_length: u32,
    pub min_version: u32,
    pub image_index: Option<u32>,
    pub exth_flags: u32,
    pub fdst_index: Option<u32>,
    pub fdst_section_count: u32,
    pub extra_flags: u16,
    /// FRAG index, version >= 8 only.
    pub frag_index: Option<u32>,
    /// SKEL index, version >= 8 only.
    pub skel_index: Option<u32>,
}

impl MobiHeader {
    /// Parse a full record 0. Offsets below are relative to the record start
    /// (preamble included), matching the documented header map.
    pub fn parse(record: &[u8]) -> Result<Self> {
        let preamble = PalmDocPreamble::parse(record)?;

        if record.len() < 24 {
            return Err(Error::MalformedContainer(format!(
                "MOBI header truncated: {} bytes",
                record.len()
            )));
        }
        if &record[16..20] != b"MOBI" {
            return Err(Error::bad_magic("MOBI header", &record[16..20]));
        }

        let header_length = u32_at(record, 20);
        let header_end = 16 + header_length as usize;
        if header_length < 8 || header_end > record.len() {
            return Err(Error::MalformedContainer(format!(
                "MOBI header length {header_length} exceeds record ({} bytes)",
                record.len()
            )));
        }

        let text_encoding = u32_at(record, 28);
        if text_encoding != ENCODING_UTF8 {
            return Err(Error::UnsupportedTextEncoding(text_encoding));
        }

        let version = u32_at(record, 36);
        let at = |offset: usize| -> u32 {
            if offset + 4 <= header_end && offset + 4 <= record.len() {
                u32_at(record, offset)
            } else {
                NULL_INDEX
            }
        };

        // Version < 8 reuses the FDST slot as two u16 halves; the second
        // half is the last-text-record index that doubles as the FDST index.
        let (fdst_index, fdst_section_count) = if version >= 8 {
            (opt(at(192)), if at(196) == NULL_INDEX { 0 } else { at(196) })
        } else {
            let half = if 194 + 2 <= header_end {
                u16_at(record, 194)
            } else {
                0xFFFF
            };
            let fdst = if half == 0xFFFF { None } else { Some(u32::from(half)) };
            (fdst, if at(196) == NULL_INDEX { 0 } else { at(196) })
        };

        let extra_flags = if 242 + 2 <= header_end && header_length >= 228 {
            u16_at(record, 242)
        } else {
            0
        };

        let (frag_index, skel_index) = if version >= 8 {
            (opt(at(248)), opt(at(252)))
        } else {
            (None, None)
        };

        Ok(Self {
            preamble,
            header_length,
            mobi_type: at(24),
            uid: at(32),
            version,
            full_name_offset: at(84),
            full_name_length: at(88),
            min_version: at(104),
            image_index: opt(at(108)),
            exth_flags: at(128),
            fdst_index,
            fdst_section_count,
            extra_flags,
            frag_index,
            skel_index,
        })
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }

    /// Absolute offset of the EXTH block within record 0.
    pub fn exth_offset(&self) -> usize {
        16 + self.header_length as usize
    }

    /// Full name (title) bytes, located by absolute offset within record 0.
    pub fn full_name<'a>(&self, record: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.full_name_offset as usize;
        let end = start + self.full_name_length as usize;
        if end > record.len() {
            return Err(Error::MalformedContainer(format!(
                "full name spans {start}..{end} past record end"
            )));
        }
        Ok(&record[start..end])
    }
}

/// Index fields the record-0 writer bakes in. All record indices are relative
/// to the owning unit's first record; the caller corrects hybrid offsets
/// before handing them down.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIndices {
    pub image_index: Option<u32>,
    pub fdst_index: Option<u32>,
    pub fdst_section_count: u32,
    pub fcis_index: Option<u32>,
    pub flis_index: Option<u32>,
    pub skel_index: Option<u32>,
    pub frag_index: Option<u32>,
    /// Last text record index, written into the dual-use u16 slot for
    /// version < 8.
    pub last_text_record: u16,
}

/// Emit a complete record 0: preamble, fixed 264-byte MOBI header, EXTH
/// block, full name, one trailing NUL.
pub fn build_record0(
    preamble: &PalmDocPreamble,
    mobi_type: u32,
    uid: u32,
    version: u32,
    indices: &HeaderIndices,
    exth: &[u8],
    full_name: &str,
) -> Vec<u8> {
    let name_bytes = full_name.as_bytes();
    let full_name_offset = 16 + MOBI_HEADER_LEN + exth.len() as u32;
    let mut out = Vec::with_capacity(full_name_offset as usize + name_bytes.len() + 1);

    out.extend_from_slice(&preamble.to_bytes());

    out.extend_from_slice(b"MOBI");
    out.extend_from_slice(&MOBI_HEADER_LEN.to_be_bytes());
    out.extend_from_slice(&mobi_type.to_be_bytes());
    out.extend_from_slice(&ENCODING_UTF8.to_be_bytes());
    out.extend_from_slice(&uid.to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());

    // 40..80: orthographic/inflection/names/keys/extra index slots, unset
    for _ in 0..10 {
        out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    }

    // 80: first non-text record
    out.extend_from_slice(&(u32::from(indices.last_text_record) + 1).to_be_bytes());
    // 84: full name offset, 88: length
    out.extend_from_slice(&full_name_offset.to_be_bytes());
    out.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
    // 92: locale, 96/100: dictionary languages
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    // 104: min version
    out.extend_from_slice(&version.to_be_bytes());
    // 108: first image record
    out.extend_from_slice(&unopt(indices.image_index).to_be_bytes());
    // 112..128: HUFF/CDIC slots
    for _ in 0..4 {
        out.extend_from_slice(&0u32.to_be_bytes());
    }
    // 128: EXTH flags
    out.extend_from_slice(&0x40u32.to_be_bytes());
    // 132..164: reserved
    out.extend_from_slice(&[0u8; 32]);
    // 164: unknown index
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    // 168..184: DRM offset/count/size/flags
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    // 184..192: reserved
    out.extend_from_slice(&[0u8; 8]);

    // 192: FDST index for KF8; first/last text record halves for MOBI6
    if version >= 8 {
        out.extend_from_slice(&unopt(indices.fdst_index).to_be_bytes());
    } else {
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&indices.last_text_record.to_be_bytes());
    }
    // 196: FDST section count
    out.extend_from_slice(&indices.fdst_section_count.to_be_bytes());
    // 200/204: FCIS, 208/212: FLIS
    out.extend_from_slice(&unopt(indices.fcis_index).to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&unopt(indices.flis_index).to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    // 216..224: reserved
    out.extend_from_slice(&[0u8; 8]);
    // 224/228: SRCS
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    // 232..240
    out.extend_from_slice(&[0xFF; 8]);
    // 240: extra record data flags (low u16 at 242)
    out.extend_from_slice(&0u32.to_be_bytes());
    // 244: NCX
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    // 248: FRAG, 252: SKEL
    out.extend_from_slice(&unopt(indices.frag_index).to_be_bytes());
    out.extend_from_slice(&unopt(indices.skel_index).to_be_bytes());
    // 256: DATP, 260: guide
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    out.extend_from_slice(&NULL_INDEX.to_be_bytes());
    // 264..280: reserved tail of the fixed header
    out.extend_from_slice(&[0u8; 16]);

    debug_assert_eq!(out.len(), 16 + MOBI_HEADER_LEN as usize);

    out.extend_from_slice(exth);
    out.extend_from_slice(name_bytes);
    out.push(0);
    out
}

/// Parsed FDST record: byte ranges slicing the concatenated text into flows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fdst {
    pub sections: Vec<(u32, u32)>,
}

impl Fdst {
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < 12 {
            return Err(Error::MalformedContainer(format!(
                "FDST record truncated: {} bytes",
                record.len()
            )));
        }
        if &record[0..4] != b"FDST" {
            return Err(Error::bad_magic("FDST record", &record[0..4]));
        }

        let data_offset = u32_at(record, 4) as usize;
        let section_count = u32_at(record, 8) as usize;
        if data_offset + section_count * 8 > record.len() {
            return Err(Error::MalformedContainer(format!(
                "FDST claims {section_count} sections past record end"
            )));
        }

        let mut sections = Vec::with_capacity(section_count);
        for i in 0..section_count {
            let row = data_offset + i * 8;
            sections.push((u32_at(record, row), u32_at(record, row + 4)));
        }
        Ok(Self { sections })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.sections.len() * 8);
        out.extend_from_slice(b"FDST");
        out.extend_from_slice(&12u32.to_be_bytes());
        out.extend_from_slice(&(self.sections.len() as u32).to_be_bytes());
        for &(start, end) in &self.sections {
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&end.to_be_bytes());
        }
        out
    }

    /// Slice `text` into flows. Sections must be contiguous and cover the
    /// whole text.
    pub fn split<'a>(&self, text: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let mut flows = Vec::with_capacity(self.sections.len());
        let mut cursor = 0u32;
        for (i, &(start, end)) in self.sections.iter().enumerate() {
            if start != cursor || end < start || end as usize > text.len() {
                return Err(Error::MalformedContainer(format!(
                    "FDST section {i} spans {start}..{end}, expected start {cursor} within {} bytes",
                    text.len()
                )));
            }
            flows.push(&text[start as usize..end as usize]);
            cursor = end;
        }
        if cursor as usize != text.len() {
            return Err(Error::MalformedContainer(format!(
                "FDST sections cover {cursor} of {} text bytes",
                text.len()
            )));
        }
        Ok(flows)
    }

    /// Build sections covering consecutive flows of the given lengths.
    pub fn from_flow_lengths(lengths: &[usize]) -> Self {
        let mut sections = Vec::with_capacity(lengths.len());
        let mut cursor = 0u32;
        for &len in lengths {
            let end = cursor + len as u32;
            sections.push((cursor, end));
            cursor = end;
        }
        Self { sections }
    }
}
