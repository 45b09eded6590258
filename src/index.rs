//! INDX/TAGX/IDXT metadata-index codec.
//!
//! An index is a run of PalmDB records: a head record carrying the TAGX tag
//! schema, then data records each holding packed entries and an IDXT offset
//! table. Entries map tag ids to value lists; which tags are present in an
//! entry is packed into control-byte bits declared by the schema.
//!
//! The reader accepts any control-byte count; the writer only ever produces
//! one control byte, which is all the indices in scope use.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Error, Result};
use crate::varlen;

const INDX_HEADER_LEN: usize = 28;

/// One TAGX schema row. `bitmask` is stored as on the wire (already shifted
/// into position); `shift` is its trailing-zero count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagxRow {
    pub tag: u8,
    pub values_count: u8,
    pub bitmask: u8,
    pub shift: u8,
}

/// TAGX schema: real rows plus `None` slots marking control-byte boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tagx {
    pub rows: Vec<Option<TagxRow>>,
}

impl Tagx {
    pub fn control_byte_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_none()).count()
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::CorruptIndex(format!(
                "TAGX block truncated: {} bytes",
                data.len()
            )));
        }
        if &data[0..4] != b"TAGX" {
            return Err(Error::bad_magic("TAGX block", &data[0..4]));
        }

        let length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let control_byte_count =
            u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if length < 12 || length > data.len() || (length - 12) % 4 != 0 {
            return Err(Error::CorruptIndex(format!(
                "TAGX length {length} is not a row multiple"
            )));
        }

        let mut rows = Vec::with_capacity((length - 12) / 4);
        for chunk in data[12..length].chunks_exact(4) {
            if chunk[3] != 0 {
                rows.push(None);
            } else {
                let bitmask = chunk[2];
                if bitmask == 0 {
                    return Err(Error::CorruptIndex(format!(
                        "TAGX tag {} declares an empty bitmask",
                        chunk[0]
                    )));
                }
                rows.push(Some(TagxRow {
                    tag: chunk[0],
                    values_count: chunk[1],
                    bitmask,
                    shift: bitmask.trailing_zeros() as u8,
                }));
            }
        }

        let tagx = Self { rows };
        if tagx.control_byte_count() != control_byte_count {
            return Err(Error::CorruptIndex(format!(
                "TAGX declares {control_byte_count} control bytes but carries {}",
                tagx.control_byte_count()
            )));
        }
        Ok(tagx)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.rows.len() * 4);
        out.extend_from_slice(b"TAGX");
        out.extend_from_slice(&((12 + self.rows.len() * 4) as u32).to_be_bytes());
        out.extend_from_slice(&(self.control_byte_count() as u32).to_be_bytes());
        for row in &self.rows {
            match row {
                Some(r) => out.extend_from_slice(&[r.tag, r.values_count, r.bitmask, 0]),
                None => out.extend_from_slice(&[0, 0, 0, 1]),
            }
        }
        out
    }

    /// Derive a single-control-byte schema from an entry's tag shape:
    /// ascending tag order, each mask wide enough for its value count, shifts
    /// packed from bit 0 upward.
    fn derive(shape: &BTreeMap<u8, usize>) -> Result<Self> {
        let mut rows = Vec::with_capacity(shape.len() + 1);
        let mut shift = 0u8;
        for (&tag, &count) in shape {
            let width = bits_for(count);
            if shift + width > 8 {
                return Err(Error::CorruptIndex(format!(
                    "tag schema overflows a single control byte at tag {tag}"
                )));
            }
            let bitmask = (((1u16 << width) - 1) as u8) << shift;
            rows.push(Some(TagxRow {
                tag,
                values_count: count as u8,
                bitmask,
                shift,
            }));
            shift += width;
        }
        rows.push(None);
        Ok(Self { rows })
    }
}

/// Bits needed to store counts up to `n`: ceil(log2(n + 1)).
fn bits_for(n: usize) -> u8 {
    let mut bits = 0u8;
    while (1usize << bits) < n + 1 {
        bits += 1;
    }
    bits.max(1)
}

/// One decoded index entry: a label and a sparse tag → values map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub label: Vec<u8>,
    pub tags: BTreeMap<u8, Vec<u32>>,
}

impl IndexEntry {
    pub fn new(label: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: u8, values: &[u32]) -> Self {
        self.tags.insert(tag, values.to_vec());
        self
    }

    /// Value `idx` of tag `tag_id`, if present.
    pub fn tag(&self, tag_id: u8, idx: usize) -> Option<u32> {
        self.tags.get(&tag_id).and_then(|v| v.get(idx)).copied()
    }

    /// Label interpreted as a decimal integer (FRAG insert positions).
    pub fn label_value(&self) -> Result<u32> {
        std::str::from_utf8(&self.label)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                Error::CorruptIndex(format!("label {:?} is not decimal", self.label))
            })
    }
}

/// A fully decoded index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    /// Debug name, e.g. "SKEL" or "FRAG". Not serialized.
    pub name: String,
    pub entries: Vec<IndexEntry>,
}

impl Index {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Number of PalmDB records a serialized index occupies, derived from the
    /// head record: 1 + stored data-record count.
    pub fn record_span(head: &[u8]) -> Result<usize> {
        let header = IndxHeader::parse(head)?;
        Ok(1 + header.entry_count as usize)
    }

    /// Decode an index from its head record and the records that follow it.
    /// `records[0]` is the head; data records are `records[1..=n]` where `n`
    /// is the head's stored record count.
    pub fn read(name: &str, records: &[&[u8]]) -> Result<Self> {
        let head = records
            .first()
            .ok_or_else(|| Error::CorruptIndex(format!("{name} index has no head record")))?;
        let header = IndxHeader::parse(head)?;
        let data_record_count = header.entry_count as usize;
        if records.len() < 1 + data_record_count {
            return Err(Error::CorruptIndex(format!(
                "{name} index wants {data_record_count} data records, {} available",
                records.len() - 1
            )));
        }

        let tagx_start = header.header_length as usize;
        if tagx_start > head.len() {
            return Err(Error::CorruptIndex(format!(
                "{name} head header length {tagx_start} exceeds record"
            )));
        }
        let tagx = Tagx::parse(&head[tagx_start..])?;

        let mut entries = Vec::new();
        for rec in &records[1..=data_record_count] {
            decode_data_record(name, rec, &tagx, &mut entries)?;
        }

        debug!("decoded {name} index: {} entries", entries.len());
        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    /// Serialize with an explicit single-control-byte schema given as
    /// (tag, values_count) pairs.
    pub fn to_records_with_schema(&self, schema: &[(u8, u8)]) -> Result<Vec<Vec<u8>>> {
        let shape: BTreeMap<u8, usize> =
            schema.iter().map(|&(t, c)| (t, c as usize)).collect();
        let tagx = Tagx::derive(&shape)?;
        self.build(&tagx, &shape)
    }

    /// Serialize, deriving the schema from the first entry's tag shape.
    /// Every entry must share that shape (absent tags allowed).
    pub fn to_records(&self) -> Result<Vec<Vec<u8>>> {
        let shape: BTreeMap<u8, usize> = match self.entries.first() {
            Some(first) => first
                .tags
                .iter()
                .map(|(&tag, values)| (tag, values.len()))
                .collect(),
            None => BTreeMap::new(),
        };
        let tagx = Tagx::derive(&shape)?;
        self.build(&tagx, &shape)
    }

    fn build(&self, tagx: &Tagx, shape: &BTreeMap<u8, usize>) -> Result<Vec<Vec<u8>>> {
        let mut body = Vec::new();
        let mut offsets: Vec<u16> = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let mut control = 0u8;
            let mut values = Vec::new();
            for (&tag, &count) in shape {
                let Some(entry_values) = entry.tags.get(&tag) else {
                    continue;
                };
                if entry_values.len() != count {
                    return Err(Error::CorruptIndex(format!(
                        "{} entry {:?} carries {} values for tag {tag}, schema wants {count}",
                        self.name,
                        entry.label,
                        entry_values.len()
                    )));
                }
                let row = tagx
                    .rows
                    .iter()
                    .flatten()
                    .find(|r| r.tag == tag)
                    .ok_or_else(|| {
                        Error::CorruptIndex(format!("{} schema lost tag {tag}", self.name))
                    })?;
                control |= 1 << row.shift;
                for &v in entry_values {
                    values.extend(varlen::encode_forward(v));
                }
            }
            for (&tag, _) in entry.tags.iter() {
                if !shape.contains_key(&tag) {
                    return Err(Error::CorruptIndex(format!(
                        "{} entry {:?} carries tag {tag} missing from the schema",
                        self.name, entry.label
                    )));
                }
            }

            offsets.push((INDX_HEADER_LEN + body.len()) as u16);
            body.push(entry.label.len() as u8);
            body.extend_from_slice(&entry.label);
            body.push(control);
            body.extend_from_slice(&values);
        }

        let data_records = if self.entries.is_empty() { 0 } else { 1 };
        let head = build_head_record(tagx, data_records);

        let mut records = vec![head];
        if data_records == 1 {
            records.push(build_data_record(&body, &offsets));
        }
        debug!(
            "encoded {} index: {} entries in {} records",
            self.name,
            self.entries.len(),
            records.len()
        );
        Ok(records)
    }
}

/// Parsed 28-byte INDX record header.
#[derive(Debug, Clone, Copy)]
struct IndxHeader {
    header_length: u32,
    idxt_offset: u32,
    /// Data-record count in the head record; entry count in data records.
    entry_count: u32,
}

impl IndxHeader {
    fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < INDX_HEADER_LEN {
            return Err(Error::CorruptIndex(format!(
                "INDX header truncated: {} bytes",
                record.len()
            )));
        }
        if &record[0..4] != b"INDX" {
            return Err(Error::bad_magic("INDX record", &record[0..4]));
        }
        Ok(Self {
            header_length: u32::from_be_bytes([record[4], record[5], record[6], record[7]]),
            idxt_offset: u32::from_be_bytes([record[20], record[21], record[22], record[23]]),
            entry_count: u32::from_be_bytes([record[24], record[25], record[26], record[27]]),
        })
    }

    fn to_bytes(&self) -> [u8; INDX_HEADER_LEN] {
        let mut out = [0u8; INDX_HEADER_LEN];
        out[0..4].copy_from_slice(b"INDX");
        out[4..8].copy_from_slice(&self.header_length.to_be_bytes());
        // 8..12 reserved, 12..16 type, 16..20 reserved
        out[20..24].copy_from_slice(&self.idxt_offset.to_be_bytes());
        out[24..28].copy_from_slice(&self.entry_count.to_be_bytes());
        out
    }
}

fn build_head_record(tagx: &Tagx, data_records: u32) -> Vec<u8> {
    let header = IndxHeader {
        header_length: INDX_HEADER_LEN as u32,
        idxt_offset: 0,
        entry_count: data_records,
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&tagx.to_bytes());
    out
}

fn build_data_record(body: &[u8], offsets: &[u16]) -> Vec<u8> {
    let idxt_offset = INDX_HEADER_LEN + body.len();
    let header = IndxHeader {
        header_length: INDX_HEADER_LEN as u32,
        idxt_offset: idxt_offset as u32,
        entry_count: offsets.len() as u32,
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(body);
    out.extend_from_slice(b"IDXT");
    for &offset in offsets {
        out.extend_from_slice(&offset.to_be_bytes());
    }
    out
}

fn decode_data_record(
    name: &str,
    record: &[u8],
    tagx: &Tagx,
    entries: &mut Vec<IndexEntry>,
) -> Result<()> {
    let header = IndxHeader::parse(record)?;
    let idxt = header.idxt_offset as usize;
    if idxt + 4 > record.len() || &record[idxt..idxt + 4] != b"IDXT" {
        return Err(Error::CorruptIndex(format!(
            "{name} data record has no IDXT table at {idxt}"
        )));
    }

    for i in 0..header.entry_count as usize {
        let slot = idxt + 4 + i * 2;
        if slot + 2 > record.len() {
            return Err(Error::CorruptIndex(format!(
                "{name} IDXT slot {i} past record end"
            )));
        }
        let offset = u16::from_be_bytes([record[slot], record[slot + 1]]) as usize;
        if offset >= idxt || offset < header.header_length as usize {
            return Err(Error::CorruptIndex(format!(
                "{name} entry {i} offset {offset} outside the record body"
            )));
        }
        entries.push(decode_entry(name, &record[offset..idxt], tagx)?);
    }
    Ok(())
}

/// Decode one entry: length-prefixed label, control bytes, packed values.
fn decode_entry(name: &str, data: &[u8], tagx: &Tagx) -> Result<IndexEntry> {
    let label_len = *data
        .first()
        .ok_or_else(|| Error::CorruptIndex(format!("{name} entry is empty")))?
        as usize;
    let control_count = tagx.control_byte_count();
    if 1 + label_len + control_count > data.len() {
        return Err(Error::CorruptIndex(format!(
            "{name} entry label/control bytes past entry end"
        )));
    }
    let label = data[1..1 + label_len].to_vec();
    let control_bytes = &data[1 + label_len..1 + label_len + control_count];
    let mut pos = 1 + label_len + control_count;

    // First pass over the schema: which tags are present, and either an
    // element count or a byte length for each.
    struct Pending {
        tag: u8,
        values_count: u8,
        element_count: Option<u32>,
        byte_count: Option<u32>,
    }
    let mut pending = Vec::new();
    let mut control_idx = 0usize;

    for row in &tagx.rows {
        let Some(row) = row else {
            control_idx += 1;
            continue;
        };
        if control_idx >= control_bytes.len() {
            break;
        }
        let masked = control_bytes[control_idx] & row.bitmask;
        if masked == 0 {
            continue;
        }
        let (element_count, byte_count) = if masked == row.bitmask && row.bitmask.count_ones() > 1
        {
            // Wide escape: a varint byte length precedes the value stream.
            let (len, consumed) = varlen::decode_forward(&data[pos.min(data.len())..]);
            pos += consumed;
            (None, Some(len))
        } else {
            (Some(u32::from(masked >> row.shift)), None)
        };
        pending.push(Pending {
            tag: row.tag,
            values_count: row.values_count,
            element_count,
            byte_count,
        });
    }

    // Second pass: pull the values.
    let mut tags = BTreeMap::new();
    for p in pending {
        let mut values = Vec::new();
        if let Some(count) = p.element_count {
            for _ in 0..count * u32::from(p.values_count) {
                if pos >= data.len() {
                    return Err(Error::CorruptIndex(format!(
                        "{name} entry ran out of bytes decoding tag {}",
                        p.tag
                    )));
                }
                let (v, consumed) = varlen::decode_forward(&data[pos..]);
                pos += consumed;
                values.push(v);
            }
        } else if let Some(bytes) = p.byte_count {
            let mut used = 0usize;
            while used < bytes as usize && pos < data.len() {
                let (v, consumed) = varlen::decode_forward(&data[pos..]);
                pos += consumed;
                used += consumed;
                values.push(v);
            }
        }
        tags.insert(p.tag, values);
    }

    Ok(IndexEntry { label, tags })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_for_counts() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 3);
    }

    #[test]
    fn schema_derivation_packs_shifts() {
        let shape = BTreeMap::from([(1u8, 1usize), (6, 2)]);
        let tagx = Tagx::derive(&shape).unwrap();
        assert_eq!(tagx.rows.len(), 3);
        let one = tagx.rows[0].unwrap();
        assert_eq!((one.tag, one.bitmask, one.shift), (1, 0x01, 0));
        let six = tagx.rows[1].unwrap();
        assert_eq!((six.tag, six.bitmask, six.shift), (6, 0x06, 1));
        assert!(tagx.rows[2].is_none());
        assert_eq!(tagx.control_byte_count(), 1);
    }

    #[test]
    fn index_roundtrip() {
        let mut index = Index::new("SKEL");
        for i in 0..10u32 {
            index.entries.push(
                IndexEntry::new(format!("SKEL{i:010}"))
                    .with_tag(1, &[1])
                    .with_tag(6, &[i * 100, 57]),
            );
        }

        let records = index.to_records_with_schema(&[(1, 1), (6, 2)]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(Index::record_span(&records[0]).unwrap(), 2);

        let slices: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let parsed = Index::read("SKEL", &slices).unwrap();
        assert_eq!(parsed.entries, index.entries);
        assert_eq!(parsed.entries[9].label, b"SKEL0000000009");
        assert_eq!(parsed.entries[9].tag(1, 0), Some(1));
        assert_eq!(parsed.entries[9].tag(6, 0), Some(900));
        assert_eq!(parsed.entries[9].tag(6, 1), Some(57));
    }

    #[test]
    fn absent_tags_stay_absent() {
        let mut index = Index::new("SKEL");
        index.entries.push(
            IndexEntry::new("SKEL0000000000")
                .with_tag(1, &[1])
                .with_tag(6, &[0, 10]),
        );
        index
            .entries
            .push(IndexEntry::new("SKEL0000000001").with_tag(6, &[10, 20]));

        let records = index.to_records_with_schema(&[(1, 1), (6, 2)]).unwrap();
        let slices: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let parsed = Index::read("SKEL", &slices).unwrap();
        assert_eq!(parsed.entries[1].tag(1, 0), None);
        assert_eq!(parsed.entries[1].tag(6, 1), Some(20));
    }

    #[test]
    fn empty_index_is_a_lone_head_record() {
        let index = Index::new("SKEL");
        let records = index.to_records_with_schema(&[(1, 1), (6, 2)]).unwrap();
        assert_eq!(records.len(), 1);
        let slices: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let parsed = Index::read("SKEL", &slices).unwrap();
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn wide_escape_uses_byte_counted_stream() {
        // Hand-build an entry whose two-bit mask is saturated, forcing the
        // byte-counted value stream path.
        let tagx = Tagx {
            rows: vec![
                Some(TagxRow {
                    tag: 6,
                    values_count: 2,
                    bitmask: 0x03,
                    shift: 0,
                }),
                None,
            ],
        };

        let mut body = Vec::new();
        let label = b"0000001234";
        body.push(label.len() as u8);
        body.extend_from_slice(label);
        body.push(0x03); // saturated mask
        let mut stream = Vec::new();
        for v in [10u32, 20, 30, 40, 50, 60] {
            stream.extend(varlen::encode_forward(v));
        }
        body.extend(varlen::encode_forward(stream.len() as u32));
        body.extend_from_slice(&stream);

        let offsets = vec![INDX_HEADER_LEN as u16];
        let record = build_data_record(&body, &offsets);
        let mut entries = Vec::new();
        decode_data_record("FRAG", &record, &tagx, &mut entries).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label_value().unwrap(), 1234);
        assert_eq!(entries[0].tags[&6], vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn mismatched_shape_rejected_on_write() {
        let mut index = Index::new("SKEL");
        index
            .entries
            .push(IndexEntry::new("a").with_tag(6, &[1, 2]));
        index.entries.push(IndexEntry::new("b").with_tag(6, &[1]));
        assert!(matches!(
            index.to_records_with_schema(&[(6, 2)]),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn second_control_byte_group_is_read() {
        // Two groups: tag 1 packed into byte 0, tag 2 into byte 1.
        let tagx = Tagx {
            rows: vec![
                Some(TagxRow {
                    tag: 1,
                    values_count: 1,
                    bitmask: 0x01,
                    shift: 0,
                }),
                None,
                Some(TagxRow {
                    tag: 2,
                    values_count: 1,
                    bitmask: 0x01,
                    shift: 0,
                }),
                None,
            ],
        };
        assert_eq!(tagx.control_byte_count(), 2);

        let mut body = Vec::new();
        body.push(1); // label length
        body.push(b'x');
        body.push(0x01); // control byte 0: tag 1 present
        body.push(0x01); // control byte 1: tag 2 present
        body.extend(varlen::encode_forward(7));
        body.extend(varlen::encode_forward(9));

        let record = build_data_record(&body, &[INDX_HEADER_LEN as u16]);
        let mut entries = Vec::new();
        decode_data_record("TEST", &record, &tagx, &mut entries).unwrap();
        assert_eq!(entries[0].tags[&1], vec![7]);
        assert_eq!(entries[0].tags[&2], vec![9]);
    }
}
