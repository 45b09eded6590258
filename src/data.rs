//! The MOBI data unit: one header's worth of text, metadata, and structure.
//!
//! A hybrid file carries two of these (MOBI6 and KF8); plain files carry one.
//! The unit owns its flows (FDST-delimited byte streams, element 0 being the
//! raw ML) and, for KF8, the HTML parts reconstructed from SKEL/FRAG.

use crate::exth::Exth;
use crate::skeleton;
use crate::varlen;

/// Text records are framed in 4096-byte slices.
pub const TEXT_RECORD_SIZE: usize = 4096;

/// One MOBI6 or KF8 unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobiData {
    /// Format version: 6 for MOBI6/KF7, >= 8 for KF8.
    pub version: u32,
    pub mobi_type: u32,
    pub uid: u32,
    pub exth: Exth,
    /// Ordered byte streams; `flows[0]` is the raw ML, the rest are
    /// auxiliary streams (CSS, SVG, ...) delimited by FDST.
    pub flows: Vec<Vec<u8>>,
    /// HTML parts reconstructed from `flows[0]` via SKEL/FRAG. Derived on
    /// read; drives `flows[0]` regeneration on write.
    pub parts: Vec<Vec<u8>>,
}

impl MobiData {
    /// An empty MOBI6 unit.
    pub fn mobi6() -> Self {
        Self::with_version(6)
    }

    /// An empty KF8 unit.
    pub fn kf8() -> Self {
        Self::with_version(8)
    }

    pub fn with_version(version: u32) -> Self {
        Self {
            version,
            mobi_type: 2,
            uid: 0,
            exth: Exth::default(),
            flows: Vec::new(),
            parts: Vec::new(),
        }
    }

    pub fn is_kf8(&self) -> bool {
        self.version >= 8
    }

    /// The concatenated text stream this unit serializes to. Parts, when
    /// present, regenerate `flows[0]`; auxiliary flows follow unchanged.
    pub fn raw_text(&self) -> Vec<u8> {
        let mut text = Vec::new();
        if self.parts.is_empty() {
            if let Some(first) = self.flows.first() {
                text.extend_from_slice(first);
            }
        } else {
            text.extend(skeleton::join_parts(&self.parts));
        }
        for flow in self.flows.iter().skip(1) {
            text.extend_from_slice(flow);
        }
        text
    }

    /// Lengths of the serialized flows, matching [`raw_text`](Self::raw_text).
    pub fn flow_lengths(&self) -> Vec<usize> {
        let mut lengths = Vec::with_capacity(self.flows.len().max(1));
        if self.parts.is_empty() {
            if let Some(first) = self.flows.first() {
                lengths.push(first.len());
            }
        } else {
            lengths.push(skeleton::join_parts(&self.parts).len());
        }
        for flow in self.flows.iter().skip(1) {
            lengths.push(flow.len());
        }
        lengths
    }
}

/// Split a text stream into 4096-byte records.
pub fn split_text_records(text: &[u8]) -> Vec<Vec<u8>> {
    text.chunks(TEXT_RECORD_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Strip the trailing metadata entries a text record carries, per the
/// header's `extra_flags` bitmask. Each flag bit above bit 0 contributes one
/// backward-varint-sized entry; bit 0 strips the multibyte-overlap tail of
/// `(last_byte & 0x3) + 1` bytes.
pub fn strip_trailing_entries(record: &[u8], extra_flags: u16) -> &[u8] {
    if extra_flags == 0 || record.is_empty() {
        return record;
    }

    let mut end = record.len();
    let mut flags = extra_flags >> 1;
    while flags != 0 {
        if flags & 1 != 0 {
            if end == 0 {
                break;
            }
            let (size, _) = varlen::decode_backward(record, end);
            let size = size as usize;
            if size > 0 && size <= end {
                end -= size;
            }
        }
        flags >>= 1;
    }

    if extra_flags & 1 != 0 && end > 0 {
        let overlap = (record[end - 1] & 0x3) as usize + 1;
        if overlap <= end {
            end -= overlap;
        }
    }

    &record[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_flags_leave_record_alone() {
        let record = b"some text";
        assert_eq!(strip_trailing_entries(record, 0), record);
    }

    #[test]
    fn overlap_flag_strips_counted_tail() {
        // Tail byte 0x02 -> strip (2 & 3) + 1 = 3 bytes.
        let record = b"payload\x00\x00\x02";
        assert_eq!(strip_trailing_entries(record, 0b1), b"payload");
    }

    #[test]
    fn sized_entry_is_stripped() {
        // One trailing entry of 4 bytes total: 3 data bytes plus its own
        // backward varint (0x84 = 4).
        let mut record = b"payload".to_vec();
        record.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x84]);
        assert_eq!(strip_trailing_entries(&record, 0b10), b"payload");
    }

    #[test]
    fn sized_entry_and_overlap_compose() {
        let mut record = b"payload".to_vec();
        record.push(0x01); // overlap tail: (1 & 3) + 1 = 2 bytes
        record.push(0x01);
        record.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x84]); // sized entry
        assert_eq!(strip_trailing_entries(&record, 0b11), b"payload");
    }

    #[test]
    fn text_record_framing() {
        let text = vec![7u8; TEXT_RECORD_SIZE * 2 + 10];
        let records = split_text_records(&text);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].len(), TEXT_RECORD_SIZE);
        assert_eq!(records[2].len(), 10);
        assert!(split_text_records(&[]).is_empty());
    }

    #[test]
    fn raw_text_prefers_parts() {
        let mut unit = MobiData::kf8();
        unit.flows = vec![b"stale".to_vec(), b"css".to_vec()];
        unit.parts = vec![b"one".to_vec(), b"two".to_vec()];
        assert_eq!(unit.raw_text(), b"one\ntwocss".to_vec());
        assert_eq!(unit.flow_lengths(), vec![7, 3]);
    }

    #[test]
    fn raw_text_without_parts_concatenates_flows() {
        let mut unit = MobiData::mobi6();
        unit.flows = vec![b"only".to_vec()];
        assert_eq!(unit.raw_text(), b"only");
        assert_eq!(unit.flow_lengths(), vec![4]);
    }
}
