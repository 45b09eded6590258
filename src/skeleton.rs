//! SKEL + FRAG part reconstruction.
//!
//! KF8 stores its HTML as one flat stream carved up by two indices: SKEL
//! entries give each skeleton's slice of the stream, FRAG entries give the
//! bodies spliced back into it. The raw stream is strictly sequential: a
//! skeleton's fragment bodies sit immediately after its own bytes, in order.
//!
//! On write only the skeleton table is produced: each part becomes a single
//! fragment-free skeleton, which is all a re-emitted stream needs.

use log::debug;

use crate::error::{Error, Result};
use crate::index::{Index, IndexEntry};

/// SKEL tag 1: fragment count per skeleton.
pub const TAG_FRAGMENT_COUNT: u8 = 1;
/// SKEL and FRAG tag 6: (position, length) geometry.
pub const TAG_GEOMETRY: u8 = 6;

/// Schema rows for a SKEL index: fragment count plus geometry.
pub const SKEL_SCHEMA: &[(u8, u8)] = &[(TAG_FRAGMENT_COUNT, 1), (TAG_GEOMETRY, 2)];

/// Rebuild the ordered HTML parts from the raw ML stream.
pub fn reconstruct_parts(raw: &[u8], skel: &Index, frag: &Index) -> Result<Vec<Vec<u8>>> {
    let mut parts = Vec::with_capacity(skel.entries.len());
    let mut frag_cursor = 0usize;
    let mut insert_offset = 0usize;

    for (i, entry) in skel.entries.iter().enumerate() {
        let pos = entry.tag(TAG_GEOMETRY, 0).ok_or_else(|| {
            Error::CorruptIndex(format!("skeleton {i} has no geometry position"))
        })? as usize;
        let len = entry.tag(TAG_GEOMETRY, 1).ok_or_else(|| {
            Error::CorruptIndex(format!("skeleton {i} has no geometry length"))
        })? as usize;
        let count = entry.tag(TAG_FRAGMENT_COUNT, 0).unwrap_or(0) as usize;

        if pos + len > raw.len() {
            return Err(Error::CorruptIndex(format!(
                "skeleton {i} spans {pos}..{} past {} raw bytes",
                pos + len,
                raw.len()
            )));
        }
        let mut part = raw[pos..pos + len].to_vec();

        // Fragment bodies follow the skeleton's bytes in stream order.
        let mut body_cursor = pos + len;
        for f in 0..count {
            let fragment = frag.entries.get(frag_cursor + f).ok_or_else(|| {
                Error::CorruptIndex(format!(
                    "skeleton {i} wants fragment {} of {}",
                    frag_cursor + f,
                    frag.entries.len()
                ))
            })?;
            let insert_at = fragment.label_value()? as usize;
            let insert_pos = insert_at.checked_sub(insert_offset).ok_or_else(|| {
                Error::CorruptIndex(format!(
                    "fragment {} inserts at {insert_at} before part base {insert_offset}",
                    frag_cursor + f
                ))
            })?;
            let flen = fragment.tag(TAG_GEOMETRY, 1).ok_or_else(|| {
                Error::CorruptIndex(format!(
                    "fragment {} has no geometry length",
                    frag_cursor + f
                ))
            })? as usize;

            if body_cursor + flen > raw.len() {
                return Err(Error::CorruptIndex(format!(
                    "fragment {} spans {body_cursor}..{} past {} raw bytes",
                    frag_cursor + f,
                    body_cursor + flen,
                    raw.len()
                )));
            }
            if insert_pos > part.len() {
                return Err(Error::CorruptIndex(format!(
                    "fragment {} insert position {insert_pos} past part end {}",
                    frag_cursor + f,
                    part.len()
                )));
            }

            let mut spliced = Vec::with_capacity(part.len() + flen);
            spliced.extend_from_slice(&part[..insert_pos]);
            spliced.extend_from_slice(&raw[body_cursor..body_cursor + flen]);
            spliced.extend_from_slice(&part[insert_pos..]);
            part = spliced;
            body_cursor += flen;
        }

        frag_cursor += count;
        insert_offset += part.len();
        parts.push(part);
    }

    debug!(
        "reconstructed {} parts from {} raw bytes",
        parts.len(),
        raw.len()
    );
    Ok(parts)
}

/// Join parts into the raw ML stream: parts separated by a single newline.
pub fn join_parts(parts: &[Vec<u8>]) -> Vec<u8> {
    let total: usize =
        parts.iter().map(|p| p.len()).sum::<usize>() + parts.len().saturating_sub(1);
    let mut raw = Vec::with_capacity(total);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            raw.push(b'\n');
        }
        raw.extend_from_slice(part);
    }
    raw
}

/// Build the SKEL index for re-emitted parts: one fragment-free skeleton per
/// part, positions accounting for the newline separators of [`join_parts`].
pub fn build_skel_index(parts: &[Vec<u8>]) -> Index {
    let mut index = Index::new("SKEL");
    let mut pos = 0u32;
    for (i, part) in parts.iter().enumerate() {
        index.entries.push(
            IndexEntry::new(format!("SKEL{i:010}"))
                .with_tag(TAG_GEOMETRY, &[pos, part.len() as u32]),
        );
        pos += part.len() as u32 + 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skel_entry(pos: u32, len: u32, count: u32) -> IndexEntry {
        let mut entry = IndexEntry::new("SKEL0000000000").with_tag(TAG_GEOMETRY, &[pos, len]);
        if count > 0 {
            entry = entry.with_tag(TAG_FRAGMENT_COUNT, &[count]);
        }
        entry
    }

    fn frag_entry(insert_at: u32, len: u32) -> IndexEntry {
        IndexEntry::new(format!("{insert_at:010}")).with_tag(TAG_GEOMETRY, &[0, len])
    }

    #[test]
    fn skeleton_without_fragments_is_a_plain_slice() {
        let raw = b"<head/><body/>";
        let mut skel = Index::new("SKEL");
        skel.entries.push(skel_entry(0, raw.len() as u32, 0));
        let frag = Index::new("FRAG");

        let parts = reconstruct_parts(raw, &skel, &frag).unwrap();
        assert_eq!(parts, vec![raw.to_vec()]);
    }

    #[test]
    fn fragment_splices_into_skeleton() {
        // Stream: skeleton "<a></a>" followed by its fragment body "XY",
        // spliced at offset 3 (between <a> and </a>).
        let raw = b"<a></a>XY";
        let mut skel = Index::new("SKEL");
        skel.entries.push(skel_entry(0, 7, 1));
        let mut frag = Index::new("FRAG");
        frag.entries.push(frag_entry(3, 2));

        let parts = reconstruct_parts(raw, &skel, &frag).unwrap();
        assert_eq!(parts, vec![b"<a>XY</a>".to_vec()]);
    }

    #[test]
    fn second_skeleton_fragments_use_cumulative_offsets() {
        // Two skeletons, one fragment each. The second fragment's label is
        // an absolute position in the final document, so it exceeds the
        // first part's emitted length.
        let raw = b"<p></p>ab<q></q>cd";
        let mut skel = Index::new("SKEL");
        skel.entries.push(skel_entry(0, 7, 1));
        skel.entries.push(skel_entry(9, 7, 1));
        let mut frag = Index::new("FRAG");
        frag.entries.push(frag_entry(3, 2));
        // First part emits 9 bytes; insert 3 bytes into the second skeleton.
        frag.entries.push(frag_entry(9 + 3, 2));

        let parts = reconstruct_parts(raw, &skel, &frag).unwrap();
        assert_eq!(parts, vec![b"<p>ab</p>".to_vec(), b"<q>cd</q>".to_vec()]);
    }

    #[test]
    fn missing_fragment_rejected() {
        let raw = b"<a></a>XY";
        let mut skel = Index::new("SKEL");
        skel.entries.push(skel_entry(0, 7, 2));
        let mut frag = Index::new("FRAG");
        frag.entries.push(frag_entry(3, 2));

        assert!(matches!(
            reconstruct_parts(raw, &skel, &frag),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn skeleton_past_stream_rejected() {
        let mut skel = Index::new("SKEL");
        skel.entries.push(skel_entry(0, 10, 0));
        let frag = Index::new("FRAG");
        assert!(matches!(
            reconstruct_parts(b"short", &skel, &frag),
            Err(Error::CorruptIndex(_))
        ));
    }

    #[test]
    fn join_then_rebuild_roundtrips() {
        let parts = vec![
            b"<html>one</html>".to_vec(),
            b"<html>two</html>".to_vec(),
            b"<html>three</html>".to_vec(),
        ];
        let raw = join_parts(&parts);
        let skel = build_skel_index(&parts);
        let frag = Index::new("FRAG");

        let rebuilt = reconstruct_parts(&raw, &skel, &frag).unwrap();
        assert_eq!(rebuilt, parts);
    }
}
