//! Resource record classification and wrapping.
//!
//! The record range after the header's first-image index holds the book's
//! resources. Each record is classified by magic prefix; audio and video
//! records carry an 8-byte wrapper, fonts a FONT record, everything else is
//! passed through untouched. The block ends at a BOUNDARY record or the
//! end-of-file magic.

use log::debug;

use crate::error::Result;
use crate::font;

/// Record content marking the start of the KF8 section in hybrid files, and
/// the end of the resource block everywhere.
pub const BOUNDARY: &[u8] = b"BOUNDARY";
/// Content of the final record of every file.
pub const EOF_MAGIC: &[u8] = b"\xe9\x8e\r\n";

/// A classified resource with its unwrapped payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Jpeg(Vec<u8>),
    Png(Vec<u8>),
    Gif(Vec<u8>),
    Bmp(Vec<u8>),
    Font(Vec<u8>),
    Audio(Vec<u8>),
    Video(Vec<u8>),
    Unknown(Vec<u8>),
}

impl Resource {
    /// The unwrapped payload bytes.
    pub fn data(&self) -> &[u8] {
        match self {
            Resource::Jpeg(d)
            | Resource::Png(d)
            | Resource::Gif(d)
            | Resource::Bmp(d)
            | Resource::Font(d)
            | Resource::Audio(d)
            | Resource::Video(d)
            | Resource::Unknown(d) => d,
        }
    }

    /// Classify and unwrap one resource record.
    pub fn from_record(record: &[u8]) -> Result<Self> {
        if record.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Ok(Resource::Jpeg(record.to_vec()));
        }
        if record.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Ok(Resource::Png(record.to_vec()));
        }
        if record.starts_with(b"GIF8") {
            return Ok(Resource::Gif(record.to_vec()));
        }
        if record.starts_with(b"BM") && bmp_declared_size(record) == Some(record.len()) {
            return Ok(Resource::Bmp(record.to_vec()));
        }
        if record.starts_with(b"FONT") {
            return Ok(Resource::Font(font::decode(record)?));
        }
        if record.starts_with(b"AUDI") {
            return Ok(Resource::Audio(strip_media_wrapper(record)));
        }
        if record.starts_with(b"VIDE") {
            return Ok(Resource::Video(strip_media_wrapper(record)));
        }
        Ok(Resource::Unknown(record.to_vec()))
    }

    /// Serialize back into a resource record.
    pub fn to_record(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Resource::Jpeg(d)
            | Resource::Png(d)
            | Resource::Gif(d)
            | Resource::Bmp(d)
            | Resource::Unknown(d) => d.clone(),
            Resource::Font(d) => font::encode(d)?,
            Resource::Audio(d) => wrap_media(b"AUDI", d),
            Resource::Video(d) => wrap_media(b"VIDE", d),
        })
    }
}

/// BMP headers declare the file size at bytes 2..6, little-endian.
fn bmp_declared_size(record: &[u8]) -> Option<usize> {
    if record.len() < 6 {
        return None;
    }
    Some(u32::from_le_bytes([record[2], record[3], record[4], record[5]]) as usize)
}

/// AUDI/VIDE records store the payload offset at bytes 4..8.
fn strip_media_wrapper(record: &[u8]) -> Vec<u8> {
    if record.len() < 8 {
        return Vec::new();
    }
    let header_end =
        u32::from_be_bytes([record[4], record[5], record[6], record[7]]) as usize;
    record.get(header_end..).unwrap_or_default().to_vec()
}

fn wrap_media(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Scan records starting at `first` until a BOUNDARY record or the EOF magic,
/// classifying everything in between.
pub fn scan_records(records: &[Vec<u8>], first: usize) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for record in records.iter().skip(first) {
        if record.as_slice() == BOUNDARY || record.as_slice() == EOF_MAGIC {
            break;
        }
        resources.push(Resource::from_record(record)?);
    }
    debug!("scanned {} resource records", resources.len());
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_classified_by_magic() {
        let record = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let resource = Resource::from_record(&record).unwrap();
        assert_eq!(resource, Resource::Jpeg(record));
    }

    #[test]
    fn png_and_gif_classified() {
        let png = b"\x89PNG\r\n\x1a\npixels".to_vec();
        assert!(matches!(
            Resource::from_record(&png).unwrap(),
            Resource::Png(_)
        ));
        let gif = b"GIF89a...".to_vec();
        assert!(matches!(
            Resource::from_record(&gif).unwrap(),
            Resource::Gif(_)
        ));
    }

    #[test]
    fn bmp_requires_matching_declared_size() {
        let mut bmp = b"BM".to_vec();
        bmp.extend_from_slice(&10u32.to_le_bytes());
        bmp.extend_from_slice(&[0; 4]); // 10 bytes total
        assert!(matches!(
            Resource::from_record(&bmp).unwrap(),
            Resource::Bmp(_)
        ));

        // Wrong declared size falls through to unknown.
        let mut bad = b"BM".to_vec();
        bad.extend_from_slice(&99u32.to_le_bytes());
        bad.extend_from_slice(&[0; 4]);
        assert!(matches!(
            Resource::from_record(&bad).unwrap(),
            Resource::Unknown(_)
        ));
    }

    #[test]
    fn audio_wrapper_roundtrip() {
        let resource = Resource::Audio(b"riff bytes".to_vec());
        let record = resource.to_record().unwrap();
        assert_eq!(&record[0..4], b"AUDI");
        assert_eq!(Resource::from_record(&record).unwrap(), resource);
    }

    #[test]
    fn video_wrapper_roundtrip() {
        let resource = Resource::Video(b"mp4 bytes".to_vec());
        let record = resource.to_record().unwrap();
        assert_eq!(&record[0..4], b"VIDE");
        assert_eq!(Resource::from_record(&record).unwrap(), resource);
    }

    #[test]
    fn font_roundtrip_through_record() {
        let resource = Resource::Font(b"OTTO fake font data".to_vec());
        let record = resource.to_record().unwrap();
        assert_eq!(&record[0..4], b"FONT");
        assert_eq!(Resource::from_record(&record).unwrap(), resource);
    }

    #[test]
    fn scan_stops_at_boundary() {
        let records = vec![
            b"record zero".to_vec(),
            vec![0xFF, 0xD8, 0xFF, 0x01],
            b"GIF89a".to_vec(),
            BOUNDARY.to_vec(),
            b"after boundary".to_vec(),
        ];
        let resources = scan_records(&records, 1).unwrap();
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn scan_stops_at_eof_magic() {
        let records = vec![vec![0xFF, 0xD8, 0xFF, 0x01], EOF_MAGIC.to_vec()];
        let resources = scan_records(&records, 0).unwrap();
        assert_eq!(resources.len(), 1);
    }
}
