//! Mobipocket reader: PalmDB records in, a [`Mobi`] value out.
//!
//! Layout detection follows the container itself: a record 0 with version
//! >= 8 is a pure KF8 file; otherwise EXTH tag 121 names the boundary record
//! of the KF8 unit in a hybrid, and its absence means legacy MOBI6 only.

use std::io::Read;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, warn};

use crate::data::{strip_trailing_entries, MobiData};
use crate::error::{Error, Result};
use crate::exth::{self, Exth};
use crate::headers::{Fdst, MobiHeader};
use crate::index::Index;
use crate::mobi::Mobi;
use crate::palmdb::PalmDb;
use crate::resource;
use crate::skeleton;

pub fn read_mobi<R: Read>(reader: &mut R) -> Result<Mobi> {
    let db = PalmDb::read(reader)?;
    from_palmdb(&db)
}

fn from_palmdb(db: &PalmDb) -> Result<Mobi> {
    let records: Vec<Vec<u8>> = db.records.iter().map(|r| r.content.clone()).collect();
    if records.is_empty() {
        return Err(Error::MalformedContainer("no records".into()));
    }

    let header0 = MobiHeader::parse(&records[0])?;

    let (mobi6, kf8, resource_header) = if header0.version >= 8 {
        debug!("layout: KF8-only (version {})", header0.version);
        let (unit, name) = parse_unit(&records, 0, &header0)?;
        (None, Some((unit, name)), header0)
    } else {
        let exth0 = parse_unit_exth(&records[0], &header0)?;
        match exth0.get_u32(exth::TAG_KF8_BOUNDARY) {
            Some(boundary) => {
                debug!("layout: hybrid, KF8 boundary at record {boundary}");
                let boundary = boundary as usize;
                if boundary >= records.len() {
                    return Err(Error::MalformedContainer(format!(
                        "KF8 boundary {boundary} outside {} records",
                        records.len()
                    )));
                }
                let kf8_header = MobiHeader::parse(&records[boundary])?;
                let (m6_unit, m6_name) = parse_unit(&records, 0, &header0)?;
                let (kf8_unit, kf8_name) = parse_unit(&records, boundary, &kf8_header)?;
                (
                    Some((m6_unit, m6_name)),
                    Some((kf8_unit, kf8_name)),
                    header0,
                )
            }
            None => {
                debug!("layout: MOBI6-only");
                let (unit, name) = parse_unit(&records, 0, &header0)?;
                (Some((unit, name)), None, header0)
            }
        }
    };

    // Resources hang off the MOBI6 header in hybrids (shared block), else
    // off the lone unit's header.
    let resources = match resource_header.image_index {
        Some(first) => resource::scan_records(&records, first as usize)?,
        None => Vec::new(),
    };

    let mut mobi = Mobi {
        mobi6: None,
        kf8: None,
        resources,
        title: String::new(),
        author: String::new(),
        publisher: String::new(),
        description: String::new(),
        subjects: Vec::new(),
        publishing_date: None,
        copyright: String::new(),
    };

    // Flat metadata comes from the preferred unit: KF8 when present.
    let (meta_exth, meta_title) = match (&kf8, &mobi6) {
        (Some((unit, name)), _) => (unit.exth.clone(), name.clone()),
        (None, Some((unit, name))) => (unit.exth.clone(), name.clone()),
        (None, None) => (Exth::default(), String::new()),
    };

    mobi.title = meta_title;
    mobi.author = meta_exth.get_string(exth::TAG_AUTHOR).unwrap_or_default();
    mobi.publisher = meta_exth
        .get_string(exth::TAG_PUBLISHER)
        .unwrap_or_default();
    mobi.description = meta_exth
        .get_string(exth::TAG_DESCRIPTION)
        .unwrap_or_default();
    mobi.subjects = meta_exth.get_strings(exth::TAG_SUBJECT);
    mobi.publishing_date = meta_exth
        .get_string(exth::TAG_PUBLISHING_DATE)
        .map(|s| parse_publishing_date(&s));
    mobi.copyright = meta_exth.get_string(exth::TAG_RIGHTS).unwrap_or_default();

    mobi.mobi6 = mobi6.map(|(unit, _)| unit);
    mobi.kf8 = kf8.map(|(unit, _)| unit);

    Ok(mobi)
}

fn parse_unit_exth(record0: &[u8], header: &MobiHeader) -> Result<Exth> {
    if !header.has_exth() {
        return Ok(Exth::default());
    }
    let offset = header.exth_offset();
    if offset >= record0.len() {
        return Err(Error::MalformedContainer(format!(
            "EXTH offset {offset} past record 0 end"
        )));
    }
    Ok(Exth::parse(&record0[offset..])?.0)
}

/// Parse one MOBI6/KF8 unit rooted at `base`. Returns the unit and its full
/// name (title).
fn parse_unit(records: &[Vec<u8>], base: usize, header: &MobiHeader) -> Result<(MobiData, String)> {
    let record0 = &records[base];
    let exth = parse_unit_exth(record0, header)?;
    let full_name = String::from_utf8_lossy(header.full_name(record0)?).into_owned();

    // Concatenate the text records, stripping per-record trailing entries.
    let count = header.preamble.text_record_count as usize;
    if base + count >= records.len() && count > 0 {
        return Err(Error::MalformedContainer(format!(
            "unit at {base} wants {count} text records past {} records",
            records.len()
        )));
    }
    let mut text = Vec::with_capacity(header.preamble.text_length as usize);
    for record in records.iter().skip(base + 1).take(count) {
        text.extend_from_slice(strip_trailing_entries(record, header.extra_flags));
    }
    text.truncate(header.preamble.text_length as usize);
    debug!(
        "unit at {base}: version {}, {} text records, {} bytes",
        header.version,
        count,
        text.len()
    );

    // Carve the text into flows via FDST.
    let flows: Vec<Vec<u8>> = match header.fdst_index {
        Some(fdst_index) if header.fdst_section_count > 1 => {
            let record = records.get(base + fdst_index as usize).ok_or_else(|| {
                Error::MalformedContainer(format!("FDST record {fdst_index} out of range"))
            })?;
            Fdst::parse(record)?
                .split(&text)?
                .into_iter()
                .map(|f| f.to_vec())
                .collect()
        }
        _ => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    };

    // Rebuild the HTML parts from the SKEL/FRAG indices.
    let parts = match header.skel_index {
        Some(skel_index) if header.version >= 8 => {
            let skel = read_index_at(records, base + skel_index as usize, "SKEL")?;
            let frag = match header.frag_index {
                Some(frag_index) => read_index_at(records, base + frag_index as usize, "FRAG")?,
                None => Index::new("FRAG"),
            };
            let raw = flows.first().map(|f| f.as_slice()).unwrap_or_default();
            skeleton::reconstruct_parts(raw, &skel, &frag)?
        }
        _ => Vec::new(),
    };

    let unit = MobiData {
        version: header.version,
        mobi_type: header.mobi_type,
        uid: header.uid,
        exth,
        flows,
        parts,
    };
    Ok((unit, full_name))
}

/// Read a whole index (head record plus its data records) rooted at `first`.
fn read_index_at(records: &[Vec<u8>], first: usize, name: &str) -> Result<Index> {
    let head = records
        .get(first)
        .ok_or_else(|| Error::CorruptIndex(format!("{name} index record {first} out of range")))?;
    let span = Index::record_span(head)?;
    if first + span > records.len() {
        return Err(Error::CorruptIndex(format!(
            "{name} index spans records {first}..{} past {}",
            first + span,
            records.len()
        )));
    }
    let slices: Vec<&[u8]> = records[first..first + span]
        .iter()
        .map(|r| r.as_slice())
        .collect();
    Index::read(name, &slices)
}

/// Best-effort EXTH 106 parse: RFC 3339, then a bare date, then a bare year.
/// An unparseable value degrades to the current time.
fn parse_publishing_date(value: &str) -> DateTime<Utc> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&dt);
        }
    }
    if let Ok(year) = value.parse::<i32>() {
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Utc.from_utc_datetime(&dt);
            }
        }
    }
    warn!("unparseable publishing date {value:?}, substituting now");
    Utc::now()
}
