//! Mobipocket writer: a [`Mobi`] value out to a PalmDB record stream.
//!
//! Record order is fixed per layout. MOBI6-only: record 0, text, resources,
//! BOUNDARY, FCIS, FLIS, EOF. KF8-only inserts FDST and the SKEL index after
//! the boundary. Hybrids emit the full MOBI6 section first, then the KF8
//! section at the boundary record; the boundary index lands in MOBI6's EXTH
//! as tag 121 only after the KF8 record 0 exists. All indices inside a KF8
//! header are relative to the boundary; MOBI6 indices are absolute.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::SecondsFormat;
use log::debug;

use crate::data::{split_text_records, MobiData, TEXT_RECORD_SIZE};
use crate::error::{Error, Result};
use crate::exth::{self, Exth, ExthRecord};
use crate::headers::{build_record0, Fdst, HeaderIndices, PalmDocPreamble};
use crate::mobi::Mobi;
use crate::palmdb::{PalmDb, PalmDbRecord};
use crate::resource::{BOUNDARY, EOF_MAGIC};
use crate::skeleton;

pub fn write_mobi<W: Write>(mobi: &Mobi, writer: &mut W) -> Result<()> {
    let records = build_records(mobi)?;
    let db = assemble_palmdb(mobi, records);
    writer.write_all(&db.to_bytes())?;
    Ok(())
}

/// Build the complete record stream for any of the three layouts.
fn build_records(mobi: &Mobi) -> Result<Vec<Vec<u8>>> {
    // A book with no units still writes as an empty MOBI6 shell.
    let fallback;
    let mobi6 = match (&mobi.mobi6, &mobi.kf8) {
        (None, None) => {
            fallback = MobiData::mobi6();
            Some(&fallback)
        }
        (unit, _) => unit.as_ref(),
    };
    let kf8 = mobi.kf8.as_ref();

    let mut records: Vec<Vec<u8>> = Vec::new();

    // The leading unit: MOBI6 when present, else the KF8.
    let Some(lead) = mobi6.or(kf8) else {
        return Err(Error::MalformedContainer("no data units to write".into()));
    };
    let lead_is_kf8 = mobi6.is_none();

    records.push(Vec::new()); // record 0 placeholder
    let lead_text = lead.raw_text();
    let lead_text_records = split_text_records(&lead_text);
    let lead_last_text = lead_text_records.len() as u16;
    records.extend(lead_text_records);

    let resource_start = records.len() as u32;
    for resource in &mobi.resources {
        records.push(resource.to_record()?);
    }
    records.push(BOUNDARY.to_vec());

    if lead_is_kf8 {
        // KF8-only: the tail section lives right after the boundary and is
        // addressed from record 0.
        let tail = build_kf8_tail(&mut records, lead, 0)?;
        let exth_bytes = metadata_exth(mobi, lead).to_bytes();
        records[0] = build_record0(
            &text_preamble(&lead_text, lead_last_text),
            lead.mobi_type,
            lead.uid,
            lead.version,
            &HeaderIndices {
                image_index: Some(resource_start),
                fdst_index: Some(tail.fdst_index),
                fdst_section_count: tail.fdst_section_count,
                fcis_index: Some(tail.fcis_index),
                flis_index: Some(tail.flis_index),
                skel_index: tail.skel_index,
                frag_index: None,
                last_text_record: lead_last_text,
            },
            &exth_bytes,
            &mobi.title,
        );
        debug!("wrote KF8-only stream: {} records", records.len());
        return Ok(records);
    }

    let mobi6 = lead;
    match kf8 {
        Some(kf8) => {
            // Hybrid: the KF8 section starts at the boundary record.
            let boundary = records.len() as u32;
            records.push(Vec::new()); // KF8 record 0 placeholder
            let kf8_text = kf8.raw_text();
            let kf8_text_records = split_text_records(&kf8_text);
            let kf8_last_text = kf8_text_records.len() as u16;
            records.extend(kf8_text_records);

            let tail = build_kf8_tail(&mut records, kf8, boundary)?;
            // metadata_exth strips tag 121, so the KF8 EXTH never carries
            // the boundary it sits at.
            let kf8_exth = metadata_exth(mobi, kf8);
            records[boundary as usize] = build_record0(
                &text_preamble(&kf8_text, kf8_last_text),
                kf8.mobi_type,
                kf8.uid,
                kf8.version,
                &HeaderIndices {
                    image_index: None,
                    fdst_index: Some(tail.fdst_index),
                    fdst_section_count: tail.fdst_section_count,
                    fcis_index: Some(tail.fcis_index),
                    flis_index: Some(tail.flis_index),
                    skel_index: tail.skel_index,
                    frag_index: None,
                    last_text_record: kf8_last_text,
                },
                &kf8_exth.to_bytes(),
                &mobi.title,
            );

            // The boundary tag belongs to MOBI6 only, and only now that the
            // KF8 record 0 exists.
            let mut m6_exth = metadata_exth(mobi, mobi6);
            m6_exth.push(ExthRecord::u32(exth::TAG_KF8_BOUNDARY, boundary));
            records[0] = build_record0(
                &text_preamble(&lead_text, lead_last_text),
                mobi6.mobi_type,
                mobi6.uid,
                mobi6.version,
                &HeaderIndices {
                    image_index: Some(resource_start),
                    last_text_record: lead_last_text,
                    ..HeaderIndices::default()
                },
                &m6_exth.to_bytes(),
                &mobi.title,
            );
            debug!(
                "wrote hybrid stream: {} records, boundary at {boundary}",
                records.len()
            );
        }
        None => {
            // MOBI6-only tail: FCIS, FLIS, EOF.
            let fcis_index = records.len() as u32;
            records.push(build_fcis(lead_text.len() as u32));
            let flis_index = records.len() as u32;
            records.push(build_flis());
            records.push(EOF_MAGIC.to_vec());

            let exth_bytes = metadata_exth(mobi, mobi6).to_bytes();
            records[0] = build_record0(
                &text_preamble(&lead_text, lead_last_text),
                mobi6.mobi_type,
                mobi6.uid,
                mobi6.version,
                &HeaderIndices {
                    image_index: Some(resource_start),
                    fcis_index: Some(fcis_index),
                    flis_index: Some(flis_index),
                    last_text_record: lead_last_text,
                    ..HeaderIndices::default()
                },
                &exth_bytes,
                &mobi.title,
            );
            debug!("wrote MOBI6-only stream: {} records", records.len());
        }
    }

    Ok(records)
}

/// Indices (relative to the section base) of the records a KF8 tail adds.
struct Kf8Tail {
    fdst_index: u32,
    fdst_section_count: u32,
    skel_index: Option<u32>,
    fcis_index: u32,
    flis_index: u32,
}

/// Append the KF8 tail records: FDST, the SKEL index when there are parts,
/// FCIS, FLIS, and the EOF marker.
fn build_kf8_tail(records: &mut Vec<Vec<u8>>, unit: &MobiData, base: u32) -> Result<Kf8Tail> {
    let flow_lengths = unit.flow_lengths();
    let text_length: usize = flow_lengths.iter().sum();

    let fdst_index = records.len() as u32 - base;
    records.push(Fdst::from_flow_lengths(&flow_lengths).to_bytes());

    let skel_index = if unit.parts.is_empty() {
        None
    } else {
        let index = records.len() as u32 - base;
        let skel = skeleton::build_skel_index(&unit.parts);
        records.extend(skel.to_records_with_schema(skeleton::SKEL_SCHEMA)?);
        Some(index)
    };

    let fcis_index = records.len() as u32 - base;
    records.push(build_fcis(text_length as u32));
    let flis_index = records.len() as u32 - base;
    records.push(build_flis());
    records.push(EOF_MAGIC.to_vec());

    Ok(Kf8Tail {
        fdst_index,
        fdst_section_count: flow_lengths.len() as u32,
        skel_index,
        fcis_index,
        flis_index,
    })
}

fn text_preamble(text: &[u8], record_count: u16) -> PalmDocPreamble {
    PalmDocPreamble {
        text_length: text.len() as u32,
        text_record_count: record_count,
        text_record_size: TEXT_RECORD_SIZE as u16,
    }
}

/// Rebuild a unit's EXTH from the flat façade metadata: preserved records
/// first (metadata and boundary tags stripped), then the flat fields.
fn metadata_exth(mobi: &Mobi, unit: &MobiData) -> Exth {
    let mut out = unit.exth.clone();
    for tag in [
        exth::TAG_AUTHOR,
        exth::TAG_PUBLISHER,
        exth::TAG_DESCRIPTION,
        exth::TAG_SUBJECT,
        exth::TAG_PUBLISHING_DATE,
        exth::TAG_RIGHTS,
        exth::TAG_KF8_BOUNDARY,
    ] {
        out.remove(tag);
    }

    if !mobi.author.is_empty() {
        out.push(ExthRecord::string(exth::TAG_AUTHOR, &mobi.author));
    }
    if !mobi.publisher.is_empty() {
        out.push(ExthRecord::string(exth::TAG_PUBLISHER, &mobi.publisher));
    }
    if !mobi.description.is_empty() {
        out.push(ExthRecord::string(exth::TAG_DESCRIPTION, &mobi.description));
    }
    for subject in &mobi.subjects {
        out.push(ExthRecord::string(exth::TAG_SUBJECT, subject));
    }
    if let Some(date) = mobi.publishing_date {
        out.push(ExthRecord::string(
            exth::TAG_PUBLISHING_DATE,
            &date.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    if !mobi.copyright.is_empty() {
        out.push(ExthRecord::string(exth::TAG_RIGHTS, &mobi.copyright));
    }
    out
}

/// 36-byte FCIS template; the text length sits at offset 20.
fn build_fcis(text_length: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(b"FCIS");
    out.extend_from_slice(&20u32.to_be_bytes());
    out.extend_from_slice(&16u32.to_be_bytes());
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&text_length.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&40u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}

/// 36-byte FLIS template.
fn build_flis() -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(b"FLIS");
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(&0x41u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&3u16.to_be_bytes());
    out.extend_from_slice(&3u32.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    out
}

/// Wrap the record stream in a PalmDB envelope.
fn assemble_palmdb(mobi: &Mobi, stream: Vec<Vec<u8>>) -> PalmDb {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let record_count = stream.len();
    let records = stream
        .into_iter()
        .enumerate()
        .map(|(i, content)| PalmDbRecord {
            attributes: 0,
            uid: (2 * i) as u32,
            content,
        })
        .collect();

    PalmDb {
        name: palmdb_name(&mobi.title),
        created_at: now,
        modified_at: now,
        uid_seed: (2 * record_count).saturating_sub(1) as u32,
        records,
        ..PalmDb::default()
    }
}

/// PDB names are ASCII, at most 31 bytes; everything else maps to `_`.
fn palmdb_name(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(31)
        .collect()
}
