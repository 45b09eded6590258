//! The `Mobi` façade: a whole Mobipocket file as a value.
//!
//! A file holds up to two data units (legacy MOBI6 and modern KF8), a shared
//! resource block, and flat metadata sourced from the preferred unit's EXTH.
//! Reading and writing are symmetric: a written value reads back structurally
//! identical.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::data::MobiData;
use crate::error::Result;
use crate::reader;
use crate::resource::Resource;
use crate::writer;

/// A Mobipocket e-book container.
#[derive(Debug, Clone, PartialEq)]
pub struct Mobi {
    /// Legacy MOBI6/KF7 unit, when present.
    pub mobi6: Option<MobiData>,
    /// KF8 unit, when present.
    pub kf8: Option<MobiData>,
    /// Shared resource block, in record order.
    pub resources: Vec<Resource>,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub description: String,
    pub subjects: Vec<String>,
    pub publishing_date: Option<DateTime<Utc>>,
    pub copyright: String,
}

impl Default for Mobi {
    fn default() -> Self {
        Self::new()
    }
}

impl Mobi {
    /// An empty book: a blank MOBI6 unit, no KF8, no resources.
    pub fn new() -> Self {
        Self {
            mobi6: Some(MobiData::mobi6()),
            kf8: None,
            resources: Vec::new(),
            title: String::new(),
            author: String::new(),
            publisher: String::new(),
            description: String::new(),
            subjects: Vec::new(),
            publishing_date: None,
            copyright: String::new(),
        }
    }

    /// Read a Mobipocket file from disk.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::read_from(&mut file)
    }

    /// Read a Mobipocket file from any byte stream. The stream is consumed
    /// to its end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        reader::read_mobi(reader)
    }

    /// Write the book to disk.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_to(&mut writer)
    }

    /// Write the book to any byte sink.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer::write_mobi(self, writer)
    }

    /// The unit metadata is sourced from: KF8 when present, else MOBI6.
    pub fn preferred_unit(&self) -> Option<&MobiData> {
        self.kf8.as_ref().or(self.mobi6.as_ref())
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subjects.push(subject.to_string());
        self
    }
}
