//! # kindling
//!
//! A round-trippable reader/writer for Mobipocket e-book containers,
//! covering legacy MOBI6/KF7 and modern KF8 (AZW3), hybrids included.
//!
//! ## Features
//!
//! - Full PalmDB record framing, read and write
//! - MOBI/EXTH/FDST header family with sentinel-free domain types
//! - INDX/TAGX/IDXT metadata indices, including SKEL/FRAG part rebuilding
//! - Resource block handling: images, fonts (deflate + XOR), audio, video
//! - Writing a [`Mobi`] and reading it back yields a structurally identical
//!   value
//!
//! ## Quick Start
//!
//! ```no_run
//! use kindling::Mobi;
//!
//! let mut book = Mobi::read("input.azw3")?;
//! println!("{} by {}", book.title, book.author);
//!
//! book.title = "Retitled".to_string();
//! book.write("output.azw3")?;
//! # Ok::<(), kindling::Error>(())
//! ```
//!
//! ## Data model
//!
//! A [`Mobi`] owns up to two [`MobiData`] units (MOBI6 and KF8), a list of
//! classified [`Resource`]s, and flat metadata. Each unit carries its
//! FDST-delimited `flows` (element 0 is the raw ML) and, for KF8, the HTML
//! `parts` reconstructed from the SKEL and FRAG indices.

pub mod data;
pub mod error;
pub mod exth;
pub mod font;
pub mod headers;
pub mod index;
pub mod palmdb;
pub mod resource;
pub mod skeleton;
pub mod varlen;

mod mobi;
mod reader;
mod writer;

pub use data::MobiData;
pub use error::{Error, Result};
pub use exth::{Exth, ExthRecord};
pub use index::{Index, IndexEntry};
pub use mobi::Mobi;
pub use palmdb::{PalmDb, PalmDbRecord};
pub use resource::Resource;
