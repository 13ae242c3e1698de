//! CliNER Notes - Clinical note formats
//!
//! Reads tokenized medical records and their concept annotations into
//! [`Document`]s, and writes predicted concepts back out:
//! - [`i2b2`]: the i2b2 2010 text + `.con` concept file format
//! - [`corpus`]: directory listing and text/annotation pairing
//!
//! Each format implements the [`NoteFormat`] trait.

pub mod corpus;
pub mod i2b2;

use std::path::{Path, PathBuf};

use cliner_core::{ClinerError, ClusteredConcept, Document};
use thiserror::Error;

pub use corpus::{list_files, load_annotated, reformat_notes, AnnotatedNote};
pub use i2b2::I2b2Format;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while reading or writing notes
#[derive(Error, Debug)]
pub enum NoteError {
    /// IO error while reading or writing a file
    #[error("IO error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed line in an annotation file
    #[error("Malformed annotation at line {line_no}: {message}")]
    Parse { line_no: usize, message: String },

    /// Annotations rejected by the document model
    #[error(transparent)]
    Core(#[from] ClinerError),
}

pub type Result<T> = std::result::Result<T, NoteError>;

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> NoteError + '_ {
    move |source| NoteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Format Trait
// ============================================================================

/// A note format: one text file plus an optional annotation file per record
pub trait NoteFormat: Send + Sync {
    /// Extension of annotation files, without the dot
    fn annotation_extension(&self) -> &'static str;

    /// Parse a record and (optionally) its annotations
    fn parse(&self, text: &str, annotations: Option<&str>) -> Result<Document>;

    /// Render concepts for the given record
    fn render(&self, document: &Document, concepts: &[ClusteredConcept]) -> Result<String>;

    /// Read a record from disk
    fn read(&self, txt: &Path, annotations: Option<&Path>) -> Result<Document> {
        let text = std::fs::read_to_string(txt).map_err(io_error(txt))?;
        let annotations = annotations
            .map(|path| std::fs::read_to_string(path).map_err(io_error(path)))
            .transpose()?;
        self.parse(&text, annotations.as_deref())
    }

    /// Write concepts for a record to disk
    fn write(&self, path: &Path, document: &Document, concepts: &[ClusteredConcept]) -> Result<()> {
        let rendered = self.render(document, concepts)?;
        std::fs::write(path, rendered).map_err(io_error(path))
    }
}
