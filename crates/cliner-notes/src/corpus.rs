//! Corpus discovery
//!
//! Records are matched to their annotation files by file stem:
//! `notes/record-12.txt` pairs with `concepts/record-12.con`.

use std::path::{Path, PathBuf};

use cliner_core::Document;
use tracing::{debug, info, warn};

use crate::{io_error, NoteFormat, Result};

/// A record loaded together with its annotations
#[derive(Debug, Clone)]
pub struct AnnotatedNote {
    /// File stem shared by the text and annotation files
    pub name: String,
    pub txt: PathBuf,
    pub document: Document,
}

/// Files with the given extension
///
/// A file path is returned as is; a directory is listed (non-recursively)
/// and sorted by name.
pub fn list_files(path: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error(path))? {
        let entry = entry.map_err(io_error(path))?;
        let file = entry.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == extension) {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// File stem used to pair text and annotation files
pub fn note_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Load every `.txt` record under `txt` that has an annotation file in
/// `annotations`
///
/// Records without annotations are skipped with a warning.
pub fn load_annotated(format: &dyn NoteFormat, txt: &Path, annotations: &Path) -> Result<Vec<AnnotatedNote>> {
    let mut notes = Vec::new();

    for txt_path in list_files(txt, "txt")? {
        let name = note_name(&txt_path);
        let con_path = annotations.join(format!("{name}.{}", format.annotation_extension()));
        if !con_path.is_file() {
            warn!(note = %name, path = %con_path.display(), "No annotations for note, skipping");
            continue;
        }

        let document = format.read(&txt_path, Some(&con_path))?;
        notes.push(AnnotatedNote {
            name,
            txt: txt_path,
            document,
        });
    }

    info!(notes = notes.len(), "Loaded annotated notes");
    Ok(notes)
}

/// Rewrite the annotations of every annotated note into `out`
///
/// Records come back validated against their text, sorted, deduplicated and
/// with lowercased span text. Returns the number of files written.
pub fn reformat_notes(format: &dyn NoteFormat, txt: &Path, annotations: &Path, out: &Path) -> Result<usize> {
    std::fs::create_dir_all(out).map_err(io_error(out))?;

    let notes = load_annotated(format, txt, annotations)?;
    for note in &notes {
        let target = out.join(format!("{}.{}", note.name, format.annotation_extension()));
        format.write(&target, &note.document, note.document.concepts())?;
        debug!(note = %note.name, concepts = note.document.concepts().len(), "Reformatted note");
    }

    info!(notes = notes.len(), out = %out.display(), "Reformatted annotations");
    Ok(notes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::I2b2Format;

    #[test]
    fn test_list_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "a.con", "notes.md"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = list_files(dir.path(), "txt").unwrap();
        let names: Vec<String> = files.iter().map(|f| note_name(f)).collect();
        assert_eq!(names, vec!["a", "b"]);

        let single = list_files(&dir.path().join("b.txt"), "txt").unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("absent"), "txt").unwrap_err();
        assert!(matches!(err, crate::NoteError::Io { .. }));
    }

    #[test]
    fn test_load_annotated_pairs_by_stem() {
        let txt = tempfile::tempdir().unwrap();
        let con = tempfile::tempdir().unwrap();
        std::fs::write(txt.path().join("r1.txt"), "denies chest pain\n").unwrap();
        std::fs::write(txt.path().join("r2.txt"), "no annotations here\n").unwrap();
        std::fs::write(con.path().join("r1.con"), "c=\"chest pain\" 1:1 1:2||t=\"problem\"\n").unwrap();

        let notes = load_annotated(&I2b2Format::new(), txt.path(), con.path()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].name, "r1");
        assert_eq!(notes[0].document.concepts().len(), 1);
    }

    #[test]
    fn test_reformat_normalizes_records() {
        let txt = tempfile::tempdir().unwrap();
        let con = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(txt.path().join("r1.txt"), "Denies Chest Pain\nStarted Aspirin\n").unwrap();
        std::fs::write(
            con.path().join("r1.con"),
            "c=\"Aspirin\" 2:1 2:1||t=\"treatment\"\n\
             c=\"Chest Pain\" 1:1 1:2||t=\"problem\"\n\
             c=\"Aspirin\" 2:1 2:1||t=\"treatment\"\n",
        )
        .unwrap();

        let written = reformat_notes(&I2b2Format::new(), txt.path(), con.path(), &out.path().join("clean")).unwrap();
        assert_eq!(written, 1);

        let rendered = std::fs::read_to_string(out.path().join("clean").join("r1.con")).unwrap();
        assert_eq!(
            rendered,
            "c=\"chest pain\" 1:1 1:2||t=\"problem\"\n\
             c=\"aspirin\" 2:1 2:1||t=\"treatment\"\n"
        );
    }
}
