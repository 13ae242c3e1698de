//! i2b2 concept files
//!
//! One concept per line:
//!
//! ```text
//! c="chest pain" 12:3 12:4||t="problem"
//! ```
//!
//! Line numbers are 1-based, token offsets 0-based and inclusive. A concept
//! with several spans lists them comma separated inside one record:
//! `c="pain ... knee" 3:0 3:0,3:5 3:5||t="problem"`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use cliner_core::{ClinerError, ClusteredConcept, ConceptLabel, Document};

use crate::{NoteError, NoteFormat, Result};

static CONCEPT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^c="(.*)" (\d+:\d+ \d+:\d+(?:,\d+:\d+ \d+:\d+)*)\|\|t="(\w+)"$"#)
        .expect("concept line pattern is valid")
});

/// Text between the spans of a multi-span concept
const SPAN_GAP: &str = " ... ";

#[derive(Debug, Clone, Copy, Default)]
pub struct I2b2Format;

impl I2b2Format {
    pub fn new() -> Self {
        Self
    }
}

impl NoteFormat for I2b2Format {
    fn annotation_extension(&self) -> &'static str {
        "con"
    }

    fn parse(&self, text: &str, annotations: Option<&str>) -> Result<Document> {
        let document = Document::from_text(text);
        let Some(annotations) = annotations else {
            return Ok(document);
        };
        let concepts = parse_concepts(annotations)?;
        debug!(lines = document.lines().len(), concepts = concepts.len(), "Parsed i2b2 note");
        Ok(document.with_concepts(concepts)?)
    }

    fn render(&self, document: &Document, concepts: &[ClusteredConcept]) -> Result<String> {
        format_concepts(document, concepts)
    }
}

/// Parse the records of a concept file
///
/// Blank lines are skipped. Every span of a record must sit on the same line.
pub fn parse_concepts(annotations: &str) -> Result<Vec<ClusteredConcept>> {
    let mut concepts = Vec::new();

    for (idx, raw) in annotations.lines().enumerate() {
        let line_no = idx + 1;
        let record = raw.trim();
        if record.is_empty() {
            continue;
        }

        let caps = CONCEPT_LINE.captures(record).ok_or_else(|| NoteError::Parse {
            line_no,
            message: format!("not a concept record: {record}"),
        })?;
        let label: ConceptLabel = caps[3].parse().map_err(|e: ClinerError| NoteError::Parse {
            line_no,
            message: e.to_string(),
        })?;

        let mut line = None;
        let mut spans = Vec::new();
        for pair in caps[2].split(',') {
            let (start_line, start) = position(pair.split(' ').next(), line_no)?;
            let (end_line, end) = position(pair.split(' ').nth(1), line_no)?;
            if start_line != end_line || line.is_some_and(|l| l != start_line) {
                return Err(NoteError::Parse {
                    line_no,
                    message: "concept spans more than one line".to_string(),
                });
            }
            line = Some(start_line);
            spans.push((start, end));
        }

        if let Some(line) = line {
            concepts.push(ClusteredConcept::new(label, line, spans));
        }
    }

    Ok(concepts)
}

fn position(field: Option<&str>, line_no: usize) -> Result<(usize, usize)> {
    let malformed = || NoteError::Parse {
        line_no,
        message: format!("bad token position {field:?}"),
    };
    let (line, token) = field.and_then(|f| f.split_once(':')).ok_or_else(malformed)?;
    let line = line.parse().map_err(|_| malformed())?;
    let token = token.parse().map_err(|_| malformed())?;
    Ok((line, token))
}

/// Render concepts as concept file records
///
/// Span text is lowercased. A `none` label is a degenerate prediction and
/// fails the whole write.
pub fn format_concepts(document: &Document, concepts: &[ClusteredConcept]) -> Result<String> {
    let mut out = String::new();

    for concept in concepts {
        if concept.label == ConceptLabel::None {
            return Err(ClinerError::DegenerateLabel { line: concept.line }.into());
        }
        let tokens = concept
            .line
            .checked_sub(1)
            .and_then(|l| document.lines().get(l))
            .ok_or(ClinerError::SpanOutOfRange {
                context: "document lines".to_string(),
                index: concept.line,
                len: document.lines().len(),
            })?;

        let mut texts = Vec::with_capacity(concept.spans.len());
        let mut positions = Vec::with_capacity(concept.spans.len());
        for &(start, end) in &concept.spans {
            let words = tokens.get(start..=end).ok_or_else(|| ClinerError::SpanOutOfRange {
                context: format!("tokens of line {}", concept.line),
                index: end,
                len: tokens.len(),
            })?;
            texts.push(words.join(" ").to_lowercase());
            positions.push(format!("{line}:{start} {line}:{end}", line = concept.line));
        }

        out.push_str(&format!(
            "c=\"{}\" {}||t=\"{}\"\n",
            texts.join(SPAN_GAP),
            positions.join(","),
            concept.label
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Patient denies Chest Pain .\nStarted on Aspirin 325 mg\npain in left and right knee\n";

    #[test]
    fn test_parse_concepts() {
        let concepts = parse_concepts(
            "c=\"chest pain\" 1:2 1:3||t=\"problem\"\n\nc=\"aspirin\" 2:2 2:2||t=\"treatment\"\n",
        )
        .unwrap();
        assert_eq!(
            concepts,
            vec![
                ClusteredConcept::new(ConceptLabel::Problem, 1, vec![(2, 3)]),
                ClusteredConcept::new(ConceptLabel::Treatment, 2, vec![(2, 2)]),
            ]
        );
    }

    #[test]
    fn test_parse_multi_span_record() {
        let concepts = parse_concepts("c=\"pain ... knee\" 3:0 3:0,3:5 3:5||t=\"problem\"").unwrap();
        assert_eq!(concepts[0].spans, vec![(0, 0), (5, 5)]);
        assert!(concepts[0].is_clustered());
    }

    #[test]
    fn test_concept_across_lines_rejected() {
        let err = parse_concepts("c=\"a b\" 1:3 2:0||t=\"problem\"").unwrap_err();
        assert!(matches!(err, NoteError::Parse { line_no: 1, .. }));

        let err = parse_concepts("c=\"a ... b\" 1:0 1:0,2:1 2:1||t=\"test\"").unwrap_err();
        assert!(matches!(err, NoteError::Parse { .. }));
    }

    #[test]
    fn test_malformed_records_rejected() {
        assert!(parse_concepts("c=\"a\" 1:0||t=\"test\"").is_err());
        let err = parse_concepts("\nc=\"a\" 1:0 1:0||t=\"drug\"").unwrap_err();
        assert!(matches!(err, NoteError::Parse { line_no: 2, .. }));
    }

    #[test]
    fn test_read_sorts_and_deduplicates() {
        let con = "c=\"aspirin\" 2:2 2:2||t=\"treatment\"\n\
                   c=\"chest pain\" 1:2 1:3||t=\"problem\"\n\
                   c=\"aspirin\" 2:2 2:2||t=\"treatment\"\n";
        let doc = I2b2Format::new().parse(TEXT, Some(con)).unwrap();
        assert_eq!(doc.concepts().len(), 2);
        assert_eq!(doc.concepts()[0].line, 1);
    }

    #[test]
    fn test_out_of_range_annotation_is_core_error() {
        let err = I2b2Format::new()
            .parse(TEXT, Some("c=\"x\" 9:0 9:0||t=\"test\""))
            .unwrap_err();
        assert!(matches!(err, NoteError::Core(ClinerError::SpanOutOfRange { .. })));
    }

    #[test]
    fn test_format_lowercases_text() {
        let doc = Document::from_text(TEXT);
        let out = format_concepts(
            &doc,
            &[
                ClusteredConcept::new(ConceptLabel::Problem, 1, vec![(2, 3)]),
                ClusteredConcept::new(ConceptLabel::Problem, 3, vec![(0, 0), (5, 5)]),
            ],
        )
        .unwrap();
        assert_eq!(
            out,
            "c=\"chest pain\" 1:2 1:3||t=\"problem\"\n\
             c=\"pain ... knee\" 3:0 3:0,3:5 3:5||t=\"problem\"\n"
        );
    }

    #[test]
    fn test_format_rejects_none_label() {
        let doc = Document::from_text(TEXT);
        let err = format_concepts(&doc, &[ClusteredConcept::new(ConceptLabel::None, 2, vec![(0, 0)])]).unwrap_err();
        assert!(matches!(err, NoteError::Core(ClinerError::DegenerateLabel { line: 2 })));
    }

    #[test]
    fn test_written_concepts_read_back() {
        let concepts = vec![
            ClusteredConcept::new(ConceptLabel::Problem, 1, vec![(2, 3)]),
            ClusteredConcept::new(ConceptLabel::Treatment, 2, vec![(2, 2)]),
        ];
        let rendered = format_concepts(&Document::from_text(TEXT), &concepts).unwrap();
        assert_eq!(parse_concepts(&rendered).unwrap(), concepts);
    }
}
