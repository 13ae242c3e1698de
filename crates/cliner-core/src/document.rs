//! Annotated documents and their pipeline views
//!
//! A [`Document`] is an ordered sequence of tokenized lines plus (for
//! training data) the gold concepts annotated on them. The pipeline consumes
//! two derived views:
//! - the token view with per-token IOB labels (first pass)
//! - the chunked view, where every concept span is collapsed into one chunk
//!   and addressed by its index within the line (second and third pass)

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{ClinerError, ClusteredConcept, ConceptLabel, IobLabel, Result};

/// One line of whitespace-separated tokens
pub type TokenizedLine = Vec<String>;

/// One line where each concept span has been merged into a single element
pub type ChunkedLine = Vec<String>;

/// A multi-span concept expressed in chunk coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanGroup {
    pub label: ConceptLabel,
    /// 0-based line index
    pub line: usize,
    /// Chunk indices of the member spans, ascending
    pub chunks: Vec<usize>,
}

/// Chunked representation of a document's lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedView {
    /// Chunked lines, one per document line
    pub lines: Vec<ChunkedLine>,
    /// Concept chunk indices per line
    pub indices: Vec<Vec<usize>>,
    /// Concept labels, flat and aligned with the concatenated `indices`
    pub labels: Vec<ConceptLabel>,
    /// Multi-span concepts, in chunk coordinates
    pub groups: Vec<SpanGroup>,
}

impl ChunkedView {
    /// Total number of concept chunks across all lines
    pub fn concept_count(&self) -> usize {
        self.indices.iter().map(Vec::len).sum()
    }
}

/// A span on a line, tagged with the concept that owns it
#[derive(Debug, Clone, Copy)]
struct LineSpan {
    start: usize,
    end: usize,
    label: ConceptLabel,
    concept: usize,
}

/// A tokenized medical record with optional gold concepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    lines: Vec<TokenizedLine>,
    concepts: Vec<ClusteredConcept>,
}

impl Document {
    /// Create an unannotated document
    pub fn new(lines: Vec<TokenizedLine>) -> Self {
        Self {
            lines,
            concepts: Vec::new(),
        }
    }

    /// Tokenize raw text: one line per `\n`, tokens split on whitespace
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .trim_matches('\n')
            .split('\n')
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect();
        Self::new(lines)
    }

    /// Attach gold concepts, validating them against the token lines
    ///
    /// Exact duplicates are dropped and concepts are ordered by
    /// `(line, first span)`. Overlapping spans on a line are rejected.
    pub fn with_concepts(mut self, concepts: Vec<ClusteredConcept>) -> Result<Self> {
        let mut unique: Vec<ClusteredConcept> = Vec::with_capacity(concepts.len());
        for mut concept in concepts {
            self.validate_concept(&concept)?;
            concept.spans.sort_unstable();
            if !unique.contains(&concept) {
                unique.push(concept);
            }
        }
        unique.sort_by(|a, b| (a.line, a.spans[0]).cmp(&(b.line, b.spans[0])));
        self.concepts = unique;

        // Overlap check runs on the deduplicated set
        for spans in self.spans_by_line() {
            for pair in spans.windows(2) {
                if pair[1].start <= pair[0].end {
                    return Err(ClinerError::InvalidDocument(format!(
                        "overlapping concept spans {}..{} and {}..{}",
                        pair[0].start, pair[0].end, pair[1].start, pair[1].end
                    )));
                }
            }
        }
        Ok(self)
    }

    fn validate_concept(&self, concept: &ClusteredConcept) -> Result<()> {
        if concept.label == ConceptLabel::None {
            return Err(ClinerError::InvalidDocument(format!(
                "gold concept on line {} has label 'none'",
                concept.line
            )));
        }
        if concept.line == 0 || concept.line > self.lines.len() {
            return Err(ClinerError::SpanOutOfRange {
                context: "document lines".to_string(),
                index: concept.line,
                len: self.lines.len(),
            });
        }
        if concept.spans.is_empty() {
            return Err(ClinerError::InvalidDocument(format!(
                "concept on line {} has no spans",
                concept.line
            )));
        }
        let len = self.lines[concept.line - 1].len();
        for &(start, end) in &concept.spans {
            if start > end {
                return Err(ClinerError::InvalidDocument(format!(
                    "inverted span {start}..{end} on line {}",
                    concept.line
                )));
            }
            if end >= len {
                return Err(ClinerError::SpanOutOfRange {
                    context: format!("tokens of line {}", concept.line),
                    index: end,
                    len,
                });
            }
        }
        Ok(())
    }

    pub fn lines(&self) -> &[TokenizedLine] {
        &self.lines
    }

    pub fn concepts(&self) -> &[ClusteredConcept] {
        &self.concepts
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Tokenized sentences (one per line), the first-pass input
    pub fn tokenized_sentences(&self) -> &[TokenizedLine] {
        &self.lines
    }

    /// Gold spans grouped by line, sorted by start offset
    fn spans_by_line(&self) -> Vec<Vec<LineSpan>> {
        let mut by_line: Vec<Vec<LineSpan>> = vec![Vec::new(); self.lines.len()];
        for (concept_idx, concept) in self.concepts.iter().enumerate() {
            for &(start, end) in &concept.spans {
                by_line[concept.line - 1].push(LineSpan {
                    start,
                    end,
                    label: concept.label,
                    concept: concept_idx,
                });
            }
        }
        for spans in &mut by_line {
            spans.sort_by_key(|s| (s.start, s.end));
        }
        by_line
    }

    /// Gold IOB labels, one sequence per line
    pub fn iob_labels(&self) -> Vec<Vec<IobLabel>> {
        self.spans_by_line()
            .into_iter()
            .zip(&self.lines)
            .map(|(spans, tokens)| {
                let mut labels = vec![IobLabel::Outside; tokens.len()];
                for span in spans {
                    labels[span.start] = IobLabel::Begin;
                    for label in &mut labels[span.start + 1..=span.end] {
                        *label = IobLabel::Inside;
                    }
                }
                labels
            })
            .collect()
    }

    /// Chunked view derived from the gold concepts
    pub fn chunked_view(&self) -> ChunkedView {
        let mut view = ChunkedView::default();
        // (concept index, chunk index) for every gold span
        let mut owners: Vec<(usize, usize)> = Vec::new();

        for (spans, tokens) in self.spans_by_line().into_iter().zip(&self.lines) {
            let mut chunks = Vec::new();
            let mut indices = Vec::new();
            let mut spans = spans.into_iter().peekable();
            let mut pos = 0;

            while pos < tokens.len() {
                match spans.peek() {
                    Some(span) if span.start == pos => {
                        indices.push(chunks.len());
                        view.labels.push(span.label);
                        owners.push((span.concept, chunks.len()));
                        chunks.push(tokens[span.start..=span.end].join(" "));
                        pos = span.end + 1;
                        spans.next();
                    }
                    _ => {
                        chunks.push(tokens[pos].clone());
                        pos += 1;
                    }
                }
            }

            view.lines.push(chunks);
            view.indices.push(indices);
        }

        for (concept_idx, concept) in self.concepts.iter().enumerate() {
            if !concept.is_clustered() {
                continue;
            }
            let chunks: BTreeSet<usize> = owners
                .iter()
                .filter(|(owner, _)| *owner == concept_idx)
                .map(|(_, chunk)| *chunk)
                .collect();
            view.groups.push(SpanGroup {
                label: concept.label,
                line: concept.line - 1,
                chunks: chunks.into_iter().collect(),
            });
        }

        view
    }

    /// Chunked lines and concept indices derived from predicted IOB labels
    pub fn chunk_predicted(&self, iobs: &[Vec<IobLabel>]) -> Result<(Vec<ChunkedLine>, Vec<Vec<usize>>)> {
        if iobs.len() != self.lines.len() {
            return Err(ClinerError::LengthMismatch {
                context: "IOB label lines".to_string(),
                expected: self.lines.len(),
                found: iobs.len(),
            });
        }
        let mut lines = Vec::with_capacity(self.lines.len());
        let mut indices = Vec::with_capacity(self.lines.len());
        for (tokens, labels) in self.lines.iter().zip(iobs) {
            let (chunks, inds) = chunk_from_iob(tokens, labels)?;
            lines.push(chunks);
            indices.push(inds);
        }
        Ok((lines, indices))
    }
}

/// Merge an IOB-labelled line into chunks
///
/// A `B` opens a concept chunk that absorbs the following `I` tokens. An `I`
/// with no open chunk opens one itself. Every `O` token is its own chunk.
/// Returns the chunked line and the indices of the concept chunks.
pub fn chunk_from_iob(tokens: &[String], labels: &[IobLabel]) -> Result<(ChunkedLine, Vec<usize>)> {
    if tokens.len() != labels.len() {
        return Err(ClinerError::LengthMismatch {
            context: "IOB labels for line".to_string(),
            expected: tokens.len(),
            found: labels.len(),
        });
    }

    let mut chunks: ChunkedLine = Vec::new();
    let mut indices = Vec::new();
    let mut open = false;

    for (token, label) in tokens.iter().zip(labels) {
        match label {
            IobLabel::Inside if open => {
                let last = chunks.len() - 1;
                chunks[last].push(' ');
                chunks[last].push_str(token);
            }
            IobLabel::Begin | IobLabel::Inside => {
                indices.push(chunks.len());
                chunks.push(token.clone());
                open = true;
            }
            IobLabel::Outside => {
                chunks.push(token.clone());
                open = false;
            }
        }
    }

    Ok((chunks, indices))
}
