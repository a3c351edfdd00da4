use crate::error::IngestError;
use crate::models::{Chunk, Document, IngestionOptions};
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;

/// Paragraph, line, sentence, word. Each group is one priority level.
const RECURSIVE_SEPARATORS: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];
const HEADING_LEVELS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl TryFrom<IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

pub trait TextSplitter: Send + Sync {
    /// Byte ranges of each chunk in `text`, in split order.
    fn split_spans(&self, text: &str) -> Result<Vec<Range<usize>>, IngestError>;

    fn split(&self, text: &str) -> Result<Vec<String>, IngestError> {
        Ok(self
            .split_spans(text)?
            .into_iter()
            .map(|span| text[span].to_string())
            .collect())
    }
}

/// Splits on paragraphs, then lines, sentences and words before cutting hard.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    config: ChunkingConfig,
}

impl RecursiveCharacterSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }
}

impl TextSplitter for RecursiveCharacterSplitter {
    fn split_spans(&self, text: &str) -> Result<Vec<Range<usize>>, IngestError> {
        let mut boundaries = Boundaries::default();
        boundaries.add_separators(text, 0);
        Ok(split_at_boundaries(
            text,
            &boundaries,
            self.config,
            RECURSIVE_SEPARATORS.len() as u8 - 1,
        ))
    }
}

/// Prefers cutting right before a heading, shallower headings first.
#[derive(Debug, Clone)]
pub struct MarkdownSplitter {
    config: ChunkingConfig,
    heading: Regex,
    fence: Regex,
}

impl MarkdownSplitter {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        let heading = Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]|\r?\n|$)")
            .map_err(|error| IngestError::InvalidChunkConfig(error.to_string()))?;
        let fence = Regex::new(r"^ {0,3}(?:```|~~~)")
            .map_err(|error| IngestError::InvalidChunkConfig(error.to_string()))?;
        Ok(Self {
            config,
            heading,
            fence,
        })
    }

    fn add_headings(&self, text: &str, boundaries: &mut Boundaries) {
        let mut offset = 0;
        let mut in_fence = false;

        for line in text.split_inclusive('\n') {
            if self.fence.is_match(line) {
                in_fence = !in_fence;
            } else if !in_fence {
                if let Some(captures) = self.heading.captures(line) {
                    let depth = captures.get(1).map_or(1, |hashes| hashes.as_str().len());
                    boundaries.insert(offset, depth as u8 - 1);
                }
            }
            offset += line.len();
        }
    }
}

impl TextSplitter for MarkdownSplitter {
    fn split_spans(&self, text: &str) -> Result<Vec<Range<usize>>, IngestError> {
        let mut boundaries = Boundaries::default();
        self.add_headings(text, &mut boundaries);
        boundaries.add_separators(text, HEADING_LEVELS);
        Ok(split_at_boundaries(
            text,
            &boundaries,
            self.config,
            HEADING_LEVELS + RECURSIVE_SEPARATORS.len() as u8 - 1,
        ))
    }
}

/// Candidate cut positions (byte offsets where a new chunk may start) with
/// their priority; lower levels are preferred.
#[derive(Debug, Default)]
struct Boundaries {
    levels: BTreeMap<usize, u8>,
}

impl Boundaries {
    fn insert(&mut self, position: usize, level: u8) {
        self.levels
            .entry(position)
            .and_modify(|existing| *existing = (*existing).min(level))
            .or_insert(level);
    }

    fn add_separators(&mut self, text: &str, first_level: u8) {
        for (offset, group) in RECURSIVE_SEPARATORS.iter().enumerate() {
            let level = first_level + offset as u8;
            for separator in group.iter() {
                for (index, matched) in text.match_indices(separator) {
                    self.insert(index + matched.len(), level);
                }
            }
        }
    }

    /// Furthest position in `(floor, limit]` among the best level present.
    fn best_cut(&self, floor: usize, limit: usize) -> Option<usize> {
        let mut best: Option<(u8, usize)> = None;
        for (&position, &level) in self.levels.range(floor + 1..=limit) {
            match best {
                Some((best_level, _)) if best_level < level => {}
                _ => best = Some((level, position)),
            }
        }
        best.map(|(_, position)| position)
    }

    /// Earliest position in `[from, to)` at or above word level.
    fn overlap_start(&self, from: usize, to: usize, max_level: u8) -> Option<usize> {
        self.levels
            .range(from..to)
            .find(|(_, &level)| level <= max_level)
            .map(|(&position, _)| position)
    }
}

fn split_at_boundaries(
    text: &str,
    boundaries: &Boundaries,
    config: ChunkingConfig,
    word_level: u8,
) -> Vec<Range<usize>> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // offsets[i] is the byte offset of char i; the last entry is text.len().
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = offsets.len() - 1;
    let char_index = |byte: usize| offsets.partition_point(|&offset| offset < byte);

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut previous_end = 0usize;

    loop {
        let start_char = char_index(start);
        if total_chars - start_char <= config.chunk_size {
            spans.push(start..text.len());
            break;
        }

        let limit = offsets[start_char + config.chunk_size];
        let floor = start.max(previous_end);
        let end = boundaries.best_cut(floor, limit).unwrap_or(limit);
        spans.push(start..end);

        let end_char = char_index(end);
        let window_char = (start_char + 1).max(end_char.saturating_sub(config.chunk_overlap));
        let next = if config.chunk_overlap == 0 || window_char >= end_char {
            end
        } else {
            boundaries
                .overlap_start(offsets[window_char], end, word_level)
                .unwrap_or(end)
        };

        previous_end = end;
        start = next;
    }

    spans
}

pub fn split_document(
    splitter: &dyn TextSplitter,
    document: &Document,
) -> Result<Vec<Chunk>, IngestError> {
    let texts = splitter
        .split(&document.content)
        .map_err(|error| match error {
            IngestError::Split { .. } => error,
            other => IngestError::Split {
                source_path: document.source().to_string(),
                reason: other.to_string(),
            },
        })?;

    Ok(texts
        .into_iter()
        .map(|text| Chunk::new(text, document.metadata.clone()))
        .collect())
}

pub struct SkippedDocument {
    pub source: String,
    pub reason: String,
}

pub struct SplitReport {
    pub chunks: Vec<Chunk>,
    pub skipped_documents: Vec<SkippedDocument>,
}

/// Splits every document; a failing document is skipped and reported, the
/// chunks of the others are kept.
pub fn split_documents(
    splitter: &dyn TextSplitter,
    documents: &[Document],
) -> SplitReport {
    let mut chunks = Vec::new();
    let mut skipped_documents = Vec::new();

    for document in documents {
        match split_document(splitter, document) {
            Ok(document_chunks) => chunks.extend(document_chunks),
            Err(error) => skipped_documents.push(SkippedDocument {
                source: document.source().to_string(),
                reason: error.to_string(),
            }),
        }
    }

    SplitReport {
        chunks,
        skipped_documents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    const SAMPLE: &str = "# Install\n\nDownload the archive. Unpack it into a folder! Is that all? Mostly.\n\n## Linux\n\nRun the installer script with sudo privileges and follow the prompts on screen.\n\n```sh\n# not a heading\nmake install\n```\n\n## Windows\n\nDouble click the setup file. Héllo wörld, ünïcode text survives every cut.\n\n# Usage\n\nStart the daemon and open the dashboard in a browser window.";

    fn reconstruct(text: &str, spans: &[Range<usize>]) -> String {
        let mut rebuilt = String::new();
        let mut covered = 0;
        for span in spans {
            rebuilt.push_str(&text[covered.max(span.start)..span.end]);
            covered = span.end;
        }
        rebuilt
    }

    fn check_invariants(splitter: &dyn TextSplitter, text: &str, config: ChunkingConfig) {
        let spans = splitter.split_spans(text).unwrap();
        let chunks = splitter.split(text).unwrap();
        assert_eq!(spans.len(), chunks.len());

        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= config.chunk_size,
                "chunk of {} chars exceeds {}",
                chunk.chars().count(),
                config.chunk_size
            );
        }

        for pair in spans.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            assert!(next.start > previous.start);
            assert!(next.start <= previous.end);
            assert!(next.end > previous.end);
            let overlap = &text[next.start..previous.end];
            assert!(overlap.chars().count() <= config.chunk_overlap);
        }

        for (index, pair) in chunks.windows(2).enumerate() {
            let shared = spans[index].end - spans[index + 1].start;
            assert_eq!(
                &pair[0][pair[0].len() - shared..],
                &pair[1][..shared],
                "overlap must be shared text"
            );
        }

        assert_eq!(reconstruct(text, &spans), text);
    }

    #[test]
    fn invariants_hold_across_sizes_and_overlaps() {
        let long = SAMPLE.repeat(3);
        for size in [1usize, 2, 7, 16, 40, 64, 150, 1_000] {
            for overlap in [0usize, 1, 3, 10, 30, 100] {
                let Ok(config) = ChunkingConfig::new(size, overlap) else {
                    continue;
                };
                check_invariants(&RecursiveCharacterSplitter::new(config), &long, config);
                check_invariants(&MarkdownSplitter::new(config).unwrap(), &long, config);
            }
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let config = ChunkingConfig::new(60, 15).unwrap();
        let splitter = MarkdownSplitter::new(config).unwrap();
        assert_eq!(splitter.split(SAMPLE).unwrap(), splitter.split(SAMPLE).unwrap());
    }

    #[test]
    fn small_document_is_a_single_chunk() {
        let config = ChunkingConfig::new(1_500, 300).unwrap();
        let chunks = MarkdownSplitter::new(config).unwrap().split("# T\nbody").unwrap();
        assert_eq!(chunks, vec!["# T\nbody".to_string()]);
    }

    #[test]
    fn blank_text_produces_no_chunks() {
        let config = ChunkingConfig::new(10, 2).unwrap();
        assert!(RecursiveCharacterSplitter::new(config).split("").unwrap().is_empty());
        assert!(RecursiveCharacterSplitter::new(config).split(" \n\n ").unwrap().is_empty());
    }

    #[test]
    fn markdown_splitter_cuts_before_headings() {
        let text = "# One\nalpha beta gamma\n# Two\ndelta epsilon zeta";
        let config = ChunkingConfig::new(30, 0).unwrap();
        let chunks = MarkdownSplitter::new(config).unwrap().split(text).unwrap();
        assert_eq!(
            chunks,
            vec!["# One\nalpha beta gamma\n".to_string(), "# Two\ndelta epsilon zeta".to_string()]
        );
    }

    #[test]
    fn fenced_code_hashes_are_not_headings() {
        let text = "intro text here\n```\n# comment\n```\nmore";
        let config = ChunkingConfig::new(30, 0).unwrap();
        let splitter = MarkdownSplitter::new(config).unwrap();
        let mut boundaries = Boundaries::default();
        splitter.add_headings(text, &mut boundaries);
        assert!(boundaries.levels.is_empty());
    }

    #[test]
    fn recursive_splitter_prefers_paragraphs() {
        let text = "first paragraph here\n\nsecond one";
        let config = ChunkingConfig::new(25, 0).unwrap();
        let chunks = RecursiveCharacterSplitter::new(config).split(text).unwrap();
        assert_eq!(
            chunks,
            vec!["first paragraph here\n\n".to_string(), "second one".to_string()]
        );
    }

    #[test]
    fn overlap_starts_on_a_word() {
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let config = ChunkingConfig::new(15, 6).unwrap();
        let chunks = RecursiveCharacterSplitter::new(config).split(text).unwrap();
        assert_eq!(chunks[0], "aaaa bbbb cccc ");
        assert!(chunks[1].starts_with("cccc "));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(ChunkingConfig::new(0, 0).is_err());
        assert!(ChunkingConfig::new(10, 10).is_err());
        assert!(ChunkingConfig::new(10, 11).is_err());
        assert!(ChunkingConfig::new(10, 9).is_ok());
    }

    #[test]
    fn chunks_inherit_parent_metadata_exactly() {
        let metadata = Metadata::from([
            ("source".to_string(), "guide/install.md".to_string()),
            (
                "source_url".to_string(),
                "https://docs.example.com/guide/install.md".to_string(),
            ),
        ]);
        let documents = vec![
            Document::new(SAMPLE, metadata.clone()),
            Document::new("tiny", Metadata::from([("source".into(), "b.md".into())])),
        ];
        let config = ChunkingConfig::new(40, 8).unwrap();
        let splitter = MarkdownSplitter::new(config).unwrap();

        let report = split_documents(&splitter, &documents);
        assert!(report.skipped_documents.is_empty());
        let chunks = report.chunks;

        assert!(chunks.len() > 2);
        let (last, rest) = chunks.split_last().unwrap();
        assert!(rest.iter().all(|chunk| chunk.metadata == metadata));
        assert_eq!(last.source(), "b.md");
        assert_eq!(last.content, "tiny");
    }

    struct FailingSplitter;

    impl TextSplitter for FailingSplitter {
        fn split_spans(&self, text: &str) -> Result<Vec<Range<usize>>, IngestError> {
            if text.contains("broken") {
                return Err(IngestError::InvalidChunkConfig("cannot split".into()));
            }
            Ok(vec![0..text.len()])
        }
    }

    #[test]
    fn failing_document_is_skipped_and_the_rest_kept() {
        let documents = vec![
            Document::new("good", Metadata::from([("source".into(), "a.md".into())])),
            Document::new("broken", Metadata::from([("source".into(), "b.md".into())])),
            Document::new("fine", Metadata::from([("source".into(), "c.md".into())])),
        ];

        let report = split_documents(&FailingSplitter, &documents);
        let contents: Vec<_> = report.chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["good", "fine"]);
        assert_eq!(report.skipped_documents.len(), 1);
        assert_eq!(report.skipped_documents[0].source, "b.md");
        assert!(report.skipped_documents[0].reason.contains("b.md"));
    }
}
