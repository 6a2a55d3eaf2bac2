//! Boundary-aware text chunker.
//!
//! Splits document body text into retrieval-sized segments using one of
//! four strategies. All strategies share the same boundary policy when a
//! cut is needed: prefer a paragraph break near the target offset, then a
//! sentence break, then the nearest whitespace, and only then a hard cut
//! at the exact offset (never inside a multi-byte character).
//!
//! | Strategy | Unit accumulated |
//! |----------|------------------|
//! | [`ChunkStrategy::FixedOverlap`] | sliding character window |
//! | [`ChunkStrategy::SentenceAware`] | whole sentences |
//! | [`ChunkStrategy::ParagraphAware`] | whole paragraphs |
//! | [`ChunkStrategy::Structural`] | detected sections, then paragraphs |
//!
//! # Guarantees
//!
//! - No output chunk is empty; every chunk is trimmed.
//! - No chunk exceeds `target_size` bytes — an atomic unit larger than
//!   the target is recursively hard-split rather than emitted oversized.
//! - Output is deterministic for identical inputs.
//!
//! Historical prose is full of honorifics ("Gen. Grant", "Mr. Lincoln"),
//! so sentence detection treats a configurable abbreviation list as
//! non-terminating.

use std::str::FromStr;

use serde::Serialize;

/// How far back from the target offset each boundary kind is searched.
const PARAGRAPH_WINDOW: usize = 200;
const SENTENCE_WINDOW: usize = 100;
const WHITESPACE_WINDOW: usize = 50;

/// Abbreviations that do not terminate a sentence.
pub const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Dr.", "Prof.", "Gen.", "Col.", "Capt.", "Lt.", "Sgt.",
];

/// Selectable chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    FixedOverlap,
    SentenceAware,
    ParagraphAware,
    Structural,
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" | "fixed_overlap" => Ok(ChunkStrategy::FixedOverlap),
            "sentence" | "sentence_aware" => Ok(ChunkStrategy::SentenceAware),
            "paragraph" | "paragraph_aware" => Ok(ChunkStrategy::ParagraphAware),
            "structural" => Ok(ChunkStrategy::Structural),
            other => Err(format!(
                "unknown chunk strategy: '{other}'. Use fixed, sentence, paragraph, or structural."
            )),
        }
    }
}

/// Configured chunker. Pure: no I/O, no randomness.
#[derive(Debug, Clone)]
pub struct Chunker {
    target_size: usize,
    overlap: usize,
    abbreviations: Vec<String>,
}

impl Chunker {
    /// Create a chunker with the default abbreviation list.
    ///
    /// `overlap` must be smaller than `target_size`; the configuration
    /// loader enforces this before a `Chunker` is built.
    pub fn new(target_size: usize, overlap: usize) -> Self {
        Self {
            target_size,
            overlap,
            abbreviations: DEFAULT_ABBREVIATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_abbreviations(mut self, abbreviations: Vec<String>) -> Self {
        self.abbreviations = abbreviations;
        self
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered, trimmed, non-empty chunk texts.
    pub fn chunk(&self, text: &str, strategy: ChunkStrategy) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match strategy {
            ChunkStrategy::FixedOverlap => self.fixed_overlap(text),
            ChunkStrategy::SentenceAware => self.sentence_aware(text),
            ChunkStrategy::ParagraphAware => self.paragraph_aware(text),
            ChunkStrategy::Structural => self.structural(text),
        }
    }

    // ---- fixed-with-overlap ----

    /// Slide a window of `target_size` bytes, retreating by `overlap`
    /// after each cut. The boundary policy adjusts each cut point.
    fn fixed_overlap(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        if text.len() <= self.target_size {
            push_trimmed(&mut chunks, text);
            return chunks;
        }

        let mut start = 0usize;
        while start < text.len() {
            let mut end = snap_to_char_boundary(text, (start + self.target_size).min(text.len()));
            if end <= start {
                end = next_char_boundary(text, start);
            }
            if end >= text.len() {
                push_trimmed(&mut chunks, &text[start..]);
                break;
            }

            let cut = self.find_break_point(text, start, end);
            push_trimmed(&mut chunks, &text[start..cut]);

            let next = snap_to_char_boundary(text, cut.saturating_sub(self.overlap));
            start = if next > start { next } else { cut };
        }

        chunks
    }

    /// Best cut point in `(start, end]`, searching backward only so the
    /// resulting chunk never exceeds the window.
    fn find_break_point(&self, text: &str, start: usize, end: usize) -> usize {
        let lo = snap_to_char_boundary(text, end.saturating_sub(PARAGRAPH_WINDOW).max(start));
        if let Some(rel) = rfind_paragraph_break(&text[lo..end]) {
            let cut = snap_to_char_boundary(text, lo + rel);
            if cut > start {
                return cut;
            }
        }

        let lo = snap_to_char_boundary(text, end.saturating_sub(SENTENCE_WINDOW).max(start));
        if let Some(rel) = rfind_sentence_break(&text[lo..end]) {
            let cut = snap_to_char_boundary(text, lo + rel);
            if cut > start {
                return cut;
            }
        }

        let lo = snap_to_char_boundary(text, end.saturating_sub(WHITESPACE_WINDOW).max(start));
        if let Some(rel) = text[lo..end].rfind(char::is_whitespace) {
            let cut = lo + rel;
            if cut > start {
                return cut;
            }
        }

        end
    }

    // ---- sentence-aware ----

    /// Accumulate whole sentences until the next would overflow the
    /// target, then flush and seed the next chunk with the trailing
    /// sentences covering up to `overlap` bytes.
    fn sentence_aware(&self, text: &str) -> Vec<String> {
        let sentences = self.split_sentences(text);
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for sentence in sentences {
            if sentence.len() > self.target_size {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                    current.clear();
                }
                chunks.extend(self.fixed_overlap(&sentence));
                continue;
            }

            if !current.is_empty() && joined_len(&current, 1) + 1 + sentence.len() > self.target_size
            {
                chunks.push(current.join(" "));
                let mut seeded = overlap_tail(&current, self.overlap);
                seeded.push(sentence);
                while seeded.len() > 1 && joined_len(&seeded, 1) > self.target_size {
                    seeded.remove(0);
                }
                current = seeded;
            } else {
                current.push(sentence);
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }

    /// Split text into sentences, treating the configured abbreviations
    /// as non-terminating.
    pub fn split_sentences(&self, text: &str) -> Vec<String> {
        let bytes = text.as_bytes();
        let mut sentences = Vec::new();
        let mut sent_start = 0usize;
        let mut i = 0usize;

        while i < bytes.len() {
            if !matches!(bytes[i], b'.' | b'!' | b'?') {
                i += 1;
                continue;
            }
            let run_start = i;
            let mut run_end = i + 1;
            while run_end < bytes.len() && matches!(bytes[run_end], b'.' | b'!' | b'?') {
                run_end += 1;
            }
            let terminates = run_end < bytes.len()
                && bytes[run_end].is_ascii_whitespace()
                && !self.is_abbreviation(text, run_start, run_end);
            if terminates {
                let sentence = text[sent_start..run_end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                let mut next = run_end;
                while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                    next += 1;
                }
                sent_start = next;
                i = next;
            } else {
                i = run_end;
            }
        }

        let tail = text[sent_start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
        sentences
    }

    /// True when the period run `[run_start, run_end)` closes an
    /// abbreviation like "Gen." rather than a sentence.
    fn is_abbreviation(&self, text: &str, run_start: usize, run_end: usize) -> bool {
        if run_end - run_start != 1 || text.as_bytes()[run_start] != b'.' {
            return false;
        }
        let before = &text[..run_start];
        let token_start = before
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(p, c)| p + c.len_utf8())
            .unwrap_or(0);
        let token = &text[token_start..run_start + 1];
        self.abbreviations.iter().any(|a| a == token)
    }

    // ---- paragraph-aware ----

    /// Same accumulation at paragraph granularity. Oversized paragraphs
    /// are re-chunked with the fixed window; the previous paragraph seeds
    /// the next chunk when it fits inside the overlap allowance.
    fn paragraph_aware(&self, text: &str) -> Vec<String> {
        let paragraphs = split_paragraphs(text);
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for para in paragraphs {
            if para.len() > self.target_size {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                    current.clear();
                }
                chunks.extend(self.fixed_overlap(&para));
                continue;
            }

            if !current.is_empty() && joined_len(&current, 2) + 2 + para.len() > self.target_size {
                chunks.push(current.join("\n\n"));
                let seed = current.last().cloned().filter(|last| {
                    self.overlap > 0
                        && last.len() <= self.overlap
                        && last.len() + 2 + para.len() <= self.target_size
                });
                current.clear();
                if let Some(last) = seed {
                    current.push(last);
                }
                current.push(para);
            } else {
                current.push(para);
            }
        }

        if !current.is_empty() {
            chunks.push(current.join("\n\n"));
        }
        chunks
    }

    // ---- structural ----

    /// Partition on detected section markers (headings, numbered
    /// sections, letter/speech openings), then chunk each section at
    /// paragraph granularity. Falls back to paragraph-aware chunking
    /// when no markers are found.
    fn structural(&self, text: &str) -> Vec<String> {
        let sections = identify_sections(text);
        if sections.len() <= 1 {
            return self.paragraph_aware(text);
        }

        let mut chunks = Vec::new();
        for section in sections {
            if section.len() <= self.target_size {
                chunks.push(section);
            } else {
                chunks.extend(self.paragraph_aware(&section));
            }
        }
        chunks
    }
}

// ---- shared helpers ----

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Length of `parts` once joined with a separator of `sep_len` bytes.
fn joined_len(parts: &[String], sep_len: usize) -> usize {
    if parts.is_empty() {
        return 0;
    }
    parts.iter().map(String::len).sum::<usize>() + sep_len * (parts.len() - 1)
}

/// Trailing sentences covering at most `overlap` bytes, oldest first.
fn overlap_tail(sentences: &[String], overlap: usize) -> Vec<String> {
    if overlap == 0 {
        return Vec::new();
    }
    let mut tail: Vec<String> = Vec::new();
    let mut used = 0usize;
    for sentence in sentences.iter().rev() {
        if used + sentence.len() > overlap {
            break;
        }
        used += sentence.len();
        tail.insert(0, sentence.clone());
    }
    tail
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte index just past the character starting at `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}

/// Byte index just past the last blank-line paragraph break in `window`.
fn rfind_paragraph_break(window: &str) -> Option<usize> {
    let bytes = window.as_bytes();
    let mut best = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b' ' | b'\t' | b'\r') {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'\n' {
                best = Some(j + 1);
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    best
}

/// Byte index just past the last `[.!?]+<ws>` sentence break in `window`.
fn rfind_sentence_break(window: &str) -> Option<usize> {
    let bytes = window.as_bytes();
    let mut best = None;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b'.' | b'!' | b'?') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_whitespace() {
                best = Some(j + 1);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    best
}

/// Split on blank-line boundaries; whitespace-only lines separate
/// paragraphs, single newlines within a paragraph are preserved.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    paragraphs
}

/// Partition text at lines that look like section headings. Returns the
/// whole text as one section when nothing matches.
fn identify_sections(text: &str) -> Vec<String> {
    let mut boundaries = vec![0usize];
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if offset > 0 && is_section_heading(content) {
            boundaries.push(offset);
        }
        offset += line.len();
    }
    boundaries.push(text.len());
    boundaries.dedup();

    let mut sections = Vec::new();
    for pair in boundaries.windows(2) {
        let section = text[pair[0]..pair[1]].trim();
        if !section.is_empty() {
            sections.push(section.to_string());
        }
    }
    sections
}

fn is_section_heading(line: &str) -> bool {
    heading_keyword(line) || all_caps_header(line) || numbered_heading(line) || document_opening(line)
}

/// `CHAPTER IV`, `Section 2`, `PART I` — keyword plus a roman or arabic
/// numeral.
fn heading_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    for keyword in ["chapter", "section", "part"] {
        if let Some(rest) = lower.strip_prefix(keyword) {
            if !rest.starts_with(|c: char| c.is_whitespace()) {
                continue;
            }
            let rest = rest.trim_start();
            if rest
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || "ivxlcdm".contains(c))
            {
                return true;
            }
        }
    }
    false
}

/// An entire line of uppercase letters and spaces, at least 11 chars.
fn all_caps_header(line: &str) -> bool {
    let line = line.trim_end();
    if line.chars().count() < 11 {
        return false;
    }
    let mut chars = line.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_uppercase()) {
        return false;
    }
    chars.all(|c| c.is_ascii_uppercase() || c == ' ' || c == '\t')
}

/// `1. Heading` — digits, a period, whitespace, then a capital.
fn numbered_heading(line: &str) -> bool {
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let rest = &line[digits..];
    let Some(rest) = rest.strip_prefix('.') else {
        return false;
    };
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return false;
    }
    rest.trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// `Letter to …`, `Speech of …`, `Proclamation from …` openings.
fn document_opening(line: &str) -> bool {
    for keyword in ["Letter", "Speech", "Address", "Proclamation", "Order"] {
        if let Some(rest) = line.strip_prefix(keyword) {
            if !rest.starts_with(|c: char| c.is_whitespace()) {
                continue;
            }
            let rest = rest.trim_start();
            for link in ["to", "from", "of"] {
                if let Some(after) = rest.strip_prefix(link) {
                    if after.is_empty() || after.starts_with(|c: char| !c.is_alphanumeric()) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

// ---- quality introspection ----

/// Aggregate statistics over a chunking result, used for calibration.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub average_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub chunks_with_citations: usize,
    /// Fraction of chunks containing a citation-like marker.
    pub citation_coverage: f64,
    pub chunks_with_historical_markers: usize,
    /// Fraction of chunks containing a historical-date marker.
    pub historical_marker_coverage: f64,
}

/// Analyze produced chunks. Returns `None` for an empty input.
pub fn analyze_chunks(chunks: &[String]) -> Option<ChunkReport> {
    if chunks.is_empty() {
        return None;
    }

    let sizes: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
    let total_characters: usize = sizes.iter().sum();
    let with_citations = chunks.iter().filter(|c| has_citation_marker(c)).count();
    let with_markers = chunks.iter().filter(|c| has_historical_marker(c)).count();

    Some(ChunkReport {
        total_chunks: chunks.len(),
        total_characters,
        average_chunk_size: total_characters as f64 / chunks.len() as f64,
        min_chunk_size: sizes.iter().copied().min().unwrap_or(0),
        max_chunk_size: sizes.iter().copied().max().unwrap_or(0),
        chunks_with_citations: with_citations,
        citation_coverage: with_citations as f64 / chunks.len() as f64,
        chunks_with_historical_markers: with_markers,
        historical_marker_coverage: with_markers as f64 / chunks.len() as f64,
    })
}

/// `(Author, 1865)`, `[Author, 1865]`, page or volume references.
fn has_citation_marker(text: &str) -> bool {
    delimited_year(text, '(', ')')
        || delimited_year(text, '[', ']')
        || keyword_before_number(text, &["p.", "pp.", "page", "pages", "vol.", "volume"])
}

/// Letter/speech openings, dated-month phrases, or an 18xx/19xx year.
fn has_historical_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    opening_phrase(&lower) || dated_phrase(&lower) || contains_historic_year(text)
}

fn delimited_year(text: &str, open: char, close: char) -> bool {
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let inner = &rest[start + open.len_utf8()..];
        match inner.find(close) {
            Some(end) => {
                if contains_four_digit_run(&inner[..end]) {
                    return true;
                }
                rest = &inner[end + close.len_utf8()..];
            }
            None => break,
        }
    }
    false
}

fn contains_four_digit_run(s: &str) -> bool {
    let mut run = 0;
    for b in s.bytes() {
        if b.is_ascii_digit() {
            run += 1;
            if run == 4 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn keyword_before_number(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    for keyword in keywords {
        let mut search = lower.as_str();
        while let Some(pos) = search.find(keyword) {
            let after = search[pos + keyword.len()..].trim_start();
            if after.starts_with(|c: char| c.is_ascii_digit()) {
                return true;
            }
            search = &search[pos + keyword.len()..];
        }
    }
    false
}

fn opening_phrase(lower: &str) -> bool {
    for keyword in ["letter", "speech", "address", "proclamation", "order"] {
        let mut search = lower;
        while let Some(pos) = search.find(keyword) {
            let after = &search[pos + keyword.len()..];
            if after.starts_with(|c: char| c.is_whitespace()) {
                let rest = after.trim_start();
                for link in ["to", "from", "of"] {
                    if let Some(tail) = rest.strip_prefix(link) {
                        if tail.is_empty() || tail.starts_with(|c: char| !c.is_alphanumeric()) {
                            return true;
                        }
                    }
                }
            }
            search = &search[pos + keyword.len()..];
        }
    }
    false
}

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn dated_phrase(lower: &str) -> bool {
    for keyword in ["dated", "written", "delivered"] {
        let mut search = lower;
        while let Some(pos) = search.find(keyword) {
            let after = &search[pos + keyword.len()..];
            if after.starts_with(|c: char| c.is_whitespace()) {
                let mut rest = after.trim_start();
                if let Some(tail) = rest.strip_prefix("on") {
                    if tail.starts_with(|c: char| c.is_whitespace()) {
                        rest = tail.trim_start();
                    }
                }
                if MONTHS.iter().any(|m| rest.starts_with(m)) {
                    return true;
                }
            }
            search = &search[pos + keyword.len()..];
        }
    }
    false
}

/// A standalone four-digit year starting 18 or 19.
fn contains_historic_year(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let run = &text[start..i];
            let bounded = (start == 0 || !bytes[start - 1].is_ascii_alphanumeric())
                && (i == bytes.len() || !bytes[i].is_ascii_alphanumeric());
            if bounded && run.len() == 4 && (run.starts_with("18") || run.starts_with("19")) {
                return true;
            }
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(target: usize, overlap: usize) -> Chunker {
        Chunker::new(target, overlap)
    }

    /// 416 distinct six-byte words plus a terminator: exactly 2,500 bytes.
    fn uniform_words() -> String {
        let mut text = String::new();
        for i in 0..416 {
            text.push_str(&format!("a{i:04} "));
        }
        text.push_str("end.");
        assert_eq!(text.len(), 2500);
        text
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunker(1000, 100).chunk("Hello, world!", ChunkStrategy::FixedOverlap);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        for strategy in [
            ChunkStrategy::FixedOverlap,
            ChunkStrategy::SentenceAware,
            ChunkStrategy::ParagraphAware,
            ChunkStrategy::Structural,
        ] {
            assert!(chunker(1000, 100).chunk("   \n\n ", strategy).is_empty());
        }
    }

    #[test]
    fn test_fixed_overlap_scenario() {
        // 2,500 bytes, target 1000, overlap 100 → three chunks, each
        // within the target, neighbors sharing boundary words.
        let text = uniform_words();
        let chunks = chunker(1000, 100).chunk(&text, ChunkStrategy::FixedOverlap);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.len() <= 1000, "chunk exceeds target: {}", c.len());
            assert!(!c.trim().is_empty());
        }
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "no overlap between neighbors: {last_word}"
            );
        }
    }

    #[test]
    fn test_fixed_overlap_covers_every_word() {
        let text = uniform_words();
        let joined = chunker(1000, 100)
            .chunk(&text, ChunkStrategy::FixedOverlap)
            .join(" ");
        for word in text.split_whitespace() {
            assert!(joined.contains(word), "missing word: {word}");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = uniform_words();
        let c = chunker(700, 80);
        for strategy in [
            ChunkStrategy::FixedOverlap,
            ChunkStrategy::SentenceAware,
            ChunkStrategy::ParagraphAware,
            ChunkStrategy::Structural,
        ] {
            assert_eq!(c.chunk(&text, strategy), c.chunk(&text, strategy));
        }
    }

    #[test]
    fn test_sentence_split_respects_abbreviations() {
        let c = chunker(1000, 0);
        let sentences =
            c.split_sentences("Gen. Grant met Mr. Lincoln at the station. They spoke briefly.");
        assert_eq!(
            sentences,
            vec![
                "Gen. Grant met Mr. Lincoln at the station.".to_string(),
                "They spoke briefly.".to_string(),
            ]
        );
    }

    #[test]
    fn test_sentence_split_handles_exclamations() {
        let c = chunker(1000, 0);
        let sentences = c.split_sentences("What a day! Was it not? It was.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "What a day!");
    }

    #[test]
    fn test_sentence_aware_respects_target() {
        let text = "One sentence here. Another sentence follows. A third one arrives. \
                    The fourth is longer than the others by a fair margin. Fifth closes."
            .to_string();
        let chunks = chunker(60, 20).chunk(&text, ChunkStrategy::SentenceAware);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 60, "oversized chunk: {:?}", c);
        }
    }

    #[test]
    fn test_sentence_aware_hard_splits_giant_sentence() {
        let giant = format!("{} end", "word ".repeat(60)); // ~304 bytes, no period
        let chunks = chunker(100, 10).chunk(&giant, ChunkStrategy::SentenceAware);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 100);
        }
    }

    #[test]
    fn test_paragraph_aware_groups_paragraphs() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunker(1000, 0).chunk(text, ChunkStrategy::ParagraphAware);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_paragraph_aware_flushes_on_overflow() {
        let text = "Alpha paragraph with some words.\n\nBeta paragraph with more words.\n\nGamma closes it.";
        let chunks = chunker(40, 0).chunk(text, ChunkStrategy::ParagraphAware);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= 40, "oversized chunk: {:?}", c);
        }
    }

    #[test]
    fn test_paragraph_aware_splits_giant_paragraph() {
        let giant = "word ".repeat(100);
        let text = format!("Small lead.\n\n{giant}\n\nSmall tail.");
        let chunks = chunker(120, 20).chunk(&text, ChunkStrategy::ParagraphAware);
        assert!(chunks.len() > 3);
        for c in &chunks {
            assert!(c.len() <= 120);
        }
    }

    #[test]
    fn test_structural_partitions_on_headings() {
        let text = "CHAPTER I\n\nThe war began in earnest that spring.\n\n\
                    CHAPTER II\n\nThe second year brought harder news.";
        let chunks = chunker(200, 0).chunk(text, ChunkStrategy::Structural);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("CHAPTER I"));
        assert!(chunks[1].starts_with("CHAPTER II"));
    }

    #[test]
    fn test_structural_falls_back_to_paragraphs() {
        let text = "Just plain prose here.\n\nNothing resembling a heading.";
        let c = chunker(1000, 0);
        assert_eq!(
            c.chunk(text, ChunkStrategy::Structural),
            c.chunk(text, ChunkStrategy::ParagraphAware)
        );
    }

    #[test]
    fn test_structural_detects_openings() {
        assert!(is_section_heading("Letter to General Grant"));
        assert!(is_section_heading("Proclamation of Amnesty"));
        assert!(is_section_heading("3. The Second Inaugural"));
        assert!(is_section_heading("THE GETTYSBURG ADDRESS"));
        assert!(!is_section_heading("he wrote a letter yesterday"));
        assert!(!is_section_heading("Short"));
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        for strategy in [
            ChunkStrategy::FixedOverlap,
            ChunkStrategy::SentenceAware,
            ChunkStrategy::ParagraphAware,
        ] {
            let chunks = chunker(12, 3).chunk(text, strategy);
            assert!(!chunks.is_empty());
            for c in &chunks {
                assert!(!c.is_empty());
            }
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("fixed".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::FixedOverlap);
        assert_eq!(
            "paragraph".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::ParagraphAware
        );
        assert!("mystery".parse::<ChunkStrategy>().is_err());
    }

    #[test]
    fn test_analyze_empty() {
        assert!(analyze_chunks(&[]).is_none());
    }

    #[test]
    fn test_analyze_detects_citation_markers() {
        let chunks = vec![
            "He wrote about it later (Nicolay, 1865) in his memoir.".to_string(),
            "See the full account on p. 214 of the second volume.".to_string(),
            "Plain narrative text with nothing special.".to_string(),
        ];
        let report = analyze_chunks(&chunks).unwrap();
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.chunks_with_citations, 2);
        assert!((report.citation_coverage - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_detects_historical_markers() {
        let chunks = vec![
            "Letter to General Meade, never sent.".to_string(),
            "The address was delivered on November 19, 1863.".to_string(),
            "No marker here at all.".to_string(),
        ];
        let report = analyze_chunks(&chunks).unwrap();
        assert_eq!(report.chunks_with_historical_markers, 2);
    }

    #[test]
    fn test_historic_year_word_boundary() {
        assert!(contains_historic_year("It happened in 1865, late in the war."));
        assert!(!contains_historic_year("Serial A1865B is not a year."));
        assert!(!contains_historic_year("The year 2024 is too recent."));
    }
}
