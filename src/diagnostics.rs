//! Diagnostic records and the [`ValidatingSink`] that produces them (spec
//! §4.4.1, §6).

use std::fmt;

use crate::book_id::BookIdOracle;
use crate::catalog::{Catalog, StyleType};
use crate::reference::{grapheme_clusters, VerseRange};
use crate::sink::{CellAlignment, Sink};
use crate::tokens::Attribute;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticSubject {
    Marker(String),
    Text(String),
    None,
}

/// Stable message keys (spec §6: "the `#` prefix marks the message key").
/// These are not human-readable strings; a caller wanting prose runs the key
/// through [`crate::translate::Translator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKey {
    NoSpaceBetweenMarkers,
    MissingId,
    UnknownMarker,
    EmptyMarker,
    RepeatedCharMarker,
    UnclosedCharacterStyle,
    CharWithoutParagraph,
    VerseWithoutParagraph,
    NoteWithoutParagraph,
    NoteNotClosed,
    SidebarNotClosed,
    UnmatchedEnd,
    MissingTableMarker,
    MissingRequiredAttributes,
    UnknownAttribute,
    InvalidAttribute,
    OccursUnderViolation,
    ParagraphStackViolation,
    MissingMilestoneEnd,
    MismatchedMilestoneId,
    UnsupportedUsfm3Feature,
    RubyGlossMismatch,
    MissingNoteCaller,
}

impl DiagnosticKey {
    pub fn as_str(&self) -> &'static str {
        use DiagnosticKey::*;
        match self {
            NoSpaceBetweenMarkers => "no_space_between_markers",
            MissingId => "missing_id_marker",
            UnknownMarker => "unknown_marker",
            EmptyMarker => "empty_marker",
            RepeatedCharMarker => "repeated_char_marker",
            UnclosedCharacterStyle => "unclosed_character_style",
            CharWithoutParagraph => "char_without_paragraph",
            VerseWithoutParagraph => "verse_without_paragraph",
            NoteWithoutParagraph => "note_without_paragraph",
            NoteNotClosed => "note_not_closed",
            SidebarNotClosed => "sidebar_not_closed",
            UnmatchedEnd => "unmatched_end",
            MissingTableMarker => "missing_table_marker",
            MissingRequiredAttributes => "missing_required_attributes",
            UnknownAttribute => "unknown_attribute",
            InvalidAttribute => "invalid_attribute",
            OccursUnderViolation => "occurs_under_violation",
            ParagraphStackViolation => "paragraph_stack_violation",
            MissingMilestoneEnd => "missing_milestone_end",
            MismatchedMilestoneId => "mismatched_milestone_id",
            UnsupportedUsfm3Feature => "unsupported_usfm3_feature",
            RubyGlossMismatch => "ruby_gloss_mismatch",
            MissingNoteCaller => "missing_note_caller",
        }
    }
}

/// One validator finding, formatted per spec §6's wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub book: String,
    pub chapter: u32,
    pub verse: VerseRange,
    pub offset: usize,
    pub subject: DiagnosticSubject,
    pub key: DiagnosticKey,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarkerCheck: {}:{}:{} Offset: {}",
            self.book, self.chapter, self.verse, self.offset
        )?;
        match &self.subject {
            DiagnosticSubject::Marker(m) => write!(f, " Marker: {m}")?,
            DiagnosticSubject::Text(t) => write!(f, " Text: {t}")?,
            DiagnosticSubject::None => {}
        }
        write!(f, " Message: #{}", self.key.as_str())
    }
}

const REPEATABLE_CHAR_MARKERS: &[&str] = &["qt", "wj", "no", "it", "bd", "bdit", "em", "sc", "add"];
const EMPTY_MARKER_ALLOWLIST: &[&str] = &["b", "ib", "ie", "pb", "tc", "xt"];
const LINK_ATTRIBUTE_WHITELIST: &[&str] = &["link-href", "link-title", "link-name"];

/// Tracks one open paragraph-rank element for the rank-aware stack rule
/// (spec §4.4.1).
struct ParaStackEntry {
    marker: String,
    rank: u32,
}

/// The [`Sink`] implementation that performs every check in spec §4.4.1,
/// accumulating [`Diagnostic`]s rather than failing fast (spec §7).
pub struct ValidatingSink<'c> {
    catalog: &'c Catalog,
    oracle: &'c dyn BookIdOracle,
    usfm2: bool,
    diagnostics: Vec<Diagnostic>,

    book: String,
    chapter: u32,
    verse: u32,

    seen_first_marker: bool,
    para_open: bool,
    char_depth: u32,
    last_closed_char: Option<String>,

    para_stack: Vec<ParaStackEntry>,

    table_open: bool,
    row_open: bool,
    next_cell: u32,

    pending_verse_fold: Option<(VerseRange, usize)>,

    open_milestones: Vec<(String, Option<String>, usize)>,

    prev_text_end_offset: Option<usize>,
    prev_text_ends_nonspace: bool,

    note_caller: Option<String>,

    /// One entry per open Para/Char/Cell span: `(marker, offset, text)`, for
    /// the empty-marker check (spec §4.4.1) and ruby-gloss base-text capture.
    content_stack: Vec<(String, usize, String)>,
}

impl<'c> ValidatingSink<'c> {
    pub fn new(catalog: &'c Catalog, oracle: &'c dyn BookIdOracle, book_code: &str, usfm2: bool) -> Self {
        ValidatingSink {
            catalog,
            oracle,
            usfm2,
            diagnostics: Vec::new(),
            book: book_code.to_string(),
            chapter: 1,
            verse: 0,
            seen_first_marker: false,
            para_open: false,
            char_depth: 0,
            last_closed_char: None,
            para_stack: Vec::new(),
            table_open: false,
            row_open: false,
            next_cell: 1,
            pending_verse_fold: None,
            open_milestones: Vec::new(),
            prev_text_end_offset: None,
            prev_text_ends_nonspace: false,
            note_caller: None,
            content_stack: Vec::new(),
        }
    }

    pub fn into_diagnostics(mut self) -> Vec<Diagnostic> {
        self.flush_verse_fold();
        if !self.seen_first_marker {
            // an input with no markers at all (including the empty string)
            // never reaches `got_marker`, so the missing-`\id` check has to
            // run here too (spec §8 scenario 1).
            self.push(Severity::Error, 0, DiagnosticSubject::None, DiagnosticKey::MissingId);
        }
        for (marker, _, offset) in std::mem::take(&mut self.open_milestones) {
            self.push(Severity::Error, offset, DiagnosticSubject::Marker(marker), DiagnosticKey::MissingMilestoneEnd);
        }
        self.diagnostics
    }

    pub fn had_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, offset: usize, subject: DiagnosticSubject, key: DiagnosticKey) {
        self.diagnostics.push(Diagnostic {
            severity,
            book: self.book.clone(),
            chapter: self.chapter,
            verse: VerseRange::single(self.verse),
            offset,
            subject,
            key,
        });
    }

    fn flush_verse_fold(&mut self) {
        if let Some((range, offset)) = self.pending_verse_fold.take() {
            self.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                book: self.book.clone(),
                chapter: self.chapter,
                verse: range,
                offset,
                subject: DiagnosticSubject::None,
                key: DiagnosticKey::VerseWithoutParagraph,
            });
        }
    }

    fn check_attributes(&mut self, marker: &str, attributes: &[Attribute], offset: usize) {
        let Some(descriptor) = self.catalog.try_get(marker) else {
            return;
        };
        for slot in descriptor.attributes.iter().filter(|a| a.required) {
            if !attributes.iter().any(|a| a.name == slot.name) {
                self.push(
                    Severity::Error,
                    offset,
                    DiagnosticSubject::Marker(marker.to_string()),
                    DiagnosticKey::MissingRequiredAttributes,
                );
            }
        }
        for attr in attributes {
            let declared = descriptor.attributes.iter().any(|a| a.name == attr.name);
            let is_link = LINK_ATTRIBUTE_WHITELIST.contains(&attr.name.as_str());
            let is_extension = attr.name.starts_with("x-");
            if !declared && !is_link && !is_extension {
                self.push(
                    Severity::Error,
                    attr.byte_offset,
                    DiagnosticSubject::Marker(attr.name.clone()),
                    DiagnosticKey::UnknownAttribute,
                );
            }
        }
    }

    /// USFM-2 only ever attaches a single bare `|value` to a character style
    /// (spec §4.4.1); anything past the descriptor's `default_attribute` is a
    /// USFM-3-only feature, `fig`'s multi-attribute form included.
    fn check_usfm2_attributes(&mut self, marker: &str, attributes: &[Attribute], offset: usize) {
        if !self.usfm2 || marker == "rb" {
            return;
        }
        let Some(descriptor) = self.catalog.try_get(marker) else {
            return;
        };
        let default = descriptor.default_attribute();
        if attributes.iter().any(|a| Some(a.name.as_str()) != default) {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::UnsupportedUsfm3Feature,
            );
        }
    }

    fn check_occurs_under(&mut self, marker: &str, offset: usize) {
        let Some(descriptor) = self.catalog.try_get(marker) else {
            return;
        };
        if descriptor.occurs_under.is_empty() {
            return;
        }
        let in_context = self
            .para_stack
            .last()
            .is_some_and(|top| descriptor.occurs_under.contains(&top.marker));
        if !in_context {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::OccursUnderViolation,
            );
        }
    }

    fn open_content_span(&mut self, marker: &str, offset: usize) {
        self.content_stack.push((marker.to_string(), offset, String::new()));
    }

    /// Pops the innermost content span, reports `EmptyMarker` if nothing
    /// non-whitespace was seen inside it and it isn't allowlisted (spec
    /// §4.4.1), and returns its accumulated text for callers like `\rb`'s
    /// ruby-gloss check that need the base text at close time.
    fn close_content_span(&mut self) -> String {
        let Some((marker, offset, text)) = self.content_stack.pop() else {
            return String::new();
        };
        if text.trim().is_empty() && !EMPTY_MARKER_ALLOWLIST.contains(&marker.as_str()) {
            self.push(Severity::Error, offset, DiagnosticSubject::Marker(marker), DiagnosticKey::EmptyMarker);
        }
        text
    }

    /// Rank-aware paragraph stack rule (spec §4.4.1).
    fn check_paragraph_stack(&mut self, marker: &str, offset: usize) {
        let Some(descriptor) = self.catalog.try_get(marker) else {
            return;
        };
        if descriptor.occurs_under.is_empty() {
            self.para_stack.push(ParaStackEntry {
                marker: marker.to_string(),
                rank: descriptor.rank,
            });
            return;
        }
        let pos = self
            .para_stack
            .iter()
            .rposition(|e| descriptor.occurs_under.contains(&e.marker));
        match pos {
            None => {
                self.push(
                    Severity::Error,
                    offset,
                    DiagnosticSubject::Marker(marker.to_string()),
                    DiagnosticKey::ParagraphStackViolation,
                );
            }
            Some(idx) => {
                let is_top = idx + 1 == self.para_stack.len();
                let above_rank_ok = if is_top {
                    true
                } else {
                    let above = &self.para_stack[idx + 1];
                    above.rank == 0 || above.rank <= descriptor.rank
                };
                if !above_rank_ok {
                    self.push(
                        Severity::Error,
                        offset,
                        DiagnosticSubject::Marker(marker.to_string()),
                        DiagnosticKey::ParagraphStackViolation,
                    );
                    return;
                }
                self.para_stack.truncate(idx + 1);
                self.para_stack.push(ParaStackEntry {
                    marker: marker.to_string(),
                    rank: descriptor.rank,
                });
            }
        }
    }
}

impl<'c> Sink for ValidatingSink<'c> {
    fn got_marker(&mut self, marker: &str, offset: usize) {
        if !self.seen_first_marker {
            self.seen_first_marker = true;
            if marker != "id" {
                self.push(Severity::Error, offset, DiagnosticSubject::None, DiagnosticKey::MissingId);
            }
        }

        if self.prev_text_end_offset == Some(offset) && self.prev_text_ends_nonspace {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::NoSpaceBetweenMarkers,
            );
        }

        if marker != "v" {
            self.flush_verse_fold();
        }

        if let Some(descriptor) = self.catalog.try_get(marker) {
            if descriptor.style_type == StyleType::Unknown {
                self.push(
                    Severity::Error,
                    offset,
                    DiagnosticSubject::Marker(marker.to_string()),
                    DiagnosticKey::UnknownMarker,
                );
            }
            if self.usfm2 {
                let blocked = marker == "rb"
                    || descriptor.style_type == StyleType::Milestone
                    || descriptor.style_type == StyleType::MilestoneEnd;
                if blocked {
                    self.push(
                        Severity::Error,
                        offset,
                        DiagnosticSubject::Marker(marker.to_string()),
                        DiagnosticKey::UnsupportedUsfm3Feature,
                    );
                }
            }
        }
    }

    fn start_book(&mut self, code: &str, _offset: usize) {
        self.flush_verse_fold();
        self.book = code.to_string();
        self.chapter = 1;
        self.verse = 0;
        self.para_open = false;
        self.para_stack.clear();
        let _ = self.oracle.book_id_to_number(code);
    }

    fn end_book(&mut self) {}

    fn chapter(&mut self, number: u32, _offset: usize) {
        self.flush_verse_fold();
        self.chapter = number;
        self.verse = 0;
        self.para_open = false;
        self.para_stack.clear();
    }

    fn verse(&mut self, number: u32, offset: usize) {
        self.verse = number;
        if !self.para_open {
            let extended = match &mut self.pending_verse_fold {
                Some((range, _)) => range.extend(number),
                None => false,
            };
            if !extended {
                self.flush_verse_fold();
                self.pending_verse_fold = Some((VerseRange::single(number), offset));
            }
        } else {
            self.flush_verse_fold();
        }
    }

    fn start_para(&mut self, marker: &str, offset: usize) {
        self.flush_verse_fold();
        self.para_open = true;
        self.check_occurs_under(marker, offset);
        self.check_paragraph_stack(marker, offset);
        self.open_content_span(marker, offset);
    }

    fn end_para(&mut self, _marker: &str) {
        self.para_open = false;
        self.close_content_span();
    }

    fn start_char(&mut self, marker: &str, _end_marker: &str, closed: bool, attributes: &[Attribute], offset: usize) {
        self.char_depth += 1;

        if let Some(last) = self.last_closed_char.take() {
            if last == marker && REPEATABLE_CHAR_MARKERS.contains(&marker) {
                self.push(
                    Severity::Warning,
                    offset,
                    DiagnosticSubject::Marker(marker.to_string()),
                    DiagnosticKey::RepeatedCharMarker,
                );
            }
        }

        if !self.para_open {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::CharWithoutParagraph,
            );
        }

        self.check_occurs_under(marker, offset);

        if !closed {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::UnclosedCharacterStyle,
            );
        }

        self.open_content_span(marker, offset);

        if closed && attributes.is_empty() {
            // attributes (if any) are still on this token; if the tokenizer
            // already transferred them away, the end-position check below
            // picks them up instead.
            return;
        }
        if !attributes.is_empty() {
            self.check_attributes(marker, attributes, offset);
            self.check_usfm2_attributes(marker, attributes, offset);
        }
    }

    fn end_char(&mut self, marker: &str, attributes: &[Attribute], offset: usize) {
        self.char_depth = self.char_depth.saturating_sub(1);
        self.last_closed_char = Some(marker.to_string());
        let base_text = self.close_content_span();
        if !attributes.is_empty() {
            self.check_attributes(marker, attributes, offset);
            self.check_usfm2_attributes(marker, attributes, offset);
        }
        if marker == "rb" {
            if let Some(gloss) = attributes.iter().find(|a| a.name == "gloss") {
                let gloss_value = gloss.value.clone();
                check_ruby_gloss(self, &base_text, &gloss_value, offset);
            }
        }
    }

    fn start_note(&mut self, marker: &str, caller: &str, closed: bool, offset: usize) {
        if !self.para_open {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::NoteWithoutParagraph,
            );
        }
        if caller.trim().is_empty() {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::MissingNoteCaller,
            );
        }
        self.note_caller = Some(caller.to_string());
        if !closed {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::NoteNotClosed,
            );
        }
    }

    fn end_note(&mut self, _marker: &str, _offset: usize) {
        self.note_caller = None;
    }

    fn start_table(&mut self) {
        self.table_open = true;
    }

    fn end_table(&mut self) {
        self.table_open = false;
    }

    fn start_row(&mut self) {
        self.row_open = true;
        self.next_cell = 1;
        let rank = self.catalog.try_get("tr").map(|d| d.rank).unwrap_or(0);
        self.para_stack.push(ParaStackEntry { marker: "tr".to_string(), rank });
    }

    fn end_row(&mut self) {
        self.row_open = false;
        if self.para_stack.last().is_some_and(|e| e.marker == "tr") {
            self.para_stack.pop();
        }
    }

    fn start_cell(&mut self, marker: &str, _alignment: CellAlignment, offset: usize) {
        let number: u32 = marker
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0);
        if number != self.next_cell {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Marker(marker.to_string()),
                DiagnosticKey::MissingTableMarker,
            );
        }
        self.next_cell += 1;
        self.check_occurs_under(marker, offset);
        self.open_content_span(marker, offset);
    }

    fn end_cell(&mut self) {
        self.close_content_span();
    }

    fn text(&mut self, content: &str, offset: usize) {
        self.prev_text_end_offset = Some(offset + content.len());
        self.prev_text_ends_nonspace = content.chars().next_back().is_some_and(|c| !c.is_whitespace());

        for entry in &mut self.content_stack {
            entry.2.push_str(content);
        }

        if self.char_depth > 0 && content.contains('|') {
            self.push(
                Severity::Error,
                offset,
                DiagnosticSubject::Text(content.to_string()),
                DiagnosticKey::InvalidAttribute,
            );
        }
    }

    fn unmatched(&mut self, marker: &str, offset: usize) {
        self.push(
            Severity::Error,
            offset,
            DiagnosticSubject::Marker(marker.to_string()),
            DiagnosticKey::UnmatchedEnd,
        );
    }

    fn reference(&mut self, _display: &str, _target: &str, _offset: usize) {}

    fn start_sidebar(&mut self, closed: bool, offset: usize) {
        self.flush_verse_fold();
        if !closed {
            self.push(Severity::Error, offset, DiagnosticSubject::None, DiagnosticKey::SidebarNotClosed);
        }
    }

    fn end_sidebar(&mut self) {}

    fn opt_break(&mut self, _offset: usize) {}

    fn milestone(&mut self, marker: &str, attributes: &[Attribute], is_end: bool, offset: usize) {
        let id = attributes.iter().find(|a| a.name == "id").map(|a| a.value.clone());
        if is_end {
            match self.open_milestones.pop() {
                Some((_, start_id, _)) if start_id != id => {
                    self.push(
                        Severity::Error,
                        offset,
                        DiagnosticSubject::Marker(marker.to_string()),
                        DiagnosticKey::MismatchedMilestoneId,
                    );
                }
                Some(_) => {}
                None => self.push(
                    Severity::Error,
                    offset,
                    DiagnosticSubject::Marker(marker.to_string()),
                    DiagnosticKey::UnmatchedEnd,
                ),
            }
        } else {
            self.open_milestones.push((marker.to_string(), id, offset));
        }
    }
}

/// Writes one diagnostic per line to any `Write` sink (spec §6's wire format),
/// factored out so library consumers can capture diagnostics into a buffer
/// instead of stdout.
pub fn write_diagnostics<W: std::io::Write>(diagnostics: &[Diagnostic], writer: &mut W) -> std::io::Result<()> {
    for diagnostic in diagnostics {
        writeln!(writer, "{diagnostic}")?;
    }
    Ok(())
}

/// Combines ruby-gloss segmentation (spec §4.4.1's closing paragraph) with
/// the rest of the grapheme-vs-gloss comparison; called by the parser when
/// an `rb` span closes with its `gloss` attribute in hand.
pub fn check_ruby_gloss(sink: &mut ValidatingSink<'_>, base_text: &str, gloss: &str, offset: usize) {
    let base_count = grapheme_clusters(base_text).len();
    let gloss_count = gloss.split(':').count();
    if base_count != gloss_count && !(base_count == 1 && gloss_count > 1) {
        sink.push(
            Severity::Error,
            offset,
            DiagnosticSubject::Text(gloss.to_string()),
            DiagnosticKey::RubyGlossMismatch,
        );
    }
}
