//! USFM parser/validator pushdown automaton (spec §4.4): a single-pass state
//! machine over a token slice that drives a [`Sink`] and tracks open
//! structural elements on an explicit stack.

use crate::reference::VerseRef;
use crate::sink::{CellAlignment, Sink};
use crate::tokens::{Attribute, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Book,
    Para,
    Char,
    Table,
    Row,
    Cell,
    Note,
    Sidebar,
}

#[derive(Debug, Clone)]
struct StackElement {
    kind: ElementKind,
    marker: String,
    nested: bool,
}

/// The kind a token is treated as for dispatch purposes: identical to
/// [`TokenKind`] except `Unknown`, which the spec maps to `Character` when
/// enclosed in a note, else `Paragraph` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectiveKind {
    Book,
    Chapter,
    Verse,
    Text,
    Paragraph,
    Character,
    Note,
    End,
    Milestone,
    MilestoneEnd,
    OptBreak,
}

fn effective_kind(token: &Token, in_note: bool) -> EffectiveKind {
    match token.kind() {
        TokenKind::Book => EffectiveKind::Book,
        TokenKind::Chapter => EffectiveKind::Chapter,
        TokenKind::Verse => EffectiveKind::Verse,
        TokenKind::Text => EffectiveKind::Text,
        TokenKind::Paragraph => EffectiveKind::Paragraph,
        TokenKind::Character => EffectiveKind::Character,
        TokenKind::Note => EffectiveKind::Note,
        TokenKind::End => EffectiveKind::End,
        TokenKind::Milestone => EffectiveKind::Milestone,
        TokenKind::MilestoneEnd => EffectiveKind::MilestoneEnd,
        TokenKind::OptBreak => EffectiveKind::OptBreak,
        TokenKind::Unknown => {
            if in_note {
                EffectiveKind::Character
            } else {
                EffectiveKind::Paragraph
            }
        }
    }
}

fn is_cell_marker(marker: &str) -> bool {
    (marker.starts_with("th") || marker.starts_with("tc")) && marker.len() > 2
}

fn cell_alignment(marker: &str) -> CellAlignment {
    match marker.as_bytes().get(2) {
        Some(b'c') => CellAlignment::Center,
        Some(b'r') => CellAlignment::End,
        _ => CellAlignment::Start,
    }
}

fn split_reference_text(raw: &str) -> (String, String) {
    match raw.split_once('|') {
        Some((display, target)) => (display.trim().to_string(), target.trim().to_string()),
        None => (raw.trim().to_string(), raw.trim().to_string()),
    }
}

fn attrs_len(attrs: &[Attribute]) -> usize {
    attrs.iter().map(|a| 1 + a.name.len() + 2 + a.value.len() + 1).sum()
}

/// Approximates the serialized byte length of `token`, used to advance
/// [`Parser::verse_offset`] (spec §4.4: "updates verse_offset by the
/// displayed length of the previous token").
fn display_len(token: &Token) -> usize {
    match token.kind() {
        TokenKind::Text => token.text.as_deref().unwrap_or("").len(),
        TokenKind::OptBreak => 2,
        TokenKind::End => 1 + token.marker().unwrap_or("").len() + attrs_len(&token.attributes),
        TokenKind::Milestone | TokenKind::MilestoneEnd => {
            1 + token.marker().unwrap_or("").len() + attrs_len(&token.attributes) + 2
        }
        _ => {
            let mut n = 1 + token.marker().unwrap_or("").len();
            if !token.data.is_empty() {
                n += 1 + token.data.join(" ").len();
            }
            n += attrs_len(&token.attributes) + 1;
            n
        }
    }
}

/// A single-pass USFM parser/validator (spec §4.4). Holds no sink reference
/// of its own; every public operation takes one, matching the design note
/// that the sink is the sole output interface.
pub struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    stack: Vec<StackElement>,
    verse_ref: VerseRef,
    verse_offset: usize,
    special_token: bool,
    skip: u32,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            stack: Vec::new(),
            verse_ref: VerseRef::new(),
            verse_offset: 0,
            special_token: false,
            skip: 0,
        }
    }

    pub fn verse_ref(&self) -> &VerseRef {
        &self.verse_ref
    }

    pub fn is_special_token(&self) -> bool {
        self.special_token
    }

    pub fn stack_is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Advances past one token, firing whatever [`Sink`] callbacks it
    /// produces. Returns `false` once the token slice is exhausted.
    pub fn process_token(&mut self, sink: &mut dyn Sink) -> bool {
        if self.pos >= self.tokens.len() {
            return false;
        }
        if self.pos > 0 {
            self.verse_offset += display_len(&self.tokens[self.pos - 1]);
        }

        if self.skip > 0 {
            self.skip -= 1;
            self.special_token = true;
            self.pos += 1;
            return true;
        }
        self.special_token = false;

        let token = &self.tokens[self.pos];
        let in_note = self.stack.iter().any(|e| e.kind == ElementKind::Note);
        let kind = effective_kind(token, in_note);

        if let Some(marker) = token.marker() {
            sink.got_marker(marker, self.verse_offset);
        }

        self.apply_closing_rules(kind, sink);
        self.apply_opening_rules(kind, sink);

        self.pos += 1;
        true
    }

    pub fn process_all(&mut self, sink: &mut dyn Sink) {
        while self.process_token(sink) {}
    }

    /// Pops the entire stack, firing the matching end callback for each
    /// element (spec §4.4: "any remainder is an unclosed-span diagnostic").
    pub fn close_all(&mut self, sink: &mut dyn Sink) {
        while !self.stack.is_empty() {
            self.pop_one(sink, None);
        }
    }

    fn pop_one(&mut self, sink: &mut dyn Sink, end_attrs: Option<&[Attribute]>) {
        let Some(elem) = self.stack.pop() else { return };
        match elem.kind {
            ElementKind::Book => sink.end_book(),
            ElementKind::Para => sink.end_para(&elem.marker),
            ElementKind::Char => {
                let attrs = end_attrs.unwrap_or(&[]);
                sink.end_char(&elem.marker, attrs, self.verse_offset);
            }
            ElementKind::Table => sink.end_table(),
            ElementKind::Row => sink.end_row(),
            ElementKind::Cell => sink.end_cell(),
            ElementKind::Note => sink.end_note(&elem.marker, self.verse_offset),
            ElementKind::Sidebar => sink.end_sidebar(),
        }
    }

    fn close_to_depth(&mut self, depth: usize, sink: &mut dyn Sink) {
        while self.stack.len() > depth {
            self.pop_one(sink, None);
        }
    }

    /// Closes everything above (but not including) the nearest stack element
    /// of one of `kinds`. If none is open, closes everything.
    fn close_down_to_any(&mut self, kinds: &[ElementKind], sink: &mut dyn Sink) {
        let depth = self
            .stack
            .iter()
            .rposition(|e| kinds.contains(&e.kind))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.close_to_depth(depth, sink);
    }

    fn close_all_char(&mut self, sink: &mut dyn Sink) {
        let depth = self
            .stack
            .iter()
            .rposition(|e| e.kind != ElementKind::Char)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.close_to_depth(depth, sink);
    }

    fn close_all_notes(&mut self, sink: &mut dyn Sink) {
        if self.stack.iter().any(|e| e.kind == ElementKind::Note) {
            let depth = self
                .stack
                .iter()
                .rposition(|e| e.kind == ElementKind::Note)
                .unwrap_or(0);
            self.close_to_depth(depth, sink);
        }
    }

    fn end_marker_matches(elem: &StackElement, marker: &str, nested: bool) -> bool {
        elem.nested == nested && format!("{}*", elem.marker) == marker
    }

    fn close_for_end(&mut self, token: &Token, sink: &mut dyn Sink) {
        let marker = token.marker().unwrap_or("");

        if let Some(idx) = self
            .stack
            .iter()
            .rposition(|e| e.kind == ElementKind::Note && format!("{}*", e.marker) == marker)
        {
            self.close_to_depth(idx + 1, sink);
            self.pop_one(sink, Some(&token.attributes));
            return;
        }

        let target = self
            .stack
            .iter()
            .rposition(|e| e.kind == ElementKind::Char && Self::end_marker_matches(e, marker, token.nested));
        match target {
            Some(idx) => {
                self.close_to_depth(idx + 1, sink);
                self.pop_one(sink, Some(&token.attributes));
            }
            None => sink.unmatched(marker, self.verse_offset),
        }
    }

    fn apply_closing_rules(&mut self, kind: EffectiveKind, sink: &mut dyn Sink) {
        let token = &self.tokens[self.pos];
        match kind {
            EffectiveKind::Book | EffectiveKind::Chapter => self.close_to_depth(0, sink),
            EffectiveKind::Paragraph => match token.marker().unwrap_or("") {
                "tr" => self.close_down_to_any(&[ElementKind::Table, ElementKind::Sidebar], sink),
                "esb" => self.close_to_depth(0, sink),
                _ => self.close_down_to_any(&[ElementKind::Sidebar], sink),
            },
            EffectiveKind::Character => {
                let marker = token.marker().unwrap_or("");
                let effective_nested = token.nested && self.stack.last().is_some_and(|e| e.kind == ElementKind::Char);
                if is_cell_marker(marker) && self.stack.iter().any(|e| e.kind == ElementKind::Row) {
                    self.close_down_to_any(&[ElementKind::Row], sink);
                } else if marker == "ref" {
                    // no structural closing
                } else if !effective_nested {
                    self.close_all_char(sink);
                }
            }
            EffectiveKind::Verse | EffectiveKind::Note => self.close_all_notes(sink),
            EffectiveKind::End => {
                let token = token.clone();
                self.close_for_end(&token, sink);
            }
            _ => {}
        }
    }

    /// Pulls a `\name <value>\name*`-shaped adjunct starting right after the
    /// current token (e.g. `ca`/`cp`/`va`/`vp`/`cat`), advancing `skip` over
    /// whatever it consumes. Returns the captured value, if any.
    fn maybe_consume_adjunct(&mut self, open_marker: &str) -> Option<String> {
        let idx = self.pos;
        let next = self.tokens.get(idx + 1)?;
        if next.marker() != Some(open_marker) {
            return None;
        }
        let end_marker = format!("{open_marker}*");
        match next.kind() {
            TokenKind::Chapter | TokenKind::Verse => {
                let value = next.data.first().cloned();
                if self
                    .tokens
                    .get(idx + 2)
                    .is_some_and(|t| t.kind() == TokenKind::End && t.marker() == Some(end_marker.as_str()))
                {
                    self.skip += 2;
                } else {
                    self.skip += 1;
                }
                value
            }
            TokenKind::Character => {
                let text_tok = self.tokens.get(idx + 2)?;
                let value = text_tok.text.clone();
                if self
                    .tokens
                    .get(idx + 3)
                    .is_some_and(|t| t.kind() == TokenKind::End && t.marker() == Some(end_marker.as_str()))
                {
                    self.skip += 3;
                } else {
                    self.skip += 2;
                }
                value
            }
            _ => None,
        }
    }

    fn lookahead_char_closed(&self, marker: &str) -> bool {
        let want_end = format!("{marker}*");
        for t in &self.tokens[self.pos + 1..] {
            match t.kind() {
                TokenKind::End if t.marker() == Some(want_end.as_str()) => return true,
                TokenKind::Character if t.marker() == Some(marker) => return true,
                TokenKind::Character if !t.nested => return true,
                TokenKind::Paragraph | TokenKind::Book | TokenKind::Chapter => return false,
                _ => {}
            }
        }
        false
    }

    fn lookahead_note_closed(&self, marker: &str) -> bool {
        let want_end = format!("{marker}*");
        for t in &self.tokens[self.pos + 1..] {
            match t.kind() {
                TokenKind::End if t.marker() == Some(want_end.as_str()) => return true,
                TokenKind::Note | TokenKind::Paragraph | TokenKind::Book | TokenKind::Chapter | TokenKind::Verse => {
                    return false;
                }
                _ => {}
            }
        }
        false
    }

    fn lookahead_sidebar_closed(&self) -> bool {
        for t in &self.tokens[self.pos + 1..] {
            match t.marker() {
                Some("esbe") => return true,
                Some("esb") => return false,
                _ => {}
            }
            if matches!(t.kind(), TokenKind::Book | TokenKind::Chapter) {
                return false;
            }
        }
        false
    }

    fn looks_canonical(code: &str) -> bool {
        code.len() == 3 && code.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn apply_opening_rules(&mut self, kind: EffectiveKind, sink: &mut dyn Sink) {
        let token = self.tokens[self.pos].clone();
        let offset = self.verse_offset;
        match kind {
            EffectiveKind::Book => {
                let code = token.data.first().cloned().unwrap_or_default();
                if self.verse_ref.book.is_empty() && Self::looks_canonical(&code) {
                    self.verse_ref.book = code.clone();
                }
                self.verse_ref.chapter = 1;
                self.verse_ref.verse = 0;
                self.verse_offset = 0;
                self.stack.push(StackElement {
                    kind: ElementKind::Book,
                    marker: token.marker().unwrap_or("").to_string(),
                    nested: false,
                });
                sink.start_book(&code, offset);
            }
            EffectiveKind::Chapter => {
                self.maybe_consume_adjunct("ca");
                self.maybe_consume_adjunct("cp");
                let n: u32 = token.data.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                if n != 1 {
                    self.verse_offset = 0;
                }
                self.verse_ref.chapter = n;
                self.verse_ref.verse = 0;
                sink.chapter(n, offset);
            }
            EffectiveKind::Verse => {
                self.maybe_consume_adjunct("va");
                self.maybe_consume_adjunct("vp");
                let n: u32 = token.data.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                self.verse_ref.verse = n;
                sink.verse(n, offset);
            }
            EffectiveKind::Paragraph => {
                let marker = token.marker().unwrap_or("").to_string();
                match marker.as_str() {
                    "tr" => {
                        if !self.stack.iter().any(|e| e.kind == ElementKind::Table) {
                            self.stack.push(StackElement {
                                kind: ElementKind::Table,
                                marker: "tr".to_string(),
                                nested: false,
                            });
                            sink.start_table();
                        }
                        self.stack.push(StackElement {
                            kind: ElementKind::Row,
                            marker,
                            nested: false,
                        });
                        sink.start_row();
                    }
                    "esb" => {
                        let closed = self.lookahead_sidebar_closed();
                        self.maybe_consume_adjunct("cat");
                        self.stack.push(StackElement {
                            kind: ElementKind::Sidebar,
                            marker,
                            nested: false,
                        });
                        sink.start_sidebar(closed, offset);
                    }
                    "esbe" => {
                        if self.stack.last().is_some_and(|e| e.kind == ElementKind::Sidebar) {
                            self.pop_one(sink, None);
                        } else {
                            sink.unmatched(&marker, offset);
                        }
                    }
                    _ => {
                        self.stack.push(StackElement {
                            kind: ElementKind::Para,
                            marker: marker.clone(),
                            nested: false,
                        });
                        sink.start_para(&marker, offset);
                    }
                }
            }
            EffectiveKind::Note => {
                let marker = token.marker().unwrap_or("").to_string();
                self.maybe_consume_adjunct("cat");
                let caller = token.data.first().cloned().unwrap_or_default();
                let closed = self.lookahead_note_closed(&marker);
                self.stack.push(StackElement {
                    kind: ElementKind::Note,
                    marker: marker.clone(),
                    nested: false,
                });
                sink.start_note(&marker, &caller, closed, offset);
            }
            EffectiveKind::Character => {
                let marker = token.marker().unwrap_or("").to_string();
                if is_cell_marker(&marker) {
                    self.stack.push(StackElement {
                        kind: ElementKind::Cell,
                        marker: marker.clone(),
                        nested: false,
                    });
                    sink.start_cell(&marker, cell_alignment(&marker), offset);
                } else if marker == "ref" {
                    self.special_token = true;
                    if let Some(next) = self.tokens.get(self.pos + 1) {
                        if let Some(raw) = &next.text {
                            let (display, target) = split_reference_text(raw);
                            sink.reference(&display, &target, offset);
                        }
                    }
                    self.skip = 2;
                } else {
                    let effective_nested =
                        token.nested && self.stack.last().is_some_and(|e| e.kind == ElementKind::Char);
                    let closed = self.lookahead_char_closed(&marker);
                    let end_marker = token.end_marker.clone().unwrap_or_else(|| format!("{marker}*"));
                    self.stack.push(StackElement {
                        kind: ElementKind::Char,
                        marker: marker.clone(),
                        nested: effective_nested,
                    });
                    sink.start_char(&marker, &end_marker, closed, &token.attributes, offset);
                }
            }
            EffectiveKind::End => {
                // handled entirely in apply_closing_rules
            }
            EffectiveKind::Milestone => {
                sink.milestone(token.marker().unwrap_or(""), &token.attributes, false, offset);
            }
            EffectiveKind::MilestoneEnd => {
                sink.milestone(token.marker().unwrap_or(""), &token.attributes, true, offset);
            }
            EffectiveKind::Text => {
                sink.text(token.text.as_deref().unwrap_or(""), offset);
            }
            EffectiveKind::OptBreak => sink.opt_break(offset),
        }
    }
}
