//! USFM tokenizer (spec §4.3): a cursor scanning for the next `\`, resolving
//! attribute syntax, figure legacy payloads, milestone terminators,
//! whitespace normalization, and nested character markers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::{Catalog, MarkerDescriptor, StyleType, TextProperty};
use crate::tokens::{Attribute, Token, TokenKind};

static ATTR_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(\S+)\s*=\s*"([^"]*)""#).unwrap());

fn is_nonsemantic_whitespace(c: char) -> bool {
    (c.is_whitespace() && c != '\u{3000}') || c == '\u{200B}'
}

/// Collapses control characters and runs of non-semantic whitespace to a
/// single space (spec §4.3). `U+3000` and ZWJ/ZWNJ are passed through
/// unchanged.
fn normalize_text(s: &str) -> String {
    let mut out = String::new();
    let mut in_run = false;
    for c in s.chars() {
        let is_ws = is_nonsemantic_whitespace(c) || c == '\r' || c == '\n' || c == '\t' || c.is_control();
        if is_ws {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

pub struct Tokenizer<'c> {
    catalog: &'c Catalog,
    preserve_whitespace: bool,
}

impl<'c> Tokenizer<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Tokenizer {
            catalog,
            preserve_whitespace: false,
        }
    }

    pub fn preserving_whitespace(catalog: &'c Catalog) -> Self {
        Tokenizer {
            catalog,
            preserve_whitespace: true,
        }
    }

    pub fn tokenize(&self, source: &str) -> Vec<Token> {
        let mut run = Run {
            catalog: self.catalog,
            preserve: self.preserve_whitespace,
            source,
            pos: 0,
            tokens: Vec::new(),
            last_attributed_idx: None,
            open_span_depth: 0,
        };
        run.scan_all();
        if !self.preserve_whitespace {
            apply_trailing_space_rule(&mut run.tokens);
        }
        run.tokens
    }

    /// Minimal re-serializer sufficient to support the round-trip testable
    /// property (spec §8); not a general pretty-printer (see
    /// SPEC_FULL.md's Supplemented Features).
    pub fn to_usfm(tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            match token.kind() {
                TokenKind::Text => {
                    if let Some(text) = &token.text {
                        out.push_str(text);
                    }
                }
                TokenKind::OptBreak => out.push_str("//"),
                TokenKind::End => {
                    out.push('\\');
                    out.push_str(token.marker().unwrap_or(""));
                    push_attrs(&mut out, &token.attributes);
                }
                TokenKind::Milestone | TokenKind::MilestoneEnd => {
                    out.push('\\');
                    out.push_str(token.marker().unwrap_or(""));
                    push_attrs(&mut out, &token.attributes);
                    out.push_str("\\*");
                }
                _ => {
                    out.push('\\');
                    out.push_str(token.marker().unwrap_or(""));
                    if !token.data.is_empty() {
                        out.push(' ');
                        out.push_str(&token.data.join(" "));
                    }
                    push_attrs(&mut out, &token.attributes);
                    out.push(' ');
                }
            }
        }
        out
    }
}

fn push_attrs(out: &mut String, attrs: &[Attribute]) {
    for a in attrs {
        out.push_str(&format!("|{}=\"{}\"", a.name, a.value));
    }
}

/// Mutable tokenizing pass over one source buffer.
struct Run<'c, 's> {
    catalog: &'c Catalog,
    preserve: bool,
    source: &'s str,
    pos: usize,
    tokens: Vec<Token>,
    /// index of the most recent token that currently carries attributes
    /// (spec §4.3's End-dispatch attribute-ownership transfer).
    last_attributed_idx: Option<usize>,
    /// depth of currently open character/milestone spans; used only to
    /// decide whether a `|` in running text should be treated as an
    /// attribute spec at all (spec §4.3).
    open_span_depth: u32,
}

impl<'c, 's> Run<'c, 's> {
    fn scan_all(&mut self) {
        loop {
            if self.pos >= self.source.len() {
                break;
            }
            if self.peek() == Some('\\') {
                self.scan_marker_token();
            } else {
                self.scan_text_token();
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn rest(&self) -> &'s str {
        &self.source[self.pos..]
    }

    fn scan_text_token(&mut self) {
        let start = self.pos;
        let next_backslash = self.rest().find('\\').map(|i| start + i).unwrap_or(self.source.len());
        let raw = &self.source[start..next_backslash];

        if self.open_span_depth > 0 {
            if let Some(pipe_rel) = raw.find('|') {
                let pipe_abs = start + pipe_rel;
                let text_part = &raw[..pipe_rel];
                let attr_part = &raw[pipe_rel + 1..];
                if self.try_attach_attributes(text_part, start, attr_part, pipe_abs + 1) {
                    self.pos = next_backslash;
                    return;
                }
            }
        }

        self.pos = next_backslash;
        self.emit_text(raw, start);
    }

    fn emit_text(&mut self, raw: &str, offset: usize) {
        if raw.is_empty() {
            return;
        }
        let (body, opt_breaks) = split_opt_breaks(raw);
        for (i, piece) in body.iter().enumerate() {
            let content = if self.preserve {
                piece.replace('~', "\u{00A0}")
            } else {
                normalize_text(&piece.replace('~', "\u{00A0}"))
            };
            if !content.is_empty() || (body.len() == 1 && opt_breaks == 0) {
                self.tokens.push(Token::text(content, offset));
            }
            if i < opt_breaks {
                self.tokens.push(Token::new(TokenKind::OptBreak, None));
            }
        }
    }

    /// Attempts to interpret `attr_part` as an attribute spec for the
    /// currently open marker, attaching it if successful. Returns `false`
    /// (leaving the `|` as literal text) on failure.
    fn try_attach_attributes(
        &mut self,
        text_part: &str,
        text_offset: usize,
        attr_part: &str,
        base_offset: usize,
    ) -> bool {
        let Some(open_idx) = self.last_open_span_index() else {
            return false;
        };
        let marker = self.tokens[open_idx].marker().unwrap_or("").to_string();
        let descriptor = self.catalog.try_get(&marker).cloned();

        if marker == "fig" {
            if let Some((attrs, caption)) = try_figure_legacy_fold(attr_part, text_part, base_offset) {
                self.tokens[open_idx].attributes = attrs;
                self.last_attributed_idx = Some(open_idx);
                self.emit_text(&caption, text_offset);
                return true;
            }
        }

        let Some(attrs) = parse_attribute_spec(attr_part, descriptor.as_ref(), base_offset) else {
            return false;
        };
        self.emit_text(text_part, text_offset);
        self.tokens[open_idx].attributes = attrs;
        self.last_attributed_idx = Some(open_idx);
        true
    }

    fn last_open_span_index(&self) -> Option<usize> {
        self.tokens
            .iter()
            .enumerate()
            .rev()
            .find(|(_, t)| {
                matches!(t.kind(), TokenKind::Character | TokenKind::Milestone) && t.attributes.is_empty()
            })
            .map(|(i, _)| i)
    }

    fn scan_marker_token(&mut self) {
        let backslash_pos = self.pos;
        self.pos += 1; // consume '\'
        let marker_start = self.pos;
        while let Some(c) = self.peek() {
            if c == '\\' || c == '|' || is_nonsemantic_whitespace(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        let marker_raw = &self.source[marker_start..self.pos];
        let nested = marker_raw.starts_with('+');
        let marker_text = marker_raw.trim_start_matches('+').to_string();

        // consume terminating whitespace (non-preserve mode, non-`*` markers)
        if !self.preserve && !marker_text.ends_with('*') {
            if let Some(c) = self.peek() {
                if is_nonsemantic_whitespace(c) {
                    self.pos += c.len_utf8();
                    while let Some(c2) = self.peek() {
                        if is_nonsemantic_whitespace(c2) {
                            self.pos += c2.len_utf8();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        if marker_text == "*" {
            self.close_bare_milestone_terminator();
            return;
        }

        self.dispatch_marker(&marker_text, nested, backslash_pos);
    }

    /// A bare `\*` (possibly separated from its milestone by whitespace-only
    /// text) closes the open milestone span without producing a token, and
    /// drops the whitespace-only text token that preceded it (spec §4.3).
    fn close_bare_milestone_terminator(&mut self) {
        self.open_span_depth = self.open_span_depth.saturating_sub(1);
        if self.tokens.last().is_some_and(Token::is_whitespace_only_text) {
            self.tokens.pop();
        }
    }

    fn dispatch_marker(&mut self, marker: &str, nested: bool, offset: usize) {
        let lookup_key = marker.trim_start_matches('+').to_lowercase();
        let descriptor = self.catalog.try_get(&lookup_key).cloned();

        let Some(descriptor) = descriptor else {
            self.emit_unknown(marker, nested, offset);
            return;
        };

        match descriptor.style_type {
            StyleType::Character => {
                if descriptor.has_property(TextProperty::Verse) {
                    self.emit_simple(TokenKind::Verse, &descriptor.marker, nested, offset);
                } else {
                    self.emit_span_open(TokenKind::Character, &descriptor, nested, offset);
                }
            }
            StyleType::Paragraph => {
                if descriptor.has_property(TextProperty::Chapter) {
                    self.emit_simple(TokenKind::Chapter, &descriptor.marker, nested, offset);
                } else if descriptor.has_property(TextProperty::Book) {
                    self.emit_simple(TokenKind::Book, &descriptor.marker, nested, offset);
                } else {
                    self.emit_simple(TokenKind::Paragraph, &descriptor.marker, nested, offset);
                }
            }
            StyleType::Note => {
                self.emit_simple(TokenKind::Note, &descriptor.marker, nested, offset);
            }
            StyleType::End => {
                self.emit_end(&descriptor.marker, nested, offset);
            }
            StyleType::Milestone | StyleType::MilestoneEnd => {
                self.dispatch_milestone(&descriptor, nested, offset);
            }
            StyleType::Unknown => {
                self.emit_unknown(marker, nested, offset);
            }
        }
    }

    fn emit_simple(&mut self, kind: TokenKind, marker: &str, nested: bool, offset: usize) {
        let mut token = Token::new(kind, Some(marker));
        token.nested = nested;
        token.source_offset = offset;
        if matches!(kind, TokenKind::Book | TokenKind::Chapter | TokenKind::Verse) {
            if let Some(word) = self.peek_next_word() {
                token.data.push(word);
            }
        }
        self.tokens.push(token);
    }

    fn emit_span_open(&mut self, kind: TokenKind, descriptor: &MarkerDescriptor, nested: bool, offset: usize) {
        let mut token = Token::new(kind, Some(&descriptor.marker));
        token.end_marker = Some(descriptor.effective_end_marker());
        token.nested = nested;
        token.source_offset = offset;
        self.tokens.push(token);
        self.open_span_depth += 1;
    }

    fn emit_end(&mut self, marker: &str, nested: bool, offset: usize) {
        let mut token = Token::new(TokenKind::End, Some(marker));
        token.nested = nested;
        token.source_offset = offset;
        if let Some(idx) = self.last_attributed_idx {
            if self.tokens[idx].end_marker.as_deref() == Some(marker) {
                token.attributes = std::mem::take(&mut self.tokens[idx].attributes);
                self.last_attributed_idx = None;
            }
        }
        self.tokens.push(token);
        self.open_span_depth = self.open_span_depth.saturating_sub(1);
    }

    /// Checks whether the next backslash sequence (possibly preceded by an
    /// attribute-bearing text run) is exactly `\*` (spec §4.3).
    fn terminator_follows(&self) -> bool {
        let Some(i) = self.rest().find('\\') else {
            return false;
        };
        let after = &self.rest()[i + 1..];
        match after.strip_prefix('*') {
            Some(tail) => tail
                .chars()
                .next()
                .map_or(true, |c| c == '\\' || c == '|' || is_nonsemantic_whitespace(c)),
            None => false,
        }
    }

    fn dispatch_milestone(&mut self, descriptor: &MarkerDescriptor, nested: bool, offset: usize) {
        if !self.terminator_follows() {
            let next_backslash = self.rest().find('\\').map(|i| self.pos + i).unwrap_or(self.source.len());
            let literal = format!("\\{}{}", descriptor.marker, &self.source[self.pos..next_backslash]);
            self.pos = next_backslash;
            self.emit_text(&literal, offset);
            return;
        }

        let kind = if descriptor.style_type == StyleType::MilestoneEnd {
            TokenKind::MilestoneEnd
        } else {
            TokenKind::Milestone
        };
        let mut token = Token::new(kind, Some(&descriptor.marker));
        token.end_marker = descriptor.end_marker.clone();
        token.nested = nested;
        token.source_offset = offset;
        if kind == TokenKind::MilestoneEnd {
            if let Some(idx) = self.last_attributed_idx {
                if self.tokens[idx].end_marker.as_deref() == Some(descriptor.marker.as_str()) {
                    token.attributes = std::mem::take(&mut self.tokens[idx].attributes);
                    self.last_attributed_idx = None;
                }
            }
        }
        self.tokens.push(token);
        if kind == TokenKind::Milestone {
            self.open_span_depth += 1;
        } else {
            self.open_span_depth = self.open_span_depth.saturating_sub(1);
        }
    }

    fn emit_unknown(&mut self, marker: &str, nested: bool, offset: usize) {
        if marker.ends_with('*') {
            self.emit_end(marker, nested, offset);
            return;
        }
        let mut token = Token::new(TokenKind::Unknown, Some(marker));
        token.end_marker = Some(format!("{marker}*"));
        token.nested = nested;
        token.source_offset = offset;
        self.tokens.push(token);
    }

    /// Consumes and returns the next run of non-whitespace characters
    /// (used for Book/Chapter/Verse payloads).
    fn peek_next_word(&mut self) -> Option<String> {
        let start = self.pos;
        let mut end = start;
        for c in self.source[start..].chars() {
            if c == '\\' || is_nonsemantic_whitespace(c) {
                break;
            }
            end += c.len_utf8();
        }
        if end == start {
            return None;
        }
        let word = self.source[start..end].to_string();
        self.pos = end;
        // skip one separating whitespace run, mirroring marker scanning
        if !self.preserve {
            while let Some(c) = self.peek() {
                if is_nonsemantic_whitespace(c) {
                    self.pos += c.len_utf8();
                } else {
                    break;
                }
            }
        }
        Some(word)
    }
}

fn split_opt_breaks(raw: &str) -> (Vec<String>, usize) {
    if !raw.contains("//") {
        return (vec![raw.to_string()], 0);
    }
    let parts: Vec<String> = raw.split("//").map(|s| s.to_string()).collect();
    let count = parts.len() - 1;
    (parts, count)
}

/// Parses `name="value"` pairs, or (only when the descriptor defines one) a
/// single bare default value (spec §4.3).
fn parse_attribute_spec(
    spec: &str,
    descriptor: Option<&MarkerDescriptor>,
    base_offset: usize,
) -> Option<Vec<Attribute>> {
    let trimmed_start = spec.len() - spec.trim_start().len();
    let mut cursor = trimmed_start;
    let mut attrs = Vec::new();
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return None;
    }

    loop {
        while cursor < spec.len() && spec.as_bytes()[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= spec.len() {
            break;
        }
        match ATTR_PAIR.captures(&spec[cursor..]) {
            Some(caps) => {
                let whole = caps.get(0).unwrap();
                let name = caps[1].to_string();
                let value = caps[2].to_string();
                attrs.push(Attribute {
                    name,
                    value,
                    byte_offset: base_offset + cursor,
                });
                cursor += whole.end();
            }
            None => {
                attrs.clear();
                break;
            }
        }
    }

    if !attrs.is_empty() {
        return Some(attrs);
    }

    // single bare default value
    if let Some(descriptor) = descriptor {
        if let Some(default_name) = descriptor.default_attribute() {
            if !trimmed.contains('=') {
                return Some(vec![Attribute {
                    name: default_name.to_string(),
                    value: trimmed.to_string(),
                    byte_offset: base_offset + trimmed_start,
                }]);
            }
        }
    }

    None
}

/// Decodes the legacy five-pipe `\fig` payload into attributes, injecting
/// `alt` from the accumulated preceding text (spec §4.3).
fn try_figure_legacy_fold(attr_part: &str, preceding_text: &str, base_offset: usize) -> Option<(Vec<Attribute>, String)> {
    if attr_part.matches('|').count() != 4 {
        return None;
    }
    let fields: Vec<&str> = attr_part.split('|').collect();
    if fields.len() != 5 {
        return None;
    }
    let names = ["src", "size", "loc", "copy", "ref"];
    let mut offset = base_offset;
    let mut attrs = Vec::new();
    for (name, value) in names.iter().zip(fields.iter()) {
        attrs.push(Attribute {
            name: name.to_string(),
            value: value.to_string(),
            byte_offset: offset,
        });
        offset += value.len() + 1;
    }
    attrs.push(Attribute {
        name: "alt".to_string(),
        value: preceding_text.to_string(),
        byte_offset: base_offset,
    });
    // the legacy format has no explicit caption field; the accumulated text
    // becomes the caption (spec §4.3).
    Some((attrs, preceding_text.to_string()))
}

/// Ensures a single trailing space precedes any Book/Chapter/Paragraph token,
/// and any Verse token not preceded by `(`/`[` in the source (spec §4.3).
fn apply_trailing_space_rule(tokens: &mut [Token]) {
    for i in 1..tokens.len() {
        let needs_space = match tokens[i].kind() {
            TokenKind::Book | TokenKind::Chapter | TokenKind::Paragraph => true,
            TokenKind::Verse => {
                let prev_text = tokens[i - 1].text.as_deref().unwrap_or("");
                !prev_text.ends_with('(') && !prev_text.ends_with('[')
            }
            _ => false,
        };
        if !needs_space {
            continue;
        }
        if let Some(text) = tokens[i - 1].text.as_mut() {
            let trimmed_end = text.trim_end_matches(' ');
            *text = format!("{trimmed_end} ");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn standard() -> Catalog {
        Catalog::standard()
    }

    #[test]
    fn tokenizes_book_and_paragraph_and_verse() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\id GEN\n\\p\n\\v 1 Hello\n");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind()).collect();
        assert!(kinds.contains(&TokenKind::Book));
        assert!(kinds.contains(&TokenKind::Paragraph));
        assert!(kinds.contains(&TokenKind::Verse));
        let book = tokens.iter().find(|t| t.kind() == TokenKind::Book).unwrap();
        assert_eq!(book.data, vec!["GEN".to_string()]);
    }

    #[test]
    fn default_attribute_on_bare_value() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\w foo|bar\\w*");
        // attributes lexed via `|` transfer from the opener to the matching
        // end token (spec §4.3's end-dispatch ownership transfer).
        let end = tokens.iter().find(|t| t.kind() == TokenKind::End).unwrap();
        assert_eq!(end.attributes.len(), 1);
        assert_eq!(end.attributes[0].name, "lemma");
        assert_eq!(end.attributes[0].value, "bar");
    }

    #[test]
    fn plain_character_style_without_pipe_has_no_attributes() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\w foo\\w*");
        let w = tokens.iter().find(|t| t.marker() == Some("w")).unwrap();
        assert!(w.attributes.is_empty());
    }

    #[test]
    fn named_attributes_on_fig() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let src =
            "\\fig cap|src=\"a.jpg\" size=\"col\" loc=\"\" copy=\"\" ref=\"1.1\"\\fig*";
        let tokens = tokenizer.tokenize(src);
        let end = tokens.iter().find(|t| t.kind() == TokenKind::End).unwrap();
        let names: Vec<_> = end.attributes.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"src"));
        assert!(names.contains(&"ref"));
    }

    #[test]
    fn figure_legacy_five_pipe_fold() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\fig description|a.jpg|col|||1.1\\fig*");
        let end = tokens.iter().find(|t| t.kind() == TokenKind::End).unwrap();
        assert!(end.attributes.iter().any(|a| a.name == "alt" && a.value == "description"));
        assert!(end.attributes.iter().any(|a| a.name == "src" && a.value == "a.jpg"));
    }

    #[test]
    fn milestone_without_terminator_stays_literal_text() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        // no `\*` ever follows, keeping a partially typed milestone editable.
        let tokens = tokenizer.tokenize("\\qt-s|who=\"Paul\"\n\\p\n");
        assert!(tokens.iter().all(|t| !matches!(t.kind(), TokenKind::Milestone | TokenKind::MilestoneEnd)));
        assert!(tokens.iter().any(|t| t.kind() == TokenKind::Text && t.text.as_deref().unwrap_or("").contains("qt-s")));
    }

    #[test]
    fn milestone_start_and_bare_star_terminator() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\qt-s|who=\"Paul\"\\*");
        let ms = tokens.iter().find(|t| t.kind() == TokenKind::Milestone).unwrap();
        assert_eq!(ms.attributes[0].name, "who");
        // the bare `\*` terminator produces no extra token
        assert_eq!(tokens.iter().filter(|t| t.marker() == Some("qt-s")).count(), 1);
    }

    #[test]
    fn whitespace_collapses_outside_preserve_mode() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\p\nHello   \t world\n");
        let text = tokens
            .iter()
            .find(|t| t.kind() == TokenKind::Text)
            .and_then(|t| t.text.clone())
            .unwrap();
        assert_eq!(text, "Hello world ");
    }

    #[test]
    fn unknown_marker_produces_unknown_token() {
        let cat = standard();
        let tokenizer = Tokenizer::new(&cat);
        let tokens = tokenizer.tokenize("\\zzqq text");
        assert!(tokens.iter().any(|t| t.kind() == TokenKind::Unknown));
    }
}
