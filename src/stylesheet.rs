//! `.sty` stylesheet loader (spec §4.2): parses marker-definition lines into a
//! [`Catalog`], accumulating line-numbered [`StylesheetError`]s rather than
//! aborting (spec §7).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::{AttributeSlot, Catalog, Justification, MarkerDescriptor, StyleType, TextProperty, TextType};
use crate::errors::StylesheetError;

/// Minimal embedded marker set, bundled so the crate is exercisable without a
/// caller-supplied stylesheet. Not part of spec.md's interface; see
/// SPEC_FULL.md's Supplemented Features.
const STANDARD_STY: &str = include_str!("standard.sty");

static NAME_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(\S+)\s*=\s*"([^"]*)"$"#).unwrap());

struct RawLine {
    field: String,
    rest: String,
    line_no: usize,
}

/// Result of loading a stylesheet: the assembled catalog plus any
/// line-numbered errors encountered along the way (best-effort, per spec §7).
#[derive(Debug, Default)]
pub struct LoadResult {
    pub catalog: Catalog,
    pub errors: Vec<StylesheetError>,
}

pub fn load(source: &str) -> LoadResult {
    let raw_lines = preprocess(source);
    let mut result = LoadResult::default();

    let mut marker_count = 0usize;
    let mut markers_seen = std::collections::HashSet::new();
    let mut current: Option<(MarkerDescriptor, std::collections::HashSet<String>, usize)> = None;
    let mut pending_end: Vec<MarkerDescriptor> = Vec::new();

    for raw in &raw_lines {
        if raw.field == "marker" {
            marker_count += 1;
            flush(&mut current, &mut result, &mut pending_end);

            let mut parts = raw.rest.splitn(2, char::is_whitespace);
            let tag = parts.next().unwrap_or("").to_lowercase();
            let remainder = parts.next().unwrap_or("").trim();

            if remainder == "-" {
                result.catalog.remove(&tag);
                continue;
            }

            if markers_seen.contains(&tag) {
                result
                    .errors
                    .push(StylesheetError::DuplicateMarker(raw.line_no, tag.clone()));
            }
            markers_seen.insert(tag.clone());
            current = Some((MarkerDescriptor::new(&tag), std::collections::HashSet::new(), raw.line_no));
            continue;
        }

        let Some((descriptor, seen_fields, _start_line)) = current.as_mut() else {
            continue;
        };

        if seen_fields.contains(&raw.field) {
            result
                .errors
                .push(StylesheetError::DuplicateField(raw.line_no, raw.field.clone()));
        }
        seen_fields.insert(raw.field.clone());

        apply_field(raw, descriptor, &mut result.errors, &mut pending_end);
    }
    flush(&mut current, &mut result, &mut pending_end);

    if marker_count == 0 {
        result.errors.push(StylesheetError::NoMarkers);
    }

    result
}

fn flush(
    current: &mut Option<(MarkerDescriptor, std::collections::HashSet<String>, usize)>,
    result: &mut LoadResult,
    pending_end: &mut Vec<MarkerDescriptor>,
) {
    if let Some((mut descriptor, seen_fields, start_line)) = current.take() {
        if descriptor.name.is_none() {
            result
                .errors
                .push(StylesheetError::MissingName(start_line, descriptor.marker.clone()));
        }
        if descriptor.style_type == StyleType::Milestone && descriptor.end_marker.is_none() {
            result.errors.push(StylesheetError::MissingMilestoneEnd(
                start_line,
                descriptor.marker.clone(),
            ));
        }
        let _ = &seen_fields;
        descriptor.finalize();
        result.catalog.insert(descriptor);
    }
    for end in pending_end.drain(..) {
        result.catalog.insert(end);
    }
}

fn preprocess(source: &str) -> Vec<RawLine> {
    let mut out = Vec::new();
    for (i, raw_line) in source.lines().enumerate() {
        let line_no = i + 1;
        let mut line = raw_line;
        if let Some(stripped) = line.strip_prefix("#!") {
            line = stripped;
        }
        if let Some(pos) = line.find('#') {
            line = &line[..pos];
        }
        let line = line.trim();
        if line.is_empty() || !line.starts_with('\\') {
            continue;
        }
        let body = &line[1..];
        let (field, rest) = match body.find(char::is_whitespace) {
            Some(p) => (&body[..p], body[p..].trim()),
            None => (body, ""),
        };
        out.push(RawLine {
            field: field.to_lowercase(),
            rest: rest.to_string(),
            line_no,
        });
    }
    out
}

fn apply_field(
    raw: &RawLine,
    d: &mut MarkerDescriptor,
    errors: &mut Vec<StylesheetError>,
    pending_end: &mut Vec<MarkerDescriptor>,
) {
    match raw.field.as_str() {
        "name" => d.name = Some(raw.rest.clone()),
        "description" => d.description = Some(raw.rest.clone()),
        "fontname" => d.cosmetics.fontname = Some(raw.rest.clone()),
        "xmltag" => d.cosmetics.xmltag = Some(raw.rest.clone()),
        "encoding" => d.cosmetics.encoding = Some(raw.rest.clone()),

        "fontsize" => d.cosmetics.fontsize = parse_uint(raw, errors),
        "linespacing" => d.cosmetics.linespacing = parse_uint(raw, errors),
        "spacebefore" => d.cosmetics.spacebefore = parse_uint(raw, errors),
        "spaceafter" => d.cosmetics.spaceafter = parse_uint(raw, errors),
        "rank" => d.rank = parse_uint(raw, errors).unwrap_or(0),

        "leftmargin" => d.cosmetics.leftmargin = parse_scaled_float(raw, errors),
        "rightmargin" => d.cosmetics.rightmargin = parse_scaled_float(raw, errors),
        "firstlineindent" => d.cosmetics.firstlineindent = parse_scaled_float(raw, errors),

        "bold" => d.cosmetics.bold = parse_bool(raw),
        "italic" => d.cosmetics.italic = parse_bool(raw),
        "smallcaps" => d.cosmetics.smallcaps = parse_bool(raw),
        "subscript" => d.cosmetics.subscript = parse_bool(raw),
        "superscript" => d.cosmetics.superscript = parse_bool(raw),
        "underline" => d.cosmetics.underline = parse_bool(raw),
        "notrepeatable" => d.cosmetics.notrepeatable = parse_bool(raw),

        "regular" => {
            if raw.rest.trim() == "-" {
                d.cosmetics.regular = false;
            } else {
                d.cosmetics.bold = false;
                d.cosmetics.italic = false;
                d.cosmetics.superscript = false;
                d.cosmetics.regular = true;
            }
        }

        "color" => d.cosmetics.color = parse_color(raw, errors),
        "colorname" => {
            // external theme lookup; yields 0 in the core (spec §9 open question)
            d.cosmetics.color = 0;
        }

        "justification" => match raw.rest.trim() {
            "left" => d.cosmetics.justification = Some(Justification::Left),
            "center" => d.cosmetics.justification = Some(Justification::Center),
            "right" => d.cosmetics.justification = Some(Justification::Right),
            "both" => d.cosmetics.justification = Some(Justification::Both),
            other => errors.push(StylesheetError::UnknownJustification(raw.line_no, other.to_string())),
        },

        "styletype" => match raw.rest.trim() {
            "character" => d.style_type = StyleType::Character,
            "paragraph" => d.style_type = StyleType::Paragraph,
            "note" => d.style_type = StyleType::Note,
            "milestone" => d.style_type = StyleType::Milestone,
            other => errors.push(StylesheetError::UnknownStyleType(raw.line_no, other.to_string())),
        },

        "texttype" => match raw.rest.trim() {
            "title" => d.text_type = TextType::Title,
            "section" => d.text_type = TextType::Section,
            "versetext" => d.text_type = TextType::VerseText,
            "notetext" => d.text_type = TextType::NoteText,
            "other" => d.text_type = TextType::Other,
            "backtranslation" => d.text_type = TextType::BackTranslation,
            "translationnote" => d.text_type = TextType::TranslationNote,
            "chapternumber" => {
                d.text_type = TextType::Other;
                d.text_properties.insert(TextProperty::Chapter);
            }
            "versenumber" => {
                d.text_type = TextType::Other;
                d.text_properties.insert(TextProperty::Verse);
            }
            other => errors.push(StylesheetError::UnknownTextType(raw.line_no, other.to_string())),
        },

        "textproperties" => {
            let suppress_publishable = raw.rest.split_whitespace().any(|w| w == "nonpublishable");
            for word in raw.rest.split_whitespace() {
                if let Some(p) = TextProperty::from_name(word) {
                    d.text_properties.insert(p);
                }
            }
            if suppress_publishable {
                d.text_properties.remove(&TextProperty::Publishable);
            }
        }

        "attributes" => match parse_attribute_spec(&raw.rest) {
            Ok(slots) => d.attributes = slots,
            Err(()) => errors.push(StylesheetError::MalformedAttributeSpec(raw.line_no, raw.rest.clone())),
        },

        "occursunder" => {
            d.occurs_under = raw.rest.split_whitespace().map(|s| s.to_lowercase()).collect();
        }

        "endmarker" => {
            let end_tag = raw.rest.trim().to_lowercase();
            d.end_marker = Some(end_tag.clone());
            let end_style = if d.style_type == StyleType::Milestone {
                StyleType::MilestoneEnd
            } else {
                StyleType::End
            };
            let mut end_descriptor = MarkerDescriptor::new(&end_tag);
            end_descriptor.style_type = end_style;
            end_descriptor.name = d.name.clone();
            if end_style == StyleType::MilestoneEnd {
                end_descriptor.attributes.push(AttributeSlot {
                    name: "id".to_string(),
                    required: false,
                });
            }
            pending_end.push(end_descriptor);
        }

        other => errors.push(StylesheetError::UnknownField(raw.line_no, other.to_string())),
    }
}

fn parse_uint(raw: &RawLine, errors: &mut Vec<StylesheetError>) -> Option<u32> {
    let val = raw.rest.trim();
    if val == "-" {
        return Some(0);
    }
    match val.parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(StylesheetError::MalformedInteger(raw.line_no, val.to_string()));
            None
        }
    }
}

fn parse_scaled_float(raw: &RawLine, errors: &mut Vec<StylesheetError>) -> Option<i64> {
    let val = raw.rest.trim();
    if val == "-" {
        return Some(0);
    }
    match val.parse::<f64>() {
        Ok(f) => Some((f * 1000.0).round() as i64),
        Err(_) => {
            errors.push(StylesheetError::MalformedFloat(raw.line_no, val.to_string()));
            None
        }
    }
}

fn parse_bool(raw: &RawLine) -> bool {
    raw.rest.trim() != "-"
}

fn parse_color(raw: &RawLine, errors: &mut Vec<StylesheetError>) -> u32 {
    let val = raw.rest.trim();
    if val == "-" {
        return 0;
    }
    if let Some(hex) = val.strip_prefix('x').or_else(|| val.strip_prefix('X')) {
        return u32::from_str_radix(hex, 16).unwrap_or_else(|_| {
            errors.push(StylesheetError::MalformedInteger(raw.line_no, val.to_string()));
            0
        });
    }
    match val.parse::<u32>() {
        Ok(bgr) => swap_red_blue(bgr),
        Err(_) => {
            errors.push(StylesheetError::MalformedInteger(raw.line_no, val.to_string()));
            0
        }
    }
}

fn swap_red_blue(v: u32) -> u32 {
    let b = v & 0xFF;
    let g = v & 0xFF00;
    let r = (v >> 16) & 0xFF;
    (b << 16) | g | r
}

/// Parses an attribute spec string: one or more whitespace-separated names,
/// each optionally `?`-prefixed to mark it optional, required entries before
/// optional (spec §3, §4.2).
fn parse_attribute_spec(spec: &str) -> Result<Vec<AttributeSlot>, ()> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(());
    }
    let mut slots = Vec::new();
    let mut seen_optional = false;
    for token in spec.split_whitespace() {
        let (name, required) = match token.strip_prefix('?') {
            Some(rest) => (rest, false),
            None => (token, true),
        };
        if name.is_empty() {
            return Err(());
        }
        if required && seen_optional {
            return Err(());
        }
        if !required {
            seen_optional = true;
        }
        slots.push(AttributeSlot {
            name: name.to_string(),
            required,
        });
    }
    Ok(slots)
}

/// Parses a `name="value"` attribute pair, returning `(name, value)`.
pub fn parse_named_value(spec: &str) -> Option<(String, String)> {
    let caps = NAME_VALUE.captures(spec.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

impl Catalog {
    /// The bundled default USFM-ish marker set (see SPEC_FULL.md's
    /// Supplemented Features).
    pub fn standard() -> Catalog {
        load(STANDARD_STY).catalog
    }
}

/// Reads a stylesheet from `path`, logging each line-numbered parse error as
/// a warning; falls back to [`Catalog::standard`] (with its own warning) if
/// the file can't be read at all (spec §7's best-effort recovery).
pub fn load_or_fallback(path: &std::path::Path) -> Catalog {
    match std::fs::read_to_string(path) {
        Ok(source) => {
            let result = load(&source);
            for err in &result.errors {
                log::warn!("{}: {err}", path.display());
            }
            result.catalog
        }
        Err(e) => {
            log::warn!("{}: {e}, falling back to the bundled standard stylesheet", path.display());
            Catalog::standard()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_simple_character_style() {
        let sty = "\\marker bd\n\\name Bold\n\\styletype character\n\\texttype other\n";
        let result = load(sty);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let bd = result.catalog.try_get("bd").unwrap();
        assert_eq!(bd.style_type, StyleType::Character);
        assert_eq!(bd.effective_end_marker(), "bd*");
    }

    #[test]
    fn missing_name_is_an_error() {
        let sty = "\\marker bd\n\\styletype character\n";
        let result = load(sty);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, StylesheetError::MissingName(_, m) if m == "bd")));
    }

    #[test]
    fn milestone_without_endmarker_errors_and_synthesizes_nothing() {
        let sty = "\\marker qt-s\n\\name Quote start\n\\styletype milestone\n";
        let result = load(sty);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, StylesheetError::MissingMilestoneEnd(_, m) if m == "qt-s")));
    }

    #[test]
    fn milestone_with_endmarker_synthesizes_end_descriptor() {
        let sty = "\\marker qt-s\n\\name Quote start\n\\styletype milestone\n\\endmarker qt-e\n";
        let result = load(sty);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let end = result.catalog.try_get("qt-e").unwrap();
        assert_eq!(end.style_type, StyleType::MilestoneEnd);
        assert_eq!(end.attributes, vec![AttributeSlot { name: "id".into(), required: false }]);
    }

    #[test]
    fn removal_line_deletes_marker_and_end() {
        let sty = "\\marker zz\n\\name Z\n\\styletype character\n\\marker zz -\n";
        let result = load(sty);
        assert!(result.catalog.try_get("zz").is_none());
        assert!(result.catalog.try_get("zz*").is_none());
    }

    #[test]
    fn duplicate_field_is_reported() {
        let sty = "\\marker bd\n\\name Bold\n\\name Bold2\n\\styletype character\n";
        let result = load(sty);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, StylesheetError::DuplicateField(_, f) if f == "name")));
    }

    #[test]
    fn no_marker_in_file_is_an_error() {
        let result = load("\\notafield foo\n");
        assert!(result.errors.iter().any(|e| matches!(e, StylesheetError::NoMarkers)));
    }

    #[test]
    fn required_after_optional_attribute_is_malformed() {
        let sty = "\\marker w\n\\name Wordlist\n\\styletype character\n\\attributes lemma? strong\n";
        let result = load(sty);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, StylesheetError::MalformedAttributeSpec(_, _))));
    }

    #[test]
    fn color_decimal_is_bgr_swapped_to_rgb() {
        // 0x0000FF in BGR (blue=0x00, green=0x00, red=0xFF) -> RGB 0xFF0000
        let sty = "\\marker hi\n\\name Hi\n\\styletype character\n\\color 255\n";
        let result = load(sty);
        assert_eq!(result.catalog.try_get("hi").unwrap().cosmetics.color, 0xFF0000);
    }

    #[test]
    fn standard_catalog_loads_without_errors() {
        let result = load(STANDARD_STY);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.catalog.try_get("v").is_some());
        assert!(result.catalog.try_get("id").is_some());
    }
}
