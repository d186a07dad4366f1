//! Marker catalog: descriptors keyed by marker string, with lookup, merge, and
//! removal semantics (spec §3, §4.1).

use std::collections::{BTreeSet, HashMap};

/// Governs how the tokenizer and parser treat a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleType {
    Character,
    Paragraph,
    Note,
    Milestone,
    MilestoneEnd,
    End,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextType {
    Unspecified,
    Title,
    Section,
    VerseText,
    NoteText,
    Other,
    BackTranslation,
    TranslationNote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TextProperty {
    Verse,
    Chapter,
    Paragraph,
    Publishable,
    Vernacular,
    Poetic,
    Level1,
    Level2,
    Level3,
    Level4,
    Level5,
    CrossReference,
    Nonpublishable,
    Nonvernacular,
    Book,
    Note,
}

impl TextProperty {
    pub fn from_name(name: &str) -> Option<Self> {
        use TextProperty::*;
        Some(match name {
            "verse" => Verse,
            "chapter" => Chapter,
            "paragraph" => Paragraph,
            "publishable" => Publishable,
            "vernacular" => Vernacular,
            "poetic" => Poetic,
            "level_1" => Level1,
            "level_2" => Level2,
            "level_3" => Level3,
            "level_4" => Level4,
            "level_5" => Level5,
            "crossreference" | "cross_reference" => CrossReference,
            "nonpublishable" => Nonpublishable,
            "nonvernacular" => Nonvernacular,
            "book" => Book,
            "note" => Note,
            _ => return None,
        })
    }
}

/// One `(name, required)` entry in a marker's attribute list. All required
/// entries precede all optional ones (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSlot {
    pub name: String,
    pub required: bool,
}

/// Cosmetic/typographic fields the validator carries but never interprets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cosmetics {
    pub fontname: Option<String>,
    pub fontsize: Option<u32>,
    pub linespacing: Option<u32>,
    pub spacebefore: Option<u32>,
    pub spaceafter: Option<u32>,
    pub leftmargin: Option<i64>,
    pub rightmargin: Option<i64>,
    pub firstlineindent: Option<i64>,
    pub bold: bool,
    pub italic: bool,
    pub smallcaps: bool,
    pub subscript: bool,
    pub superscript: bool,
    pub underline: bool,
    pub notrepeatable: bool,
    pub regular: bool,
    pub color: u32,
    pub justification: Option<Justification>,
    pub xmltag: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Justification {
    Left,
    Center,
    Right,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDescriptor {
    pub marker: String,
    pub style_type: StyleType,
    pub end_marker: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub text_type: TextType,
    pub text_properties: BTreeSet<TextProperty>,
    pub occurs_under: Vec<String>,
    pub rank: u32,
    pub attributes: Vec<AttributeSlot>,
    pub cosmetics: Cosmetics,
}

impl MarkerDescriptor {
    /// A bare `style_type = unknown` descriptor, as synthesized on lookup miss
    /// (spec §4.1).
    pub fn unknown(marker: &str) -> Self {
        let mut d = MarkerDescriptor::new(marker);
        d.style_type = StyleType::Unknown;
        d.cosmetics.color = 0xFF0000;
        d
    }

    pub fn new(marker: &str) -> Self {
        MarkerDescriptor {
            marker: marker.to_lowercase(),
            style_type: StyleType::Unknown,
            end_marker: None,
            name: None,
            description: None,
            text_type: TextType::Unspecified,
            text_properties: BTreeSet::new(),
            occurs_under: Vec::new(),
            rank: 0,
            attributes: Vec::new(),
            cosmetics: Cosmetics::default(),
        }
    }

    /// Effective end marker: the declared one, or `marker + "*"` for character
    /// styles lacking an explicit value (spec §3 invariant).
    pub fn effective_end_marker(&self) -> String {
        match &self.end_marker {
            Some(end) => end.clone(),
            None => format!("{}*", self.marker),
        }
    }

    /// The attribute name used when a bare value (no `name=value`) is supplied.
    /// Defined iff at most one attribute is required; then it's the first
    /// declared attribute (spec §3).
    pub fn default_attribute(&self) -> Option<&str> {
        let required_count = self.attributes.iter().filter(|a| a.required).count();
        if required_count <= 1 {
            self.attributes.first().map(|a| a.name.as_str())
        } else {
            None
        }
    }

    pub fn has_property(&self, p: TextProperty) -> bool {
        self.text_properties.contains(&p)
    }

    /// Finishes invariants that depend on the fully-assembled descriptor: the
    /// `publishable` inference and the character-style end-marker default
    /// (spec §3).
    pub fn finalize(&mut self) {
        if self.end_marker.is_none()
            && self.style_type == StyleType::Character
            && !self.marker.ends_with('*')
        {
            self.end_marker = Some(format!("{}*", self.marker));
        }
        if self.marker == "id" {
            self.text_properties.insert(TextProperty::Book);
        }
        let is_char_or_para =
            matches!(self.style_type, StyleType::Character | StyleType::Paragraph);
        if self.text_type == TextType::Other
            && is_char_or_para
            && !self.has_property(TextProperty::Nonpublishable)
            && !self.has_property(TextProperty::Chapter)
            && !self.has_property(TextProperty::Verse)
        {
            self.text_properties.insert(TextProperty::Publishable);
        }
    }
}

/// Holds descriptors keyed by marker string, preserving contiguous indexing so
/// that `remove` can shrink the catalog without leaving gaps (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<MarkerDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, descriptor: MarkerDescriptor) {
        let marker = descriptor.marker.clone();
        match self.index.get(&marker) {
            Some(&idx) => self.entries[idx] = descriptor,
            None => {
                self.index.insert(marker, self.entries.len());
                self.entries.push(descriptor);
            }
        }
    }

    /// Look up a marker by exact (already-lowercased) tag, without
    /// synthesizing an unknown descriptor on miss.
    pub fn try_get(&self, marker: &str) -> Option<&MarkerDescriptor> {
        self.index.get(marker).map(|&idx| &self.entries[idx])
    }

    /// Look up a marker, synthesizing and inserting an `unknown` descriptor on
    /// miss (spec §4.1). Returns the (now-present) descriptor.
    pub fn get_or_synthesize(&mut self, marker: &str) -> &MarkerDescriptor {
        if !self.index.contains_key(marker) {
            self.insert(MarkerDescriptor::unknown(marker));
        }
        let idx = self.index[marker];
        &self.entries[idx]
    }

    /// Removes a marker and, if present, its end-marker counterpart, shifting
    /// later entries down to preserve contiguous indexing.
    pub fn remove(&mut self, marker: &str) {
        let end = format!("{marker}*");
        let mut to_remove: Vec<usize> = self
            .index
            .iter()
            .filter(|(k, _)| k.as_str() == marker || k.as_str() == end)
            .map(|(_, &idx)| idx)
            .collect();
        to_remove.sort_unstable();
        to_remove.reverse();
        for idx in to_remove {
            self.entries.remove(idx);
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.marker.clone(), idx);
        }
    }

    /// Merges `other` into a new catalog: entries in `other` override entries
    /// in `self` by marker, with deep-copied descriptors (spec §4.1).
    pub fn merge(&self, other: &Catalog) -> Catalog {
        let mut merged = self.clone();
        for entry in &other.entries {
            merged.insert(entry.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerDescriptor> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_lookup_synthesizes_and_inserts() {
        let mut cat = Catalog::new();
        assert!(cat.try_get("zz").is_none());
        let d = cat.get_or_synthesize("zz");
        assert_eq!(d.style_type, StyleType::Unknown);
        assert_eq!(d.cosmetics.color, 0xFF0000);
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn remove_decreases_len_and_preserves_index() {
        let mut cat = Catalog::new();
        let mut bd = MarkerDescriptor::new("bd");
        bd.style_type = StyleType::Character;
        bd.finalize();
        let mut bd_end = MarkerDescriptor::new("bd*");
        bd_end.style_type = StyleType::End;
        cat.insert(bd);
        cat.insert(bd_end);
        cat.insert(MarkerDescriptor::new("p"));
        assert_eq!(cat.len(), 3);
        cat.remove("bd");
        assert_eq!(cat.len(), 1);
        assert!(cat.try_get("bd").is_none());
        assert!(cat.try_get("bd*").is_none());
        assert!(cat.try_get("p").is_some());
    }

    #[test]
    fn merge_overrides_by_marker() {
        let mut a = Catalog::new();
        let mut old_p = MarkerDescriptor::new("p");
        old_p.rank = 1;
        a.insert(old_p);

        let mut b = Catalog::new();
        let mut new_p = MarkerDescriptor::new("p");
        new_p.rank = 2;
        b.insert(new_p);

        let merged = a.merge(&b);
        assert_eq!(merged.try_get("p").unwrap().rank, 2);
    }

    #[test]
    fn character_style_defaults_end_marker() {
        let mut bd = MarkerDescriptor::new("bd");
        bd.style_type = StyleType::Character;
        bd.finalize();
        assert_eq!(bd.effective_end_marker(), "bd*");
    }

    #[test]
    fn default_attribute_iff_at_most_one_required() {
        let mut d = MarkerDescriptor::new("w");
        d.attributes.push(AttributeSlot {
            name: "lemma".into(),
            required: false,
        });
        assert_eq!(d.default_attribute(), Some("lemma"));

        d.attributes.push(AttributeSlot {
            name: "strong".into(),
            required: true,
        });
        d.attributes.push(AttributeSlot {
            name: "srcloc".into(),
            required: true,
        });
        assert_eq!(d.default_attribute(), None);
    }

    #[test]
    fn id_gets_book_property() {
        let mut d = MarkerDescriptor::new("id");
        d.finalize();
        assert!(d.has_property(TextProperty::Book));
    }
}
