//! Typed view of the vendor's metadata endpoints.
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! payloads is ignored by serde.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Summary {
    pub title: String,
    pub product_id: String,
    pub authors: Vec<String>,
    pub one_liner: String,
    pub about: String,
    pub cover_image: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Author {
    pub id: String,
    pub author: String,
    pub description: String,
}

/// One page of a chapter. `content_type` is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TocSection {
    pub id: String,
    pub title: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TocEntry {
    pub id: String,
    pub title: String,
    pub sections: Vec<TocSection>,
}

impl TocEntry {
    /// The page that stands in for the chapter itself.
    pub fn lead_section(&self) -> Option<&TocSection> {
        self.sections.first()
    }

    /// Sections after the lead one, in document order.
    pub fn remaining_sections(&self) -> &[TocSection] {
        self.sections.get(1..).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableOfContents {
    pub product_id: String,
    pub prefaces: Vec<TocEntry>,
    pub chapters: Vec<TocEntry>,
    pub appendices: Vec<TocEntry>,
}

impl TableOfContents {
    /// Entries to visit, in the order they must land in the archive.
    pub fn traversal(&self, front_matter: bool, appendices: bool) -> Vec<&TocEntry> {
        let mut entries = Vec::new();
        if front_matter {
            entries.extend(self.prefaces.iter());
        }
        entries.extend(self.chapters.iter());
        if appendices {
            entries.extend(self.appendices.iter());
        }
        entries
    }
}

/// Response of the authenticated page endpoint: a signed URL to the HTML.
#[derive(Debug, Clone, Deserialize)]
pub struct PageLink {
    pub data: String,
}
