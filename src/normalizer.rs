//! Pattern-based clean-up of page fragments served by the content API.
//!
//! Two unrelated upstream defects are corrected here, each by its own pure
//! function: the duplicated title heading ([`strip_title_heading`]) and the
//! broken asset references ([`rewrite_resources`]).

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};

/// Directory, relative to a section document, that images are embedded under.
pub const IMAGE_DIR: &str = "../images/";

static RE_H1_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<h1\b[^>]*>.*?</h1>").unwrap());
// attribute values may contain `>`
static RE_IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\b((?:[^>"']|"[^"]*"|'[^']*')*?)\s*/?>"#).unwrap());
static RE_BR_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<br\b((?:[^>"']|"[^"]*"|'[^']*')*?)\s*/?>"#).unwrap());
// `src` as a whole attribute name, never the tail of `data-src`
static RE_SRC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(^|\s)src\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static RE_NESTED_GRAPHICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"/graphics/[^"'\s<>]*?/graphics/(?:[^/"'\s<>]+/)+"#).unwrap());
static RE_GRAPHICS_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/graphics/[^/]*/").unwrap());

/// An image as referenced by a page, and where it lives inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// `src` exactly as the upstream markup had it.
    pub source: String,
    /// `../images/<basename>`, as written back into the markup.
    pub target: String,
}

impl ImageReference {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            target: format!("{}{}", IMAGE_DIR, basename(source)),
        }
    }

    pub fn file_name(&self) -> &str {
        basename(&self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedPage {
    pub html: String,
    pub images: Vec<ImageReference>,
}

/// Full normalization of one raw page.
pub fn normalize_page(raw: &str) -> NormalizedPage {
    rewrite_resources(&strip_title_heading(raw))
}

/// Removes the longest `<h1>…</h1>` block. Ties go to the first one in the
/// document; all other headings are left alone.
///
/// Only idempotent on pages with a single title heading: with several `<h1>`
/// blocks each call removes another one, so apply it once per page.
pub fn strip_title_heading(html: &str) -> String {
    let mut longest: Option<(usize, usize)> = None;
    for block in RE_H1_BLOCK.find_iter(html) {
        match longest {
            Some((start, end)) if end - start >= block.len() => {}
            _ => longest = Some((block.start(), block.end())),
        }
    }

    match longest {
        Some((start, end)) => {
            let mut out = String::with_capacity(html.len() - (end - start));
            out.push_str(&html[..start]);
            out.push_str(&html[end..]);
            out
        }
        None => html.to_string(),
    }
}

/// Points every `<img>` at its archive copy, collapses the duplicated
/// `/graphics/<X>/graphics/<Y>/` prefix anywhere else in the markup, and
/// closes `<img>`/`<br>` tags. Returns one reference per rewritten image tag,
/// in document order.
pub fn rewrite_resources(html: &str) -> NormalizedPage {
    let mut images = Vec::new();

    let html = RE_IMG_TAG.replace_all(html, |caps: &Captures| {
        let attrs = &caps[1];
        let Some(source) = src_attribute(attrs) else {
            return format!("<img{}/>", attrs);
        };
        if source.starts_with("data:") {
            return format!("<img{}/>", attrs);
        }

        let reference = ImageReference::new(source);
        let attrs = RE_SRC_ATTR
            .replace(attrs, |src: &Captures| format!(r#"{}src="{}""#, &src[1], reference.target))
            .into_owned();
        images.push(reference);
        format!("<img{}/>", attrs)
    });

    let html = RE_NESTED_GRAPHICS.replace_all(&html, NoExpand(IMAGE_DIR));
    let html = RE_BR_TAG.replace_all(&html, "<br$1/>");

    NormalizedPage {
        html: html.into_owned(),
        images,
    }
}

/// Drops the first `/graphics/<id>/` segment of an image source, which is
/// how the asset is actually laid out on the CDN.
pub fn remote_asset_path(source: &str) -> String {
    RE_GRAPHICS_SEGMENT.replacen(source, 1, "").into_owned()
}

fn src_attribute(attrs: &str) -> Option<&str> {
    let caps = RE_SRC_ATTR.captures(attrs)?;
    caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str())
}

fn basename(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}
