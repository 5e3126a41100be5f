use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AssemblyError;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub subtitle: Option<String>,
    pub summary: Option<String>,
    pub body: String,
}

/// Accumulates sections and images in call order and writes them out as a
/// single EPUB 2 file.
pub struct EpubBuilder {
    title: String,
    author: Option<String>,
    description: Option<String>,
    identifier: Option<String>,
    cover: Option<String>,
    sections: Vec<Section>,
    images: BTreeMap<String, Vec<u8>>,
}

impl EpubBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            description: None,
            identifier: None,
            cover: None,
            sections: Vec::new(),
            images: BTreeMap::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_author(&mut self, author: impl Into<String>) -> Result<(), AssemblyError> {
        self.ensure_unlocked()?;
        self.author = Some(author.into());
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), AssemblyError> {
        self.ensure_unlocked()?;
        self.description = Some(description.into());
        Ok(())
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) -> Result<(), AssemblyError> {
        self.ensure_unlocked()?;
        self.identifier = Some(identifier.into());
        Ok(())
    }

    /// Declares an already embedded image as the cover.
    pub fn set_cover(&mut self, archive_path: &str) -> Result<(), AssemblyError> {
        self.ensure_unlocked()?;
        self.cover = Some(image_key(archive_path));
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<(), AssemblyError> {
        if self.sections.is_empty() {
            Ok(())
        } else {
            Err(AssemblyError::MetadataLocked)
        }
    }

    /// Appends a section after every section added so far.
    pub fn add_section(&mut self, body: &str, title: &str, subtitle: Option<&str>, summary: Option<&str>) {
        self.sections.push(Section {
            title: title.to_string(),
            subtitle: subtitle.map(str::to_string),
            summary: summary.map(str::to_string),
            body: body.to_string(),
        });
        debug!("Added section {}: {}", self.sections.len(), title);
    }

    /// Copies the file at `scratch_path` into the archive under
    /// `archive_path` (`../images/x.png`, `images/x.png` or `x.png` all land on
    /// `images/x.png`). Adding a path that is already present is a no-op.
    pub async fn add_image(&mut self, scratch_path: &Path, archive_path: &str) -> Result<(), AssemblyError> {
        let key = image_key(archive_path);
        if self.images.contains_key(&key) {
            debug!("Image {} already embedded", key);
            return Ok(());
        }

        let data = fs::read(scratch_path).await?;
        debug!("Embedded {} ({} bytes) from {}", key, data.len(), scratch_path.display());
        self.images.insert(key, data);
        Ok(())
    }

    pub fn has_image(&self, archive_path: &str) -> bool {
        self.images.contains_key(&image_key(archive_path))
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Writes the archive to `output_path`. The bytes go to a sibling
    /// `.part` file first, which is renamed over `output_path` once complete.
    pub async fn commit(&self, output_path: &Path) -> Result<(), AssemblyError> {
        if self.sections.is_empty() {
            return Err(AssemblyError::Empty);
        }

        info!(
            "Packaging {} sections and {} images",
            self.sections.len(),
            self.images.len()
        );

        let data = self.to_bytes()?;
        let partial = partial_path(output_path);

        if let Err(e) = fs::write(&partial, &data).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        fs::rename(&partial, output_path).await?;

        info!("Wrote {}", output_path.display());
        Ok(())
    }

    /// Serializes the whole archive in memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AssemblyError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        // mimetype must be first, uncompressed
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        let identifier = self.identifier.clone().unwrap_or_else(|| self.title.clone());

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.generate_opf(&identifier).as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(self.generate_ncx(&identifier).as_bytes())?;

        for (index, section) in self.sections.iter().enumerate() {
            let path = format!("OEBPS/{}", section_href(index));
            zip.start_file(path.as_str(), deflated)?;
            zip.write_all(render_section(section).as_bytes())?;
        }

        for (key, data) in &self.images {
            let path = format!("OEBPS/{}", key);
            zip.start_file(path.as_str(), deflated)?;
            zip.write_all(data)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    fn generate_opf(&self, identifier: &str) -> String {
        let mut opf = String::new();

        opf.push_str(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
        );
        opf.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(&self.title)));
        opf.push_str(&format!(
            "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
            escape_xml(identifier)
        ));
        opf.push_str("    <dc:language>en</dc:language>\n");
        if let Some(author) = &self.author {
            opf.push_str(&format!("    <dc:creator>{}</dc:creator>\n", escape_xml(author)));
        }
        if let Some(description) = &self.description {
            opf.push_str(&format!(
                "    <dc:description>{}</dc:description>\n",
                escape_xml(description)
            ));
        }
        if self.cover.is_some() {
            opf.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
        }

        opf.push_str("  </metadata>\n  <manifest>\n");
        opf.push_str("    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");

        for index in 0..self.sections.len() {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                section_id(index),
                section_href(index)
            ));
        }

        // file names are not NCNames in general, so ids are positional
        for (index, key) in self.images.keys().enumerate() {
            let id = if self.cover.as_deref() == Some(key.as_str()) {
                "cover-image".to_string()
            } else {
                image_id(index)
            };
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                id,
                escape_xml(key),
                media_type(key)
            ));
        }

        opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
        for index in 0..self.sections.len() {
            opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", section_id(index)));
        }
        opf.push_str("  </spine>\n</package>\n");
        opf
    }

    fn generate_ncx(&self, identifier: &str) -> String {
        let mut ncx = String::new();

        ncx.push_str(&format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
"#,
            escape_xml(identifier),
            escape_xml(&self.title)
        ));

        for (index, section) in self.sections.iter().enumerate() {
            let order = index + 1;
            ncx.push_str(&format!(
                "    <navPoint id=\"navpoint-{}\" playOrder=\"{}\">\n      <navLabel>\n        <text>{}</text>\n      </navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
                order,
                order,
                escape_xml(&section.title),
                section_href(index)
            ));
        }

        ncx.push_str("  </navMap>\n</ncx>\n");
        ncx
    }
}

fn render_section(section: &Section) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n<head>\n  <title>{}</title>\n</head>\n<body>\n",
        escape_xml(&section.title)
    ));
    if let Some(subtitle) = &section.subtitle {
        html.push_str(&format!("<h2 class=\"subtitle\">{}</h2>\n", escape_xml(subtitle)));
    }
    if let Some(summary) = &section.summary {
        html.push_str(&format!("<p class=\"summary\">{}</p>\n", escape_xml(summary)));
    }
    html.push_str(&section.body);
    html.push_str("\n</body>\n</html>\n");
    html
}

fn section_id(index: usize) -> String {
    format!("section{:04}", index + 1)
}

fn section_href(index: usize) -> String {
    format!("xhtml/{}.xhtml", section_id(index))
}

/// Canonical location of an image inside `OEBPS/`.
fn image_key(archive_path: &str) -> String {
    let name = archive_path
        .trim_start_matches("../")
        .trim_start_matches("images/");
    format!("images/{}", name)
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn media_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn image_id(index: usize) -> String {
    format!("image{:04}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn sections_keep_call_order() {
        let mut book = EpubBuilder::new("Ordered");
        book.add_section("<p>b</p>", "B", None, None);
        book.add_section("<p>a</p>", "A", None, None);

        let titles: Vec<_> = book.sections().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["B", "A"]);

        let bytes = book.to_bytes().unwrap();
        let ncx = read_entry(&bytes, "OEBPS/toc.ncx");
        assert!(ncx.find("<text>B</text>").unwrap() < ncx.find("<text>A</text>").unwrap());
        assert!(read_entry(&bytes, "OEBPS/xhtml/section0001.xhtml").contains("<p>b</p>"));
    }

    #[test]
    fn mimetype_is_first_entry() {
        let mut book = EpubBuilder::new("T");
        book.add_section("<p/>", "S", None, None);
        let bytes = book.to_bytes().unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
    }

    #[test]
    fn metadata_is_locked_after_first_section() {
        let mut book = EpubBuilder::new("T");
        book.set_author("Ada").unwrap();
        book.add_section("<p/>", "S", None, None);
        assert!(matches!(book.set_description("late"), Err(AssemblyError::MetadataLocked)));
    }

    #[test]
    fn opf_carries_metadata_and_escapes() {
        let mut book = EpubBuilder::new("Rust & You");
        book.set_author("Ada <Lovelace>").unwrap();
        book.set_identifier("9781234567890").unwrap();
        book.set_description("About").unwrap();
        book.add_section("<p/>", "S", Some("Sub"), Some("Sum"));

        let bytes = book.to_bytes().unwrap();
        let opf = read_entry(&bytes, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Rust &amp; You</dc:title>"));
        assert!(opf.contains("<dc:creator>Ada &lt;Lovelace&gt;</dc:creator>"));
        assert!(opf.contains(">9781234567890</dc:identifier>"));

        let section = read_entry(&bytes, "OEBPS/xhtml/section0001.xhtml");
        assert!(section.contains("<h2 class=\"subtitle\">Sub</h2>"));
        assert!(section.contains("<p class=\"summary\">Sum</p>"));
    }

    #[tokio::test]
    async fn duplicate_image_paths_embed_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let mut book = EpubBuilder::new("T");
        book.add_image(&first, "../images/fig.png").await.unwrap();
        book.add_image(&second, "../images/fig.png").await.unwrap();
        book.add_image(&second, "fig.png").await.unwrap();
        assert_eq!(book.image_count(), 1);
        assert!(book.has_image("images/fig.png"));

        book.add_section("<img src=\"../images/fig.png\"/>", "S", None, None);
        let bytes = book.to_bytes().unwrap();
        assert_eq!(read_entry(&bytes, "OEBPS/images/fig.png"), "first");
    }

    #[tokio::test]
    async fn cover_is_declared_in_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"jpg").unwrap();

        let mut book = EpubBuilder::new("T");
        book.add_image(&cover, "cover.jpg").await.unwrap();
        book.set_cover("cover.jpg").unwrap();
        book.add_section("<p/>", "S", None, None);

        let opf = read_entry(&book.to_bytes().unwrap(), "OEBPS/content.opf");
        assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
        assert!(opf.contains(
            "<item id=\"cover-image\" href=\"images/cover.jpg\" media-type=\"image/jpeg\"/>"
        ));
    }

    #[tokio::test]
    async fn manifest_ids_are_unique_for_similar_names() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("img.png");
        std::fs::write(&scratch, b"png").unwrap();

        let mut book = EpubBuilder::new("T");
        for name in ["fig-1.png", "fig_1.png", "B05(1).png"] {
            book.add_image(&scratch, name).await.unwrap();
        }
        book.add_section("<p/>", "S", None, None);

        let opf = read_entry(&book.to_bytes().unwrap(), "OEBPS/content.opf");
        let ids: Vec<&str> = opf
            .split("<item id=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .collect();
        assert_eq!(ids, ["ncx", "section0001", "image0001", "image0002", "image0003"]);
        assert!(opf.contains("<item id=\"image0001\" href=\"images/B05(1).png\""));
    }

    #[tokio::test]
    async fn commit_writes_final_path_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("Book.epub");

        let mut book = EpubBuilder::new("Book");
        book.add_section("<p/>", "S", None, None);
        book.commit(&out).await.unwrap();

        assert!(out.exists());
        assert!(!partial_path(&out).exists());
    }

    #[tokio::test]
    async fn commit_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing").join("Book.epub");

        let mut book = EpubBuilder::new("Book");
        book.add_section("<p/>", "S", None, None);
        assert!(matches!(book.commit(&out).await, Err(AssemblyError::Io(_))));
    }

    #[tokio::test]
    async fn commit_without_sections_fails() {
        let dir = tempfile::tempdir().unwrap();
        let book = EpubBuilder::new("Book");
        assert!(matches!(
            book.commit(&dir.path().join("x.epub")).await,
            Err(AssemblyError::Empty)
        ));
    }
}
