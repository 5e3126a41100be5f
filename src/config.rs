use std::ffi::OsStr;
use std::path::PathBuf;

const PRODUCTS_BASE: &str = "https://static.packt-cdn.com/products";
const AUTHORS_BASE: &str = "https://static.packt-cdn.com/authors";
const PAGES_BASE: &str = "https://services.packtpub.com/products-v1/products";
const SITE_ORIGIN: &str = "https://subscription.packtpub.com";

pub const SCRATCH_DIR_NAME: &str = ".packt_tmp";
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 4;

/// Base URLs of the vendor API. Trailing slashes are not expected.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Summary, TOC and static assets: `{products}/{isbn}/...`
    pub products: String,
    pub authors: String,
    /// Authenticated page links: `{pages}/{isbn}/{chapter}/{section}`
    pub pages: String,
    pub origin: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            products: PRODUCTS_BASE.to_string(),
            authors: AUTHORS_BASE.to_string(),
            pages: PAGES_BASE.to_string(),
            origin: SITE_ORIGIN.to_string(),
        }
    }
}

impl Endpoints {
    pub fn summary_url(&self, isbn: &str) -> String {
        format!("{}/{}/summary", self.products, isbn)
    }

    pub fn toc_url(&self, isbn: &str) -> String {
        format!("{}/{}/toc", self.products, isbn)
    }

    pub fn author_url(&self, author_id: &str) -> String {
        format!("{}/{}", self.authors, author_id)
    }

    pub fn page_url(&self, isbn: &str, chapter_id: &str, section_id: &str) -> String {
        format!("{}/{}/{}/{}", self.pages, isbn, chapter_id, section_id)
    }

    /// Where a page asset lives, given its already-corrected relative path.
    pub fn asset_url(&self, isbn: &str, relative: &str) -> String {
        format!("{}/{}/{}", self.products, isbn, relative.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub scratch_dir: PathBuf,
    pub out_dir: PathBuf,
    pub front_matter: bool,
    pub appendices: bool,
    pub image_concurrency: usize,
}

impl DownloaderConfig {
    /// `scratch_dir` is resolved with [`dedicated_scratch_dir`], since
    /// cleanup deletes every image file it finds there.
    pub fn new(scratch_dir: PathBuf, out_dir: PathBuf) -> Self {
        Self {
            scratch_dir: dedicated_scratch_dir(scratch_dir),
            out_dir,
            front_matter: false,
            appendices: false,
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
        }
    }
}

/// `dir/.packt_tmp`, or `dir` itself when it already is such a directory.
pub fn dedicated_scratch_dir(dir: PathBuf) -> PathBuf {
    if dir.file_name() == Some(OsStr::new(SCRATCH_DIR_NAME)) {
        dir
    } else {
        dir.join(SCRATCH_DIR_NAME)
    }
}

/// `$HOME/.packt_tmp`, falling back to the system temp dir when `HOME` is unset.
pub fn default_scratch_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(SCRATCH_DIR_NAME)
}
