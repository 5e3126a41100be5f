//! # book2epub
//!
//! A CLI utility to turn a subscription technical book into a single EPUB
//! for offline reading.
//!
//! ## How it works
//!
//! - Fetches the summary, author and table of contents of a book
//! - Downloads every chapter page with the user's bearer token
//! - Rewrites the page markup so images resolve inside the archive
//! - Embeds the images and writes one EPUB, chapter by chapter
//! - Optionally hands the EPUB to Calibre's `ebook-convert`
//!
//! ## Usage
//!
//! ```bash
//! book2epub --token "$PACKT_TOKEN" epub 9781234567890
//! book2epub mobi 9781234567890 --keep-epub
//! ```

pub mod cleanup;
pub mod config;
pub mod converter;
mod downloader;
pub mod epub_builder;
pub mod error;
pub mod fetcher;
pub mod materializer;
pub mod model;
pub mod normalizer;

pub use config::{DownloaderConfig, Endpoints};
pub use converter::EbookConverter;
pub use downloader::{file_stem, Downloader, RunReport, Stage};
pub use epub_builder::EpubBuilder;
pub use error::{AssemblyError, FetchError};
pub use fetcher::{ContentSource, HttpFetcher};
pub use materializer::{MaterializeReport, ResourceMaterializer, ScratchRegistry};
