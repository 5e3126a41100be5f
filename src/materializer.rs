use anyhow::{anyhow, Result};
use colored::*;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::epub_builder::EpubBuilder;
use crate::error::FetchError;
use crate::fetcher::ContentSource;
use crate::normalizer::{remote_asset_path, ImageReference};

/// Scratch files written during one run, purged by cleanup afterwards.
#[derive(Debug, Default)]
pub struct ScratchRegistry {
    files: Vec<PathBuf>,
}

impl ScratchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: PathBuf) {
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|p| p == path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub embedded: usize,
    /// References whose target was already in the archive.
    pub reused: usize,
    /// Original sources that could not be embedded.
    pub failed: Vec<String>,
}

impl MaterializeReport {
    pub fn merge(&mut self, other: MaterializeReport) {
        self.embedded += other.embedded;
        self.reused += other.reused;
        self.failed.extend(other.failed);
    }
}

/// Downloads page images to scratch storage and embeds them.
pub struct ResourceMaterializer<'a, S> {
    source: &'a S,
    scratch_dir: &'a Path,
    concurrency: usize,
}

impl<'a, S: ContentSource> ResourceMaterializer<'a, S> {
    pub fn new(source: &'a S, scratch_dir: &'a Path, concurrency: usize) -> Self {
        Self {
            source,
            scratch_dir,
            concurrency: concurrency.max(1),
        }
    }

    /// Embeds one page's batch of images. Individual failures are logged and
    /// reported, never returned; every image of the batch is settled before
    /// this returns.
    pub async fn materialize(
        &self,
        isbn: &str,
        images: &[ImageReference],
        book: &mut EpubBuilder,
        registry: &mut ScratchRegistry,
    ) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for reference in images {
            if book.has_image(&reference.target) || !seen.insert(reference.target.as_str()) {
                report.reused += 1;
                continue;
            }
            pending.push(reference);
        }

        let downloads: Vec<(&ImageReference, String, Result<Vec<u8>, FetchError>)> = stream::iter(pending)
            .map(|reference| async move {
                let url = self.remote_url(isbn, reference);
                let result = self.source.asset(&url).await;
                (reference, url, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (reference, url, result) in downloads {
            let stored = match result {
                Ok(bytes) => self.store(reference, bytes, book, registry).await,
                Err(e) => Err(e.into()),
            };

            match stored {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    warn!(
                        "Skipping image {} ({}): {}",
                        reference.source.yellow(),
                        url,
                        e
                    );
                    report.failed.push(reference.source.clone());
                }
            }
        }

        report
    }

    /// Downloads `url` into the scratch directory as `file_name`.
    pub async fn fetch_to_scratch(
        &self,
        url: &str,
        file_name: &str,
        registry: &mut ScratchRegistry,
    ) -> Result<PathBuf> {
        let bytes = self.source.asset(url).await?;
        self.write_scratch(file_name, &bytes, registry).await
    }

    fn remote_url(&self, isbn: &str, reference: &ImageReference) -> String {
        if reference.source.starts_with("http://") || reference.source.starts_with("https://") {
            reference.source.clone()
        } else {
            self.source.asset_url(isbn, &remote_asset_path(&reference.source))
        }
    }

    async fn store(
        &self,
        reference: &ImageReference,
        bytes: Vec<u8>,
        book: &mut EpubBuilder,
        registry: &mut ScratchRegistry,
    ) -> Result<()> {
        let path = self
            .write_scratch(reference.file_name(), &bytes, registry)
            .await?;
        book.add_image(&path, &reference.target).await?;
        Ok(())
    }

    async fn write_scratch(
        &self,
        file_name: &str,
        bytes: &[u8],
        registry: &mut ScratchRegistry,
    ) -> Result<PathBuf> {
        if file_name.is_empty() {
            return Err(anyhow!("Empty file name for scratch asset"));
        }

        let path = self.scratch_dir.join(file_name);
        fs::write(&path, bytes)
            .await
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;
        registry.record(path.clone());

        debug!("Materialized {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
