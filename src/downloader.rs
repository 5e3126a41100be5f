use anyhow::{Context, Result};
use colored::*;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::cleanup::{purge_registry, sweep_stray_images, CleanupReport};
use crate::config::DownloaderConfig;
use crate::epub_builder::EpubBuilder;
use crate::error::FetchError;
use crate::fetcher::ContentSource;
use crate::materializer::{MaterializeReport, ResourceMaterializer, ScratchRegistry};
use crate::model::{Summary, TocEntry};
use crate::normalizer::normalize_page;

/// Steps of one run, in order. Any fetch or commit step may end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    FetchSummary,
    FetchAuthor,
    FetchToc,
    FetchCover,
    FetchFirstSection,
    FetchRemainingSections,
    Commit,
    Cleanup,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "preparing scratch space",
            Stage::FetchSummary => "fetching summary",
            Stage::FetchAuthor => "fetching author",
            Stage::FetchToc => "fetching table of contents",
            Stage::FetchCover => "fetching cover",
            Stage::FetchFirstSection => "fetching chapter page",
            Stage::FetchRemainingSections => "fetching section page",
            Stage::Commit => "writing archive",
            Stage::Cleanup => "cleaning up",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: PathBuf,
    pub title: String,
    /// Chapters (TOC entries) processed.
    pub chapters: usize,
    pub sections: usize,
    pub images: MaterializeReport,
    pub cleanup: CleanupReport,
}

/// Drives one book from metadata to a committed EPUB, strictly one page at a
/// time.
pub struct Downloader<S> {
    source: S,
    config: DownloaderConfig,
}

struct RunState<'a, S> {
    isbn: &'a str,
    materializer: ResourceMaterializer<'a, S>,
    book: EpubBuilder,
    registry: &'a mut ScratchRegistry,
    images: MaterializeReport,
}

impl<S: ContentSource> Downloader<S> {
    pub fn new(source: S, config: DownloaderConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn run(&self, isbn: &str) -> Result<RunReport> {
        info!("Assembling \"{}\"", isbn.green());
        debug!("Stage: {}", Stage::Init);

        fs::create_dir_all(&self.config.scratch_dir)
            .await
            .with_context(|| format!("{} at {}", Stage::Init, self.config.scratch_dir.display()))?;

        // leftovers of interrupted runs could shadow this run's images
        sweep_stray_images(&self.config.scratch_dir).await;

        let mut registry = ScratchRegistry::new();
        let result = self.run_internal(isbn, &mut registry).await;

        debug!("Stage: {}", Stage::Cleanup);
        let mut cleanup = purge_registry(&registry).await;
        let swept = sweep_stray_images(&self.config.scratch_dir).await;
        cleanup.removed += swept.removed;
        cleanup.failed += swept.failed;
        if cleanup.failed > 0 {
            warn!("{} scratch files could not be removed", cleanup.failed);
        }

        let mut report = result?;
        report.cleanup = cleanup;
        debug!("Stage: {}", Stage::Done);
        Ok(report)
    }

    async fn run_internal(&self, isbn: &str, registry: &mut ScratchRegistry) -> Result<RunReport> {
        let summary = self
            .source
            .summary(isbn)
            .await
            .with_context(|| Stage::FetchSummary.to_string())?;

        let author = match summary.authors.first() {
            Some(author_id) => Some(
                self.source
                    .author(author_id)
                    .await
                    .with_context(|| Stage::FetchAuthor.to_string())?,
            ),
            None => {
                warn!("No author listed for {}", isbn);
                None
            }
        };

        let toc = self
            .source
            .toc(isbn)
            .await
            .with_context(|| Stage::FetchToc.to_string())?;

        let title = if summary.title.trim().is_empty() {
            isbn.to_string()
        } else {
            summary.title.clone()
        };

        let mut book = EpubBuilder::new(title.as_str());
        if let Some(author) = &author {
            book.set_author(author.author.as_str())?;
        }
        if !summary.about.is_empty() {
            book.set_description(summary.about.as_str())?;
        }
        book.set_identifier(isbn)?;

        let mut state = RunState {
            isbn,
            materializer: ResourceMaterializer::new(
                &self.source,
                &self.config.scratch_dir,
                self.config.image_concurrency,
            ),
            book,
            registry,
            images: MaterializeReport::default(),
        };

        self.embed_cover(&summary, &mut state)
            .await
            .with_context(|| Stage::FetchCover.to_string())?;

        let entries = toc.traversal(self.config.front_matter, self.config.appendices);
        let total = entries.len();

        for (index, entry) in entries.into_iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, entry.title.green());
            self.append_entry(entry, &mut state).await?;
        }

        debug!("Stage: {}", Stage::Commit);
        let output = self.output_path(&title);
        state
            .book
            .commit(&output)
            .await
            .with_context(|| format!("{} to {}", Stage::Commit, output.display()))?;

        info!("Saved {}", output.display().to_string().blue());

        Ok(RunReport {
            output,
            title,
            chapters: total,
            sections: state.book.sections().len(),
            images: state.images,
            cleanup: CleanupReport::default(),
        })
    }

    async fn embed_cover(&self, summary: &Summary, state: &mut RunState<'_, S>) -> Result<()> {
        if summary.cover_image.is_empty() {
            warn!("No cover image listed");
            return Ok(());
        }

        let file_name = format!("cover-{}", url_file_name(&summary.cover_image));
        let path = state
            .materializer
            .fetch_to_scratch(&summary.cover_image, &file_name, state.registry)
            .await?;

        state.book.add_image(&path, &file_name).await?;
        state.book.set_cover(&file_name)?;
        Ok(())
    }

    /// The lead section is appended under the entry's own title; the
    /// remaining sections follow under theirs. The TOC repeats the lead page
    /// as the first section, so it is never appended twice.
    async fn append_entry(&self, entry: &TocEntry, state: &mut RunState<'_, S>) -> Result<()> {
        let Some(lead) = entry.lead_section() else {
            warn!("\"{}\" has no sections, skipping", entry.title);
            return Ok(());
        };

        self.append_page(&entry.id, &lead.id, &entry.title, state)
            .await
            .with_context(|| format!("{} {}/{}", Stage::FetchFirstSection, entry.id, lead.id))?;

        for section in entry.remaining_sections() {
            self.append_page(&entry.id, &section.id, &section.title, state)
                .await
                .with_context(|| {
                    format!("{} {}/{}", Stage::FetchRemainingSections, entry.id, section.id)
                })?;
        }

        Ok(())
    }

    async fn append_page(
        &self,
        chapter_id: &str,
        section_id: &str,
        title: &str,
        state: &mut RunState<'_, S>,
    ) -> Result<(), FetchError> {
        let raw = self.source.page(state.isbn, chapter_id, section_id).await?;
        let page = normalize_page(&raw);

        if !page.images.is_empty() {
            let report = state
                .materializer
                .materialize(state.isbn, &page.images, &mut state.book, state.registry)
                .await;
            state.images.merge(report);
        }

        state.book.add_section(&page.html, title, None, None);
        Ok(())
    }

    fn output_path(&self, title: &str) -> PathBuf {
        self.config.out_dir.join(format!("{}.epub", file_stem(title)))
    }
}

/// Title with path separators neutralised.
pub fn file_stem(title: &str) -> String {
    title.trim().replace(['/', '\\'], "-")
}

fn url_file_name(raw: &str) -> String {
    let from_url = Url::parse(raw).ok().and_then(|url| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });

    from_url
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "cover.jpg".to_string())
}
