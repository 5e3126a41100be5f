//! Scratch-space cleanup. Nothing in here fails the run: every error is
//! logged and counted.

use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::materializer::ScratchRegistry;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Removes every file the registry recorded during the run.
pub async fn purge_registry(registry: &ScratchRegistry) -> CleanupReport {
    let mut report = CleanupReport::default();

    for path in registry.files() {
        match fs::remove_file(path).await {
            Ok(()) => report.removed += 1,
            // already gone, e.g. two references sharing one scratch file
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    debug!("Purged {} scratch files", report.removed);
    report
}

/// Removes image files left in `dir` by runs that never reached cleanup.
pub async fn sweep_stray_images(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!("Cannot scan scratch directory {}: {}", dir.display(), e);
            report.failed += 1;
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read entry in {}: {}", dir.display(), e);
                report.failed += 1;
                break;
            }
        };

        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file || !is_image(&path) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Failed to remove stray {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    if report.removed > 0 {
        info!("Removed {} stray files from {}", report.removed, dir.display());
    }
    report
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
