use anyhow::{anyhow, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

const CONVERTER_NAME: &str = "ebook-convert";

const KNOWN_LOCATIONS: &[&str] = &[
    "/Applications/calibre.app/Contents/MacOS/ebook-convert",
    "/usr/bin/ebook-convert",
    "/usr/local/bin/ebook-convert",
];

/// Wrapper around Calibre's `ebook-convert`, run after the EPUB is committed.
#[derive(Debug, Clone)]
pub struct EbookConverter {
    binary: PathBuf,
}

impl EbookConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Looks in the usual install locations, then on `$PATH`.
    pub fn locate() -> Option<Self> {
        KNOWN_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .or_else(|| std::env::var_os("PATH").and_then(|path| find_in_path(&path)))
            .map(Self::new)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Converts `input` to a sibling file with the `format` extension.
    pub async fn convert(&self, input: &Path, format: &str) -> Result<PathBuf> {
        let output = input.with_extension(format);
        info!("Converting {} to {}", input.display(), output.display());

        let status = Command::new(&self.binary)
            .arg(input)
            .arg(&output)
            .status()
            .await
            .map_err(|e| anyhow!("Failed to run {}: {}", self.binary.display(), e))?;

        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.binary.display(), status));
        }
        if !output.exists() {
            return Err(anyhow!("{} produced no output", self.binary.display()));
        }

        Ok(output)
    }
}

fn find_in_path(path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(CONVERTER_NAME))
        .find(|candidate| candidate.is_file())
}
