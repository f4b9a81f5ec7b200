use crate::runtime::fetcher::Fetcher;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "irs_mef_";

/// Working directory for a downloaded package. Removed when dropped, on success or error.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> Result<Self, String> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(|e| format!("Failed to create scratch directory: {e}"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory now and reports failures, instead of the silent removal on drop.
    pub fn cleanup(self) -> Result<(), String> {
        let path = self.dir.path().display().to_string();
        self.dir
            .close()
            .map_err(|e| format!("Failed to remove scratch directory {path}: {e}"))
    }
}

pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<usize, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("Failed to open zip archive: {e}"))?;
    let entries = archive.len();
    archive
        .extract(dest)
        .map_err(|e| format!("Failed to extract zip archive to {}: {e}", dest.display()))?;
    Ok(entries)
}

/// Downloads the package at `url` and unpacks it into `dest`.
pub async fn download_and_extract(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
) -> Result<usize, String> {
    tracing::info!("[Extract] Downloading {}", url);
    let bytes = fetcher.fetch_bytes(url).await?;

    tracing::info!("[Extract] Extracting {} bytes to {}", bytes.len(), dest.display());
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest))
        .await
        .map_err(|e| format!("Extraction task failed: {e}"))?
}
