//! Streaming-download temp store with size caps and orphan collection.
//!
//! Remote media destined for a backend is first streamed to a short-lived
//! file under a per-user temp directory. Each download owns its file: the
//! handle's release is invoked on every exit path and deletion is
//! best-effort, never fatal. Files that survive a crash are swept at
//! provider init once they outlive a one-hour TTL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Environment variable overriding the temp directory.
pub const TEMP_DIR_ENV: &str = "TELEGRAM_TEMP_DIR";

/// Name prefix of streaming-download files; the orphan sweep matches on it.
pub const DOWNLOAD_PREFIX: &str = "telegram-dl-";

/// Age past which an orphan file is collected.
pub const ORPHAN_TTL: Duration = Duration::from_secs(3_600);

/// Errors from streaming downloads.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The resource exceeds the provider's media ceiling.
    #[error("media size {size} exceeds limit {limit}")]
    TooLarge {
        /// Observed or declared size in bytes.
        size: u64,
        /// The provider's ceiling in bytes.
        limit: u64,
    },

    /// HTTP transfer failure.
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file I/O failure.
    #[error("temp file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a completed streaming download.
///
/// The file is owned by this handle; [`release`](TempDownload::release)
/// deletes it. Dropping an unreleased handle also deletes the file so a
/// panic or early `?` cannot leak it.
#[derive(Debug)]
pub struct TempDownload {
    /// On-disk location of the downloaded bytes.
    pub path: PathBuf,
    /// Final byte count.
    pub size: u64,
    /// Content type from the response, if declared.
    pub content_type: Option<String>,
    released: bool,
}

impl TempDownload {
    /// Wrap an existing staged file so it is owned and deleted like a
    /// streamed download.
    pub fn adopt(path: PathBuf, size: u64, content_type: Option<String>) -> Self {
        Self {
            path,
            size,
            content_type,
            released: false,
        }
    }

    /// Delete the temp file. Best-effort; never fails the caller.
    pub fn release(mut self) {
        self.delete();
        self.released = true;
    }

    fn delete(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to delete temp download");
            }
        }
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if !self.released {
            self.delete();
        }
    }
}

/// Stream a remote URL into a fresh temp file, enforcing `max_size`.
///
/// The limit is enforced twice: a HEAD probe rejects oversized resources
/// before the transfer when the host declares a length, and a running byte
/// count aborts mid-stream as soon as the cumulative size crosses the
/// limit. No temp file remains on any failure path.
///
/// # Errors
///
/// Returns [`DownloadError::TooLarge`] on either rejection, or the
/// underlying HTTP/IO error.
pub async fn download_to_temp(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    max_size: u64,
) -> Result<TempDownload, DownloadError> {
    // HEAD probe, when the host supports it.
    if let Ok(head) = client.head(url).send().await {
        if head.status().is_success() {
            if let Some(declared) = head.content_length() {
                if declared > max_size {
                    return Err(DownloadError::TooLarge {
                        size: declared,
                        limit: max_size,
                    });
                }
            }
        }
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{DOWNLOAD_PREFIX}{}.tmp", uuid::Uuid::new_v4()));

    let response = client.get(url).send().await?.error_for_status()?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mut handle = TempDownload {
        path: path.clone(),
        size: 0,
        content_type,
        released: false,
    };

    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
        if written > max_size {
            // Drop of `handle` removes the partial file.
            return Err(DownloadError::TooLarge {
                size: written,
                limit: max_size,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    handle.size = written;
    debug!(path = %handle.path.display(), size = written, "media streamed to temp file");
    Ok(handle)
}

/// Sweep orphaned download files older than [`ORPHAN_TTL`].
///
/// Matches on the [`DOWNLOAD_PREFIX`] name prefix only, so unrelated files
/// in a shared directory are untouched. Returns the number of files removed.
pub fn sweep_orphans(dir: &Path, ttl: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let now = std::time::SystemTime::now();
    let mut removed = 0_usize;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(DOWNLOAD_PREFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|a| a >= ttl) {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    removed = removed.saturating_add(1);
                    debug!(path = %entry.path().display(), "swept orphan temp file");
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to sweep orphan");
                }
            }
        }
    }
    removed
}
