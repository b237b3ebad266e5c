//! Content source abstraction for the delivery engine.
//!
//! The deliverer never touches the filesystem directly. It works against
//! the `ContentSource` trait, which supplies fresh metadata and seekable
//! chunked readers per request. Production code uses `FsContentSource`;
//! tests substitute in-memory sources.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeek};

/// Metadata for a single resource, fetched fresh on every request.
///
/// Staleness is bounded by filesystem latency only; nothing here is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentMetadata {
    /// Resource size in bytes.
    pub size: u64,
    /// Modification time truncated to whole seconds (HTTP-date resolution).
    ///
    /// `None` when the filesystem reports no usable time (missing or at or
    /// before the epoch). Validators that compare against it simply cannot
    /// trigger in that case.
    pub modified: Option<DateTime<Utc>>,
    /// Whether the path names a directory rather than a file.
    pub is_dir: bool,
}

impl ContentMetadata {
    /// Modification time as epoch seconds, zero when unknown.
    ///
    /// Used for deterministic validator hashing.
    pub fn modified_epoch(&self) -> i64 {
        self.modified.map(|time| time.timestamp()).unwrap_or(0)
    }
}

/// Seekable chunked reader handed out by a `ContentSource`.
///
/// One reader serves exactly one response body and is dropped with it,
/// which releases the underlying handle even when the client disconnects
/// mid-stream.
pub trait ContentReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ContentReader for T {}

/// Supplies resource metadata and readers to the delivery engine.
///
/// Errors are plain `io::Error`s; the deliverer classifies them into its
/// own taxonomy (`NotFound` kind and directories become the recoverable
/// not-found class, everything else is fatal).
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Reads size, modification time, and directory status for `path`.
    async fn stat(&self, path: &Path) -> io::Result<ContentMetadata>;

    /// Opens a seekable reader positioned at offset zero.
    async fn open(&self, path: &Path) -> io::Result<Box<dyn ContentReader>>;
}

/// Filesystem-backed content source using tokio's async file I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentSource;

impl FsContentSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn stat(&self, path: &Path) -> io::Result<ContentMetadata> {
        let metadata = fs::metadata(path).await?;
        let modified = metadata.modified().ok().and_then(truncate_to_seconds);

        Ok(ContentMetadata {
            size: metadata.len(),
            modified,
            is_dir: metadata.is_dir(),
        })
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn ContentReader>> {
        let file = fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

/// Drops sub-second precision so comparisons against HTTP dates are exact.
fn truncate_to_seconds(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    let seconds = DateTime::<Utc>::from(time).timestamp();
    if seconds <= 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_stat_reports_size_and_seconds_precision() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let source = FsContentSource::new();
        let metadata = source.stat(file.path()).await.unwrap();

        assert_eq!(metadata.size, 11);
        assert!(!metadata.is_dir);

        let modified = metadata.modified.expect("fresh file has an mtime");
        assert_eq!(modified.timestamp_subsec_nanos(), 0);
        assert!(metadata.modified_epoch() > 0);
    }

    #[tokio::test]
    async fn test_stat_missing_file_is_not_found() {
        let source = FsContentSource::new();
        let error = source
            .stat(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stat_directory_flagged() {
        let dir = tempfile::tempdir().unwrap();

        let source = FsContentSource::new();
        let metadata = source.stat(dir.path()).await.unwrap();

        assert!(metadata.is_dir);
    }

    #[tokio::test]
    async fn test_open_reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"chunked read target").unwrap();
        file.flush().unwrap();

        let source = FsContentSource::new();
        let mut reader = source.open(file.path()).await.unwrap();

        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"chunked read target");
    }
}
