//! Input resolution: normalise a document reference (path or URL) to a local file.
//!
//! Drill logs arrive as local files (CLI) or as HTTP(S) links to object
//! storage (HTTP service). pdfium needs a file-system path, so URLs are
//! downloaded into a `TempDir` that lives as long as the [`ResolvedInput`].
//! Both paths check the `%PDF` magic bytes up front so a mislabelled upload
//! fails with [`DrillLogError::NotAPdf`] instead of a pdfium parse error.

use crate::error::DrillLogError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// HTTP(S) URLs are downloaded to a temporary directory. Any other
/// `scheme://` reference (`s3://`, `ftp://`, ...) is rejected as
/// [`DrillLogError::InvalidInput`]; everything else is a local path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DrillLogError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if has_foreign_scheme(input) {
        Err(DrillLogError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

fn has_foreign_scheme(input: &str) -> bool {
    input.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+')
    })
}

/// `Err(NotAPdf)` unless `head` starts with `%PDF`. Files shorter than the
/// magic are rejected too.
fn check_magic(head: &[u8], path: &Path) -> Result<(), DrillLogError> {
    if head.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(DrillLogError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, DrillLogError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(DrillLogError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DrillLogError::PermissionDenied { path });
        }
        Err(_) => return Err(DrillLogError::FileNotFound { path }),
    };

    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    file.by_ref()
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .map_err(|e| DrillLogError::Internal(format!("Failed to read '{}': {}", path.display(), e)))?;
    check_magic(&head, &path)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn download_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> DrillLogError {
    if e.is_timeout() {
        DrillLogError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else {
        DrillLogError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Stream a URL into a temporary directory.
///
/// The magic check runs on the first bytes received, so an HTML error page
/// served with status 200 is rejected without downloading the rest.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DrillLogError> {
    info!("Downloading drill log from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| download_error(url, timeout_secs, e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(DrillLogError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let temp_dir = TempDir::new().map_err(|e| DrillLogError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(extract_filename(url));
    let write_err =
        |e: std::io::Error| DrillLogError::Internal(format!("Failed to write temp file: {}", e));

    let mut file = tokio::fs::File::create(&file_path).await.map_err(write_err)?;
    let mut head: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());
    let mut received: u64 = 0;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| download_error(url, timeout_secs, e))?;
        if head.len() < PDF_MAGIC.len() {
            let need = PDF_MAGIC.len() - head.len();
            head.extend_from_slice(&chunk[..need.min(chunk.len())]);
            if head.len() == PDF_MAGIC.len() {
                check_magic(&head, &file_path)?;
            }
        }
        received += chunk.len() as u64;
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)?;

    if received == 0 {
        return Err(DrillLogError::DownloadFailed {
            url: url.to_string(),
            reason: "empty response body".to_string(),
        });
    }
    check_magic(&head, &file_path)?;

    info!("Downloaded {} bytes to: {}", received, file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
