//! Final file naming, verification and placement

use crate::harvest::cancel::CancelSignal;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_TITLE_CHARS: usize = 140;
const PDF_MIME: &str = "application/pdf";
const RENAME_ATTEMPTS: u32 = 3;
const RENAME_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Makes a title safe to use inside a file name
///
/// Characters that are unsafe on common filesystems and control characters
/// become `_`, whitespace runs collapse to one space, and the result is
/// capped at 140 characters.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() && !c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    capped.trim().to_string()
}

/// File name a downloaded item is stored under: `{key} - {title}.pdf`
pub fn target_file_name(key: &str, title: &str) -> String {
    let title = sanitize_title(title);
    if title.is_empty() {
        format!("{}.pdf", key)
    } else {
        format!("{} - {}.pdf", key, title)
    }
}

/// Checks that a downloaded file is a non-empty PDF
///
/// # Returns
///
/// * `Ok(size)` - The file is a PDF of `size` bytes
/// * `Err(String)` - Why the file was rejected
pub fn verify_pdf(path: &Path) -> Result<u64, String> {
    let size = fs::metadata(path)
        .map_err(|e| format!("cannot stat {}: {}", path.display(), e))?
        .len();
    if size == 0 {
        return Err(format!("{} is empty", path.display()));
    }

    let mut header = [0u8; 1024];
    let read = File::open(path)
        .and_then(|mut file| file.read(&mut header))
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;

    match infer::get(&header[..read]) {
        Some(kind) if kind.mime_type() == PDF_MIME => Ok(size),
        Some(kind) => Err(format!("{} is {}, not a PDF", path.display(), kind.mime_type())),
        None => Err(format!("{} has no PDF signature", path.display())),
    }
}

/// Moves a downloaded file to `target`, replacing whatever is there
///
/// Rename is retried while the browser may still hold the file, then falls
/// back to copy. Raising `cancel` during a retry wait ends placement with
/// `ErrorKind::Interrupted` and leaves the download where it is.
pub async fn place_file(
    downloaded: &Path,
    target: &Path,
    cancel: &CancelSignal,
) -> io::Result<PathBuf> {
    if downloaded == target {
        return Ok(target.to_path_buf());
    }
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(target).await? {
        debug!("Replacing existing file {}", target.display());
        tokio::fs::remove_file(target).await?;
    }

    let mut last_error = None;
    for attempt in 1..=RENAME_ATTEMPTS {
        if attempt > 1 && !cancel.sleep(RENAME_RETRY_DELAY).await {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "placement cancelled",
            ));
        }
        match tokio::fs::rename(downloaded, target).await {
            Ok(()) => return Ok(target.to_path_buf()),
            Err(e) => {
                warn!(
                    "Rename {} -> {} failed (attempt {}): {}",
                    downloaded.display(),
                    target.display(),
                    attempt,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    // Rename fails across filesystems; copy instead
    tokio::fs::copy(downloaded, target)
        .await
        .map_err(|e| last_error.unwrap_or(e))?;
    tokio::fs::remove_file(downloaded).await?;
    Ok(target.to_path_buf())
}
