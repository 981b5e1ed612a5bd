//! Download directory watcher
//!
//! Browsers write into a partial file (`.crdownload`, `.part`, `.tmp`) and
//! rename it when the transfer finishes. A download counts as complete when a
//! PDF that was not present at arm time exists and no partial file that
//! appeared since then remains.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::debug;

const PARTIAL_EXTENSIONS: &[&str] = &["crdownload", "part", "tmp"];

/// Returns true for in-flight browser download files
pub fn is_partial_download(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PARTIAL_EXTENSIONS
                .iter()
                .any(|partial| ext.eq_ignore_ascii_case(partial))
        })
        .unwrap_or(false)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Tracks which files existed when a download was triggered
#[derive(Debug)]
pub struct DownloadWatcher {
    directory: Option<PathBuf>,
    known: HashSet<OsString>,
    poll_interval: Duration,
}

impl DownloadWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            directory: None,
            known: HashSet::new(),
            poll_interval,
        }
    }

    /// Snapshots `directory`; only files appearing after this call count as downloads
    pub async fn arm(&mut self, directory: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(directory).await?;
        let snapshot = scan(directory).await?;
        self.known = snapshot.into_iter().map(|entry| entry.name).collect();
        self.directory = Some(directory.to_path_buf());
        Ok(())
    }

    /// Polls until a new PDF is complete or `timeout` elapses
    ///
    /// A returned file is marked known, so the next wait will not report it again.
    pub async fn wait(
        &mut self,
        directory: &Path,
        timeout: Duration,
    ) -> std::io::Result<Option<PathBuf>> {
        if self.directory.as_deref() != Some(directory) {
            self.arm(directory).await?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let entries = scan(directory).await?;
            // Leftovers from an earlier crash were snapshotted by `arm` and never finish
            let partials = entries
                .iter()
                .filter(|entry| {
                    is_partial_download(&entry.path) && !self.known.contains(&entry.name)
                })
                .count();

            let newest = entries
                .iter()
                .filter(|entry| is_pdf(&entry.path) && !self.known.contains(&entry.name))
                .max_by_key(|entry| entry.modified);

            if let Some(entry) = newest {
                if partials == 0 {
                    debug!("Download complete: {}", entry.path.display());
                    self.known.insert(entry.name.clone());
                    return Ok(Some(entry.path.clone()));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "No download completed within {:?} ({} partial files)",
                    timeout, partials
                );
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

struct DirEntry {
    name: OsString,
    path: PathBuf,
    modified: SystemTime,
}

async fn scan(directory: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = reader.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Renamed away between listing and stat
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        entries.push(DirEntry {
            name: entry.file_name(),
            path: entry.path(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(entries)
}
