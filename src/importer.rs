//! Bulk import of a directory tree for one user.
//!
//! A walker thread discovers files, a hashing thread reads them and drops duplicates of
//! what the user already owns, and the async side ingests the rest with bounded
//! concurrency.

use crate::error::AppError;
use crate::ingest::{content_hash, Upload};
use crate::library::PhotoLibrary;
use crate::models::UserId;
use crate::walker;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub discovered: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub failed: usize,
}

struct Candidate {
    path: PathBuf,
    upload: Upload,
}

/// File modification time, used as the capture-time hint the way upload clients send one.
fn modified_time(path: &Path) -> Option<chrono::NaiveDateTime> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).naive_utc())
}

/// Read and hash each discovered file, forwarding those whose content the user does not
/// already have. Returns (duplicates, unreadable).
fn start_hashing(
    user_id: UserId,
    mut known: HashSet<String>,
    paths_rx: crossbeam_channel::Receiver<PathBuf>,
    candidates_tx: mpsc::Sender<Candidate>,
) -> (usize, usize) {
    let (mut duplicates, mut unreadable) = (0, 0);
    for path in paths_rx {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to read {:?}: {}", path, e);
                unreadable += 1;
                continue;
            }
        };
        let hash = content_hash(&bytes);
        if !known.insert(hash.clone()) {
            log::debug!("Skipping duplicate {:?} ({})", path, hash);
            duplicates += 1;
            continue;
        }

        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let candidate = Candidate {
            upload: Upload {
                user_id,
                original_name,
                bytes,
                capture_time_hint: modified_time(&path),
            },
            path,
        };
        if candidates_tx.blocking_send(candidate).is_err() {
            log::error!("Import pipeline closed early; stopping hashing");
            break;
        }
    }
    (duplicates, unreadable)
}

pub async fn import_directory(
    library: Arc<PhotoLibrary>,
    root: PathBuf,
    user_id: UserId,
    allowed_extensions: HashSet<String>,
    concurrency: usize,
) -> Result<ImportSummary, AppError> {
    let concurrency = concurrency.max(1);
    let known = library.known_hashes(user_id).await?;
    log::info!(
        "Importing {:?} for user {} ({} image(s) already owned, {} at a time)",
        root,
        user_id,
        known.len(),
        concurrency
    );

    let (paths_tx, paths_rx) = crossbeam_channel::unbounded();
    let (candidates_tx, mut candidates_rx) = mpsc::channel::<Candidate>(concurrency * 2);

    let walker_handle =
        tokio::task::spawn_blocking(move || walker::start_walking(&root, &allowed_extensions, paths_tx));
    let hasher_handle =
        tokio::task::spawn_blocking(move || start_hashing(user_id, known, paths_rx, candidates_tx));

    let outcomes: Vec<bool> = stream::poll_fn(|cx| candidates_rx.poll_recv(cx))
        .map(|candidate| {
            let library = library.clone();
            async move {
                match library.ingest(candidate.upload).await {
                    Ok(record) => {
                        log::debug!("Imported {:?} as image {}", candidate.path, record.id);
                        true
                    }
                    Err(e) => {
                        log::warn!("Failed to import {:?}: {}", candidate.path, e);
                        false
                    }
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let discovered = walker_handle.await??;
    let (duplicates, unreadable) = hasher_handle.await?;

    let imported = outcomes.iter().filter(|ok| **ok).count();
    let summary = ImportSummary {
        discovered,
        imported,
        duplicates,
        failed: outcomes.len() - imported + unreadable,
    };
    log::info!(
        "Import finished: {} discovered, {} imported, {} duplicate(s), {} failed",
        summary.discovered,
        summary.imported,
        summary.duplicates,
        summary.failed
    );
    Ok(summary)
}
