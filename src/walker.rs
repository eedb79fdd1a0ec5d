use crate::error::AppError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Send every file under `root` whose extension is in `allowed_extensions`.
/// Returns the number of paths sent.
pub fn start_walking(
    root: &Path,
    allowed_extensions: &HashSet<String>,
    paths_tx: crossbeam_channel::Sender<PathBuf>,
) -> Result<usize, AppError> {
    log::info!("Starting file discovery in {:?}", root);
    log::debug!("Configured allowed extensions: {:?}", allowed_extensions);

    if !root.is_dir() {
        return Err(AppError::InvalidInput(format!("{:?} is not a directory", root)));
    }

    let mut sent = 0;
    for entry in WalkDir::new(root).follow_links(true).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            log::trace!("Skipping non-file entry: {:?}", entry.path());
            continue;
        }

        let path = entry.path();
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if allowed_extensions.contains(&ext.to_lowercase()) => {
                log::debug!("Discovered image file: {:?}", path);
                paths_tx.send(path.to_path_buf())?;
                sent += 1;
            }
            Some(_) => log::trace!("Skipping file due to unsupported extension: {:?}", path),
            None => log::trace!("Skipping file with no extension: {:?}", path),
        }
    }

    log::info!("File discovery complete: {} candidate file(s)", sent);
    Ok(sent)
}
