//! Reference file discovery and track ids

use crate::error::{Result, TunematchError};
use crate::types::AudioFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Discovered audio file with basic metadata
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Stable id derived from the path relative to the scan root
    pub track_id: String,
    pub format: AudioFormat,
    pub size_bytes: u64,
}

/// Scan a path (file or directory) for audio files, sorted by path
pub fn scan(input: &Path, recursive: bool) -> Result<Vec<DiscoveredFile>> {
    if !input.exists() {
        return Err(TunematchError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", input.display()),
        )));
    }

    let mut files = Vec::new();

    if input.is_file() {
        let root = input.parent().unwrap_or(input);
        match try_discover_file(root, input) {
            Some(file) => files.push(file),
            None => {
                return Err(TunematchError::unsupported(format!(
                    "{} has unsupported extension '{}'",
                    input.display(),
                    input.extension().and_then(|e| e.to_str()).unwrap_or("unknown")
                )));
            }
        }
    } else if input.is_dir() {
        let walker = if recursive {
            WalkDir::new(input)
        } else {
            WalkDir::new(input).max_depth(1)
        };

        for entry in walker.sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() {
                if let Some(file) = try_discover_file(input, path) {
                    debug!("Discovered: {} ({})", file.path.display(), file.track_id);
                    files.push(file);
                }
            }
        }
    }

    info!("Discovered {} audio files", files.len());

    if files.is_empty() {
        warn!("No supported audio files found in {}", input.display());
    }

    Ok(files)
}

/// Try to create a DiscoveredFile if the path is a supported audio format
fn try_discover_file(root: &Path, path: &Path) -> Option<DiscoveredFile> {
    let ext = path.extension()?.to_str()?;
    let format = AudioFormat::from_extension(ext)?;

    let metadata = std::fs::metadata(path).ok()?;

    Some(DiscoveredFile {
        path: path.to_path_buf(),
        track_id: track_id_for(root, path),
        format,
        size_bytes: metadata.len(),
    })
}

/// Track id for `path` under `root`
///
/// The relative path with `/` separators, so a corpus indexed on one
/// platform keeps its ids on another. Falls back to the full path when
/// `path` is not under `root`.
pub fn track_id_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    normalize_path(relative)
}

/// Convert backslashes to forward slashes and drop a leading `./`
fn normalize_path(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    normalized.trim_start_matches("./").to_string()
}
