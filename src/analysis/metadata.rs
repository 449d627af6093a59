//! Metadata extraction from audio file tags
//!
//! Uses lofty to read ID3v2 (MP3), Vorbis comments (FLAC/OGG), and AIFF tags.

use crate::types::TrackMetadata;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::Path;
use tracing::{debug, warn};

/// Extract title and artist from an audio file's tags
///
/// Falls back to the file stem for the title. Never fails: unreadable
/// tags only cost the metadata, not the track.
pub fn extract_metadata(path: &Path) -> TrackMetadata {
    let mut metadata = match read_tags(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Failed to read metadata from {}: {}", path.display(), e);
            TrackMetadata::default()
        }
    };

    if metadata.title.is_none() {
        metadata.title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string());
    }

    metadata
}

fn read_tags(path: &Path) -> Result<TrackMetadata, lofty::error::LoftyError> {
    let tagged_file = Probe::open(path)?.read()?;
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let metadata = match tag {
        Some(tag) => TrackMetadata {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            duration_seconds: None,
        },
        None => {
            debug!("No tags found in {}", path.display());
            TrackMetadata::default()
        }
    };

    Ok(metadata)
}
