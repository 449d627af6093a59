//! Stem persistence
//!
//! The engine hands finished stems to a [`StemSink`], which stores them and
//! returns a relative address. Absolute URLs are left to whatever serves
//! the files.

use crate::audio::write_wav;
use crate::error::{Result, TunematchError};
use crate::types::Stem;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Storage for separated stems
pub trait StemSink: Send + Sync {
    /// Store one stem of a job, returning its relative address
    fn store(&self, job_id: &str, stem: &Stem) -> Result<String>;

    /// Drop everything stored for a job; best effort
    fn discard(&self, job_id: &str);
}

/// Store every stem of a job, or none of them
///
/// On the first failure the stems already stored are discarded and the
/// error is returned. On success every stem carries its `resource`.
pub fn store_all(sink: &dyn StemSink, job_id: &str, stems: &mut [Stem]) -> Result<()> {
    for i in 0..stems.len() {
        match sink.store(job_id, &stems[i]) {
            Ok(url) => stems[i].resource = Some(url),
            Err(e) => {
                warn!("Exporting stem '{}' of job {} failed: {}", stems[i].name, job_id, e);
                sink.discard(job_id);
                for stem in stems.iter_mut() {
                    stem.resource = None;
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Writes `<root>/<job_id>/<stem>.wav`, addressed as `<prefix>/<job_id>/<stem>.wav`
pub struct DirectoryStemSink {
    root: PathBuf,
    url_prefix: String,
}

impl DirectoryStemSink {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }
}

impl StemSink for DirectoryStemSink {
    fn store(&self, job_id: &str, stem: &Stem) -> Result<String> {
        if job_id.is_empty() || job_id.contains(['/', '\\']) || job_id.starts_with('.') {
            return Err(TunematchError::ExportError {
                path: self.root.clone(),
                reason: format!("Invalid job id '{}'", job_id),
            });
        }

        let dir = self.job_dir(job_id);
        std::fs::create_dir_all(&dir).map_err(|e| TunematchError::export_error(&dir, e))?;

        let file_name = format!("{}.wav", stem.name);
        let path = dir.join(&file_name);
        write_wav(&path, &stem.audio)?;

        let url = if self.url_prefix.is_empty() {
            format!("{}/{}", job_id, file_name)
        } else {
            format!("{}/{}/{}", self.url_prefix, job_id, file_name)
        };
        debug!("Stored stem {} at {}", stem.name, path.display());
        Ok(url)
    }

    fn discard(&self, job_id: &str) {
        let dir = self.job_dir(job_id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("Failed to remove partial stems in {}: {}", dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StemName, Waveform};
    use parking_lot::Mutex;

    fn stems() -> Vec<Stem> {
        StemName::ALL
            .into_iter()
            .map(|name| Stem {
                name,
                audio: Waveform::new(vec![0.1; 100], 22050),
                energy_ratio: 0.5,
                low_confidence: false,
                resource: None,
            })
            .collect()
    }

    #[test]
    fn test_directory_sink_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = DirectoryStemSink::new(dir.path(), "stems/");
        let mut stems = stems();
        store_all(&sink, "job1", &mut stems).unwrap();

        assert_eq!(stems[0].resource.as_deref(), Some("stems/job1/vocals.wav"));
        for name in StemName::ALL {
            assert!(dir.path().join("job1").join(format!("{}.wav", name)).exists());
        }
    }

    #[test]
    fn test_rejects_path_like_job_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = DirectoryStemSink::new(dir.path(), "stems");
        let stem = &stems()[0];
        for bad in ["", "../x", "a/b", ".hidden"] {
            assert!(sink.store(bad, stem).is_err(), "accepted '{}'", bad);
        }
    }

    /// Fails on the nth store and records discards
    struct FlakySink {
        inner: DirectoryStemSink,
        fail_at: usize,
        calls: Mutex<usize>,
    }

    impl StemSink for FlakySink {
        fn store(&self, job_id: &str, stem: &Stem) -> Result<String> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls == self.fail_at {
                return Err(TunematchError::ExportError {
                    path: PathBuf::from("flaky"),
                    reason: "disk full".into(),
                });
            }
            self.inner.store(job_id, stem)
        }

        fn discard(&self, job_id: &str) {
            self.inner.discard(job_id)
        }
    }

    #[test]
    fn test_partial_export_is_rolled_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = FlakySink {
            inner: DirectoryStemSink::new(dir.path(), "stems"),
            fail_at: 3,
            calls: Mutex::new(0),
        };
        let mut stems = stems();
        let err = store_all(&sink, "job2", &mut stems).unwrap_err();

        assert!(matches!(err, TunematchError::ExportError { .. }));
        assert!(!dir.path().join("job2").exists());
        assert!(stems.iter().all(|s| s.resource.is_none()));
    }
}
