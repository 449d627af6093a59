//! Reference corpus with atomically swapped snapshots
//!
//! Readers take an `Arc<CorpusSnapshot>` and keep it for as long as they
//! need; a snapshot is never mutated. Writers build a complete new snapshot
//! off to the side and publish it with a pointer swap, so a ranking in
//! progress never observes a half-updated corpus. Writers are serialized
//! among themselves; the read lock is only held for the `Arc` clone.

use crate::error::Result;
use crate::types::Track;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable, versioned view of the corpus
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    version: u64,
    tracks: Vec<Track>,
    by_id: HashMap<String, usize>,
}

impl CorpusSnapshot {
    /// Build a snapshot, validating every track; a repeated id replaces the
    /// earlier entry in place
    fn build(version: u64, tracks: impl IntoIterator<Item = Track>) -> Result<Self> {
        let mut snapshot = Self {
            version,
            tracks: Vec::new(),
            by_id: HashMap::new(),
        };
        for track in tracks {
            track.features.validate()?;
            match snapshot.by_id.get(&track.track_id) {
                Some(&idx) => {
                    warn!("Duplicate track id '{}', keeping the latest entry", track.track_id);
                    snapshot.tracks[idx] = track;
                }
                None => {
                    snapshot.by_id.insert(track.track_id.clone(), snapshot.tracks.len());
                    snapshot.tracks.push(track);
                }
            }
        }
        Ok(snapshot)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, track_id: &str) -> Option<&Track> {
        self.by_id.get(track_id).map(|&idx| &self.tracks[idx])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl<'a> IntoIterator for &'a CorpusSnapshot {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

/// Handle to the current corpus snapshot
#[derive(Debug, Default)]
pub struct CorpusIndex {
    current: RwLock<Arc<CorpusSnapshot>>,
    writer: Mutex<()>,
}

impl CorpusIndex {
    /// Empty corpus at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Corpus initialized with `tracks` at version 1
    pub fn from_tracks(tracks: Vec<Track>) -> Result<Self> {
        let snapshot = CorpusSnapshot::build(1, tracks)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Current snapshot; cheap, never waits for a writer building a new one
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        Arc::clone(&*self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Replace the whole corpus; returns the new version
    pub fn publish(&self, tracks: Vec<Track>) -> Result<u64> {
        let _guard = self.writer.lock();
        let next = self.version() + 1;
        let snapshot = CorpusSnapshot::build(next, tracks)?;
        Ok(self.swap(snapshot))
    }

    /// Add tracks on top of the current corpus; returns the new version
    ///
    /// Nothing is published if any track fails validation.
    pub fn append(&self, tracks: Vec<Track>) -> Result<u64> {
        let _guard = self.writer.lock();
        let base = self.snapshot();
        let snapshot = CorpusSnapshot::build(
            base.version + 1,
            base.tracks.iter().cloned().chain(tracks),
        )?;
        Ok(self.swap(snapshot))
    }

    /// Drop tracks by id; returns the new version and the number removed
    pub fn remove(&self, track_ids: &[&str]) -> Result<(u64, usize)> {
        let _guard = self.writer.lock();
        let base = self.snapshot();
        let kept: Vec<Track> = base
            .tracks
            .iter()
            .filter(|t| !track_ids.contains(&t.track_id.as_str()))
            .cloned()
            .collect();
        let removed = base.len() - kept.len();
        let snapshot = CorpusSnapshot::build(base.version + 1, kept)?;
        Ok((self.swap(snapshot), removed))
    }

    fn swap(&self, snapshot: CorpusSnapshot) -> u64 {
        let version = snapshot.version;
        let len = snapshot.len();
        *self.current.write() = Arc::new(snapshot);
        info!("Published corpus version {} ({} tracks)", version, len);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunematchError;
    use crate::types::FeatureSet;

    fn track(id: &str, tempo: f64) -> Track {
        Track::new(id, FeatureSet::new(tempo, 220.0))
    }

    #[test]
    fn test_empty_index() {
        let index = CorpusIndex::new();
        assert_eq!(index.version(), 0);
        assert!(index.is_empty());
        assert!(index.snapshot().get("a").is_none());
    }

    #[test]
    fn test_old_snapshot_survives_publish() {
        let index = CorpusIndex::from_tracks(vec![track("a", 120.0)]).unwrap();
        let before = index.snapshot();
        let v = index.append(vec![track("b", 100.0)]).unwrap();

        assert_eq!(v, 2);
        assert_eq!(before.len(), 1);
        assert_eq!(before.version(), 1);
        let after = index.snapshot();
        assert_eq!(after.len(), 2);
        assert_eq!(after.get("b").map(|t| t.features.tempo_bpm), Some(100.0));
    }

    #[test]
    fn test_duplicate_id_last_wins() {
        let index = CorpusIndex::from_tracks(vec![track("a", 120.0), track("b", 90.0), track("a", 128.0)]).unwrap();
        let snap = index.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("a").map(|t| t.features.tempo_bpm), Some(128.0));
        let ids: Vec<&str> = snap.iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_track_is_not_published() {
        let index = CorpusIndex::from_tracks(vec![track("a", 120.0)]).unwrap();
        let err = index.append(vec![track("bad", f64::NAN)]).unwrap_err();
        assert!(matches!(err, TunematchError::InvalidFeatureSet { .. }));
        assert_eq!(index.version(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_and_publish() {
        let index = CorpusIndex::from_tracks(vec![track("a", 120.0), track("b", 90.0)]).unwrap();
        let (v, removed) = index.remove(&["a", "zzz"]).unwrap();
        assert_eq!((v, removed), (2, 1));
        assert!(index.snapshot().get("a").is_none());

        let v = index.publish(vec![track("c", 70.0)]).unwrap();
        assert_eq!(v, 3);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_whole_versions() {
        let index = Arc::new(CorpusIndex::new());
        let writer = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let tracks = (0..=i).map(|j| track(&format!("t{}", j), 100.0)).collect();
                    index.publish(tracks).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let snap = index.snapshot();
            // Version n always holds exactly n tracks
            assert_eq!(snap.len() as u64, snap.version());
        }
        writer.join().unwrap();
        assert_eq!(index.version(), 50);
    }
}
