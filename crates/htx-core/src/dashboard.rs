//! In-memory per-file, per-chunk progress table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Snapshot for one chunk: instantaneous speed (bytes/sec) and bytes
/// downloaded so far this run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChunkProgress {
    pub speed: f64,
    pub bytes: u64,
}

/// Progress board: destination path → chunk index → `(speed, bytes)`.
///
/// One writer (the worker's chunk sinks), many readers (host and
/// submitter threads). Readers may observe entries a write or two stale;
/// the lock guarantees a `(speed, bytes)` pair is never torn and that
/// `speed_and_size` sums one coherent snapshot.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    entries: RwLock<HashMap<PathBuf, HashMap<usize, ChunkProgress>>>,
}

impl ProgressBoard {
    /// Upserts one chunk's snapshot.
    pub fn update(&self, path: &Path, index: usize, speed: f64, bytes: u64) {
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(path.to_path_buf())
            .or_default()
            .insert(index, ChunkProgress { speed, bytes });
    }

    /// Sum of chunk speeds for one file.
    pub fn speed(&self, path: &Path) -> f64 {
        self.speed_and_size(path).0
    }

    /// Sum of chunk bytes for one file.
    pub fn size(&self, path: &Path) -> u64 {
        self.speed_and_size(path).1
    }

    /// Both aggregates from a single coherent pass.
    pub fn speed_and_size(&self, path: &Path) -> (f64, u64) {
        let entries = self.entries.read().unwrap();
        match entries.get(path) {
            Some(chunks) => chunks
                .values()
                .fold((0.0, 0), |(s, b), c| (s + c.speed, b + c.bytes)),
            None => (0.0, 0),
        }
    }

    /// Sum of all chunk speeds across every file.
    pub fn total_speed(&self) -> f64 {
        let entries = self.entries.read().unwrap();
        entries
            .values()
            .flat_map(|chunks| chunks.values())
            .map(|c| c.speed)
            .sum()
    }

    /// Erases the whole entry for a file (on the terminal verdict).
    pub fn remove(&self, path: &Path) {
        self.entries.write().unwrap().remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_sum_over_chunks() {
        let board = ProgressBoard::default();
        let path = Path::new("/tmp/a.bin");
        board.update(path, 0, 100.0, 1_000);
        board.update(path, 1, 50.0, 2_000);
        board.update(path, 2, 0.0, 500);
        assert_eq!(board.speed(path), 150.0);
        assert_eq!(board.size(path), 3_500);
        assert_eq!(board.speed_and_size(path), (150.0, 3_500));
    }

    #[test]
    fn update_replaces_chunk_snapshot() {
        let board = ProgressBoard::default();
        let path = Path::new("/tmp/a.bin");
        board.update(path, 0, 100.0, 1_000);
        board.update(path, 0, 0.0, 4_000);
        assert_eq!(board.speed_and_size(path), (0.0, 4_000));
    }

    #[test]
    fn total_speed_spans_paths() {
        let board = ProgressBoard::default();
        board.update(Path::new("/tmp/a"), 0, 10.0, 1);
        board.update(Path::new("/tmp/b"), 0, 20.0, 2);
        board.update(Path::new("/tmp/b"), 1, 30.0, 3);
        assert_eq!(board.total_speed(), 60.0);
        let per_path = board.speed(Path::new("/tmp/a")) + board.speed(Path::new("/tmp/b"));
        assert_eq!(board.total_speed(), per_path);
    }

    #[test]
    fn remove_erases_file_entry() {
        let board = ProgressBoard::default();
        let path = Path::new("/tmp/a.bin");
        board.update(path, 0, 10.0, 100);
        board.remove(path);
        assert_eq!(board.speed_and_size(path), (0.0, 0));
        assert_eq!(board.total_speed(), 0.0);
    }

    #[test]
    fn unknown_path_reads_zero() {
        let board = ProgressBoard::default();
        assert_eq!(board.speed_and_size(Path::new("/nope")), (0.0, 0));
    }
}
