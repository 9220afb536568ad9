//! File change detection with a two-tier policy: a stat-based quick check
//! (mtime + size) and a streamed SHA-256 exact check.

use crate::error::Result;
use crate::types::{mtime_seconds, FileMetadata, FileStatus};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Streaming block size for SHA-256.
const CHECKSUM_BLOCK: usize = 64 * 1024;

/// Default worker count for batch checksum computation.
pub const DEFAULT_CHECKSUM_WORKERS: usize = 4;

/// Streamed SHA-256 of a file, prefixed `"sha256:"`.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_BLOCK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Quick check: *unchanged* iff mtime and size both match the cached
/// snapshot. Missing or unreadable files are treated as changed.
pub fn has_changed_quick(path: &Path, cached: Option<&FileMetadata>) -> bool {
    let Some(cached) = cached else { return true };
    match std::fs::metadata(path) {
        Ok(meta) => cached.has_changed(mtime_seconds(&meta), meta.len()),
        Err(_) => true,
    }
}

/// Exact check: recompute the SHA-256 and compare to the cached checksum.
/// Missing or unreadable files are treated as changed.
pub fn has_changed_checksum(path: &Path, cached: Option<&FileMetadata>) -> bool {
    let Some(cached) = cached else { return true };
    match file_checksum(path) {
        Ok(current) => current != cached.file_checksum,
        Err(_) => true,
    }
}

/// Partition `files` into (changed, unchanged) against cached metadata.
///
/// Stage 1 is the quick check; when `use_checksum` is set, files that fail
/// the quick check get the exact check, catching touched-but-not-modified
/// files.
pub fn filter_changed_files(
    files: &[PathBuf],
    cached: &HashMap<PathBuf, FileMetadata>,
    use_checksum: bool,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut changed = Vec::new();
    let mut unchanged = Vec::new();

    for path in files {
        let cached_meta = cached.get(path);
        if cached_meta.is_none() {
            changed.push(path.clone());
            continue;
        }

        if !has_changed_quick(path, cached_meta) {
            unchanged.push(path.clone());
            continue;
        }

        if use_checksum {
            if has_changed_checksum(path, cached_meta) {
                changed.push(path.clone());
            } else {
                unchanged.push(path.clone());
            }
        } else {
            changed.push(path.clone());
        }
    }

    (changed, unchanged)
}

/// `current \ cached`: files never seen before.
pub fn identify_new_files(
    current: &HashSet<PathBuf>,
    cached: &HashSet<PathBuf>,
) -> HashSet<PathBuf> {
    current.difference(cached).cloned().collect()
}

/// `cached \ current`: previously indexed files that no longer exist.
pub fn identify_deleted_files(
    current: &HashSet<PathBuf>,
    cached: &HashSet<PathBuf>,
) -> HashSet<PathBuf> {
    cached.difference(current).cloned().collect()
}

/// Fresh `FileMetadata` snapshot (size, mtime, checksum) for a file, with
/// `status = active` and timestamps set to now.
pub fn snapshot(
    path: &Path,
    relative_path: &Path,
    project_id: &str,
    language: &str,
    git_commit_hash: Option<String>,
) -> Result<FileMetadata> {
    let meta = std::fs::metadata(path)?;
    let checksum = file_checksum(path)?;
    let now = Utc::now();

    Ok(FileMetadata {
        project_id: project_id.to_string(),
        file_path: path.to_path_buf(),
        relative_path: relative_path.to_path_buf(),
        language: language.to_string(),
        file_checksum: checksum,
        file_size: meta.len(),
        file_mtime: mtime_seconds(&meta),
        git_commit_hash,
        git_file_hash: None,
        indexed_at: now,
        chunk_count: 0,
        embedding_ids: Vec::new(),
        status: FileStatus::Active,
        last_scanned: now,
    })
}

/// Compute checksums for many files on a bounded rayon pool. Failures are
/// logged and the file is omitted from the result map.
pub fn batch_checksums(files: &[PathBuf], max_workers: usize) -> HashMap<PathBuf, String> {
    use rayon::prelude::*;

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(max_workers.max(1)).build() {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "Could not build checksum pool, computing serially");
            return files
                .iter()
                .filter_map(|p| match file_checksum(p) {
                    Ok(sum) => Some((p.clone(), sum)),
                    Err(e) => {
                        warn!(file = %p.display(), error = %e, "Failed to checksum file");
                        None
                    }
                })
                .collect();
        }
    };

    pool.install(|| {
        files
            .par_iter()
            .filter_map(|p| match file_checksum(p) {
                Ok(sum) => Some((p.clone(), sum)),
                Err(e) => {
                    warn!(file = %p.display(), error = %e, "Failed to checksum file");
                    None
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn checksum_matches_one_shot_hash() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 200_000]; // spans multiple 64 KiB blocks
        let path = write_file(dir.path(), "big.bin", &content);

        let streamed = file_checksum(&path).unwrap();
        let expected = format!("sha256:{:x}", Sha256::digest(&content));
        assert_eq!(streamed, expected);
        assert!(streamed.starts_with("sha256:"));
    }

    #[test]
    fn quick_check_detects_size_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.py", b"x = 1\n");
        let snap = snapshot(&path, Path::new("a.py"), "proj", "python", None).unwrap();

        assert!(!has_changed_quick(&path, Some(&snap)));

        write_file(dir.path(), "a.py", b"x = 1\ny = 2\n");
        assert!(has_changed_quick(&path, Some(&snap)));
    }

    #[test]
    fn quick_check_missing_file_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.py", b"x = 1\n");
        let snap = snapshot(&path, Path::new("a.py"), "proj", "python", None).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(has_changed_quick(&path, Some(&snap)));
        assert!(has_changed_checksum(&path, Some(&snap)));
    }

    #[test]
    fn checksum_check_falsifies_touch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.py", b"x = 1\n");
        let snap = snapshot(&path, Path::new("a.py"), "proj", "python", None).unwrap();

        // Same content rewritten: mtime likely differs, checksum must not.
        write_file(dir.path(), "a.py", b"x = 1\n");
        assert!(!has_changed_checksum(&path, Some(&snap)));
    }

    #[test]
    fn diff_partition_is_exact() {
        let current: HashSet<PathBuf> =
            ["a", "b", "c"].iter().map(PathBuf::from).collect();
        let cached: HashSet<PathBuf> = ["b", "c", "d"].iter().map(PathBuf::from).collect();

        let new = identify_new_files(&current, &cached);
        let deleted = identify_deleted_files(&current, &cached);
        assert_eq!(new, ["a"].iter().map(PathBuf::from).collect());
        assert_eq!(deleted, ["d"].iter().map(PathBuf::from).collect());
    }

    #[test]
    fn filter_partition_covers_input() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.py", b"a\n");
        let b = write_file(dir.path(), "b.py", b"b\n");

        let snap_a = snapshot(&a, Path::new("a.py"), "proj", "python", None).unwrap();
        let mut cached = HashMap::new();
        cached.insert(a.clone(), snap_a);

        let files = vec![a.clone(), b.clone()];
        let (changed, unchanged) = filter_changed_files(&files, &cached, false);
        assert_eq!(changed, vec![b]);
        assert_eq!(unchanged, vec![a]);
    }

    #[test]
    fn batch_checksums_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.py", b"a\n");
        let missing = dir.path().join("missing.py");

        let sums = batch_checksums(&[a.clone(), missing], 2);
        assert_eq!(sums.len(), 1);
        assert!(sums.contains_key(&a));
    }
}
