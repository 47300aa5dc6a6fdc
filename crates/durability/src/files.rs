//! Auxiliary snapshot files
//!
//! State machines attach files too large or structurally unsuited for
//! the main payload stream (materialized indices, for instance). The
//! collection records them during save and relocates them into the
//! scratch directory before finalize: hard-linked when source and
//! scratch share a filesystem, copied (and length-verified) otherwise.
//! Returned metadata points inside the *final* directory because
//! finalize renames scratch → final.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use keel_core::{FileRegistry, Result, SnapshotError, SnapshotFile};
use tracing::debug;

use crate::fileutil::sync_dir;
use crate::format::external_filename;

struct RegisteredFile {
    file_id: u64,
    source: PathBuf,
    metadata: Vec<u8>,
}

/// Auxiliary files registered by the state machine during one save.
#[derive(Default)]
pub struct FileCollection {
    files: Vec<RegisteredFile>,
    ids: HashSet<u64>,
}

impl FileCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files were registered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Stage every registered file into `temp_dir` under its canonical
    /// `external-<file_id>` name and fsync each destination plus the
    /// directory. The returned records already point into `final_dir`.
    pub fn prepare_files(&self, temp_dir: &Path, final_dir: &Path) -> Result<Vec<SnapshotFile>> {
        let mut prepared = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let name = external_filename(file.file_id);
            let staged = temp_dir.join(&name);
            let file_size = stage_file(&file.source, &staged)?;
            File::open(&staged)?.sync_all()?;

            prepared.push(SnapshotFile {
                file_id: file.file_id,
                path: final_dir.join(&name),
                metadata: file.metadata.clone(),
                file_size,
            });
        }
        if !self.files.is_empty() {
            sync_dir(temp_dir)?;
        }
        Ok(prepared)
    }
}

impl FileRegistry for FileCollection {
    fn add_file(&mut self, file_id: u64, path: PathBuf, metadata: Vec<u8>) {
        if !self.ids.insert(file_id) {
            panic!("duplicate external file id {file_id}");
        }
        self.files.push(RegisteredFile {
            file_id,
            source: path,
            metadata,
        });
    }
}

/// Hard-link `source` to `staged`, falling back to a copy across
/// filesystems; either way the staged length must equal the source's.
fn stage_file(source: &Path, staged: &Path) -> Result<u64> {
    let expected = fs::metadata(source)?.len();
    if staged.exists() {
        fs::remove_file(staged)?;
    }
    match fs::hard_link(source, staged) {
        Ok(()) => {
            debug!(source = %source.display(), staged = %staged.display(), "hard-linked external file");
        }
        Err(_) => {
            fs::copy(source, staged)?;
            debug!(source = %source.display(), staged = %staged.display(), "copied external file");
        }
    }
    let actual = fs::metadata(staged)?.len();
    if actual != expected {
        return Err(SnapshotError::FileSizeMismatch {
            path: staged.display().to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let collection = FileCollection::new();
        let prepared = collection
            .prepare_files(dir.path(), Path::new("/final"))
            .unwrap();
        assert!(prepared.is_empty());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_prepare_stages_and_rewrites_paths() {
        let dir = tempfile::tempdir().unwrap();
        let source_a = dir.path().join("index.dat");
        let source_b = dir.path().join("bloom.dat");
        fs::write(&source_a, vec![1u8; 1024]).unwrap();
        fs::write(&source_b, vec![2u8; 2048]).unwrap();

        let temp_dir = dir.path().join("generating-0000000000000064-1");
        fs::create_dir(&temp_dir).unwrap();
        let final_dir = dir.path().join("snapshot-0000000000000064");

        let mut collection = FileCollection::new();
        collection.add_file(1, source_a, b"index meta".to_vec());
        collection.add_file(2, source_b, Vec::new());
        assert_eq!(collection.len(), 2);

        let prepared = collection.prepare_files(&temp_dir, &final_dir).unwrap();

        // Staged copies exist in the scratch dir under canonical names.
        assert!(temp_dir.join("external-1").is_file());
        assert!(temp_dir.join("external-2").is_file());
        assert_eq!(fs::metadata(temp_dir.join("external-1")).unwrap().len(), 1024);

        // Returned records point into the final dir that does not exist yet.
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].file_id, 1);
        assert_eq!(prepared[0].path, final_dir.join("external-1"));
        assert_eq!(prepared[0].file_size, 1024);
        assert_eq!(prepared[0].metadata, b"index meta");
        assert_eq!(prepared[1].path, final_dir.join("external-2"));
        assert_eq!(prepared[1].file_size, 2048);
    }

    #[test]
    fn test_prepare_is_repeatable() {
        // A retried save stages into a fresh scratch dir, but staging
        // twice into the same one must also work.
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.bin");
        fs::write(&source, vec![3u8; 64]).unwrap();

        let temp_dir = dir.path().join("tmp");
        fs::create_dir(&temp_dir).unwrap();

        let mut collection = FileCollection::new();
        collection.add_file(9, source, Vec::new());

        collection
            .prepare_files(&temp_dir, Path::new("/final"))
            .unwrap();
        collection
            .prepare_files(&temp_dir, Path::new("/final"))
            .unwrap();
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        fs::create_dir(&temp_dir).unwrap();

        let mut collection = FileCollection::new();
        collection.add_file(1, dir.path().join("vanished.dat"), Vec::new());

        assert!(matches!(
            collection.prepare_files(&temp_dir, Path::new("/final")),
            Err(SnapshotError::Io(_))
        ));
    }

    #[test]
    #[should_panic(expected = "duplicate external file id 4")]
    fn test_duplicate_file_id_panics() {
        let mut collection = FileCollection::new();
        collection.add_file(4, PathBuf::from("/a"), Vec::new());
        collection.add_file(4, PathBuf::from("/b"), Vec::new());
    }
}
