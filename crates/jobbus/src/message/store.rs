use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::warn;
use tempfile::TempDir;

use crate::archive;
use crate::error::ArchiveError;

const ENTRIES_DIR: &str = "entries";

/// A named file held in a work item's backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
}

/// Temporary directory backing the files of a job or result.
///
/// The directory is created on first use and removed by [`FileStore::release`]
/// or when the store is dropped.
#[derive(Debug)]
pub(crate) struct FileStore {
    prefix: &'static str,
    dir: Option<TempDir>,
    files: Vec<StoredFile>,
}

impl FileStore {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            dir: None,
            files: Vec::new(),
        }
    }

    pub(crate) fn files(&self) -> &[StoredFile] {
        &self.files
    }

    fn root(&mut self) -> Result<&Path, ArchiveError> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new()
                .prefix(self.prefix)
                .tempdir()
                .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?,
        };
        Ok(self.dir.insert(dir).path())
    }

    /// Path for a store-owned artifact that is not one of the named files.
    pub(crate) fn artifact_path(&mut self, file_name: &str) -> Result<PathBuf, ArchiveError> {
        Ok(self.root()?.join(file_name))
    }

    /// Copies `content` into the store under `name`, replacing a previous
    /// file of the same name while keeping its position.
    pub(crate) fn add(&mut self, name: &str, content: &mut dyn Read) -> Result<&Path, ArchiveError> {
        let relative =
            archive::enclosed_path(name).ok_or_else(|| ArchiveError::InvalidEntryName(name.to_string()))?;
        let path = self.root()?.join(ENTRIES_DIR).join(relative);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let mut out = File::create(&path).map_err(|e| ArchiveError::io(&path, e))?;
        std::io::copy(content, &mut out).map_err(|e| ArchiveError::io(&path, e))?;

        let index = match self.files.iter().position(|f| f.name == name) {
            Some(index) => index,
            None => {
                self.files.push(StoredFile {
                    name: name.to_string(),
                    path,
                });
                self.files.len() - 1
            }
        };
        Ok(&self.files[index].path)
    }

    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match self.files.iter().find(|f| f.name == name) {
            Some(file) => std::fs::read(&file.path)
                .map(Some)
                .map_err(|e| ArchiveError::io(&file.path, e)),
            None => Ok(None),
        }
    }

    /// Removes the backing directory. Safe to call repeatedly.
    pub(crate) fn release(&mut self) {
        self.files.clear();
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove temporary store {}: {}", path.display(), e);
            }
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.dir.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_read() {
        let mut store = FileStore::new("jobbus-test-");
        store.add("a.txt", &mut &b"alpha"[..]).unwrap();
        store.add("nested/b.txt", &mut &b"beta"[..]).unwrap();

        assert_eq!(store.files().len(), 2);
        assert_eq!(store.read("a.txt").unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(store.read("nested/b.txt").unwrap(), Some(b"beta".to_vec()));
        assert_eq!(store.read("missing").unwrap(), None);
    }

    #[test]
    fn test_replacing_keeps_position() {
        let mut store = FileStore::new("jobbus-test-");
        store.add("first", &mut &b"1"[..]).unwrap();
        store.add("second", &mut &b"2"[..]).unwrap();
        store.add("first", &mut &b"one"[..]).unwrap();

        let names: Vec<_> = store.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(store.read("first").unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let mut store = FileStore::new("jobbus-test-");
        let err = store.add("../outside", &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidEntryName(_)));
    }

    #[test]
    fn test_release_removes_directory_and_is_idempotent() {
        let mut store = FileStore::new("jobbus-test-");
        let path = store.add("a.txt", &mut &b"a"[..]).unwrap().to_path_buf();
        assert!(path.exists());

        store.release();
        assert!(!path.exists());
        assert!(store.is_released());
        assert!(store.files().is_empty());

        store.release();
    }
}
