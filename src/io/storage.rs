use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Error type for note storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("note file not found: {0}")]
    NotFound(String),
    #[error("a note file named {0} already exists")]
    Collision(String),
    #[error("invalid note file name: {0:?}")]
    InvalidName(String),
    #[error("could not access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("storage refused to rename {0}")]
    Refused(String),
}

/// Flat store of note files addressed by file name
pub trait NoteStorage {
    /// File names of every entry, sorted
    fn list(&self) -> Result<Vec<String>, StorageError>;
    fn read(&self, name: &str) -> Result<String, StorageError>;
    fn write(&mut self, name: &str, text: &str) -> Result<(), StorageError>;
    /// Rename `from` to `to`; fails with `Collision` if `to` exists
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;
    fn remove(&mut self, name: &str) -> Result<(), StorageError>;
    fn exists(&self, name: &str) -> bool;
}

fn check_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Write a file atomically using a temp file + rename
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Notes stored as files in one directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StorageError> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

fn io_err(path: PathBuf, name: &str, source: io::Error) -> StorageError {
    if source.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io { path, source }
    }
}

impl NoteStorage for FsStorage {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Io {
                path: self.root.clone(),
                source: e,
            })?;
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<String, StorageError> {
        let path = self.path_of(name)?;
        fs::read_to_string(&path).map_err(|e| io_err(path, name, e))
    }

    fn write(&mut self, name: &str, text: &str) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        atomic_write(&path, text.as_bytes()).map_err(|e| StorageError::Io { path, source: e })
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.path_of(from)?;
        let dst = self.path_of(to)?;
        if dst.exists() {
            return Err(StorageError::Collision(to.to_string()));
        }
        fs::rename(&src, &dst).map_err(|e| io_err(src, from, e))
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(|e| io_err(path, name, e))
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_ok_and(|p| p.is_file())
    }
}

/// In-memory storage; renames of selected files can be made to fail
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: BTreeMap<String, String>,
    failing_renames: HashSet<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        MemoryStorage {
            files: files
                .into_iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            failing_renames: HashSet::new(),
        }
    }

    /// Make every later rename of `name` fail
    pub fn fail_rename_of(&mut self, name: &str) {
        self.failing_renames.insert(name.to_string());
    }
}

impl NoteStorage for MemoryStorage {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<String, StorageError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn write(&mut self, name: &str, text: &str) -> Result<(), StorageError> {
        check_name(name)?;
        self.files.insert(name.to_string(), text.to_string());
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        check_name(to)?;
        if self.failing_renames.contains(from) {
            return Err(StorageError::Refused(from.to_string()));
        }
        if self.files.contains_key(to) {
            return Err(StorageError::Collision(to.to_string()));
        }
        let text = self
            .files
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        self.files.insert(to.to_string(), text);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}
