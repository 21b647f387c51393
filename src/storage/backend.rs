use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StorageError;

/// A text key/value store that outlives the provider.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Short name used in log output.
    fn name(&self) -> &'static str;
}

/// Process-local backend, used when nothing durable is available.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Durable backend keeping every entry in one JSON document on disk.
///
/// The document is read once on open. Each `set_item` rewrites it through a
/// temporary file and a rename, so a crash never leaves a half-written file.
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileBackend {
    pub const FILE_NAME: &'static str = "storage.json";

    /// Open (creating if needed) the storage document inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let path = dir.join(Self::FILE_NAME);
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StorageError::Corrupt {
                path: path.display().to_string(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        tracing::debug!(path = %path.display(), "opened file storage");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let text = serde_json::to_string_pretty(entries).map_err(|source| StorageError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Pick the durable backend for `app_name`, or the in-memory one if the
/// platform has no local data directory.
pub fn detect_backend(app_name: &str) -> Arc<dyn StorageBackend> {
    open_or_memory(dirs::data_local_dir().map(|dir| dir.join(app_name)))
}

/// Open a [`FileBackend`] in `dir`, falling back to a [`MemoryBackend`]
/// when `dir` is `None` or unusable.
pub fn open_or_memory(dir: Option<PathBuf>) -> Arc<dyn StorageBackend> {
    let Some(dir) = dir else {
        tracing::warn!("no local data directory, using in-memory storage");
        return Arc::new(MemoryBackend::new());
    };
    match FileBackend::open(&dir) {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "file storage unavailable, using in-memory storage");
            Arc::new(MemoryBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_get_set() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get_item("a").unwrap(), None);
        backend.set_item("a", "1").unwrap();
        assert_eq!(backend.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.set_item("app-theme", "\"dark\"").unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(
            backend.get_item("app-theme").unwrap().as_deref(),
            Some("\"dark\"")
        );
        assert!(!dir.path().join("storage.json.tmp").exists());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FileBackend::FILE_NAME), "not json").unwrap();
        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn falls_back_to_memory() {
        assert_eq!(open_or_memory(None).name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, "").unwrap();
        assert_eq!(open_or_memory(Some(blocker)).name(), "memory");

        assert_eq!(open_or_memory(Some(dir.path().join("ok"))).name(), "file");
    }
}
