use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::DatasetKey;
use crate::error::ScrnaError;

/// Local cache layout.
///
/// ```text
/// {cache}/databases/{database_name}
/// {cache}/databases/{database_name}.stamp.json
/// {cache}/files/{project}/{name}/{version}/{path}
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

/// Freshness record written next to the cached metadata index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStamp {
    /// Remote modification time, in unix seconds.
    pub modified: i64,
    pub checked_at: DateTime<Utc>,
}

impl Store {
    pub fn new_with_paths(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn database_path(&self, database_name: &str) -> Utf8PathBuf {
        self.cache_root.join("databases").join(database_name)
    }

    pub fn database_stamp_path(&self, database_name: &str) -> Utf8PathBuf {
        self.cache_root
            .join("databases")
            .join(format!("{database_name}.stamp.json"))
    }

    pub fn version_dir(&self, key: &DatasetKey) -> Utf8PathBuf {
        self.cache_root
            .join("files")
            .join(&key.project)
            .join(key.name.as_str())
            .join(key.version.as_str())
    }

    /// Cache location of `relative` (a manifest path) within `key`.
    pub fn file_path(&self, key: &DatasetKey, relative: &str) -> Utf8PathBuf {
        let mut path = self.version_dir(key);
        for part in relative.split('/') {
            path.push(part);
        }
        path
    }

    pub fn ensure_cache_root(&self) -> Result<(), ScrnaError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))
    }

    /// Whether `path` is cached with exactly `size` bytes.
    pub fn is_cached(path: &Utf8Path, size: u64) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.is_file() && meta.len() == size)
            .unwrap_or(false)
    }

    pub fn read_stamp(&self, database_name: &str) -> Option<DatabaseStamp> {
        let content = fs::read_to_string(self.database_stamp_path(database_name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn write_stamp(&self, database_name: &str, stamp: &DatabaseStamp) -> Result<(), ScrnaError> {
        let content = serde_json::to_vec_pretty(stamp)
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.database_stamp_path(database_name), &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ScrnaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// A scratch file next to `dest`, to be filled and then handed to
    /// [`Store::persist`].
    pub fn temp_file_for(dest: &Utf8Path) -> Result<NamedTempFile, ScrnaError> {
        let parent = dest
            .parent()
            .ok_or_else(|| ScrnaError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        tempfile::Builder::new()
            .prefix(".scrnaseq-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))
    }

    /// Moves a finished scratch file into place. The rename replaces any
    /// old copy, so `dest` is never missing in between.
    pub fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), ScrnaError> {
        temp.persist(dest.as_std_path())
            .map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
