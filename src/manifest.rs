//! Dataset version manifests.
//!
//! The backend publishes `{project}/{name}/{version}/..manifest`, a JSON
//! mapping from relative file path to size, checksum and an optional link
//! to an identical file in another version.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::{DatasetKey, SubPath};
use crate::error::ScrnaError;
use crate::reader::{
    ALT_EXPS_DIR, ASSAYS_DIR, COLUMN_DATA_DIR, COLUMN_PAIRS_DIR, METADATA_FILE, OBJECT_FILE,
    REDUCED_DIMS_DIR, ROW_DATA_DIR, ROW_PAIRS_DIR,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestLink {
    pub project: String,
    pub asset: String,
    pub version: String,
    pub path: String,
}

impl ManifestLink {
    /// Backend key of the file this link points to.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.project, self.asset, self.version, self.path
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub size: u64,
    pub md5sum: String,
    #[serde(default)]
    pub link: Option<ManifestLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    ObjectDescriptor,
    Assay,
    RowAnnotations,
    ColumnAnnotations,
    ReducedDimension,
    AlternativeExperiment,
    PairedRelation,
    Metadata,
    Other,
}

impl ArtifactRole {
    /// Classifies a path relative to the scoped object directory.
    pub fn classify(relative: &str) -> Self {
        if relative == OBJECT_FILE {
            return ArtifactRole::ObjectDescriptor;
        }
        if relative == METADATA_FILE {
            return ArtifactRole::Metadata;
        }
        let head = relative.split('/').next().unwrap_or_default();
        if head == relative {
            return ArtifactRole::Other;
        }
        match head {
            ASSAYS_DIR => ArtifactRole::Assay,
            ROW_DATA_DIR => ArtifactRole::RowAnnotations,
            COLUMN_DATA_DIR => ArtifactRole::ColumnAnnotations,
            REDUCED_DIMS_DIR => ArtifactRole::ReducedDimension,
            ALT_EXPS_DIR => ArtifactRole::AlternativeExperiment,
            ROW_PAIRS_DIR | COLUMN_PAIRS_DIR => ArtifactRole::PairedRelation,
            _ => ArtifactRole::Other,
        }
    }
}

/// One manifest entry as seen from a scoped object directory.
#[derive(Debug, Clone, Copy)]
pub struct ScopedEntry<'a> {
    /// Path relative to the dataset version.
    pub path: &'a str,
    /// Path relative to the scoped object directory.
    pub relative: &'a str,
    pub entry: &'a ManifestEntry,
    pub role: ArtifactRole,
}

#[derive(Debug, Clone)]
pub struct ScopedManifest<'a> {
    root: Option<&'a SubPath>,
    entries: Vec<ScopedEntry<'a>>,
}

impl<'a> ScopedManifest<'a> {
    pub fn root(&self) -> Option<&'a SubPath> {
        self.root
    }

    pub fn entries(&self) -> &[ScopedEntry<'a>] {
        &self.entries
    }

    pub fn with_role(&self, role: ArtifactRole) -> impl Iterator<Item = &ScopedEntry<'a>> {
        self.entries.iter().filter(move |entry| entry.role == role)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.entry.size).sum()
    }
}

impl Manifest {
    pub fn parse(content: &[u8]) -> Result<Self, ScrnaError> {
        let entries: BTreeMap<String, ManifestEntry> =
            serde_json::from_slice(content).map_err(|err| ScrnaError::Manifest(err.to_string()))?;
        for path in entries.keys() {
            let is_safe = !path.is_empty()
                && !path.starts_with('/')
                && path.split('/').all(|part| !part.is_empty() && part != "..");
            if !is_safe {
                return Err(ScrnaError::Manifest(format!("unsafe path {path:?}")));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Sub-directories holding their own metadata document, i.e. the
    /// sub-datasets of a multi-object dataset. Sorted.
    pub fn sub_datasets(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|path| path.strip_suffix(METADATA_FILE))
            .filter_map(|dir| dir.strip_suffix('/'))
            .filter(|dir| self.entries.contains_key(&format!("{dir}/{OBJECT_FILE}")))
            .map(str::to_string)
            .collect()
    }

    /// Picks the object directory to read.
    ///
    /// An explicit path must name an object directory. Without one the
    /// root object wins; failing that, a lone sub-dataset is used and
    /// several sub-datasets are ambiguous.
    pub fn resolve_root(
        &self,
        path: Option<&SubPath>,
        key: &DatasetKey,
    ) -> Result<Option<SubPath>, ScrnaError> {
        if let Some(path) = path {
            if !self.contains(&path.join(OBJECT_FILE)) {
                return Err(ScrnaError::PathNotFound {
                    dataset: key.to_string(),
                    path: path.to_string(),
                });
            }
            return Ok(Some(path.clone()));
        }

        if self.contains(OBJECT_FILE) {
            return Ok(None);
        }

        let mut candidates = self.sub_datasets();
        match candidates.len() {
            0 => Err(ScrnaError::Manifest(format!(
                "{key} contains no readable object"
            ))),
            1 => candidates.remove(0).parse().map(Some),
            _ => Err(ScrnaError::AmbiguousPath {
                dataset: key.to_string(),
                paths: candidates,
            }),
        }
    }

    /// Entries under `root` (everything when `root` is `None`).
    pub fn scoped<'a>(&'a self, root: Option<&'a SubPath>) -> ScopedManifest<'a> {
        let prefix = root.map(|root| format!("{root}/"));
        let entries = self
            .entries
            .iter()
            .filter_map(|(path, entry)| {
                let relative = match &prefix {
                    Some(prefix) => path.strip_prefix(prefix.as_str())?,
                    None => path.as_str(),
                };
                Some(ScopedEntry {
                    path: path.as_str(),
                    relative,
                    entry,
                    role: ArtifactRole::classify(relative),
                })
            })
            .collect();
        ScopedManifest { root, entries }
    }
}
