use camino::Utf8PathBuf;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::domain::{DatasetKey, DatasetName, DatasetVersion, SubPath};
use crate::error::ScrnaError;
use crate::experiment::Experiment;
use crate::fs_util::{gunzip_file, is_gzip_name};
use crate::gypsum::{GypsumClient, GypsumHttpClient};
use crate::index::{DatasetRecord, MetadataIndex};
use crate::manifest::{ManifestEntry, ScopedManifest};
use crate::query::SearchQuery;
use crate::reader::{METADATA_FILE, ReadOptions, read_experiment, read_json};
use crate::store::{DatabaseStamp, Store};

#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    /// Only the latest version of each dataset.
    pub latest: bool,
    /// Download the metadata index even if a fresh copy is cached.
    pub overwrite: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            latest: true,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Sub-dataset to read; required when a version holds several.
    pub path: Option<String>,
    pub realize_assays: bool,
    pub realize_reduced_dims: bool,
    /// Download files again even when cached copies exist.
    pub overwrite: bool,
}

/// Client for the scRNAseq collection: index discovery plus dataset
/// retrieval, with all state rooted in one cache directory.
#[derive(Clone)]
pub struct ScRnaSeq<G: GypsumClient> {
    config: ClientConfig,
    store: Store,
    gypsum: G,
}

impl ScRnaSeq<GypsumHttpClient> {
    pub fn from_config(config: ClientConfig) -> Result<Self, ScrnaError> {
        let gypsum = GypsumHttpClient::new(&config)?;
        Ok(Self::new(config, gypsum))
    }
}

impl<G: GypsumClient> ScRnaSeq<G> {
    pub fn new(config: ClientConfig, gypsum: G) -> Self {
        let store = Store::new_with_paths(config.cache_dir.clone());
        Self {
            config,
            store,
            gypsum,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn gypsum(&self) -> &G {
        &self.gypsum
    }

    /// All published datasets with flattened metadata. Row order is
    /// whatever the index returns.
    pub fn list_datasets(&self, options: &ListOptions) -> Result<Vec<DatasetRecord>, ScrnaError> {
        let db_path = self.ensure_database(options.overwrite)?;
        let index = MetadataIndex::open(db_path.as_std_path())?;
        let records = index.list(&self.config.project, options.latest)?;
        tracing::info!(count = records.len(), "listed datasets");
        Ok(records)
    }

    /// Datasets whose metadata matches `query`. Plain strings search every
    /// field. Zero matches is an empty result, and the row order is not
    /// reproducible between calls.
    pub fn search_datasets(
        &self,
        query: impl Into<SearchQuery>,
        options: &ListOptions,
    ) -> Result<Vec<DatasetRecord>, ScrnaError> {
        let query = query.into();
        query.sanitize()?;

        let db_path = self.ensure_database(options.overwrite)?;
        let index = MetadataIndex::open(db_path.as_std_path())?;
        let records = index.search(&self.config.project, &query, options.latest)?;
        tracing::info!(%query, count = records.len(), "searched datasets");
        Ok(records)
    }

    pub fn list_versions(&self, name: &str) -> Result<Vec<String>, ScrnaError> {
        let name: DatasetName = name.parse()?;
        self.gypsum.list_versions(&self.config.project, &name)
    }

    pub fn fetch_latest_version(&self, name: &str) -> Result<String, ScrnaError> {
        let name: DatasetName = name.parse()?;
        self.gypsum.fetch_latest(&self.config.project, &name)
    }

    /// Downloads the files of one dataset version (scoped to
    /// `options.path`) and assembles the experiment they describe.
    pub fn fetch_dataset(
        &self,
        name: &str,
        version: &str,
        options: &FetchOptions,
    ) -> Result<Experiment, ScrnaError> {
        let key = self.dataset_key(name, version)?;
        let path = parse_path(options.path.as_deref())?;

        let manifest = self.gypsum.fetch_manifest(&key)?;
        let root = manifest.resolve_root(path.as_ref(), &key)?;
        let scoped = manifest.scoped(root.as_ref());
        self.download_scoped(&key, &scoped, options.overwrite)?;

        let dir = match &root {
            Some(root) => self.store.file_path(&key, root.as_str()),
            None => self.store.version_dir(&key),
        };
        tracing::debug!(%dir, "reading dataset");
        read_experiment(
            &dir,
            &ReadOptions {
                realize_assays: options.realize_assays,
                realize_reduced_dims: options.realize_reduced_dims,
            },
        )
    }

    /// The metadata document of a dataset (or one of its sub-datasets).
    /// Only the document itself is downloaded.
    pub fn fetch_metadata(
        &self,
        name: &str,
        version: &str,
        path: Option<&str>,
        overwrite: bool,
    ) -> Result<Map<String, Value>, ScrnaError> {
        let key = self.dataset_key(name, version)?;
        let relative = match parse_path(path)? {
            Some(path) => path.join(METADATA_FILE),
            None => METADATA_FILE.to_string(),
        };

        let manifest = self.gypsum.fetch_manifest(&key)?;
        let entry = manifest
            .get(&relative)
            .ok_or_else(|| ScrnaError::PathNotFound {
                dataset: key.to_string(),
                path: relative.clone(),
            })?;
        let dest = self.store.file_path(&key, &relative);
        self.download_entry(&key, &relative, entry, overwrite)?;

        match read_json::<Value>(&dest)? {
            Value::Object(map) => Ok(map),
            _ => Err(ScrnaError::Metadata(format!(
                "{key}/{relative} is not a JSON object"
            ))),
        }
    }

    /// Path of a usable local copy of the metadata index, refreshed when
    /// the published copy is newer.
    pub fn ensure_database(&self, overwrite: bool) -> Result<Utf8PathBuf, ScrnaError> {
        let remote_name = self.config.database_name.as_str();
        let local_name = remote_name.strip_suffix(".gz").unwrap_or(remote_name);
        let db_path = self.store.database_path(local_name);
        let cached = db_path.as_std_path().is_file();
        let stamp = self.store.read_stamp(local_name);

        if overwrite {
            let modified = self.gypsum.fetch_database_modified()?;
            self.download_database(&db_path, local_name, modified)?;
            return Ok(db_path);
        }

        if cached {
            if let Some(stamp) = &stamp {
                let recent = (Utc::now() - stamp.checked_at)
                    .to_std()
                    .map(|age| age < self.config.database_check_interval)
                    .unwrap_or(false);
                if recent {
                    tracing::debug!(path = %db_path, "metadata index recently checked");
                    return Ok(db_path);
                }
            }
        }

        let modified = match self.gypsum.fetch_database_modified() {
            Ok(modified) => modified,
            Err(err) if cached => {
                tracing::warn!(error = %err, "cannot check metadata index freshness; using cached copy");
                return Ok(db_path);
            }
            Err(err) => return Err(err),
        };

        let up_to_date = cached && stamp.as_ref().is_some_and(|stamp| stamp.modified >= modified);
        if up_to_date {
            self.store.write_stamp(
                local_name,
                &DatabaseStamp {
                    modified,
                    checked_at: Utc::now(),
                },
            )?;
            tracing::debug!(path = %db_path, "metadata index is current");
            return Ok(db_path);
        }

        self.download_database(&db_path, local_name, modified)?;
        Ok(db_path)
    }

    fn download_database(
        &self,
        db_path: &Utf8PathBuf,
        local_name: &str,
        modified: i64,
    ) -> Result<(), ScrnaError> {
        let remote_name = self.config.database_name.as_str();
        tracing::info!(database = remote_name, "downloading metadata index");
        let download = Store::temp_file_for(db_path)?;
        self.gypsum.download_database(remote_name, download.path())?;

        if is_gzip_name(remote_name) {
            let inflated = Store::temp_file_for(db_path)?;
            gunzip_file(download.path(), inflated.path())?;
            Store::persist(inflated, db_path)?;
        } else {
            Store::persist(download, db_path)?;
        }

        self.store.write_stamp(
            local_name,
            &DatabaseStamp {
                modified,
                checked_at: Utc::now(),
            },
        )
    }

    fn download_scoped(
        &self,
        key: &DatasetKey,
        scoped: &ScopedManifest<'_>,
        overwrite: bool,
    ) -> Result<(), ScrnaError> {
        self.store.ensure_cache_root()?;
        let mut downloaded = 0usize;
        for item in scoped.entries() {
            if self.download_entry(key, item.path, item.entry, overwrite)? {
                downloaded += 1;
            }
        }
        tracing::info!(
            dataset = %key,
            path = scoped.root().map_or("", SubPath::as_str),
            files = scoped.entries().len(),
            downloaded,
            bytes = scoped.total_size(),
            "dataset files ready"
        );
        Ok(())
    }

    /// Brings one manifest file into the cache. Returns whether a download
    /// happened.
    fn download_entry(
        &self,
        key: &DatasetKey,
        path: &str,
        entry: &ManifestEntry,
        overwrite: bool,
    ) -> Result<bool, ScrnaError> {
        let dest = self.store.file_path(key, path);
        if !overwrite && Store::is_cached(&dest, entry.size) {
            tracing::debug!(file = path, "using cached file");
            return Ok(false);
        }
        let source = match &entry.link {
            Some(link) => link.key(),
            None => key.file_key(path),
        };
        tracing::debug!(%source, dest = %dest, "downloading file");
        let temp = Store::temp_file_for(&dest)?;
        self.gypsum.download_file(&source, temp.path())?;
        Store::persist(temp, &dest)?;
        Ok(true)
    }

    fn dataset_key(&self, name: &str, version: &str) -> Result<DatasetKey, ScrnaError> {
        let name: DatasetName = name.parse()?;
        let version: DatasetVersion = version.parse()?;
        Ok(DatasetKey::new(&self.config.project, name, version))
    }
}

fn parse_path(path: Option<&str>) -> Result<Option<SubPath>, ScrnaError> {
    path.map(str::parse).transpose()
}
