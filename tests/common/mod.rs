#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use regex::Regex;
use rusqlite::{Connection, params};
use serde_json::{Map, Value, json};

use scrnaseq::app::ScRnaSeq;
use scrnaseq::config::ClientConfig;
use scrnaseq::domain::{DatasetKey, DatasetName};
use scrnaseq::error::ScrnaError;
use scrnaseq::gypsum::GypsumClient;
use scrnaseq::manifest::Manifest;

pub const PROJECT: &str = "scRNAseq";
pub const INDEX_DIR: &str = "__index__";
pub const DATABASE_NAME: &str = "bioconductor.sqlite3";

/// Serves backend keys from files under `root`.
pub struct MockGypsum {
    root: PathBuf,
    modified: Mutex<Option<i64>>,
    downloads: Mutex<Vec<String>>,
}

impl MockGypsum {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            modified: Mutex::new(Some(1_700_000_000)),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// `None` makes the freshness check fail.
    pub fn set_modified(&self, modified: Option<i64>) {
        *self.modified.lock().unwrap() = modified;
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn clear_downloads(&self) {
        self.downloads.lock().unwrap().clear();
    }

    fn key_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl GypsumClient for MockGypsum {
    fn fetch_manifest(&self, key: &DatasetKey) -> Result<Manifest, ScrnaError> {
        let content = fs::read(self.key_path(&key.file_key("..manifest")))
            .map_err(|_| ScrnaError::DatasetNotFound(key.to_string()))?;
        Manifest::parse(&content)
    }

    fn download_file(&self, key: &str, destination: &Path) -> Result<(), ScrnaError> {
        let source = self.key_path(key);
        if !source.is_file() {
            return Err(ScrnaError::FileNotFound(key.to_string()));
        }
        fs::copy(&source, destination).map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        self.downloads.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn list_versions(&self, project: &str, name: &DatasetName) -> Result<Vec<String>, ScrnaError> {
        let dir = self.root.join(project).join(name.as_str());
        let entries =
            fs::read_dir(&dir).map_err(|_| ScrnaError::DatasetNotFound(name.to_string()))?;
        let mut versions = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        versions.sort();
        Ok(versions)
    }

    fn fetch_latest(&self, project: &str, name: &DatasetName) -> Result<String, ScrnaError> {
        let path = self.root.join(project).join(name.as_str()).join("..latest");
        let content =
            fs::read_to_string(path).map_err(|_| ScrnaError::DatasetNotFound(name.to_string()))?;
        let value: Value = serde_json::from_str(&content).unwrap();
        Ok(value["version"].as_str().unwrap().to_string())
    }

    fn download_database(&self, database_name: &str, destination: &Path) -> Result<(), ScrnaError> {
        let source = self.root.join(INDEX_DIR).join(database_name);
        fs::copy(&source, destination).map_err(|err| ScrnaError::IndexHttp(err.to_string()))?;
        self.downloads
            .lock()
            .unwrap()
            .push(format!("database:{database_name}"));
        Ok(())
    }

    fn fetch_database_modified(&self) -> Result<i64, ScrnaError> {
        self.modified
            .lock()
            .unwrap()
            .ok_or_else(|| ScrnaError::IndexHttp("connection refused".to_string()))
    }
}

pub fn config(cache: &Path) -> ClientConfig {
    ClientConfig::with_cache_dir(Utf8PathBuf::from_path_buf(cache.to_path_buf()).unwrap())
}

/// Writes the dataset fixtures and the published index under
/// `{temp}/remote`.
pub fn remote(temp: &tempfile::TempDir) -> PathBuf {
    let remote = temp.path().join("remote");
    fs::create_dir_all(&remote).unwrap();
    write_fixtures(&remote);
    publish_index(&remote, DATABASE_NAME);
    remote
}

/// A client over a fresh remote and an empty cache.
pub fn client(temp: &tempfile::TempDir) -> ScRnaSeq<MockGypsum> {
    client_with(temp, |_| {})
}

pub fn client_with(
    temp: &tempfile::TempDir,
    adjust: impl FnOnce(&mut ClientConfig),
) -> ScRnaSeq<MockGypsum> {
    let remote = remote(temp);
    let mut config = config(&temp.path().join("cache"));
    adjust(&mut config);
    ScRnaSeq::new(config, MockGypsum::new(&remote))
}

/// Files of one published dataset version plus its manifest.
pub struct RemoteVersion {
    root: PathBuf,
    name: String,
    version: String,
    entries: Map<String, Value>,
}

impl RemoteVersion {
    pub fn new(root: &Path, name: &str, version: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            name: name.to_string(),
            version: version.to_string(),
            entries: Map::new(),
        }
    }

    fn dir(&self) -> PathBuf {
        self.root.join(PROJECT).join(&self.name).join(&self.version)
    }

    pub fn json(&mut self, relative: &str, content: &Value) -> &mut Self {
        let path = relative
            .split('/')
            .fold(self.dir(), |path, part| path.join(part));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let bytes = serde_json::to_vec(content).unwrap();
        fs::write(&path, &bytes).unwrap();
        self.entries.insert(
            relative.to_string(),
            json!({"size": bytes.len(), "md5sum": "0"}),
        );
        self
    }

    /// Lists `relative` as a link to the same path in `target_version`.
    pub fn link(&mut self, relative: &str, target_version: &str) -> &mut Self {
        let target = relative.split('/').fold(
            self.root.join(PROJECT).join(&self.name).join(target_version),
            |path, part| path.join(part),
        );
        let size = fs::metadata(target).unwrap().len();
        self.entries.insert(
            relative.to_string(),
            json!({
                "size": size,
                "md5sum": "0",
                "link": {
                    "project": PROJECT,
                    "asset": self.name,
                    "version": target_version,
                    "path": relative,
                }
            }),
        );
        self
    }

    pub fn finish(&self) {
        fs::create_dir_all(self.dir()).unwrap();
        fs::write(
            self.dir().join("..manifest"),
            serde_json::to_vec(&Value::Object(self.entries.clone())).unwrap(),
        )
        .unwrap();
    }

    pub fn local_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir()).unwrap()
    }
}

fn join(dir: &str, relative: &str) -> String {
    if dir.is_empty() {
        relative.to_string()
    } else {
        format!("{dir}/{relative}")
    }
}

pub fn experiment(
    remote: &mut RemoteVersion,
    dir: &str,
    kind: &str,
    dims: [usize; 2],
    main_experiment_name: Option<&str>,
) {
    let mut descriptor = json!({
        "type": kind,
        "summarized_experiment": {"version": "1.0", "dimensions": dims},
    });
    if kind == "single_cell_experiment" {
        descriptor["single_cell_experiment"] =
            json!({"version": "1.0", "main_experiment_name": main_experiment_name});
    }
    remote.json(&join(dir, "OBJECT"), &descriptor);
}

pub fn names(remote: &mut RemoteVersion, dir: &str, names: &[&str]) {
    remote.json(&join(dir, "names.json"), &json!(names));
}

pub fn dense(remote: &mut RemoteVersion, dir: &str, shape: [usize; 2], dtype: &str, values: Value) {
    remote.json(
        &join(dir, "OBJECT"),
        &json!({
            "type": "dense_array",
            "dense_array": {"version": "1.0", "shape": shape, "dtype": dtype},
        }),
    );
    remote.json(&join(dir, "array.json"), &json!({ "values": values }));
}

pub fn sparse(
    remote: &mut RemoteVersion,
    dir: &str,
    shape: [usize; 2],
    dtype: &str,
    indptr: &[usize],
    indices: &[usize],
    data: Value,
) {
    remote.json(
        &join(dir, "OBJECT"),
        &json!({
            "type": "compressed_sparse_matrix",
            "compressed_sparse_matrix": {"version": "1.0", "shape": shape, "dtype": dtype},
        }),
    );
    remote.json(
        &join(dir, "matrix.json"),
        &json!({"indptr": indptr, "indices": indices, "data": data}),
    );
}

pub fn frame(
    remote: &mut RemoteVersion,
    dir: &str,
    row_count: usize,
    row_names: Option<&[&str]>,
    columns: Value,
) {
    remote.json(
        &join(dir, "OBJECT"),
        &json!({"type": "data_frame", "data_frame": {"version": "1.0", "row_count": row_count}}),
    );
    remote.json(
        &join(dir, "contents.json"),
        &json!({"row_names": row_names, "columns": columns}),
    );
}

/// Counts of the zeisel fixture in column-major order.
pub const ZEISEL_COUNTS: [f64; 12] = [1.0, 0.0, 3.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

pub fn write_fixtures(root: &Path) {
    // Two versions of a single-cell dataset stored at the version root.
    let mut old = RemoteVersion::new(root, "zeisel-brain-2015", "2023-01-01");
    experiment(&mut old, "", "summarized_experiment", [4, 3], None);
    old.json(
        "_bioconductor.json",
        &json!({"title": "Brain scRNA-seq data (Zeisel)", "taxonomy_id": ["10090"]}),
    );
    old.finish();

    let mut zeisel = RemoteVersion::new(root, "zeisel-brain-2015", "2023-12-14");
    experiment(&mut zeisel, "", "single_cell_experiment", [4, 3], Some("endogenous"));
    names(&mut zeisel, "assays", &["counts", "logcounts"]);
    sparse(
        &mut zeisel,
        "assays/0",
        [4, 3],
        "integer",
        &[0, 2, 3, 3],
        &[0, 2, 1],
        json!([1, 3, 5]),
    );
    dense(
        &mut zeisel,
        "assays/1",
        [4, 3],
        "number",
        json!([0.69, 0.0, 1.39, 0.0, 0.0, 1.79, null, 0.0, 0.0, 0.0, 0.0, 0.0]),
    );
    frame(
        &mut zeisel,
        "row_data",
        4,
        Some(&["Tspan12", "Tshz1", "Fnbp1l", "Adamts15"]),
        json!([{"name": "featureType", "data": {"type": "string", "values": ["endogenous", "endogenous", "endogenous", "endogenous"]}}]),
    );
    frame(
        &mut zeisel,
        "column_data",
        3,
        Some(&["1772071015_C02", "1772071017_G12", "1772071017_A05"]),
        json!([
            {"name": "level1class", "data": {"type": "string", "values": ["interneurons", "interneurons", null]}},
            {"name": "age", "data": {"type": "integer", "values": [21, 20, 20]}}
        ]),
    );
    names(&mut zeisel, "reduced_dimensions", &["PCA"]);
    dense(
        &mut zeisel,
        "reduced_dimensions/0",
        [3, 2],
        "number",
        json!([0.1, 0.2, 0.3, -1.0, -2.0, -3.0]),
    );
    names(&mut zeisel, "alternative_experiments", &["ERCC"]);
    experiment(&mut zeisel, "alternative_experiments/0", "summarized_experiment", [2, 3], None);
    names(&mut zeisel, "alternative_experiments/0/assays", &["counts"]);
    dense(
        &mut zeisel,
        "alternative_experiments/0/assays/0",
        [2, 3],
        "number",
        json!([10.0, 0.0, 12.0, 1.0, 0.0, 0.0]),
    );
    frame(
        &mut zeisel,
        "alternative_experiments/0/column_data",
        3,
        None,
        json!([{"name": "spike_total", "data": {"type": "number", "values": [10.0, 13.0, 0.0]}}]),
    );
    names(&mut zeisel, "column_pairs", &["neighbors"]);
    zeisel.json(
        "column_pairs/0/OBJECT",
        &json!({"type": "paired_relation", "paired_relation": {"version": "1.0"}}),
    );
    zeisel.json("column_pairs/0/contents.json", &json!({"first": [0, 1], "second": [1, 2]}));
    zeisel.link("_bioconductor.json", "2023-01-01");
    zeisel.finish();
    fs::write(
        root.join(PROJECT).join("zeisel-brain-2015").join("..latest"),
        r#"{"version": "2023-12-14"}"#,
    )
    .unwrap();

    // A version holding two sub-datasets and no root object.
    let mut organs = RemoteVersion::new(root, "he-organs-2020", "2023-12-21");
    for (dir, title) in [("human", "Human organ atlas"), ("mouse", "Mouse organ atlas")] {
        experiment(&mut organs, dir, "summarized_experiment", [2, 2], None);
        names(&mut organs, &join(dir, "assays"), &["counts"]);
        dense(
            &mut organs,
            &join(dir, "assays/0"),
            [2, 2],
            "integer",
            json!([1, 2, 3, 4]),
        );
        organs.json(&join(dir, "_bioconductor.json"), &json!({ "title": title }));
    }
    organs.finish();

    // Annotations disagree with the assay dimensions.
    let mut broken = RemoteVersion::new(root, "broken-2020", "2024-01-01");
    experiment(&mut broken, "", "summarized_experiment", [3, 2], None);
    names(&mut broken, "assays", &["counts"]);
    dense(&mut broken, "assays/0", [3, 2], "integer", json!([1, 2, 3, 4, 5, 6]));
    frame(&mut broken, "row_data", 4, None, json!([]));
    broken.json("_bioconductor.json", &json!([1, 2]));
    broken.finish();
}

pub struct IndexRow<'a> {
    pub project: &'a str,
    pub asset: &'a str,
    pub version: &'a str,
    pub latest: bool,
    pub path: &'a str,
    pub metadata: Value,
}

pub fn index_rows() -> Vec<IndexRow<'static>> {
    let zeisel = |title: &str| {
        json!({
            "title": title,
            "description": "Mouse brain cortex and hippocampus",
            "taxonomy_id": ["10090"],
            "genome": ["GRCm38"],
            "bioconductor_version": "3.19",
            "maintainer_name": "Aaron Lun",
            "maintainer_email": "infinite.monkeys.with.keyboards@gmail.com",
            "sources": [{"provider": "GEO", "id": "GSE60361"}],
            "applications": {"takane": {
                "type": "single_cell_experiment",
                "summarized_experiment": {
                    "rows": 4,
                    "columns": 3,
                    "assays": ["counts", "logcounts"],
                    "column_annotations": ["level1class", "age"]
                },
                "single_cell_experiment": {
                    "reduced_dimensions": ["PCA"],
                    "alternative_experiments": ["ERCC"]
                }
            }}
        })
    };
    vec![
        IndexRow {
            project: PROJECT,
            asset: "zeisel-brain-2015",
            version: "2023-12-14",
            latest: true,
            path: "_bioconductor.json",
            metadata: zeisel("Brain scRNA-seq data (Zeisel)"),
        },
        IndexRow {
            project: PROJECT,
            asset: "zeisel-brain-2015",
            version: "2023-01-01",
            latest: false,
            path: "_bioconductor.json",
            metadata: zeisel("Brain scRNA-seq data (Zeisel), first release"),
        },
        IndexRow {
            project: PROJECT,
            asset: "he-organs-2020",
            version: "2023-12-21",
            latest: true,
            path: "human/_bioconductor.json",
            metadata: json!({
                "title": "Human organ atlas",
                "description": "Human pancreas and liver",
                "taxonomy_id": ["9606"],
                "genome": ["GRCh38"]
            }),
        },
        IndexRow {
            project: PROJECT,
            asset: "he-organs-2020",
            version: "2023-12-21",
            latest: true,
            path: "mouse/_bioconductor.json",
            metadata: json!({
                "title": "Mouse organ atlas",
                "description": "Mouse pancreas",
                "taxonomy_id": ["10090"],
                "genome": ["GRCm38"]
            }),
        },
        IndexRow {
            project: "celldex",
            asset: "immgen",
            version: "2024-02-26",
            latest: true,
            path: "_bioconductor.json",
            metadata: json!({"title": "Mouse brain immune reference", "taxonomy_id": ["10090"]}),
        },
    ]
}

fn tokens(text: &str) -> Vec<String> {
    let separators = Regex::new(r"[^\p{L}\p{N}_-]+").unwrap();
    separators
        .split(&text.to_lowercase())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn field_tokens(metadata: &Value) -> Vec<(String, String)> {
    let mut pairs = BTreeSet::new();
    if let Value::Object(map) = metadata {
        for (field, value) in map {
            let texts = match value {
                Value::String(text) => vec![text.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            for text in texts {
                for token in tokens(&text) {
                    pairs.insert((field.clone(), token));
                }
            }
        }
    }
    pairs.into_iter().collect()
}

/// Writes a metadata index with the same tables the published one has.
pub fn build_index(path: &Path, rows: &[IndexRow<'_>]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r"
        CREATE TABLE versions (vid INTEGER PRIMARY KEY, project TEXT, asset TEXT, version TEXT, latest INTEGER);
        CREATE TABLE paths (pid INTEGER PRIMARY KEY, vid INTEGER, path TEXT, metadata TEXT);
        CREATE TABLE tokens (tid INTEGER PRIMARY KEY, token TEXT UNIQUE);
        CREATE TABLE fields (fid INTEGER PRIMARY KEY, field TEXT UNIQUE);
        CREATE TABLE links (pid INTEGER, fid INTEGER, tid INTEGER);
        ",
    )
    .unwrap();

    for row in rows {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT vid FROM versions WHERE project = ?1 AND asset = ?2 AND version = ?3",
                params![row.project, row.asset, row.version],
                |r| r.get(0),
            )
            .ok();
        let vid = match existing {
            Some(vid) => vid,
            None => {
                conn.execute(
                    "INSERT INTO versions (project, asset, version, latest) VALUES (?1, ?2, ?3, ?4)",
                    params![row.project, row.asset, row.version, row.latest as i64],
                )
                .unwrap();
                conn.last_insert_rowid()
            }
        };
        conn.execute(
            "INSERT INTO paths (vid, path, metadata) VALUES (?1, ?2, ?3)",
            params![vid, row.path, row.metadata.to_string()],
        )
        .unwrap();
        let pid = conn.last_insert_rowid();

        for (field, token) in field_tokens(&row.metadata) {
            conn.execute("INSERT OR IGNORE INTO fields (field) VALUES (?1)", params![field])
                .unwrap();
            conn.execute("INSERT OR IGNORE INTO tokens (token) VALUES (?1)", params![token])
                .unwrap();
            conn.execute(
                "INSERT INTO links (pid, fid, tid) SELECT ?1, fields.fid, tokens.tid \
                 FROM fields, tokens WHERE fields.field = ?2 AND tokens.token = ?3",
                params![pid, field, token],
            )
            .unwrap();
        }
    }
}

/// Publishes the fixture index under `database_name` in the remote root.
pub fn publish_index(remote: &Path, database_name: &str) {
    let dir = remote.join(INDEX_DIR);
    fs::create_dir_all(&dir).unwrap();
    build_index(&dir.join(database_name), &index_rows());
}
