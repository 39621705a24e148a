//! Read access to the cached metadata index.
//!
//! The index is a SQLite database with one `versions` row per published
//! (project, asset, version), one `paths` row per metadata document and a
//! token table linking every `paths` row to the tokens of each metadata
//! field:
//!
//! ```text
//! versions(vid, project, asset, version, latest)
//! paths(pid, vid, path, metadata)
//! tokens(tid, token)
//! fields(fid, field)
//! links(pid, fid, tid)
//! ```
//!
//! Rows come back in whatever order SQLite produces them; no ordering is
//! imposed.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, Row, params_from_iter};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ScrnaError;
use crate::query::SearchQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSource {
    pub provider: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
}

/// One published dataset (or sub-dataset) with its flattened metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub name: String,
    pub version: String,
    /// Sub-dataset path, `None` for datasets stored at the version root.
    pub path: Option<String>,
    /// Only reported when all versions were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<bool>,
    pub object: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub taxonomy_id: Vec<String>,
    pub genome: Vec<String>,
    pub rows: Option<u64>,
    pub columns: Option<u64>,
    pub assays: Vec<String>,
    pub column_annotations: Vec<String>,
    pub reduced_dimensions: Vec<String>,
    pub alternative_experiments: Vec<String>,
    pub bioconductor_version: Option<String>,
    pub maintainer_name: Option<String>,
    pub maintainer_email: Option<String>,
    pub sources: Vec<DatasetSource>,
    pub metadata: Map<String, Value>,
}

pub struct MetadataIndex {
    conn: Connection,
}

struct RawRow {
    metadata: String,
    asset: String,
    version: String,
    path: String,
    latest: Option<i64>,
}

impl MetadataIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScrnaError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| ScrnaError::IndexQuery(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Every dataset of `project`; only latest versions when `latest`.
    pub fn list(&self, project: &str, latest: bool) -> Result<Vec<DatasetRecord>, ScrnaError> {
        self.select(project, latest, None)
    }

    /// Datasets of `project` whose metadata matches `query`.
    pub fn search(
        &self,
        project: &str,
        query: &SearchQuery,
        latest: bool,
    ) -> Result<Vec<DatasetRecord>, ScrnaError> {
        self.select(project, latest, Some(query))
    }

    fn select(
        &self,
        project: &str,
        latest: bool,
        query: Option<&SearchQuery>,
    ) -> Result<Vec<DatasetRecord>, ScrnaError> {
        let mut sql = String::from(
            "SELECT paths.metadata, versions.asset, versions.version, paths.path",
        );
        if !latest {
            sql.push_str(", versions.latest");
        }
        sql.push_str(
            " FROM paths LEFT JOIN versions ON paths.vid = versions.vid WHERE versions.project = ?",
        );
        if latest {
            sql.push_str(" AND versions.latest = 1");
        }

        let mut parameters = vec![project.to_string()];
        if let Some(query) = query {
            let filter = query.to_sql_filter("paths.pid")?;
            sql.push_str(" AND ");
            sql.push_str(&filter.clause);
            parameters.extend(filter.parameters);
        }
        tracing::debug!(%sql, "querying metadata index");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| ScrnaError::IndexQuery(err.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(parameters.iter()), |row| {
                read_row(row, latest)
            })
            .map_err(|err| ScrnaError::IndexQuery(err.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(|err| ScrnaError::IndexQuery(err.to_string()))?;
            records.push(to_record(row)?);
        }
        Ok(records)
    }
}

fn read_row(row: &Row<'_>, latest: bool) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        metadata: row.get(0)?,
        asset: row.get(1)?,
        version: row.get(2)?,
        path: row.get(3)?,
        latest: if latest { None } else { row.get(4)? },
    })
}

/// Directory of the metadata document, `None` at the version root.
fn dataset_path(document: &str) -> Option<String> {
    document
        .rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
}

fn to_record(row: RawRow) -> Result<DatasetRecord, ScrnaError> {
    let value: Value = serde_json::from_str(&row.metadata).map_err(|err| {
        ScrnaError::Metadata(format!("{}/{}: {err}", row.asset, row.version))
    })?;
    let Value::Object(metadata) = value else {
        return Err(ScrnaError::Metadata(format!(
            "{}/{}: metadata is not a JSON object",
            row.asset, row.version
        )));
    };

    let takane = metadata
        .get("applications")
        .and_then(|value| value.get("takane"));
    let experiment = takane.and_then(|value| value.get("summarized_experiment"));
    let single_cell = takane.and_then(|value| value.get("single_cell_experiment"));

    Ok(DatasetRecord {
        name: row.asset,
        version: row.version,
        path: dataset_path(&row.path),
        latest: row.latest.map(|flag| flag == 1),
        object: string_at(takane, "type"),
        title: text_of(&metadata, "title"),
        description: text_of(&metadata, "description"),
        taxonomy_id: strings_at(metadata.get("taxonomy_id")),
        genome: strings_at(metadata.get("genome")),
        rows: experiment
            .and_then(|value| value.get("rows"))
            .and_then(Value::as_u64),
        columns: experiment
            .and_then(|value| value.get("columns"))
            .and_then(Value::as_u64),
        assays: strings_at(experiment.and_then(|value| value.get("assays"))),
        column_annotations: strings_at(
            experiment.and_then(|value| value.get("column_annotations")),
        ),
        reduced_dimensions: strings_at(
            single_cell.and_then(|value| value.get("reduced_dimensions")),
        ),
        alternative_experiments: strings_at(
            single_cell.and_then(|value| value.get("alternative_experiments")),
        ),
        bioconductor_version: text_of(&metadata, "bioconductor_version"),
        maintainer_name: text_of(&metadata, "maintainer_name"),
        maintainer_email: text_of(&metadata, "maintainer_email"),
        sources: sources_of(metadata.get("sources")),
        metadata,
    })
}

fn text_of(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_at(value: Option<&Value>, key: &str) -> Option<String> {
    value
        .and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn strings_at(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(text)) => vec![text.clone()],
        _ => Vec::new(),
    }
}

fn sources_of(value: Option<&Value>) -> Vec<DatasetSource> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| DatasetSource {
            provider: string_at(Some(item), "provider"),
            id: string_at(Some(item), "id"),
            version: string_at(Some(item), "version"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_directory_of_document() {
        assert_eq!(dataset_path("_bioconductor.json"), None);
        assert_eq!(
            dataset_path("human/_bioconductor.json"),
            Some("human".to_string())
        );
        assert_eq!(
            dataset_path("a/b/_bioconductor.json"),
            Some("a/b".to_string())
        );
    }

    #[test]
    fn strings_accept_scalars_and_lists() {
        let value = serde_json::json!(["10090", 9606]);
        assert_eq!(strings_at(Some(&value)), vec!["10090", "9606"]);
        let value = serde_json::json!("GRCm38");
        assert_eq!(strings_at(Some(&value)), vec!["GRCm38"]);
        assert!(strings_at(None).is_empty());
    }
}
