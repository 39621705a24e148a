use std::io::{self, Write};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::experiment::ExperimentSummary;
use crate::index::DatasetRecord;

pub struct JsonOutput;

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResult<'a> {
    pub name: &'a str,
    pub versions: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestResult<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

impl JsonOutput {
    pub fn print_records(records: &[DatasetRecord]) -> io::Result<()> {
        Self::print_json(records)
    }

    pub fn print_versions(result: &VersionsResult<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_latest(result: &LatestResult<'_>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_metadata(metadata: &Map<String, Value>) -> io::Result<()> {
        Self::print_json(metadata)
    }

    pub fn print_experiment(summary: &ExperimentSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
