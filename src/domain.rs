use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScrnaError;

/// Name of a dataset (a gypsum asset), e.g. `zeisel-brain-2015`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = ScrnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_valid_key_component(normalized) {
            return Err(ScrnaError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Version label of a dataset. Versions are date-like but only ever
/// compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetVersion(String);

impl DatasetVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetVersion {
    type Err = ScrnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_valid_key_component(normalized) {
            return Err(ScrnaError::InvalidVersion(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Relative path of a sub-dataset inside a dataset version, e.g. `human`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubPath(String);

impl SubPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, file: &str) -> String {
        format!("{}/{}", self.0, file)
    }
}

impl fmt::Display for SubPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubPath {
    type Err = ScrnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_end_matches('/');
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('/')
            && normalized
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if !is_valid {
            return Err(ScrnaError::InvalidPath(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// A pinned (name, version) pair within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub project: String,
    pub name: DatasetName,
    pub version: DatasetVersion,
}

impl DatasetKey {
    pub fn new(project: &str, name: DatasetName, version: DatasetVersion) -> Self {
        Self {
            project: project.to_string(),
            name,
            version,
        }
    }

    /// Backend key prefix of this version, without a trailing slash.
    pub fn prefix(&self) -> String {
        format!(
            "{}/{}/{}",
            self.project,
            self.name.as_str(),
            self.version.as_str()
        )
    }

    pub fn file_key(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix(), relative)
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

fn is_valid_key_component(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with("..")
        && value
            .chars()
            .all(|ch| !ch.is_control() && ch != '/' && ch != '\\')
}
