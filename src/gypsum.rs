use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::domain::{DatasetKey, DatasetName};
use crate::error::ScrnaError;
use crate::manifest::Manifest;

/// Read-only view of the gypsum backend and the metadata index it
/// publishes.
pub trait GypsumClient: Send + Sync {
    fn fetch_manifest(&self, key: &DatasetKey) -> Result<Manifest, ScrnaError>;
    /// Streams the file stored under the backend key `key` into
    /// `destination`.
    fn download_file(&self, key: &str, destination: &Path) -> Result<(), ScrnaError>;
    fn list_versions(&self, project: &str, name: &DatasetName) -> Result<Vec<String>, ScrnaError>;
    fn fetch_latest(&self, project: &str, name: &DatasetName) -> Result<String, ScrnaError>;
    fn download_database(&self, database_name: &str, destination: &Path)
    -> Result<(), ScrnaError>;
    /// Unix time at which the published index last changed.
    fn fetch_database_modified(&self) -> Result<i64, ScrnaError>;
}

#[derive(Clone)]
pub struct GypsumHttpClient {
    client: Client,
    rest_url: String,
    database_url: String,
}

#[derive(Deserialize)]
struct LatestVersion {
    version: String,
}

impl GypsumHttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ScrnaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("scrnaseq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?;
        Ok(Self {
            client,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            database_url: config.database_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{rest_url}/file/{key}` with the whole key encoded as one segment.
    pub fn file_url(&self, key: &str) -> Result<Url, ScrnaError> {
        let mut url =
            Url::parse(&self.rest_url).map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ScrnaError::GypsumHttp(format!("invalid base URL {}", self.rest_url)))?
            .pop_if_empty()
            .push("file")
            .push(key);
        Ok(url)
    }

    fn get_file(&self, key: &str) -> Result<Response, ScrnaError> {
        let url = self.file_url(key)?;
        self.send_with_retries(|| self.client.get(url.clone()), ScrnaError::GypsumHttp)
    }

    fn handle_status(response: Response) -> Result<Response, ScrnaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "gypsum request failed".to_string());
        Err(ScrnaError::GypsumStatus { status, message })
    }

    fn handle_index_status(response: Response) -> Result<Response, ScrnaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "metadata index request failed".to_string());
        Err(ScrnaError::IndexStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
        transport_error: fn(String) -> ScrnaError,
    ) -> Result<Response, ScrnaError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(transport_error(err.to_string()));
                }
            }
        }
    }
}

impl GypsumClient for GypsumHttpClient {
    fn fetch_manifest(&self, key: &DatasetKey) -> Result<Manifest, ScrnaError> {
        let response = self.get_file(&key.file_key("..manifest"))?;
        if response.status().as_u16() == 404 {
            return Err(ScrnaError::DatasetNotFound(key.to_string()));
        }
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?;
        Manifest::parse(&body)
    }

    fn download_file(&self, key: &str, destination: &Path) -> Result<(), ScrnaError> {
        let response = self.get_file(key)?;
        if response.status().as_u16() == 404 {
            return Err(ScrnaError::FileNotFound(key.to_string()));
        }
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?;
        Ok(())
    }

    fn list_versions(&self, project: &str, name: &DatasetName) -> Result<Vec<String>, ScrnaError> {
        let prefix = format!("{project}/{name}/");
        let url = format!("{}/list", self.rest_url);
        let response = self.send_with_retries(
            || {
                self.client
                    .get(&url)
                    .query(&[("prefix", prefix.as_str()), ("recursive", "false")])
            },
            ScrnaError::GypsumHttp,
        )?;
        let response = Self::handle_status(response)?;
        let listing: Vec<String> = response
            .json()
            .map_err(|err| ScrnaError::GypsumHttp(err.to_string()))?;
        let versions = parse_version_listing(&prefix, listing);
        if versions.is_empty() {
            return Err(ScrnaError::DatasetNotFound(name.to_string()));
        }
        Ok(versions)
    }

    fn fetch_latest(&self, project: &str, name: &DatasetName) -> Result<String, ScrnaError> {
        let response = self.get_file(&format!("{project}/{name}/..latest"))?;
        if response.status().as_u16() == 404 {
            return Err(ScrnaError::DatasetNotFound(name.to_string()));
        }
        let response = Self::handle_status(response)?;
        let latest: LatestVersion = response
            .json()
            .map_err(|err| ScrnaError::Metadata(format!("malformed ..latest: {err}")))?;
        Ok(latest.version)
    }

    fn download_database(
        &self,
        database_name: &str,
        destination: &Path,
    ) -> Result<(), ScrnaError> {
        let url = format!("{}/{database_name}", self.database_url);
        let response = self.send_with_retries(|| self.client.get(&url), ScrnaError::IndexHttp)?;
        let mut response = Self::handle_index_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| ScrnaError::IndexHttp(err.to_string()))?;
        Ok(())
    }

    fn fetch_database_modified(&self) -> Result<i64, ScrnaError> {
        let url = format!("{}/modified", self.database_url);
        let response = self.send_with_retries(|| self.client.get(&url), ScrnaError::IndexHttp)?;
        let response = Self::handle_index_status(response)?;
        let body = response
            .text()
            .map_err(|err| ScrnaError::IndexHttp(err.to_string()))?;
        parse_modified(&body)
    }
}

/// Turns a `list?prefix=` response into bare version names.
pub fn parse_version_listing(prefix: &str, listing: Vec<String>) -> Vec<String> {
    listing
        .into_iter()
        .filter_map(|entry| {
            let folder = entry.strip_suffix('/')?;
            let version = folder.strip_prefix(prefix).unwrap_or(folder);
            (!version.is_empty() && !version.starts_with("..")).then(|| version.to_string())
        })
        .collect()
}

pub fn parse_modified(body: &str) -> Result<i64, ScrnaError> {
    let trimmed = body.trim();
    trimmed
        .parse::<i64>()
        .or_else(|_| trimmed.parse::<f64>().map(|secs| secs as i64))
        .map_err(|_| ScrnaError::IndexHttp(format!("invalid modification time {trimmed:?}")))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
