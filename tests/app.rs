mod common;

use std::fs;
use std::io::Write;
use std::time::Duration;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use scrnaseq::app::ListOptions;
use scrnaseq::error::{ErrorKind, ScrnaError};

use common::{DATABASE_NAME, INDEX_DIR, client, client_with};

fn database_downloads(client: &scrnaseq::app::ScRnaSeq<common::MockGypsum>) -> usize {
    client
        .gypsum()
        .downloads()
        .iter()
        .filter(|key| key.starts_with("database:"))
        .count()
}

#[test]
fn database_is_downloaded_once_within_interval() {
    let temp = tempfile::tempdir().unwrap();
    let client = client(&temp);

    let first = client.ensure_database(false).unwrap();
    assert!(first.as_std_path().is_file());
    assert_eq!(first, client.store().database_path(DATABASE_NAME));
    let stamp = client.store().read_stamp(DATABASE_NAME).unwrap();
    assert_eq!(stamp.modified, 1_700_000_000);

    // Freshness is not even checked again inside the interval.
    client.gypsum().set_modified(Some(1_800_000_000));
    let second = client.ensure_database(false).unwrap();
    assert_eq!(first, second);
    assert_eq!(database_downloads(&client), 1);
}

#[test]
fn database_is_refreshed_when_published_copy_is_newer() {
    let temp = tempfile::tempdir().unwrap();
    let client = client_with(&temp, |config| {
        config.database_check_interval = Duration::ZERO;
    });

    client.ensure_database(false).unwrap();
    client.ensure_database(false).unwrap();
    assert_eq!(database_downloads(&client), 1);

    client.gypsum().set_modified(Some(1_800_000_000));
    client.ensure_database(false).unwrap();
    assert_eq!(database_downloads(&client), 2);
    let stamp = client.store().read_stamp(DATABASE_NAME).unwrap();
    assert_eq!(stamp.modified, 1_800_000_000);
}

#[test]
fn cached_database_survives_failed_freshness_check() {
    let temp = tempfile::tempdir().unwrap();
    let client = client_with(&temp, |config| {
        config.database_check_interval = Duration::ZERO;
    });

    client.ensure_database(false).unwrap();
    client.gypsum().set_modified(None);

    let records = client.list_datasets(&ListOptions::default()).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(database_downloads(&client), 1);
}

#[test]
fn failed_freshness_check_without_cache_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let client = client(&temp);
    client.gypsum().set_modified(None);

    let err = client.list_datasets(&ListOptions::default()).unwrap_err();
    assert_matches!(err, ScrnaError::IndexHttp(_));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(
        !client
            .store()
            .database_path(DATABASE_NAME)
            .as_std_path()
            .exists()
    );
}

#[test]
fn overwrite_downloads_the_database_again() {
    let temp = tempfile::tempdir().unwrap();
    let client = client(&temp);

    client.list_datasets(&ListOptions::default()).unwrap();
    let options = ListOptions {
        overwrite: true,
        ..ListOptions::default()
    };
    client.list_datasets(&options).unwrap();
    assert_eq!(database_downloads(&client), 2);
}

#[test]
fn gzipped_database_is_inflated_into_the_cache() {
    let temp = tempfile::tempdir().unwrap();
    let client = client_with(&temp, |config| {
        config.database_name = format!("{DATABASE_NAME}.gz");
    });

    let index_dir = temp.path().join("remote").join(INDEX_DIR);
    let plain = fs::read(index_dir.join(DATABASE_NAME)).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&plain).unwrap();
    fs::write(
        index_dir.join(format!("{DATABASE_NAME}.gz")),
        encoder.finish().unwrap(),
    )
    .unwrap();

    let path = client.ensure_database(false).unwrap();
    assert_eq!(path, client.store().database_path(DATABASE_NAME));
    assert_eq!(fs::read(path.as_std_path()).unwrap(), plain);

    let records = client.list_datasets(&ListOptions::default()).unwrap();
    assert_eq!(records.len(), 3);
}

#[test]
fn versions_and_latest() {
    let temp = tempfile::tempdir().unwrap();
    let client = client(&temp);

    assert_eq!(
        client.list_versions("zeisel-brain-2015").unwrap(),
        vec!["2023-01-01", "2023-12-14"]
    );
    assert_eq!(
        client.fetch_latest_version("zeisel-brain-2015").unwrap(),
        "2023-12-14"
    );

    let err = client.fetch_latest_version("no-such-dataset").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = client.list_versions("no-such-dataset").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = client.list_versions("zeisel/brain").unwrap_err();
    assert_matches!(err, ScrnaError::InvalidDatasetName(_));
}
