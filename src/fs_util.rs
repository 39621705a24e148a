use std::fs;
use std::io;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::ScrnaError;

/// Inflates a gzip file into `target`.
pub fn gunzip_file(gz_path: &Path, target: &Path) -> Result<(), ScrnaError> {
    let file = fs::File::open(gz_path)
        .map_err(|err| ScrnaError::Filesystem(format!("open gzip {}: {err}", gz_path.display())))?;
    let mut decoder = GzDecoder::new(io::BufReader::new(file));
    let mut outfile =
        fs::File::create(target).map_err(|err| ScrnaError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut outfile)
        .map_err(|err| ScrnaError::Filesystem(format!("inflate {}: {err}", gz_path.display())))?;
    Ok(())
}

pub fn is_gzip_name(name: &str) -> bool {
    name.ends_with(".gz")
}
