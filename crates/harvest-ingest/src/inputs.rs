//! Input enumeration

use harvest_common::{HarvestError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Host-record files consumed by the certificate search.
pub const HOST_RECORD_SUFFIX: &str = ".json.gz";

/// List the files directly inside `dir` whose name ends with `suffix`,
/// sorted lexicographically so batch runs are reproducible.
pub fn enumerate_inputs(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(HarvestError::MissingInput(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| HarvestError::Io(e.into()))?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(suffix)
        {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
