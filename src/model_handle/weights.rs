use crate::error::{ModelError, Result};
use crate::model_handle::backend::DetectionModel;
use std::fs;
use std::path::{Path, PathBuf};

/// Where version `n` of `output` lives: `dir/stem.ext` becomes `dir/stem.v<n>.ext`.
pub fn versioned_path(output: &Path, version: u32) -> Result<PathBuf> {
    let stem = output.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
        ModelError::Config(format!("Output weights path has no file name: {}", output.display()))
    })?;
    let file_name = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.v{}.{}", stem, version, ext),
        None => format!("{}.v{}", stem, version),
    };
    Ok(output.with_file_name(file_name))
}

/// Parses the version out of a sibling file name, if it is a version of `output`.
fn parse_version(output: &Path, candidate: &str) -> Option<u32> {
    let stem = output.file_stem()?.to_str()?;
    let rest = candidate.strip_prefix(stem)?.strip_prefix(".v")?;
    let digits = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => rest.strip_suffix(ext)?.strip_suffix('.')?,
        None => rest,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One more than the highest version already saved next to `output`, starting at 1.
pub fn next_version(output: &Path) -> Result<u32> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Ok(1);
    }
    let mut highest = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if let Some(version) = entry
            .file_name()
            .to_str()
            .and_then(|name| parse_version(output, name))
        {
            highest = highest.max(version);
        }
    }
    Ok(highest + 1)
}

/// Saves the model as the next version of `output`, refreshes `output` itself as the latest
/// copy, and returns the version string (`v<n>`).
pub fn save_versioned<M: DetectionModel + ?Sized>(model: &M, output: &Path) -> Result<String> {
    let version = next_version(output)?;
    let destination = versioned_path(output, version)?;
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    model.save_weights(&destination)?;
    fs::copy(&destination, output)?;
    tracing::info!(
        "Saved weights version v{} to {}",
        version,
        destination.display()
    );
    Ok(format!("v{}", version))
}
