//! Provisioning marker.
//!
//! `.jumpstart-provisioned` in the source directory means acquisition,
//! dependency installation and sync all succeeded. It is written once,
//! atomically, and checked at the start of every run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const MARKER_FILENAME: &str = ".jumpstart-provisioned";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRecord {
    pub strategy: String,
    pub provisioned_at_utc: String,
    pub attempts: u32,
}

pub fn marker_path(source_dir: &Path) -> PathBuf {
    source_dir.join(MARKER_FILENAME)
}

/// True only if the directory and the marker file inside it both exist.
/// A same-named directory without the marker does not count.
pub fn is_provisioned(source_dir: &Path) -> bool {
    source_dir.is_dir() && marker_path(source_dir).is_file()
}

pub fn read_record(source_dir: &Path) -> Result<Option<ProvisionRecord>> {
    let path = marker_path(source_dir);
    if !path.is_file() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let record = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(record))
}

pub fn mark_provisioned(source_dir: &Path, strategy: &str, attempts: u32) -> Result<ProvisionRecord> {
    let record = ProvisionRecord {
        strategy: strategy.to_string(),
        provisioned_at_utc: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("Failed to format provisioning timestamp")?,
        attempts,
    };

    let path = marker_path(source_dir);
    let tmp = source_dir.join(format!("{MARKER_FILENAME}.tmp-{}", std::process::id()));
    let json = serde_json::to_string_pretty(&record)?;
    fs::write(&tmp, format!("{json}\n"))
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| {
        format!(
            "Failed to move provisioning marker into place: {} -> {}",
            tmp.display(),
            path.display()
        )
    })?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directory_without_marker_is_not_provisioned() {
        let temp = TempDir::new().unwrap();
        assert!(!is_provisioned(temp.path()));
        assert!(!is_provisioned(&temp.path().join("missing")));
        assert_eq!(read_record(temp.path()).unwrap(), None);
    }

    #[test]
    fn marker_records_strategy_and_attempts() {
        let temp = TempDir::new().unwrap();

        let written = mark_provisioned(temp.path(), "tooling-fetch", 2).unwrap();

        assert!(is_provisioned(temp.path()));
        let record = read_record(temp.path()).unwrap().unwrap();
        assert_eq!(record, written);
        assert_eq!(record.attempts, 2);
        assert!(OffsetDateTime::parse(&record.provisioned_at_utc, &Rfc3339).is_ok());

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
