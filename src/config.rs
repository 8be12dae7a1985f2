//! Project configuration document (`jumpstart.config.json`).
//!
//! Validation is minimal: a document must carry non-empty
//! `metadata` and `paths` sections and decode into [`Configuration`].
//! Anything else is discarded wholesale in favor of [`generate`]; documents
//! are never partially merged with the defaults.
//!
//! Keys omitted *inside* a section take their canonical value on decode, and
//! the `features` and `build` sections may be omitted entirely. Unknown keys,
//! at the top level or inside a section, are kept and written back as found.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::settings::default_source_dir;

/// File name of the configuration document inside a project directory.
pub const CONFIG_FILENAME: &str = "jumpstart.config.json";

/// Sections that must be present and non-empty for a document to be accepted.
const REQUIRED_SECTIONS: &[&str] = &["metadata", "paths"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub metadata: Metadata,
    pub paths: Paths,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Chromium version tag the project targets.
    pub base_chromium_version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "0.1".to_string(),
            description: "Custom Chromium build configuration".to_string(),
            base_chromium_version: "latest".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paths {
    /// Absolute path to the acquired source tree.
    pub chromium_src: PathBuf,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Feature toggles grouped by category.
///
/// Advisory only: nothing here feeds the build flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub security: BTreeMap<String, bool>,
    pub performance: BTreeMap<String, bool>,
    pub privacy: BTreeMap<String, bool>,
    /// Categories beyond the three known ones.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationLevel {
    O0,
    O1,
    O2,
    O3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub optimization_level: OptimizationLevel,
    pub disable_google_update_check: bool,
    pub is_debug: bool,
    pub use_jumbo_build: bool,
    pub thin_lto: bool,
    pub custom_build_flags: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::O2,
            disable_google_update_check: true,
            is_debug: false,
            use_jumbo_build: true,
            thin_lto: true,
            custom_build_flags: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Canonical default configuration.
pub fn generate() -> Configuration {
    let toggles = |pairs: &[(&str, bool)]| {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect::<BTreeMap<_, _>>()
    };

    Configuration {
        metadata: Metadata::default(),
        paths: Paths {
            chromium_src: default_source_dir(),
            extra: BTreeMap::new(),
        },
        features: Features {
            security: toggles(&[("sandboxing", true), ("site_isolation", true)]),
            performance: toggles(&[("gpu_acceleration", true)]),
            privacy: toggles(&[("tracking_protection", true), ("ad_blocking", true)]),
            extra: BTreeMap::new(),
        },
        build: BuildSettings::default(),
        extra: BTreeMap::new(),
    }
}

/// Read a configuration document, falling back to [`generate`] if it is
/// unreadable, malformed, or missing a required section.
pub fn validate(path: &Path) -> Configuration {
    match read_validated(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                path = %path.display(),
                "configuration rejected ({err:#}); using defaults"
            );
            generate()
        }
    }
}

fn read_validated(path: &Path) -> Result<Configuration> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading configuration '{}'", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing configuration '{}'", path.display()))?;

    for section in REQUIRED_SECTIONS {
        let present = document
            .get(section)
            .and_then(|value| value.as_object())
            .is_some_and(|object| !object.is_empty());
        if !present {
            bail!("missing or empty '{}' section", section);
        }
    }

    serde_json::from_value(document)
        .with_context(|| format!("decoding configuration '{}'", path.display()))
}

/// Load the persisted configuration of a project.
///
/// Returns `Ok(None)` when the project has no configuration file. That is not
/// the same as [`generate`]: callers decide what a missing file means.
pub fn load(project_dir: &Path) -> Result<Option<Configuration>> {
    let path = config_path(project_dir);
    if !path.is_file() {
        warn!(path = %path.display(), "no config file found");
        return Ok(None);
    }

    let bytes =
        fs::read(&path).with_context(|| format!("reading config '{}'", path.display()))?;
    let config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing config '{}'", path.display()))?;
    Ok(Some(config))
}

/// Persist `config` into `project_dir`, replacing any existing document.
pub fn write(project_dir: &Path, config: &Configuration) -> Result<PathBuf> {
    let path = config_path(project_dir);
    let tmp = project_dir.join(format!(".{}.tmp-{}", CONFIG_FILENAME, std::process::id()));

    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    config
        .serialize(&mut serializer)
        .context("serializing configuration")?;
    bytes.push(b'\n');

    fs::write(&tmp, &bytes)
        .with_context(|| format!("writing temporary config '{}'", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| {
            format!("renaming '{}' -> '{}'", tmp.display(), path.display())
        });
    }

    info!(path = %path.display(), "config file written");
    Ok(path)
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_FILENAME)
}
