// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Buildout directory annotations.
//!
//! Pushing needs to know where buildout put its scripts, eggs, and parts.
//! That layout lives in the `[buildout]` section of the buildout
//! configuration file, so it is read from there. Only the small subset of
//! buildout's configuration syntax that matters for directory layout is
//! understood:
//!
//! - `[section]` headers.
//! - `key = value` and `key: value` assignments.
//! - Indented continuation lines.
//! - `#` and `;` comment lines.
//! - `extends` chains of local files, where later files override earlier
//!   ones, and the extending file overrides everything it extends.
//! - `${buildout:directory}` substitution.
//!
//! Everything else is taken literally.

use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Buildout configuration file name used when none is configured.
pub const DEFAULT_BUILDOUT_CONFIG: &str = "buildout.cfg";

/// Key/value pairs of one configuration section.
pub type Section = BTreeMap<String, String>;

/// Directory layout of a buildout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotations {
    directory: PathBuf,
    buildout: Section,
}

impl Annotations {
    /// Read annotations from buildout configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`AnnotateError::Read`] if a configuration file cannot be read.
    /// - Return [`AnnotateError::Syntax`] if a configuration file is malformed.
    /// - Return [`AnnotateError::ExtendsCycle`] if `extends` loops back.
    #[instrument(skip(directory, config), level = "debug")]
    pub fn load(directory: impl Into<PathBuf>, config: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.into();
        let config = directory.join(config.as_ref());
        debug!("read buildout annotations from {}", config.display());

        let mut chain = Vec::new();
        let buildout = load_buildout_section(&config, &mut chain)?;
        Ok(Self::new(directory, buildout))
    }

    /// Construct annotations from already parsed `[buildout]` section.
    pub fn new(directory: impl Into<PathBuf>, buildout: Section) -> Self {
        Self {
            directory: directory.into(),
            buildout,
        }
    }

    /// Raw value of `[buildout]` option, with substitutions applied.
    pub fn get(&self, key: &str) -> Option<String> {
        self.buildout
            .get(key)
            .map(|value| value.replace("${buildout:directory}", &self.directory.to_string_lossy()))
    }

    pub fn bin_directory(&self) -> PathBuf {
        self.directory_option("bin-directory", "bin")
    }

    pub fn eggs_directory(&self) -> PathBuf {
        self.directory_option("eggs-directory", "eggs")
    }

    pub fn parts_directory(&self) -> PathBuf {
        self.directory_option("parts-directory", "parts")
    }

    /// Name of the buildout, as used by the resource cooker.
    ///
    /// # Errors
    ///
    /// - Return [`AnnotateError::Missing`] if `buildoutname` is not set.
    pub fn buildout_name(&self) -> Result<String> {
        self.get("buildoutname")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AnnotateError::Missing {
                key: "buildoutname".into(),
            })
    }

    fn directory_option(&self, key: &str, default: &str) -> PathBuf {
        let value = self.get(key).unwrap_or_else(|| default.into());
        self.directory.join(value.trim())
    }
}

fn load_buildout_section(config: &Path, chain: &mut Vec<PathBuf>) -> Result<Section> {
    if chain.iter().any(|seen| seen == config) {
        return Err(AnnotateError::ExtendsCycle {
            config_path: config.into(),
        });
    }
    chain.push(config.into());

    let content = read_to_string(config).map_err(|err| AnnotateError::Read {
        source: err,
        config_path: config.into(),
    })?;
    let sections = parse_sections(&content).map_err(|line| AnnotateError::Syntax {
        config_path: config.into(),
        line,
    })?;
    let own = sections.get("buildout").cloned().unwrap_or_default();

    let mut merged = Section::new();
    let base = config.parent().unwrap_or_else(|| Path::new("."));
    for extended in own.get("extends").map(|value| value.split_whitespace()).into_iter().flatten() {
        if extended.contains("://") {
            warn!("skip remote buildout configuration {extended}");
            continue;
        }

        merged.extend(load_buildout_section(&base.join(extended), chain)?);
    }
    merged.extend(own);

    chain.pop();
    Ok(merged)
}

/// Parse configuration text into sections.
///
/// Returns the one-based line number of the first malformed line on failure.
pub fn parse_sections(content: &str) -> std::result::Result<BTreeMap<String, Section>, usize> {
    let mut sections: BTreeMap<String, Section> = BTreeMap::new();
    let mut section: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (index, line) in content.lines().enumerate() {
        let number = index + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        // INVARIANT: Indented lines continue value of previous assignment.
        if line.starts_with([' ', '\t']) {
            let (Some(name), Some(key)) = (&section, &last_key) else {
                return Err(number);
            };
            if let Some(value) = sections.get_mut(name).and_then(|entries| entries.get_mut(key)) {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(trimmed);
            }
            continue;
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or(number)?.trim();
            sections.entry(name.to_string()).or_default();
            section = Some(name.to_string());
            last_key = None;
            continue;
        }

        let name = section.as_ref().ok_or(number)?;
        let split_at = trimmed.find(['=', ':']).ok_or(number)?;
        let (key, value) = trimmed.split_at(split_at);
        let key = key.trim().trim_end_matches(['+', '-']).trim();
        if key.is_empty() {
            return Err(number);
        }

        let value = value[1..].trim().to_string();
        sections
            .entry(name.clone())
            .or_default()
            .insert(key.to_string(), value);
        last_key = Some(key.to_string());
    }

    Ok(sections)
}

/// Buildout annotation error types.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    /// Buildout configuration file cannot be read.
    #[error("failed to read buildout configuration at {:?}", .config_path.display())]
    Read {
        #[source]
        source: std::io::Error,
        config_path: PathBuf,
    },

    /// Buildout configuration file is malformed.
    #[error("malformed buildout configuration at {:?}, line {line}", .config_path.display())]
    Syntax { config_path: PathBuf, line: usize },

    /// Buildout configuration extends itself.
    #[error("buildout configuration at {:?} extends itself", .config_path.display())]
    ExtendsCycle { config_path: PathBuf },

    /// Required annotation is not set.
    #[error("no {key:?} found in buildout section")]
    Missing { key: String },
}

/// Friendly result alias :3
pub type Result<T, E = AnnotateError> = std::result::Result<T, E>;
