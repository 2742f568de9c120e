// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that pushdeploy reads its
//! host entries from, to simplify the process of deserialization. File I/O
//! is left to the caller to figure out.
//!
//! # General Layout
//!
//! The configuration file is a TOML document with one table per host under
//! `hosts`. Each host entry names the production host to push to, how to
//! reach it over SSH, and the deployment options for it:
//!
//! ```toml
//! [hosts.production]
//! host = "plone@www.example.com:2222"
//! identity-files = ["~/.ssh/deploy_ed25519"]
//! ssh-options = "-o StrictHostKeyChecking=accept-new"
//!
//! [hosts.production.options]
//! path = "/srv/www.example.com"
//! remote-sudo = true
//! restart = "supervisorctl restart site:*"
//! ```

use crate::{
    options::{normalize, OptionError},
    target::{RemoteTarget, Session, TargetError},
};

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, str::FromStr};
use toml::Value;

/// Top-level configuration layout.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host entries by name.
    #[serde(default)]
    pub hosts: BTreeMap<String, HostEntry>,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on everything that names a local file.
        for entry in config.hosts.values_mut() {
            for file in &mut entry.identity_files {
                *file = shellexpand::full(file.as_str())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned();
            }

            if let Some(Value::String(path)) = entry.options.get_mut("path") {
                *path = shellexpand::full(path.as_str())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned();
            }
        }

        Ok(config)
    }
}

impl Config {
    /// Select host entry by name.
    ///
    /// Without a name, the only host entry is selected.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownHost`] if no entry has the given name.
    /// - Return [`ConfigError::AmbiguousHost`] if no name is given, and there
    ///   is not exactly one entry.
    pub fn select(&self, name: Option<&str>) -> Result<(&str, &HostEntry)> {
        match name {
            Some(name) => self
                .hosts
                .get_key_value(name)
                .map(|(name, entry)| (name.as_str(), entry))
                .ok_or_else(|| ConfigError::UnknownHost(name.into())),
            None => {
                let mut entries = self.hosts.iter();
                match (entries.next(), entries.next()) {
                    (Some((name, entry)), None) => Ok((name.as_str(), entry)),
                    _ => Err(ConfigError::AmbiguousHost(self.hosts.keys().cloned().collect())),
                }
            }
        }
    }
}

/// Host entry layout.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HostEntry {
    /// Production host in `[user@]host[:port]` form.
    pub host: String,

    /// SSH private keys to authenticate with.
    #[serde(default)]
    pub identity_files: Vec<String>,

    /// Extra raw options for every SSH connection.
    #[serde(default)]
    pub ssh_options: Option<String>,

    /// Deployment options, normalized on session start.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl HostEntry {
    /// Resolve host entry into immutable deployment session.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Target`] if host string cannot be resolved.
    /// - Return [`ConfigError::Option`] if SSH options cannot be split.
    pub fn session(&self, default_user: &str) -> Result<Session> {
        let ssh_options = match &self.ssh_options {
            Some(options) => shell_words::split(options).map_err(|err| OptionError::Invalid {
                key: "ssh-options".into(),
                reason: err.to_string(),
            })?,
            None => Vec::new(),
        };

        let target = RemoteTarget::parse(&self.host, default_user)?
            .with_identity_files(self.identity_files.iter().map(PathBuf::from))
            .with_ssh_options(ssh_options);

        Ok(Session::new(target, normalize(&self.options)))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Host entry does not exist.
    #[error("no host entry named {0:?}")]
    UnknownHost(String),

    /// Host entry must be named explicitly.
    #[error("select a host entry with --host, available: {0:?}")]
    AmbiguousHost(Vec<String>),

    /// Host string cannot be resolved.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Host entry carries unusable option.
    #[error(transparent)]
    Option(#[from] OptionError),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
