// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment option normalization.
//!
//! Every host entry carries a flat mapping of __deployment options__, e.g.,
//! the buildout path, the users that own the deployed files, the restart
//! command, and so on. Option values are plain strings, with the exception
//! of three boolean flags: `local-sudo`, `remote-sudo`, and `local-restart`.
//!
//! # Flag Spellings
//!
//! Flags are written by hand in configuration files, so several spellings
//! are accepted for "on". A flag is considered set if and only if its value
//! is one of the following:
//!
//! - Boolean `true`.
//! - Integer `1`.
//! - One of the strings `"True"`, `"true"`, `"Yes"`, `"yes"`, or `"1"`.
//!
//! Matching is case-sensitive. Anything else, including a missing value, is
//! treated as off. After normalization each flag holds exactly `"true"` or
//! `"false"`, so the rest of the crate never has to care about spellings.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};
use toml::Value;
use tracing::warn;

/// Run commands on the staging host through sudo.
pub const LOCAL_SUDO: &str = "local-sudo";

/// Run commands on the production host through sudo.
pub const REMOTE_SUDO: &str = "remote-sudo";

/// Restart the staging site at the end of a stage run.
pub const LOCAL_RESTART: &str = "local-restart";

/// All option keys that are normalized into `"true"` or `"false"`.
pub const FLAG_KEYS: [&str; 3] = [LOCAL_SUDO, REMOTE_SUDO, LOCAL_RESTART];

const TRUTHY: [&str; 5] = ["True", "true", "Yes", "yes", "1"];
const FALSY: [&str; 6] = ["False", "false", "No", "no", "0", ""];

/// Normalize raw option mapping into [`DeploymentOptions`].
///
/// Flag keys are coerced with [`parse_flag`]. Every other key is carried over
/// as a string. Strings are kept verbatim, other scalars use their TOML
/// representation.
pub fn normalize(raw: &BTreeMap<String, Value>) -> DeploymentOptions {
    let mut options = BTreeMap::new();
    for (key, value) in raw {
        if FLAG_KEYS.contains(&key.as_str()) {
            continue;
        }

        let value = match value {
            Value::String(string) => string.clone(),
            other => other.to_string(),
        };
        options.insert(key.clone(), value);
    }

    for key in FLAG_KEYS {
        let flag = parse_flag(key, raw.get(key));
        options.insert(key.to_string(), flag.to_string());
    }

    DeploymentOptions { options }
}

/// Determine whether a flag value is one of the accepted "on" spellings.
///
/// Unknown spellings are treated as off, but a warning is emitted so that a
/// typo like `remote-sudo = "ture"` does not silently change behavior.
pub fn parse_flag(key: &str, value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return false;
    };

    match value {
        Value::Boolean(flag) => *flag,
        Value::Integer(1) => true,
        Value::Integer(0) => false,
        Value::String(string) if TRUTHY.contains(&string.as_str()) => true,
        Value::String(string) if FALSY.contains(&string.as_str()) => false,
        other => {
            warn!("unrecognized value {other} for flag {key:?}, treating it as false");
            false
        }
    }
}

/// Normalized deployment options.
///
/// # Invariant
///
/// - Keys in [`FLAG_KEYS`] are always present, and hold `"true"` or `"false"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOptions {
    options: BTreeMap<String, String>,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        normalize(&BTreeMap::new())
    }
}

impl DeploymentOptions {
    /// Lookup option by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Lookup option by key, treating empty values as missing.
    ///
    /// # Errors
    ///
    /// - Return [`OptionError::Missing`] if option is absent or empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| OptionError::Missing { key: key.into() })
    }

    /// Check if flag is set.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn local_sudo(&self) -> bool {
        self.flag(LOCAL_SUDO)
    }

    pub fn remote_sudo(&self) -> bool {
        self.flag(REMOTE_SUDO)
    }

    pub fn local_restart(&self) -> bool {
        self.flag(LOCAL_RESTART)
    }

    /// User that runs the version control tool and buildout on staging.
    pub fn buildout_user<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.get("buildout-user").unwrap_or(fallback)
    }

    /// Owner to hand deployed directories to.
    ///
    /// Uses `effective-user` (or the fallback) and appends `effective-group`
    /// whenever it is set to a non-empty value.
    pub fn effective_owner(&self, fallback: &str) -> Ownership {
        Ownership {
            user: self.get("effective-user").unwrap_or(fallback).into(),
            group: self
                .get("effective-group")
                .filter(|group| !group.is_empty())
                .map(Into::into),
        }
    }

    /// Iterate over all options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Owner specification in `chown` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub user: String,
    pub group: Option<String>,
}

impl Ownership {
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: None,
        }
    }
}

impl Display for Ownership {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.group {
            Some(group) => write!(fmt, "{}:{}", self.user, group),
            None => fmt.write_str(&self.user),
        }
    }
}

/// Deployment option error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    /// Required option is not configured.
    #[error("no {key:?} option found for the selected host")]
    Missing { key: String },

    /// Option is configured, but its value cannot be used.
    #[error("invalid value for option {key:?}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Friendly result alias :3
pub type Result<T, E = OptionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    fn raw(entries: impl IntoIterator<Item = (&'static str, Value)>) -> BTreeMap<String, Value> {
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    #[test_case(Value::Boolean(true); "boolean_true")]
    #[test_case(Value::Integer(1); "integer_one")]
    #[test_case(Value::String("True".into()); "capital_true")]
    #[test_case(Value::String("true".into()); "lower_true")]
    #[test_case(Value::String("Yes".into()); "capital_yes")]
    #[test_case(Value::String("yes".into()); "lower_yes")]
    #[test_case(Value::String("1".into()); "string_one")]
    #[test]
    fn truthy_spellings_normalize_to_true(value: Value) {
        for key in FLAG_KEYS {
            let options = normalize(&raw([(key, value.clone())]));
            pretty_assertions::assert_eq!(options.get(key), Some("true"));
        }
    }

    #[test_case(Value::Boolean(false); "boolean_false")]
    #[test_case(Value::Integer(0); "integer_zero")]
    #[test_case(Value::Integer(2); "integer_two")]
    #[test_case(Value::String("TRUE".into()); "upper_true")]
    #[test_case(Value::String("YES".into()); "upper_yes")]
    #[test_case(Value::String("on".into()); "on")]
    #[test_case(Value::String("no".into()); "lower_no")]
    #[test_case(Value::String(String::new()); "empty")]
    #[test_case(Value::Float(1.0); "float_one")]
    #[test]
    fn other_values_normalize_to_false(value: Value) {
        for key in FLAG_KEYS {
            let options = normalize(&raw([(key, value.clone())]));
            pretty_assertions::assert_eq!(options.get(key), Some("false"));
        }
    }

    #[test]
    fn absent_flags_default_to_false() {
        let options = normalize(&BTreeMap::new());
        for key in FLAG_KEYS {
            pretty_assertions::assert_eq!(options.get(key), Some("false"));
        }
    }

    #[test]
    fn flags_normalize_independently() {
        let options = normalize(&raw([
            (LOCAL_SUDO, Value::String("yes".into())),
            (REMOTE_SUDO, Value::String("nope".into())),
        ]));
        assert!(options.local_sudo());
        assert!(!options.remote_sudo());
        assert!(!options.local_restart());
    }

    #[test]
    fn other_options_pass_through() {
        let options = normalize(&raw([
            ("path", Value::String("/srv/site".into())),
            ("restart", Value::String("supervisorctl restart site:*".into())),
            ("port", Value::Integer(8080)),
        ]));
        pretty_assertions::assert_eq!(options.get("path"), Some("/srv/site"));
        pretty_assertions::assert_eq!(options.get("restart"), Some("supervisorctl restart site:*"));
        pretty_assertions::assert_eq!(options.get("port"), Some("8080"));
        pretty_assertions::assert_eq!(options.get("missing"), None);
    }

    #[test]
    fn iter_lists_flags_and_passed_options_in_key_order() {
        let options = normalize(&raw([("path", Value::String("/srv/site".into()))]));
        let result = options.iter().collect::<Vec<_>>();
        pretty_assertions::assert_eq!(
            result,
            [
                ("local-restart", "false"),
                ("local-sudo", "false"),
                ("path", "/srv/site"),
                ("remote-sudo", "false"),
            ]
        );
    }

    #[test]
    fn require_rejects_missing_and_empty_options() {
        let options = normalize(&raw([("path", Value::String(String::new()))]));
        pretty_assertions::assert_eq!(
            options.require("path"),
            Err(OptionError::Missing { key: "path".into() })
        );
        pretty_assertions::assert_eq!(
            options.require("restart"),
            Err(OptionError::Missing {
                key: "restart".into()
            })
        );
    }

    #[test]
    fn effective_owner_appends_group_when_set() {
        let options = normalize(&raw([
            ("effective-user", Value::String("plone".into())),
            ("effective-group", Value::String("www-data".into())),
        ]));
        pretty_assertions::assert_eq!(options.effective_owner("root").to_string(), "plone:www-data");

        let options = normalize(&raw([("effective-group", Value::String(String::new()))]));
        pretty_assertions::assert_eq!(options.effective_owner("deploy").to_string(), "deploy");
    }
}
