// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the pushdeploy configuration file lives when the user
//! does not point at one explicitly.

use std::path::{Path, PathBuf};

/// Name of the configuration file pushdeploy looks for.
pub const CONFIG_FILE_NAME: &str = "pushdeploy.toml";

/// Determine default absolute path to user configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/pushdeploy/pushdeploy.toml`
/// as the default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoConfigDir`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("pushdeploy").join(CONFIG_FILE_NAME))
        .ok_or(NoConfigDir)
}

/// Locate configuration file to use.
///
/// Prefers an explicitly given path, then `pushdeploy.toml` in the working
/// directory if it exists, and falls back to [`default_config_path`].
///
/// # Errors
///
/// - Return [`NoConfigDir`] if the fallback path cannot be determined.
pub fn locate_config(explicit: Option<&Path>, working_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = working_dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local);
    }

    default_config_path()
}

/// Current login user name, if the environment names one.
pub fn login_user() -> Option<String> {
    ["USER", "LOGNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok())
        .filter(|user| !user.is_empty())
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoConfigDir;

/// Friendly result alias :3
pub type Result<T, E = NoConfigDir> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn explicit_config_wins() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "")?;
        let explicit = Path::new("/etc/pushdeploy/site.toml");
        assert_eq!(locate_config(Some(explicit), dir.path())?, explicit);

        Ok(())
    }

    #[test]
    fn working_directory_config_before_default() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&local, "")?;
        assert_eq!(locate_config(None, dir.path())?, local);

        Ok(())
    }

    #[sealed_test(env = [("USER", "plone"), ("LOGNAME", "ignored")])]
    fn login_user_prefers_user_variable() {
        assert_eq!(login_user(), Some("plone".into()));
    }
}
