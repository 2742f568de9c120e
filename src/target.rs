// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote target and deployment session.
//!
//! A __remote target__ is the production host that receives pushed buildout
//! results. It is resolved once from a host string of the form
//! `[user@]host[:port]`, together with the SSH identity files and any extra
//! raw SSH options configured for it.
//!
//! A __session__ pairs the remote target with the normalized deployment
//! options of the selected host entry. Sessions are immutable, and are
//! passed explicitly to every workflow.

use crate::{command::CommandLine, options::DeploymentOptions};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

/// Port SSH listens on unless told otherwise.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Production host to push to and pull from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub identity_files: Vec<PathBuf>,
    pub ssh_options: Vec<String>,
}

impl RemoteTarget {
    /// Resolve host string into remote target.
    ///
    /// Accepts `host`, `user@host`, `host:port`, and `user@host:port`. Uses
    /// `default_user` when the host string names no user, and
    /// [`DEFAULT_SSH_PORT`] when it names no port. Bracketed IPv6 addresses
    /// like `[::1]:2222` are understood too.
    ///
    /// # Errors
    ///
    /// - Return [`TargetError::EmptyHost`] if no host name is given.
    /// - Return [`TargetError::InvalidPort`] if port is not a valid number.
    pub fn parse(host_string: &str, default_user: &str) -> Result<Self> {
        let host_string = host_string.trim();
        let (user, rest) = match host_string.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some((_, rest)) => (default_user.to_string(), rest),
            None => (default_user.to_string(), host_string),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            match bracketed.split_once(']') {
                Some((host, tail)) => (host, tail.strip_prefix(':')),
                None => (bracketed, None),
            }
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(TargetError::EmptyHost(host_string.into()));
        }

        let port = match port {
            Some(port) if !port.is_empty() => port
                .parse::<u16>()
                .map_err(|_| TargetError::InvalidPort(port.into()))?,
            _ => DEFAULT_SSH_PORT,
        };

        Ok(Self {
            user,
            host: host.into(),
            port,
            identity_files: Vec::new(),
            ssh_options: Vec::new(),
        })
    }

    /// Attach SSH identity files.
    pub fn with_identity_files(mut self, files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.identity_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Attach extra raw SSH options.
    pub fn with_ssh_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ssh_options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Remote-qualified path in rsync syntax, i.e., `user@host:path`.
    pub fn qualify(&self, path: impl AsRef<str>) -> String {
        format!("{}@{}:{}", self.user, self.host, path.as_ref())
    }

    /// Arguments for SSH that select identity files, port, and extra options.
    ///
    /// Empty when plain `ssh` would already do the right thing.
    pub fn transport_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for file in &self.identity_files {
            args.push("-i".into());
            args.push(file.to_string_lossy().into_owned());
        }

        if self.port != DEFAULT_SSH_PORT {
            args.push("-p".into());
            args.push(self.port.to_string());
        }

        args.extend(self.ssh_options.iter().cloned());
        args
    }

    /// Wrap command so that it runs on the remote through SSH.
    ///
    /// SSH hands its command to the remote login shell as a single string,
    /// so the remote command is rendered with quoting here. Commands that
    /// go through sudo get a terminal, for password prompts and hosts that
    /// set `requiretty`.
    pub fn ssh_command(&self, remote: &CommandLine) -> CommandLine {
        CommandLine::new("ssh")
            .args(self.transport_args())
            .args((remote.program() == "sudo").then_some("-t"))
            .arg(format!("{}@{}", self.user, self.host))
            .arg("--")
            .arg(remote.to_string())
    }
}

impl Display for RemoteTarget {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}@{}", self.user, self.host)?;
        if self.port != DEFAULT_SSH_PORT {
            write!(fmt, ":{}", self.port)?;
        }

        Ok(())
    }
}

/// Immutable deployment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub target: RemoteTarget,
    pub options: DeploymentOptions,
}

impl Session {
    /// Construct new session.
    pub fn new(target: RemoteTarget, options: DeploymentOptions) -> Self {
        Self { target, options }
    }

    /// User to fall back to when no buildout or effective user is configured.
    pub fn fallback_user(&self) -> &str {
        if self.target.user.is_empty() {
            "root"
        } else {
            self.target.user.as_str()
        }
    }
}

/// Remote target resolution error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Host string names no host.
    #[error("host string {0:?} does not name a host")]
    EmptyHost(String),

    /// Port is not a valid number.
    #[error("invalid ssh port {0:?}")]
    InvalidPort(String),
}

/// Friendly result alias :3
pub type Result<T, E = TargetError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("www.example.com", "deploy", "www.example.com", 22; "bare_host")]
    #[test_case("plone@www.example.com", "plone", "www.example.com", 22; "user_and_host")]
    #[test_case("www.example.com:2222", "deploy", "www.example.com", 2222; "host_and_port")]
    #[test_case("plone@10.0.0.1:2200", "plone", "10.0.0.1", 2200; "everything")]
    #[test_case("@www.example.com", "deploy", "www.example.com", 22; "stray_at_sign")]
    #[test_case("root@[::1]:2222", "root", "::1", 2222; "bracketed_ipv6")]
    #[test]
    fn parse_host_strings(input: &str, user: &str, host: &str, port: u16) {
        let target = RemoteTarget::parse(input, "deploy").unwrap();
        pretty_assertions::assert_eq!(target.user, user);
        pretty_assertions::assert_eq!(target.host, host);
        pretty_assertions::assert_eq!(target.port, port);
    }

    #[test]
    fn parse_rejects_bad_host_strings() {
        pretty_assertions::assert_eq!(
            RemoteTarget::parse("deploy@", "root"),
            Err(TargetError::EmptyHost("deploy@".into()))
        );
        pretty_assertions::assert_eq!(
            RemoteTarget::parse("www.example.com:ssh", "root"),
            Err(TargetError::InvalidPort("ssh".into()))
        );
    }

    #[test]
    fn transport_args_are_empty_for_defaults() {
        let target = RemoteTarget::parse("www.example.com", "deploy").unwrap();
        assert!(target.transport_args().is_empty());
    }

    #[test]
    fn ssh_command_quotes_remote_command() {
        let target = RemoteTarget::parse("plone@www.example.com:2222", "root")
            .unwrap()
            .with_identity_files(["/home/plone/.ssh/id_ed25519"]);
        let remote = CommandLine::new("supervisorctl").args(["restart", "site:*"]);
        let result = target.ssh_command(&remote);

        let argv = result.argv();
        pretty_assertions::assert_eq!(
            &argv[..6],
            [
                "ssh",
                "-i",
                "/home/plone/.ssh/id_ed25519",
                "-p",
                "2222",
                "plone@www.example.com",
            ]
        );
        pretty_assertions::assert_eq!(argv[6], "--");

        // INVARIANT: Remote shell must see the same argument vector.
        let remote_argv = shell_words::split(&argv[7]).unwrap();
        pretty_assertions::assert_eq!(remote_argv, remote.argv());
    }

    #[test]
    fn ssh_command_allocates_terminal_for_sudo() {
        let target = RemoteTarget::parse("plone@www.example.com", "root").unwrap();
        let remote = CommandLine::new("supervisorctl").arg("update");

        let plain = target.ssh_command(&remote).argv();
        pretty_assertions::assert_eq!(&plain[..3], ["ssh", "plone@www.example.com", "--"]);

        let escalated = target.ssh_command(&remote.clone().sudo()).argv();
        pretty_assertions::assert_eq!(&escalated[..4], ["ssh", "-t", "plone@www.example.com", "--"]);
        pretty_assertions::assert_eq!(
            shell_words::split(&escalated[4]).unwrap(),
            ["sudo", "supervisorctl", "update"]
        );
    }
}
