// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rsync command construction.
//!
//! Staging and production are kept in sync with rsync over SSH. A single
//! synchronization request is described by a [`SyncSpec`], which [`build`]
//! turns into exactly one rsync [`CommandLine`]. Building is a pure function
//! of the request, the [`RemoteTarget`], and the [`DeploymentOptions`]. Nothing
//! is executed here.
//!
//! # Direction
//!
//! A __pull__ copies from production to staging, so the remote-qualified
//! path (`user@host:path`) is the rsync source. A __push__ copies from
//! staging to production, so the remote-qualified path is the destination.
//!
//! # Privileges
//!
//! Privilege escalation can be requested on either end independently. The
//! `remote-sudo` flag makes the remote rsync process run through sudo via
//! `--rsync-path`. The `local-sudo` flag wraps the whole local rsync process
//! in sudo.

use crate::{command::CommandLine, options::DeploymentOptions, target::RemoteTarget};

/// Archive flags used for every transfer: permissions, times, symlinks,
/// recursion, and compression.
pub const BASE_FLAGS: &str = "-pthlrz";

/// Which way data flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Production to staging.
    Pull,

    /// Staging to production.
    Push,
}

/// One directory or file synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSpec {
    pub local_path: String,
    pub remote_path: String,
    pub direction: Direction,
    pub delete: bool,
    pub exclude: Vec<String>,
    pub extra_opts: Vec<String>,
    pub ssh_opts: Vec<String>,
    pub progress: bool,
}

impl SyncSpec {
    /// Request copy of remote path into local path.
    pub fn pull(remote_path: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self::new(Direction::Pull, local_path.into(), remote_path.into())
    }

    /// Request copy of local path into remote path.
    pub fn push(local_path: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self::new(Direction::Push, local_path.into(), remote_path.into())
    }

    fn new(direction: Direction, local_path: String, remote_path: String) -> Self {
        Self {
            local_path,
            remote_path,
            direction,
            delete: false,
            exclude: Vec::new(),
            extra_opts: Vec::new(),
            ssh_opts: Vec::new(),
            progress: false,
        }
    }

    /// Delete destination files that do not exist at the source.
    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Skip paths that match glob patterns.
    pub fn with_exclude(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Pass raw options through to rsync.
    pub fn with_extra_opts(mut self, opts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_opts.extend(opts.into_iter().map(Into::into));
        self
    }

    /// Pass raw options through to the SSH transport.
    pub fn with_ssh_opts(mut self, opts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ssh_opts.extend(opts.into_iter().map(Into::into));
        self
    }

    /// Show per-file transfer progress.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

/// Build rsync command line for synchronization request.
pub fn build(spec: &SyncSpec, target: &RemoteTarget, options: &DeploymentOptions) -> CommandLine {
    let mut command = CommandLine::new("rsync");

    if spec.delete {
        command = command.arg("--delete");
    }

    for pattern in &spec.exclude {
        command = command.arg("--exclude").arg(pattern.as_str());
    }

    command = command.arg(BASE_FLAGS);
    if spec.progress {
        command = command.args(["--verbose", "--progress"]);
    }

    command = command.args(spec.extra_opts.iter().map(String::as_str));
    if options.remote_sudo() {
        command = command.arg("--rsync-path=sudo rsync");
    }

    // INVARIANT: Only override transport if plain ssh would not do.
    let mut transport = target.transport_args();
    transport.extend(spec.ssh_opts.iter().cloned());
    if !transport.is_empty() {
        let mut rsh = vec!["ssh".to_string()];
        rsh.extend(transport);
        command = command.arg(format!("--rsh={}", shell_words::join(rsh)));
    }

    let remote = target.qualify(&spec.remote_path);
    command = match spec.direction {
        Direction::Pull => command.arg(remote).arg(spec.local_path.as_str()),
        Direction::Push => command.arg(spec.local_path.as_str()).arg(remote),
    };

    command.sudo_if(options.local_sudo())
}

/// Turn directory path into rsync's "contents of directory" form.
///
/// A trailing slash makes rsync copy what is inside the directory instead
/// of the directory itself.
pub fn contents_of(path: impl AsRef<str>) -> String {
    let path = path.as_ref();
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
