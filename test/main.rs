// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use pushdeploy::{
    command::{Host, Invocation, RunError, Runner},
    HostEntry, Session, Workflow,
};

use anyhow::Result;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use toml::Value;

/// Runner that records every invocation instead of running it.
///
/// Invocations whose rendered command contains one of the failure needles
/// exit unsuccessfully.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    failing: Vec<String>,
    seen: RefCell<Vec<Invocation>>,
}

impl RecordingRunner {
    pub(crate) fn failing(needles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            failing: needles.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        self.seen.borrow().clone()
    }

    /// Host and argument vector of each recorded invocation.
    pub(crate) fn commands(&self) -> Vec<(Host, Vec<String>)> {
        self.seen
            .borrow()
            .iter()
            .map(|invocation| (invocation.host, invocation.command.argv()))
            .collect()
    }
}

impl Runner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> pushdeploy::command::Result<()> {
        self.seen.borrow_mut().push(invocation.clone());

        let rendered = invocation.command.to_string();
        if self.failing.iter().any(|needle| rendered.contains(needle.as_str())) {
            return Err(RunError::Status {
                command: rendered,
                code: Some(1),
            });
        }

        Ok(())
    }
}

/// Staging buildout laid out in a temporary directory.
pub(crate) struct BuildoutFixture {
    root: TempDir,
}

impl BuildoutFixture {
    pub(crate) fn new(buildout_cfg: &str) -> Result<Self> {
        let root = tempfile::tempdir()?;
        write(root.path().join("buildout.cfg"), buildout_cfg)?;
        for directory in ["bin", "eggs", "parts", "var/filestorage"] {
            create_dir_all(root.path().join(directory))?;
        }

        Ok(Self { root })
    }

    pub(crate) fn with_directory(self, directory: impl AsRef<Path>) -> Result<Self> {
        create_dir_all(self.root.path().join(directory))?;
        Ok(self)
    }

    pub(crate) fn without_directory(self, directory: impl AsRef<Path>) -> Result<Self> {
        std::fs::remove_dir_all(self.root.path().join(directory))?;
        Ok(self)
    }

    pub(crate) fn path(&self) -> &Path {
        self.root.path()
    }

    /// Absolute path below buildout rendered as string.
    pub(crate) fn join(&self, relative: &str) -> String {
        let path: PathBuf = self.root.path().join(relative);
        path.to_string_lossy().into_owned()
    }

    pub(crate) fn root(&self) -> String {
        self.root.path().to_string_lossy().into_owned()
    }

    /// Session for production host `deploy@www.example.com` with the
    /// fixture's path and given extra options.
    pub(crate) fn session(
        &self,
        options: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Result<Session> {
        let mut raw = BTreeMap::new();
        raw.insert("path".to_string(), Value::String(self.root()));
        raw.extend(options.into_iter().map(|(key, value)| (key.to_string(), value)));

        let entry = HostEntry {
            host: "deploy@www.example.com".into(),
            options: raw,
            ..Default::default()
        };

        Ok(entry.session("root")?)
    }

    pub(crate) fn workflow(
        &self,
        options: impl IntoIterator<Item = (&'static str, Value)>,
        runner: RecordingRunner,
    ) -> Result<Workflow<RecordingRunner>> {
        Ok(Workflow::new(self.session(options)?, runner))
    }
}

pub(crate) fn string(value: &str) -> Value {
    Value::String(value.into())
}

pub(crate) fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}
