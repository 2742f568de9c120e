// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Everything pushdeploy does boils down to running external programs:
//! version control, buildout, rsync, chown, supervisorctl, and so on. This
//! module keeps commands as argument vectors instead of raw shell strings, so
//! that user-supplied paths and names are never reinterpreted by a shell on
//! the staging host. The one place where a shell cannot be avoided is SSH,
//! which always hands its command to the remote login shell. There the
//! argument vector is rendered with proper quoting.
//!
//! Execution goes through the [`Runner`] trait. [`SystemRunner`] spawns real
//! processes, [`DryRunner`] only reports what would be run.

use crate::target::RemoteTarget;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

/// Program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Construct new command line for program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append many arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix whole command line with `sudo`.
    pub fn sudo(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".into(),
            args,
        }
    }

    /// Prefix whole command line with `sudo` if and only if flag is set.
    pub fn sudo_if(self, flag: bool) -> Self {
        if flag {
            self.sudo()
        } else {
            self
        }
    }

    /// Run whole command line as another user through `su -c`.
    pub fn as_user(self, user: &str) -> Self {
        CommandLine::new("su")
            .arg(user)
            .arg("-c")
            .arg(self.to_string())
    }

    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    pub fn arguments(&self) -> &[String] {
        self.args.as_slice()
    }

    /// Full argument vector, program first.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(shell_words::join(self.argv()).as_str())
    }
}

/// Host a command runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// Staging host, i.e., the machine pushdeploy runs on.
    Local,

    /// Production host, reached through SSH.
    Remote,
}

/// Command bound to the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub host: Host,
    pub command: CommandLine,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn local(command: CommandLine) -> Self {
        Self {
            host: Host::Local,
            command,
            cwd: None,
        }
    }

    pub fn remote(command: CommandLine) -> Self {
        Self {
            host: Host::Remote,
            command,
            cwd: None,
        }
    }

    /// Run command from within target directory.
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Render invocation into the command line that actually gets spawned on
    /// the staging host.
    pub fn resolve(&self, target: &RemoteTarget) -> (CommandLine, Option<&Path>) {
        match self.host {
            Host::Local => (self.command.clone(), self.cwd.as_deref()),
            Host::Remote => {
                let command = match &self.cwd {
                    Some(cwd) => CommandLine::new("sh").arg("-c").arg(format!(
                        "cd {} && {}",
                        shell_words::quote(cwd.to_string_lossy().as_ref()),
                        self.command
                    )),
                    None => self.command.clone(),
                };
                (target.ssh_command(&command), None)
            }
        }
    }
}

/// Execute invocations.
///
/// Implementors block until the command finishes. A command that exits with
/// a non-zero status is an error.
pub trait Runner {
    fn run(&self, invocation: &Invocation) -> Result<()>;
}

impl<R> Runner for &R
where
    R: Runner + ?Sized,
{
    fn run(&self, invocation: &Invocation) -> Result<()> {
        (**self).run(invocation)
    }
}

/// Run invocations as real child processes.
///
/// Standard input, output, and error are inherited so that rsync progress,
/// buildout output, and sudo password prompts reach the operator.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    target: RemoteTarget,
}

impl SystemRunner {
    /// Construct new system runner for remote target.
    pub fn new(target: RemoteTarget) -> Self {
        Self { target }
    }
}

impl Runner for SystemRunner {
    #[instrument(skip(self, invocation), level = "debug")]
    fn run(&self, invocation: &Invocation) -> Result<()> {
        let (command, cwd) = invocation.resolve(&self.target);
        debug!("spawn {command}");

        let mut process = Command::new(command.program());
        process.args(command.arguments());
        if let Some(cwd) = cwd {
            process.current_dir(cwd);
        }

        let status = process
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|source| RunError::Spawn {
                program: command.program().into(),
                source,
            })?;

        if !status.success() {
            return Err(RunError::Status {
                command: invocation.command.to_string(),
                code: status.code(),
            });
        }

        Ok(())
    }
}

/// Report invocations without running anything.
#[derive(Debug, Clone)]
pub struct DryRunner {
    target: RemoteTarget,
}

impl DryRunner {
    /// Construct new dry runner for remote target.
    pub fn new(target: RemoteTarget) -> Self {
        Self { target }
    }
}

impl Runner for DryRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        let (command, cwd) = invocation.resolve(&self.target);
        match cwd {
            Some(cwd) => info!("(dry run) in {}: {command}", cwd.display()),
            None => info!("(dry run) {command}"),
        }

        Ok(())
    }
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Command could not be started or waited on.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Command exited unsuccessfully.
    #[error("command {command:?} failed with {}", exit_code(.code))]
    Status { command: String, code: Option<i32> },
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status".into(),
    }
}

/// Friendly result alias :3
pub type Result<T, E = RunError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sudo_prefixes_program() {
        let result = CommandLine::new("chown")
            .args(["-R", "plone", "/srv/site/var"])
            .sudo()
            .argv();
        assert_eq!(result, ["sudo", "chown", "-R", "plone", "/srv/site/var"]);
    }

    #[test]
    fn sudo_if_leaves_command_alone_when_unset() {
        let command = CommandLine::new("mkdir").args(["-p", "/srv/site"]);
        assert_eq!(command.clone().sudo_if(false), command);
    }

    #[test]
    fn as_user_wraps_rendered_command() {
        let result = CommandLine::new("hg")
            .args(["update", "-C", "my branch"])
            .as_user("plone");
        assert_eq!(result.program(), "su");
        assert_eq!(&result.arguments()[..2], ["plone", "-c"]);
        assert_eq!(
            shell_words::split(&result.arguments()[2]).unwrap(),
            ["hg", "update", "-C", "my branch"]
        );
    }

    #[test]
    fn display_renders_shell_executable_string() {
        let command = CommandLine::new("rsync").args(["--exclude", "it's \"quoted\"", "src/"]);
        let rendered = command.to_string();
        assert_eq!(shell_words::split(&rendered).unwrap(), command.argv());
    }

    #[test]
    fn remote_invocation_resolves_to_ssh() {
        let target = RemoteTarget::parse("plone@www.example.com", "root").unwrap();
        let invocation = Invocation::remote(CommandLine::new("supervisorctl").arg("update"));
        let (command, cwd) = invocation.resolve(&target);
        assert_eq!(
            command.argv(),
            ["ssh", "plone@www.example.com", "--", "supervisorctl update"]
        );
        assert_eq!(cwd, None);
    }

    #[test]
    fn local_invocation_keeps_working_directory() {
        let target = RemoteTarget::parse("www.example.com", "root").unwrap();
        let invocation = Invocation::local(CommandLine::new("hg").arg("pull")).in_dir("/srv/site");
        let (command, cwd) = invocation.resolve(&target);
        assert_eq!(command.argv(), ["hg", "pull"]);
        assert_eq!(cwd, Some(Path::new("/srv/site")));
    }

    fn system_runner() -> SystemRunner {
        SystemRunner::new(RemoteTarget::parse("www.example.com", "root").unwrap())
    }

    #[test]
    fn system_runner_accepts_successful_exit() {
        let invocation = Invocation::local(CommandLine::new("true"));
        assert!(system_runner().run(&invocation).is_ok());
    }

    #[test]
    fn system_runner_reports_exit_status() {
        let invocation = Invocation::local(CommandLine::new("false"));
        let result = system_runner().run(&invocation);
        assert!(matches!(
            result,
            Err(RunError::Status { ref command, code: Some(1) }) if command == "false"
        ));
    }

    #[test]
    fn system_runner_reports_spawn_failure() {
        let invocation = Invocation::local(CommandLine::new("pushdeploy-no-such-program"));
        let result = system_runner().run(&invocation);
        assert!(matches!(
            result,
            Err(RunError::Spawn { ref program, .. }) if program == "pushdeploy-no-such-program"
        ));
    }

    #[test]
    fn system_runner_uses_working_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("buildout.cfg"), "[buildout]\n")?;

        let invocation = Invocation::local(CommandLine::new("test").args(["-f", "buildout.cfg"]))
            .in_dir(dir.path());
        system_runner().run(&invocation)?;

        let empty = tempfile::tempdir()?;
        let elsewhere = Invocation::local(CommandLine::new("test").args(["-f", "buildout.cfg"]))
            .in_dir(empty.path());
        assert!(matches!(
            system_runner().run(&elsewhere),
            Err(RunError::Status { .. })
        ));

        Ok(())
    }
}
