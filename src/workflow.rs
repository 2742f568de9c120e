// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment workflows.
//!
//! The push-deploy model splits a site between two hosts. The __staging__
//! host, i.e., the machine pushdeploy runs on, holds a buildout checkout
//! that is updated, bootstrapped, and built locally. The __production__ host
//! only ever receives the results of that build through rsync. Production
//! data flows the other way: the object database and blob storage are
//! pulled from production into staging, so staging can be tested against
//! real data before anything is pushed.
//!
//! # Operations
//!
//! - [`Workflow::stage`] pulls production data, updates the checkout,
//!   bootstraps, runs buildout, and optionally restarts the staging site.
//! - [`Workflow::push`] copies scripts, eggs, parts, and configuration from
//!   staging to production, without touching production data.
//! - [`Workflow::deploy`] pushes, installs system configuration, reloads
//!   the process supervisor, and restarts the production site.
//!
//! The remaining operations are the building blocks of these three, plus a
//! few supervisor shortcuts.
//!
//! Every operation first builds a [`Plan`], then executes it. Planning
//! resolves every required option, so missing configuration aborts an
//! operation before any command runs.

pub mod plan;

use crate::{
    annotate::{AnnotateError, Annotations, DEFAULT_BUILDOUT_CONFIG},
    command::{CommandLine, Invocation, Runner, SystemRunner},
    options::{OptionError, Ownership},
    rsync::{self, SyncSpec},
    target::Session,
    workflow::plan::{Plan, PlanError, Step},
};

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Patterns kept out of a push of the `var` directory, so production data
/// is never overwritten with staging data.
pub const VAR_EXCLUDES: [&str; 6] = [
    "blobstorage*",
    "*.fs",
    "*.old",
    "*.zip",
    "*.log",
    "*.backup",
];

/// Instance scripts tried in order when cooking resources.
pub const DEFAULT_INSTANCE_SCRIPTS: &str = "instance instance1";

/// Version control tool of the buildout checkout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Vcs {
    #[default]
    Mercurial,
    Git,
}

impl Vcs {
    /// Command that clones repository into directory.
    pub fn clone_command(&self, repository: &str, branch: Option<&str>, directory: &str) -> CommandLine {
        match self {
            Self::Mercurial => CommandLine::new("hg")
                .arg("clone")
                .args(branch.map(|branch| ["-r", branch]).into_iter().flatten())
                .args([repository, directory]),
            Self::Git => CommandLine::new("git")
                .arg("clone")
                .args(branch.map(|branch| ["-b", branch]).into_iter().flatten())
                .args([repository, directory]),
        }
    }

    /// Commands that bring checkout up to date with its repository.
    pub fn update_commands(&self, branch: Option<&str>) -> Vec<CommandLine> {
        match self {
            Self::Mercurial => vec![
                CommandLine::new("hg").arg("pull"),
                CommandLine::new("hg").args(["update", "-C"]).args(branch),
            ],
            Self::Git => vec![
                CommandLine::new("git").arg("fetch"),
                CommandLine::new("git").args(["checkout", "--force"]).args(branch),
                CommandLine::new("git").args(["merge", "--ff-only"]),
            ],
        }
    }
}

impl FromStr for Vcs {
    type Err = OptionError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "hg" | "mercurial" => Ok(Self::Mercurial),
            "git" => Ok(Self::Git),
            other => Err(OptionError::Invalid {
                key: "vcs".into(),
                reason: format!("unknown version control tool {other:?}"),
            }),
        }
    }
}

/// Deployment workflows bound to one session.
#[derive(Debug)]
pub struct Workflow<R = SystemRunner>
where
    R: Runner,
{
    session: Session,
    runner: R,
    progress: bool,
}

impl<R> Workflow<R>
where
    R: Runner,
{
    /// Construct new workflow.
    pub fn new(session: Session, runner: R) -> Self {
        Self {
            session,
            runner,
            progress: false,
        }
    }

    /// Show rsync transfer progress.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Clone new staging buildout from repository.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::Option`] if `path` is missing or `vcs` is
    ///   invalid.
    /// - Return [`WorkflowError::Plan`] if cloning fails.
    pub fn clone_repository(&self, repository: &str, branch: Option<&str>) -> Result<()> {
        self.execute(self.plan_clone(repository, branch)?)
    }

    /// Update staging buildout from its repository.
    pub fn update(&self, branch: Option<&str>) -> Result<()> {
        self.execute(self.plan_update(branch)?)
    }

    /// Bootstrap staging buildout.
    pub fn bootstrap(&self) -> Result<()> {
        self.execute(self.plan_bootstrap()?)
    }

    /// Run staging buildout.
    ///
    /// Arguments are buildout part names to install, or `-o` for offline
    /// mode.
    pub fn buildout(&self, args: &[String]) -> Result<()> {
        self.execute(self.plan_buildout(args)?)
    }

    /// Pull production data into staging buildout.
    pub fn pull(&self) -> Result<()> {
        self.execute(self.plan_pull()?)
    }

    /// Restart staging site.
    pub fn restart(&self) -> Result<()> {
        self.execute(self.plan_restart()?)
    }

    /// Update staging buildout with fresh production data and code.
    pub fn stage(&self) -> Result<()> {
        self.execute(self.plan_stage()?)
    }

    /// Cook static resources on production.
    pub fn cook_resources(&self) -> Result<()> {
        self.execute(self.plan_cook_resources()?)
    }

    /// Push staging build results, without data, to production.
    pub fn push(&self) -> Result<()> {
        self.execute(self.plan_push()?)
    }

    /// Install system configuration built by buildout on production.
    pub fn deploy_etc(&self) -> Result<()> {
        self.execute(self.plan_deploy_etc()?)
    }

    /// Stop production site.
    pub fn stop(&self, site: &str) -> Result<()> {
        self.execute(self.plan_supervisorctl("stop", site))
    }

    /// Start production site.
    pub fn start(&self, site: &str) -> Result<()> {
        self.execute(self.plan_supervisorctl("start", site))
    }

    /// Restart production site through the process supervisor.
    pub fn site_restart(&self, site: &str) -> Result<()> {
        self.execute(self.plan_supervisorctl("restart", site))
    }

    /// Push staging buildout to production, and restart production site.
    pub fn deploy(&self) -> Result<()> {
        self.execute(self.plan_deploy()?)
    }

    /// Install staged supervisor configuration on staging.
    pub fn stage_supervisor(&self) -> Result<()> {
        self.execute(self.plan_stage_supervisor()?)
    }

    /// Push staged supervisor configuration to production.
    pub fn deploy_supervisor(&self) -> Result<()> {
        self.execute(self.plan_deploy_supervisor()?)
    }

    /// Run plan through runner.
    ///
    /// # Errors
    ///
    /// - Return [`WorkflowError::Plan`] if a step fails.
    pub fn execute(&self, plan: Plan) -> Result<()> {
        Ok(plan.execute(&self.runner, &self.session.target)?)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_clone(&self, repository: &str, branch: Option<&str>) -> Result<Plan> {
        let path = self.path()?;
        let vcs = self.vcs()?;
        let command = vcs.clone_command(repository, branch, &display(&path));

        Ok([Step::new("clone", Invocation::local(self.as_buildout_user(command)))]
            .into_iter()
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_update(&self, branch: Option<&str>) -> Result<Plan> {
        let path = self.path()?;
        let vcs = self.vcs()?;

        Ok(vcs
            .update_commands(branch)
            .into_iter()
            .map(|command| {
                let invocation = Invocation::local(self.as_buildout_user(command)).in_dir(&path);
                Step::new("update", invocation)
            })
            .collect())
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_bootstrap(&self) -> Result<Plan> {
        let path = self.path()?;
        let options = &self.session.options;
        let python = options
            .get("bootstrap-python")
            .filter(|python| !python.is_empty())
            .map_or_else(|| options.require("executable"), Ok)?;

        let primary = CommandLine::new(python).args(["bootstrap.py", "--distribute"]);
        let fallback = CommandLine::new(python).arg("bootstrap.py");
        let step = Step::new(
            "bootstrap",
            Invocation::local(self.as_buildout_user(primary)).in_dir(&path),
        )
        .with_fallback(Invocation::local(self.as_buildout_user(fallback)).in_dir(&path));

        Ok([step].into_iter().collect())
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_buildout(&self, args: &[String]) -> Result<Plan> {
        let path = self.path()?;
        let parts = args
            .iter()
            .filter(|arg| !arg.starts_with('-'))
            .collect::<Vec<_>>();
        let offline = args.iter().any(|arg| arg == "-o");

        let mut command = CommandLine::new("bin/buildout");
        if !parts.is_empty() {
            command = command.arg("install").args(parts);
        }
        if offline {
            command = command.arg("-o");
        }

        let mut plan = Plan::new();
        plan.push(Step::new(
            "buildout",
            Invocation::local(self.as_buildout_user(command)).in_dir(&path),
        ));
        plan.push(self.local_chown(&self.owner(), &path.join("var")));

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_pull(&self) -> Result<Plan> {
        let path = self.path()?;
        let var = path.join("var");
        let filestorage = var.join("filestorage");
        let data_fs = display(&filestorage.join("Data.fs"));
        let buildout_user = Ownership::user(self.buildout_user());

        let mut plan = Plan::new();
        if !var.exists() {
            debug!("{} is missing, create it", var.display());
            let command = CommandLine::new("mkdir").args(["-p".to_string(), display(&filestorage)]);
            plan.push(Step::new("pull", self.local(command)));
        }

        plan.push(self.local_chown(&buildout_user, &var));
        plan.push(self.sync(SyncSpec::pull(&data_fs, &data_fs).with_delete(true)));
        plan.push(self.sync(
            SyncSpec::pull(display(&var.join("blobstorage")), display(&var)).with_delete(true),
        ));
        plan.push(self.local_chown(&self.owner(), &var));

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_restart(&self) -> Result<Plan> {
        let command = self.restart_command()?;
        Ok([Step::new("restart", self.local(command))].into_iter().collect())
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_stage(&self) -> Result<Plan> {
        let mut plan = self.plan_pull()?;
        plan.append(self.plan_update(None)?);
        plan.append(self.plan_bootstrap()?);
        plan.append(self.plan_buildout(&[])?);
        if self.session.options.local_restart() {
            plan.append(self.plan_restart()?);
        }

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_cook_resources(&self) -> Result<Plan> {
        let path = self.path()?;
        let buildout_name = self.annotations(&path)?.buildout_name()?;
        let scripts = self
            .session
            .options
            .get("instance-scripts")
            .unwrap_or(DEFAULT_INSTANCE_SCRIPTS)
            .split_whitespace()
            .map(|script| {
                let script = display(&path.join("bin").join(script));
                let cooker = format!(
                    "{} -O {} run \"$(which resourcecooker.py)\"",
                    shell_words::quote(&script),
                    shell_words::quote(&buildout_name),
                );
                Invocation::remote(CommandLine::new("sh").arg("-c").arg(cooker).sudo())
            })
            .collect::<Vec<_>>();

        let mut scripts = scripts.into_iter();
        let Some(first) = scripts.next() else {
            return Err(OptionError::Invalid {
                key: "instance-scripts".into(),
                reason: "no instance script names given".into(),
            }
            .into());
        };

        let step = scripts
            .fold(Step::new("cook resources", first), Step::with_fallback)
            .tolerate_failure();

        Ok([step].into_iter().collect())
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_push(&self) -> Result<Plan> {
        let path = self.path()?;
        let owner = self.owner();
        let annotations = self.annotations(&path)?;

        let mut plan = Plan::new();
        plan.push(Step::new(
            "push",
            self.remote(CommandLine::new("mkdir").args(["-p".to_string(), display(&path)])),
        ));
        plan.push(Step::new(
            "push",
            self.remote(CommandLine::new("chown").args([owner.to_string(), display(&path)])),
        ));

        let mut directories = vec![
            annotations.bin_directory(),
            annotations.eggs_directory(),
            annotations.parts_directory(),
        ];
        let products = path.join("products");
        if products.is_dir() {
            directories.push(products);
        }

        for directory in directories {
            plan.push(self.sync(push_directory(&directory)));
            plan.push(self.remote_chown(&owner, &directory));
        }

        let var = path.join("var");
        plan.push(self.sync(
            push_directory(&var)
                .with_exclude(VAR_EXCLUDES)
                .with_extra_opts(["--ignore-existing"]),
        ));
        plan.push(self.remote_chown(&owner, &var));

        let etc = path.join("etc");
        if etc.exists() {
            plan.push(self.sync(push_directory(&etc)));
            plan.push(self.remote_chown(&owner, &etc));
        }

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_deploy_etc(&self) -> Result<Plan> {
        let path = self.path()?;
        let system_etc = self.annotations(&path)?.parts_directory().join("system").join("etc");

        let mut plan = Plan::new();
        if !system_etc.is_dir() {
            debug!("no system configuration at {}", system_etc.display());
            return Ok(plan);
        }

        let copy = CommandLine::new("cp").args(["-R".to_string(), display(&system_etc.join(".")), "/etc".into()]);
        plan.push(Step::new("deploy etc", self.remote(copy)));
        plan.push(Step::new(
            "deploy etc",
            self.remote(CommandLine::new("supervisorctl").arg("reread")),
        ));
        plan.push(Step::new(
            "deploy etc",
            self.remote(CommandLine::new("supervisorctl").arg("update")),
        ));

        Ok(plan)
    }

    /// Plan for `supervisorctl <action> <site>:*` on production.
    ///
    /// Always goes through sudo, regardless of `remote-sudo`.
    pub fn plan_supervisorctl(&self, action: &str, site: &str) -> Plan {
        let command = CommandLine::new("supervisorctl")
            .args([action.to_string(), format!("{site}:*")])
            .sudo();
        [Step::new(action, Invocation::remote(command))]
            .into_iter()
            .collect()
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_deploy(&self) -> Result<Plan> {
        // INVARIANT: Resolve restart command before planning anything else.
        let restart = self.restart_command()?;

        let mut plan = self.plan_push()?;
        plan.append(self.plan_deploy_etc()?);
        plan.push(Step::new("restart", self.remote(restart)));

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_stage_supervisor(&self) -> Result<Plan> {
        let supervisor_conf = PathBuf::from(self.session.options.require("supervisor-conf")?);
        let path = self.path()?;
        let staged = self.staged_supervisor_conf(&path, &supervisor_conf)?;

        let mut plan = Plan::new();
        let copy = CommandLine::new("cp").args([display(&staged), display(&supervisor_conf)]);
        plan.push(Step::new("stage supervisor", self.local(copy)));
        plan.push(Step::new(
            "stage supervisor",
            self.local(CommandLine::new("supervisorctl").arg("update")),
        ));

        Ok(plan)
    }

    #[instrument(skip(self), level = "debug")]
    pub fn plan_deploy_supervisor(&self) -> Result<Plan> {
        let supervisor_conf = PathBuf::from(self.session.options.require("supervisor-conf")?);
        let path = self.path()?;
        let staged = self.staged_supervisor_conf(&path, &supervisor_conf)?;

        let mut plan = Plan::new();
        plan.push(self.sync(SyncSpec::push(display(&staged), display(&supervisor_conf))));
        plan.push(Step::new(
            "deploy supervisor",
            self.remote(CommandLine::new("supervisorctl").arg("update")),
        ));

        Ok(plan)
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.session.options.require("path")?))
    }

    fn vcs(&self) -> Result<Vcs> {
        match self.session.options.get("vcs") {
            Some(vcs) if !vcs.is_empty() => Ok(vcs.parse()?),
            _ => Ok(Vcs::default()),
        }
    }

    fn annotations(&self, path: &Path) -> Result<Annotations> {
        let config = self
            .session
            .options
            .get("buildout")
            .filter(|config| !config.is_empty())
            .unwrap_or(DEFAULT_BUILDOUT_CONFIG);

        Ok(Annotations::load(path, config)?)
    }

    fn staged_supervisor_conf(&self, path: &Path, supervisor_conf: &Path) -> Result<PathBuf> {
        let name = supervisor_conf.file_name().ok_or_else(|| OptionError::Invalid {
            key: "supervisor-conf".into(),
            reason: "path does not name a file".into(),
        })?;

        Ok(self.annotations(path)?.parts_directory().join(name))
    }

    /// Operator-supplied restart command, run through `sh -c` so that shell
    /// operators like `&&` keep their meaning.
    fn restart_command(&self) -> Result<CommandLine> {
        let restart = self.session.options.require("restart")?.trim();
        if restart.is_empty() {
            return Err(OptionError::Missing {
                key: "restart".into(),
            }
            .into());
        }

        Ok(CommandLine::new("sh").arg("-c").arg(restart))
    }

    fn buildout_user(&self) -> &str {
        self.session
            .options
            .buildout_user(self.session.fallback_user())
    }

    fn owner(&self) -> Ownership {
        self.session
            .options
            .effective_owner(self.session.fallback_user())
    }

    fn as_buildout_user(&self, command: CommandLine) -> CommandLine {
        command
            .as_user(self.buildout_user())
            .sudo_if(self.session.options.local_sudo())
    }

    fn local(&self, command: CommandLine) -> Invocation {
        Invocation::local(command.sudo_if(self.session.options.local_sudo()))
    }

    fn remote(&self, command: CommandLine) -> Invocation {
        Invocation::remote(command.sudo_if(self.session.options.remote_sudo()))
    }

    fn local_chown(&self, owner: &Ownership, path: &Path) -> Step {
        let command = CommandLine::new("chown").args(["-R".to_string(), owner.to_string(), display(path)]);
        Step::new("chown", self.local(command))
    }

    fn remote_chown(&self, owner: &Ownership, path: &Path) -> Step {
        let command = CommandLine::new("chown").args(["-R".to_string(), owner.to_string(), display(path)]);
        Step::new("chown", self.remote(command))
    }

    fn sync(&self, spec: SyncSpec) -> Step {
        let spec = spec.with_progress(self.progress);
        let command = rsync::build(&spec, &self.session.target, &self.session.options);
        Step::new("rsync", Invocation::local(command))
    }
}

/// Sync request that pushes directory contents onto the same path remotely.
fn push_directory(directory: &Path) -> SyncSpec {
    let directory = display(directory);
    SyncSpec::push(rsync::contents_of(&directory), directory)
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Workflow error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Required option is missing, or unusable.
    #[error(transparent)]
    Option(#[from] OptionError),

    /// Buildout annotations cannot be read.
    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    /// Plan execution fails.
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Friendly result alias :3
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn vcs_from_option_value() {
        assert_eq!("hg".parse::<Vcs>(), Ok(Vcs::Mercurial));
        assert_eq!("git".parse::<Vcs>(), Ok(Vcs::Git));
        assert!(matches!("svn".parse::<Vcs>(), Err(OptionError::Invalid { .. })));
    }

    #[test]
    fn mercurial_commands() {
        let clone = Vcs::Mercurial.clone_command("https://hg.example.com/site", Some("stable"), "/srv/site");
        assert_eq!(
            clone.argv(),
            ["hg", "clone", "-r", "stable", "https://hg.example.com/site", "/srv/site"]
        );

        let update = Vcs::Mercurial
            .update_commands(None)
            .iter()
            .map(CommandLine::argv)
            .collect::<Vec<_>>();
        assert_eq!(update, [vec!["hg", "pull"], vec!["hg", "update", "-C"]]);
    }

    #[test]
    fn git_commands() {
        let clone = Vcs::Git.clone_command("https://git.example.com/site.git", None, "/srv/site");
        assert_eq!(
            clone.argv(),
            ["git", "clone", "https://git.example.com/site.git", "/srv/site"]
        );

        let update = Vcs::Git
            .update_commands(Some("main"))
            .iter()
            .map(CommandLine::argv)
            .collect::<Vec<_>>();
        assert_eq!(
            update,
            [
                vec!["git", "fetch"],
                vec!["git", "checkout", "--force", "main"],
                vec!["git", "merge", "--ff-only"],
            ]
        );
    }

    #[test]
    fn push_directory_syncs_contents() {
        let spec = push_directory(Path::new("/srv/site/bin"));
        assert_eq!(spec.local_path, "/srv/site/bin/");
        assert_eq!(spec.remote_path, "/srv/site/bin");
        assert!(!spec.delete);
    }
}
