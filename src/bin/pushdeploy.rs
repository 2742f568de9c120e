// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pushdeploy::{
    config::Config,
    path::{locate_config, login_user},
    DryRunner, Runner, SystemRunner, Workflow,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::read_to_string, path::PathBuf, process::exit};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "pushdeploy [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Name of host entry to use.
    #[arg(short = 'H', long, global = true, value_name = "name")]
    pub host: Option<String>,

    /// Show commands instead of running them.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Show rsync transfer progress.
    #[arg(short, long, global = true)]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let working_dir = std::env::current_dir().context("cannot determine working directory")?;
        let config_path = locate_config(self.config.as_deref(), &working_dir)?;
        debug!("read configuration from {}", config_path.display());

        let config: Config = read_to_string(&config_path)
            .with_context(|| format!("failed to read configuration at {}", config_path.display()))?
            .parse()?;
        let (name, entry) = config.select(self.host.as_deref())?;
        let session = entry.session(login_user().as_deref().unwrap_or("root"))?;
        debug!("use host entry {name:?} for {}", session.target);

        let target = session.target.clone();
        if self.dry_run {
            let workflow = Workflow::new(session, DryRunner::new(target)).with_progress(self.progress);
            run_command(self.command, &workflow)
        } else {
            let workflow = Workflow::new(session, SystemRunner::new(target)).with_progress(self.progress);
            run_command(self.command, &workflow)
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Clone new staging buildout from repository.
    #[command(override_usage = "pushdeploy clone [options] <repository>")]
    Clone(CloneOptions),

    /// Update staging buildout from its repository.
    #[command(override_usage = "pushdeploy update [options]")]
    Update(UpdateOptions),

    /// Bootstrap staging buildout.
    Bootstrap,

    /// Run staging buildout.
    #[command(override_usage = "pushdeploy buildout [options] [<part>]... [-o]")]
    Buildout(BuildoutOptions),

    /// Pull production data into staging buildout.
    Pull,

    /// Push staging build results, without data, to production.
    Push,

    /// Push to production, install system configuration, and restart.
    Deploy,

    /// Pull data, update, bootstrap, and run staging buildout.
    Stage,

    /// Restart staging site.
    Restart,

    /// Cook static resources on production.
    CookResources,

    /// Install system configuration built by buildout on production.
    DeployEtc,

    /// Stop production site through supervisor.
    #[command(override_usage = "pushdeploy stop [options] <site>")]
    Stop(SiteOptions),

    /// Start production site through supervisor.
    #[command(override_usage = "pushdeploy start [options] <site>")]
    Start(SiteOptions),

    /// Restart production site through supervisor.
    #[command(override_usage = "pushdeploy site-restart [options] <site>")]
    SiteRestart(SiteOptions),

    /// Install staged supervisor configuration on staging.
    StageSupervisor,

    /// Push staged supervisor configuration to production.
    DeploySupervisor,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// Repository to clone from.
    #[arg(required = true, value_name = "repository")]
    pub repository: String,

    /// Branch to check out.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UpdateOptions {
    /// Branch to update to.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildoutOptions {
    /// Parts to install, or -o to run offline.
    #[arg(value_name = "part", allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SiteOptions {
    /// Supervisor group name of the site.
    #[arg(required = true, value_name = "site")]
    pub site: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_command<R: Runner>(command: Command, workflow: &Workflow<R>) -> Result<()> {
    match command {
        Command::Clone(opts) => workflow.clone_repository(&opts.repository, opts.branch.as_deref())?,
        Command::Update(opts) => workflow.update(opts.branch.as_deref())?,
        Command::Bootstrap => workflow.bootstrap()?,
        Command::Buildout(opts) => workflow.buildout(&opts.args)?,
        Command::Pull => workflow.pull()?,
        Command::Push => workflow.push()?,
        Command::Deploy => workflow.deploy()?,
        Command::Stage => workflow.stage()?,
        Command::Restart => workflow.restart()?,
        Command::CookResources => workflow.cook_resources()?,
        Command::DeployEtc => workflow.deploy_etc()?,
        Command::Stop(opts) => workflow.stop(&opts.site)?,
        Command::Start(opts) => workflow.start(&opts.site)?,
        Command::SiteRestart(opts) => workflow.site_restart(&opts.site)?,
        Command::StageSupervisor => workflow.stage_supervisor()?,
        Command::DeploySupervisor => workflow.deploy_supervisor()?,
    }

    Ok(())
}
