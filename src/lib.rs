// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Push-deploy for buildout sites.
//!
//! Build a site with buildout on a local staging host, test it against data
//! pulled from production, and push the results to production with rsync
//! over SSH. See [`workflow`] for the available operations.

pub mod annotate;
pub mod command;
pub mod config;
pub mod options;
pub mod path;
pub mod rsync;
pub mod target;
pub mod workflow;

pub use command::{CommandLine, DryRunner, Host, Invocation, Runner, SystemRunner};
pub use config::{Config, HostEntry};
pub use options::{normalize, DeploymentOptions};
pub use target::{RemoteTarget, Session};
pub use workflow::{plan::Plan, Workflow};
