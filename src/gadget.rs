//! USB gadget control
//!
//! Composite gadget setup lives in an external command that takes a single
//! `start`, `stop` or `status` argument. Only root may run it, so the
//! privileged supervisor calls it before forking and after the worker exits.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GadgetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GadgetAction {
    Start,
    Stop,
    Status,
}

impl GadgetAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GadgetAction::Start => "start",
            GadgetAction::Stop => "stop",
            GadgetAction::Status => "status",
        }
    }
}

impl fmt::Display for GadgetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GadgetError {
    #[error("failed to run gadget command {}: {source}", command.display())]
    Spawn { command: PathBuf, source: io::Error },
    #[error("gadget {action} failed: {status}")]
    Failed {
        action: GadgetAction,
        status: ExitStatus,
    },
}

#[derive(Debug, Clone)]
pub struct Gadget {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Gadget {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::with_args(program, Vec::<OsString>::new())
    }

    /// Control command with fixed leading arguments before the action
    pub fn with_args<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &GadgetConfig) -> Result<Self> {
        Ok(Self::new(config.resolve_command()?))
    }

    pub fn run(&self, action: GadgetAction) -> Result<(), GadgetError> {
        info!(command = %self.program.display(), %action, "Running gadget command");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(action.as_str())
            .status()
            .map_err(|source| GadgetError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(GadgetError::Failed { action, status });
        }
        debug!(%action, "Gadget command succeeded");
        Ok(())
    }

    pub fn start(&self) -> Result<(), GadgetError> {
        self.run(GadgetAction::Start)
    }

    pub fn stop(&self) -> Result<(), GadgetError> {
        self.run(GadgetAction::Stop)
    }
}
