//! Privilege-separation supervisor
//!
//! The process starts as root with the supervised signals blocked. It does
//! the root-only setup, forks, and then sits in `sigwait` until the worker
//! exits. The worker child drops privileges before it touches any input
//! device or script.

pub mod privileges;
pub mod signals;

use anyhow::{Context, Result, bail};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{ForkResult, Pid, fork, geteuid};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::common::constants::exit;
use crate::config::AppConfig;
use crate::daemon;
use crate::gadget::Gadget;
use crate::keymap::{KeymapResolver, KeymapTable};

/// Run the appliance. `mask` is the already blocked supervised signal set.
pub fn run(config: &AppConfig, mask: &SigSet) -> Result<i32> {
    if !geteuid().is_root() {
        bail!("tnk must be started as root");
    }

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_dir.display()
        )
    })?;

    let resolver = KeymapResolver::new(config.keymap.clone());
    let keymap = resolver.resolve().context("Failed to resolve keymap")?;

    let gadget = if config.gadget.enabled {
        let gadget = Gadget::from_config(&config.gadget)?;
        gadget.start().context("Failed to start USB gadget")?;
        Some(gadget)
    } else {
        info!("USB gadget handling disabled");
        None
    };

    let code = match spawn_worker(config, keymap, mask) {
        Ok(child) => {
            info!(pid = %child, "Worker started");
            supervise(child, mask)
        }
        Err(e) => {
            error!(error = %e, "Failed to fork worker");
            exit::FAILURE
        }
    };

    if let Some(gadget) = gadget
        && let Err(e) = gadget.stop()
    {
        error!(error = %e, "Failed to stop USB gadget");
    }

    info!(code, "Supervisor exiting");
    Ok(code)
}

/// Fork. The child never returns from here.
#[allow(unsafe_code)] // fork() requires unsafe; the process is single-threaded at this point
fn spawn_worker(
    config: &AppConfig,
    keymap: Arc<KeymapTable>,
    mask: &SigSet,
) -> nix::Result<Pid> {
    // SAFETY: no other threads exist yet
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let code = match daemon::run_worker(config, keymap, mask) {
                Ok(code) => code,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Worker failed");
                    exit::FAILURE
                }
            };
            std::process::exit(code);
        }
    }
}

/// Wait for signals until the child is reaped, returning its exit code
fn supervise(child: Pid, mask: &SigSet) -> i32 {
    loop {
        let signal = match mask.wait() {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "sigwait failed");
                return exit::FAILURE;
            }
        };

        if signal == Signal::SIGCHLD {
            match reap(child) {
                Some(code) => return code,
                None => continue,
            }
        }

        if signals::is_terminating(signal) {
            info!(signal = %signal, pid = %child, "Forwarding signal to worker");
            match kill(child, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(signal = %signal, error = %e, "Failed to forward signal"),
            }
        }
    }
}

fn reap(child: Pid) -> Option<i32> {
    match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => {
            let code = signals::exit_code(status);
            if let Some(code) = code {
                info!(pid = %child, code, "Worker exited");
            } else {
                debug!(?status, "Worker still running");
            }
            code
        }
        Err(Errno::ECHILD) => {
            warn!(pid = %child, "Worker already reaped");
            Some(exit::FAILURE)
        }
        Err(e) => {
            error!(error = %e, "waitpid failed");
            Some(exit::FAILURE)
        }
    }
}
