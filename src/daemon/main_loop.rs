//! Unprivileged worker: runs in the forked child
//!
//! Drops root, loads the hotkey script on the dispatcher thread, starts one
//! link per device and then turns signals and link closures into events on a
//! single channel until it is time to shut down.

use anyhow::{Context, Result};
use nix::sys::signal::SigSet;
use signal_hook::iterator::Signals;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

use super::WorkerEvent;
use super::devices::{self, ForwardedDevice};
use super::dispatcher::Dispatcher;
use crate::common::constants::{exit, sandbox};
use crate::config::AppConfig;
use crate::forwarder::{LinkEvent, gate};
use crate::keymap::KeymapTable;
use crate::supervisor::privileges::{self, DropTarget, PrivilegeError, SystemCredentials};
use crate::supervisor::signals;

/// Entry point of the forked child. Returns the process exit code.
pub fn run_worker(config: &AppConfig, keymap: Arc<KeymapTable>, mask: &SigSet) -> Result<i32> {
    let terminating: Vec<i32> = signals::TERMINATING.iter().map(|s| *s as i32).collect();
    let mut signals =
        Signals::new(&terminating).context("Failed to install worker signal handlers")?;
    mask.thread_unblock()
        .context("Failed to unblock signals in worker")?;

    let target = DropTarget::from_env().context("Failed to resolve unprivileged account")?;
    privileges::chown_tree(&config.data_dir, target.uid, target.gid)
        .context("Failed to hand data directory to unprivileged account")?;
    match privileges::drop_privileges(&mut SystemCredentials, &target) {
        Ok(()) => {}
        Err(e @ PrivilegeError::EscalationStillPossible(_)) => {
            error!(error = %e, "Privilege drop incomplete, aborting");
            std::process::abort();
        }
        Err(e) => return Err(e).context("Failed to drop privileges"),
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WorkerEvent>();

    let signal_handle = signals.handle();
    let signal_events = events_tx.clone();
    let signal_thread = std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                if signal_events.send(WorkerEvent::Signal(signal)).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn signal thread")?;

    let (hotkey_gate, requests) = gate::channel(sandbox::DISPATCH_QUEUE);
    let (dispatcher, _loaded) = Dispatcher::spawn(
        keymap,
        config.sandbox.clone(),
        config.script_path(),
        requests,
    )?;

    let mut forwarded = match devices::acquire(&config.devices, &hotkey_gate, &events_tx) {
        Ok(forwarded) => forwarded,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Device discovery failed");
            Vec::new()
        }
    };
    drop(hotkey_gate);

    let code = if forwarded.is_empty() {
        error!("No input device could be forwarded");
        exit::FAILURE
    } else {
        info!(devices = forwarded.len(), "Worker running");
        event_loop(&mut events_rx, &mut forwarded)
    };

    info!(code, "Worker shutting down");
    for device in forwarded.drain(..) {
        device.shutdown();
    }
    dispatcher.join();

    signal_handle.close();
    if signal_thread.join().is_err() {
        warn!("Signal thread panicked");
    }

    Ok(code)
}

/// Consume events until a signal arrives or the last link closes
fn event_loop(
    events: &mut UnboundedReceiver<WorkerEvent>,
    forwarded: &mut Vec<ForwardedDevice>,
) -> i32 {
    while let Some(event) = events.blocking_recv() {
        match event {
            WorkerEvent::Signal(signal) => {
                info!(signal, "Received signal, stopping");
                return signals::signal_exit_code(signal);
            }
            WorkerEvent::Link(LinkEvent::Closed { name, error }) => {
                match &error {
                    Some(e) => warn!(link = %name, error = %e, "Link closed"),
                    None => info!(link = %name, "Link closed"),
                }
                if let Some(index) = forwarded.iter().position(|d| d.link.name() == name) {
                    forwarded.remove(index).shutdown();
                }
                if forwarded.is_empty() {
                    warn!("All links closed");
                    return exit::FAILURE;
                }
            }
        }
    }
    exit::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::link::LinkError;

    #[test]
    fn test_signal_ends_loop_with_signal_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(WorkerEvent::Signal(libc::SIGTERM)).unwrap();
        assert_eq!(event_loop(&mut rx, &mut Vec::new()), 128 + libc::SIGTERM);
    }

    #[test]
    fn test_last_link_closing_ends_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(WorkerEvent::from(LinkEvent::Closed {
            name: "hidraw0".into(),
            error: Some(LinkError::ShortRead { read: 0, expected: 8 }),
        }))
        .unwrap();
        assert_eq!(event_loop(&mut rx, &mut Vec::new()), exit::FAILURE);
    }

    #[test]
    fn test_closed_channel_ends_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        drop(tx);
        assert_eq!(event_loop(&mut rx, &mut Vec::new()), exit::FAILURE);
    }
}
