//! Hotkey dispatcher thread
//!
//! The script engine is not `Send`, so it is built, loaded and used on a
//! single thread. Forwarder links reach it through [`HotkeyGate`] requests and
//! are served one at a time, so a callback never runs re-entrantly.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::SandboxLimits;
use crate::forwarder::{DispatchRequest, Verdict};
use crate::keymap::KeymapTable;
use crate::sandbox::{HotkeyOutcome, SandboxBridge, SandboxError};

pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the thread and wait until the script has been loaded. The load
    /// result is returned; on failure the dispatcher still runs and forwards
    /// every report.
    pub fn spawn(
        keymap: Arc<KeymapTable>,
        limits: SandboxLimits,
        script: PathBuf,
        requests: mpsc::Receiver<DispatchRequest>,
    ) -> Result<(Self, Result<usize, SandboxError>)> {
        let (loaded_tx, loaded_rx) = oneshot::channel();

        let handle = std::thread::Builder::new()
            .name("hotkeys".into())
            .spawn(move || {
                let mut bridge = SandboxBridge::new(keymap, &limits);
                let _ = loaded_tx.send(bridge.load_file(&script));
                serve(&mut bridge, requests);
            })
            .context("Failed to spawn hotkey dispatcher thread")?;

        let loaded = loaded_rx
            .blocking_recv()
            .context("Hotkey dispatcher exited before loading the script")?;

        match &loaded {
            Ok(count) => info!(hotkeys = count, "Hotkey dispatcher ready"),
            Err(e) => error!(error = %e, "Hotkey script not loaded, forwarding all reports"),
        }

        Ok((
            Self {
                handle: Some(handle),
            },
            loaded,
        ))
    }

    /// Wait for the thread to finish. It exits once every gate is dropped.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Hotkey dispatcher thread panicked");
        }
    }
}

/// Answer requests until every sender is gone
pub fn serve(bridge: &mut SandboxBridge, mut requests: mpsc::Receiver<DispatchRequest>) {
    debug!(hotkeys = bridge.hotkey_count(), "Hotkey dispatcher serving");
    while let Some(request) = requests.blocking_recv() {
        let outcome = bridge.handle_report(request.report.as_bytes());
        let verdict = verdict_for(&request.link, outcome);
        if request.reply.send(verdict).is_err() {
            debug!(link = %request.link, "Link gone before verdict was delivered");
        }
    }
    debug!("Hotkey dispatcher stopped");
}

/// Forwarding policy: any hit claims the report, even if its callback failed
fn verdict_for(link: &str, outcome: HotkeyOutcome) -> Verdict {
    match outcome {
        HotkeyOutcome::NotFound => Verdict::Forward,
        HotkeyOutcome::Completed(value) => match value.reports() {
            Ok(emit) => {
                debug!(link, result = %value.as_json(), emitted = emit.len(), "Hotkey handled");
                Verdict::Claimed { emit }
            }
            Err(e) => {
                warn!(link, error = %e, "Ignoring hotkey result");
                Verdict::Claimed { emit: Vec::new() }
            }
        },
        HotkeyOutcome::Failed(_) => Verdict::Claimed { emit: Vec::new() },
    }
}
