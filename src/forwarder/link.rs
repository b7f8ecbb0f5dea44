//! Source -> sink relay for one HID device
//!
//! A link owns a hidraw source, a gadget sink and one worker thread. The
//! worker waits on the source and on a private stop pipe; closing the write
//! end of that pipe is what wakes a worker that is blocked on a quiet device.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::gate::{HotkeyGate, Verdict};
use crate::common::constants::hid::{RELEASE_REPORT_COUNT, RELEASE_REPORT_DELAY_MS, REPORT_LEN};
use crate::hid::HidReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkState::Created,
            1 => LinkState::Running,
            2 => LinkState::Stopping,
            _ => LinkState::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot create stop pipe: {0}")]
    Pipe(nix::Error),
    #[error("cannot spawn worker thread: {0}")]
    Spawn(io::Error),
    #[error("link was already started")]
    AlreadyStarted,
    #[error("poll failed: {0}")]
    Poll(nix::Error),
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("short read: {read} of {expected} bytes")]
    ShortRead { read: usize, expected: usize },
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },
}

/// Sent when a link's worker exits, for whatever reason
#[derive(Debug)]
pub enum LinkEvent {
    Closed {
        name: String,
        error: Option<LinkError>,
    },
}

pub struct ForwarderLink {
    name: String,
    report_length: usize,
    state: Arc<AtomicU8>,
    source: Option<Arc<File>>,
    sink: Arc<Mutex<File>>,
    stop_tx: Option<OwnedFd>,
    stop_rx: Option<OwnedFd>,
    gate: HotkeyGate,
    worker: Option<JoinHandle<()>>,
}

impl ForwarderLink {
    pub fn new(
        name: impl Into<String>,
        source: File,
        sink: File,
        report_length: usize,
        gate: HotkeyGate,
    ) -> Result<Self, LinkError> {
        let (stop_rx, stop_tx) = nix::unistd::pipe().map_err(LinkError::Pipe)?;
        Ok(Self {
            name: name.into(),
            report_length,
            state: Arc::new(AtomicU8::new(LinkState::Created as u8)),
            source: Some(Arc::new(source)),
            sink: Arc::new(Mutex::new(sink)),
            stop_tx: Some(stop_tx),
            stop_rx: Some(stop_rx),
            gate,
            worker: None,
        })
    }

    /// Open a hidraw source read-only and a gadget sink write-only with `O_SYNC`
    pub fn open(
        name: impl Into<String>,
        source: &Path,
        sink: &Path,
        report_length: usize,
        gate: HotkeyGate,
    ) -> Result<Self, LinkError> {
        let source_file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(source)
            .map_err(|e| LinkError::Open {
                path: source.to_path_buf(),
                source: e,
            })?;
        let sink_file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_SYNC | libc::O_CLOEXEC)
            .open(sink)
            .map_err(|e| LinkError::Open {
                path: sink.to_path_buf(),
                source: e,
            })?;
        Self::new(name, source_file, sink_file, report_length, gate)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn report_length(&self) -> usize {
        self.report_length
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Spawn the worker. `events` receives a [`LinkEvent`] when it exits.
    pub fn start<E>(&mut self, events: UnboundedSender<E>) -> Result<(), LinkError>
    where
        E: From<LinkEvent> + Send + 'static,
    {
        if self.state() != LinkState::Created {
            return Err(LinkError::AlreadyStarted);
        }
        let (Some(source), Some(stop_rx)) = (self.source.clone(), self.stop_rx.take()) else {
            return Err(LinkError::AlreadyStarted);
        };

        let worker = Worker {
            name: self.name.clone(),
            report_length: self.report_length,
            state: Arc::clone(&self.state),
            source,
            sink: Arc::clone(&self.sink),
            stop_rx,
            gate: self.gate.clone(),
        };

        self.state.store(LinkState::Running as u8, Ordering::SeqCst);
        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let spawned = std::thread::Builder::new()
            .name(format!("link-{}", self.name))
            .spawn(move || {
                let result = worker.run();
                // Only succeeds when no stop() is under way
                let _ = state.compare_exchange(
                    LinkState::Running as u8,
                    LinkState::Stopped as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                match &result {
                    Ok(()) => debug!(link = %name, "Link worker finished"),
                    Err(e) => warn!(link = %name, error = %e, "Link worker failed"),
                }
                let _ = events.send(E::from(LinkEvent::Closed {
                    name,
                    error: result.err(),
                }));
            });

        match spawned {
            Ok(handle) => {
                info!(link = %self.name, report_length = self.report_length, "Link started");
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.store(LinkState::Stopped as u8, Ordering::SeqCst);
                Err(LinkError::Spawn(e))
            }
        }
    }

    /// Release all keys on the sink, wake and join the worker, then close the
    /// source. Also cleans up after a worker that exited by itself. Calling it
    /// again does nothing.
    pub fn stop(&mut self) {
        match self.state() {
            LinkState::Stopping => return,
            LinkState::Stopped if self.worker.is_none() => return,
            LinkState::Created => {
                self.state.store(LinkState::Stopped as u8, Ordering::SeqCst);
                self.stop_tx = None;
                self.source = None;
                return;
            }
            LinkState::Running | LinkState::Stopped => {}
        }

        self.state.store(LinkState::Stopping as u8, Ordering::SeqCst);
        debug!(link = %self.name, "Stopping link");

        {
            let zeros = vec![0u8; self.report_length];
            let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            for i in 0..RELEASE_REPORT_COUNT {
                if i > 0 {
                    std::thread::sleep(Duration::from_millis(RELEASE_REPORT_DELAY_MS));
                }
                if let Err(e) = write_all_once(&mut *sink, &zeros) {
                    warn!(link = %self.name, error = %e, "Failed to write release report");
                    break;
                }
            }
        }

        self.stop_tx = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!(link = %self.name, "Link worker panicked");
        }
        self.source = None;

        self.state.store(LinkState::Stopped as u8, Ordering::SeqCst);
        info!(link = %self.name, "Link stopped");
    }
}

impl Drop for ForwarderLink {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    name: String,
    report_length: usize,
    state: Arc<AtomicU8>,
    source: Arc<File>,
    sink: Arc<Mutex<File>>,
    stop_rx: OwnedFd,
    gate: HotkeyGate,
}

impl Worker {
    fn running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == LinkState::Running as u8
    }

    fn run(self) -> Result<(), LinkError> {
        let mut buf = vec![0u8; self.report_length];

        while self.running() {
            if !self.wait_readable()? {
                return Ok(());
            }

            let read = match (&*self.source).read(&mut buf) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(LinkError::Read(e)),
            };
            if read != self.report_length {
                return Err(LinkError::ShortRead {
                    read,
                    expected: self.report_length,
                });
            }
            if !self.running() {
                break;
            }

            match self.gate.check(&self.name, &buf) {
                Verdict::Forward => {
                    self.write(&buf)?;
                }
                Verdict::Claimed { emit } => {
                    debug!(link = %self.name, report = ?buf, emitted = emit.len(), "Report claimed by hotkey");
                    if self.report_length == REPORT_LEN && !emit.is_empty() {
                        for report in &emit {
                            self.write(report.as_bytes())?;
                        }
                        self.write(HidReport::NEUTRAL.as_bytes())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// True when the source is readable, false when the stop pipe fired
    fn wait_readable(&self) -> Result<bool, LinkError> {
        loop {
            let mut fds = [
                PollFd::new(self.source.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.stop_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(LinkError::Poll(e)),
            }
            if fds[1].revents().is_some_and(|events| !events.is_empty()) {
                return Ok(false);
            }
            if fds[0].revents().is_some_and(|events| !events.is_empty()) {
                return Ok(true);
            }
        }
    }

    /// Write one report, unless the link has left the running state
    fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running() {
            return Ok(());
        }
        write_all_once(&mut *sink, bytes)
    }
}

/// A report goes out in one write; anything less is a protocol violation
fn write_all_once(sink: &mut impl Write, bytes: &[u8]) -> Result<(), LinkError> {
    loop {
        match sink.write(bytes) {
            Ok(n) if n == bytes.len() => return Ok(()),
            Ok(n) => {
                return Err(LinkError::PartialWrite {
                    written: n,
                    expected: bytes.len(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LinkError::Write(e)),
        }
    }
}
