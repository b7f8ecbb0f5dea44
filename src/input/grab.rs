//! Exclusive grabs on evdev event nodes
//!
//! A grabbed event node stops delivering events to every other reader, so the
//! local console no longer sees a keyboard whose reports are being forwarded.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev::Device;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::device_detection;

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot grab {}: {source}", path.display())]
    Acquire { path: PathBuf, source: io::Error },
    #[error("cannot release {}: {source}", path.display())]
    Release { path: PathBuf, source: io::Error },
}

/// Something that can be taken for exclusive use and handed back
pub trait ExclusiveAccess {
    fn acquire(&mut self) -> io::Result<()>;
    fn release(&mut self) -> io::Result<()>;
}

impl ExclusiveAccess for Device {
    fn acquire(&mut self) -> io::Result<()> {
        self.grab()
    }

    fn release(&mut self) -> io::Result<()> {
        self.ungrab()
    }
}

/// One exclusively owned event node. Released on [`DeviceHandle::ungrab`] or drop.
pub struct DeviceHandle<D: ExclusiveAccess = Device> {
    path: PathBuf,
    device: D,
    grabbed: bool,
}

impl DeviceHandle {
    /// Open the event node at `path` and take it over
    pub fn grab(path: &Path, settle: Duration) -> Result<Self, GrabError> {
        let device = Device::open(path).map_err(|source| GrabError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::take(path, device, settle)
    }

    /// Device name and kind, for logs
    pub fn describe(&self) -> String {
        device_detection::describe_device(&self.device)
    }
}

impl<D: ExclusiveAccess> DeviceHandle<D> {
    /// Grab, release, wait `settle`, grab again
    fn take(path: &Path, mut device: D, settle: Duration) -> Result<Self, GrabError> {
        let acquire_error = |source| GrabError::Acquire {
            path: path.to_path_buf(),
            source,
        };

        device.acquire().map_err(acquire_error)?;
        if let Err(e) = device.release() {
            debug!(device = %path.display(), error = %e, "Intermediate release failed");
        }
        std::thread::sleep(settle);
        device.acquire().map_err(acquire_error)?;

        info!(device = %path.display(), "Grabbed input device");
        Ok(Self {
            path: path.to_path_buf(),
            device,
            grabbed: true,
        })
    }

    /// Release the grab. A handle that is already released is left alone.
    pub fn ungrab(&mut self) -> Result<(), GrabError> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        self.device.release().map_err(|source| GrabError::Release {
            path: self.path.clone(),
            source,
        })?;
        info!(device = %self.path.display(), "Released input device");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }
}

impl<D: ExclusiveAccess> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if let Err(e) = self.ungrab() {
            warn!(error = %e, "Failed to release input device on drop");
        }
    }
}

/// Grab every node, logging and skipping the ones that fail
pub fn grab_all(paths: &[PathBuf], settle: Duration) -> Vec<DeviceHandle> {
    paths
        .iter()
        .filter_map(|path| match DeviceHandle::grab(path, settle) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Skipping input device");
                None
            }
        })
        .collect()
}
