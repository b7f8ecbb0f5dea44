//! Setting up one forwarder link per discovered hidraw device

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::WorkerEvent;
use crate::config::DeviceConfig;
use crate::forwarder::{ForwarderLink, HotkeyGate};
use crate::hid::descriptor;
use crate::input::device_detection::{self, HidrawSource};
use crate::input::grab::{self, DeviceHandle};

/// A running link plus the event-node grabs held for its lifetime
pub struct ForwardedDevice {
    // Dropped before `grabs` so the release reports go out while still grabbed
    pub link: ForwarderLink,
    grabs: Vec<DeviceHandle>,
}

impl ForwardedDevice {
    pub fn grabbed_nodes(&self) -> usize {
        self.grabs.len()
    }

    pub fn shutdown(mut self) {
        debug!(
            link = %self.link.name(),
            report_length = self.link.report_length(),
            grabs = self.grabbed_nodes(),
            "Shutting down device"
        );
        self.link.stop();
        for mut handle in self.grabs.drain(..).filter(|handle| handle.is_grabbed()) {
            if let Err(e) = handle.ungrab() {
                warn!(device = %handle.path().display(), error = %e, "Failed to release input device");
            }
        }
    }
}

/// Discover hidraw devices and start a link for each one. Devices that
/// cannot be opened are logged and skipped.
pub fn acquire(
    config: &DeviceConfig,
    gate: &HotkeyGate,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<Vec<ForwardedDevice>> {
    let sources = device_detection::discover_hidraw(config)?;
    debug!(nodes = ?device_detection::event_node_set(&sources), "Event nodes to grab");
    let mut devices = Vec::with_capacity(sources.len());

    for source in &sources {
        match forward(source, config, gate, events) {
            Ok(device) => devices.push(device),
            Err(e) => warn!(hidraw = %source.node.display(), error = %format!("{e:#}"), "Skipping device"),
        }
    }

    info!(
        discovered = sources.len(),
        forwarding = devices.len(),
        "Input devices acquired"
    );
    Ok(devices)
}

fn forward(
    source: &HidrawSource,
    config: &DeviceConfig,
    gate: &HotkeyGate,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<ForwardedDevice> {
    let report_length = descriptor::report_length_from_file(&source.descriptor);

    let grabs = grab::grab_all(
        &source.event_nodes,
        Duration::from_millis(config.grab_settle_ms),
    );
    for handle in &grabs {
        debug!(
            hidraw = %source.name,
            event = %handle.path().display(),
            device = %handle.describe(),
            "Holding event node"
        );
    }

    let sink = config.gadget_node(source.index);
    let mut link = ForwarderLink::open(
        source.name.clone(),
        &source.node,
        &sink,
        report_length,
        gate.clone(),
    )
    .with_context(|| format!("Failed to open link {} -> {}", source.node.display(), sink.display()))?;
    link.start(events.clone())
        .with_context(|| format!("Failed to start link {}", source.name))?;

    info!(
        hidraw = %source.node.display(),
        sink = %sink.display(),
        report_length,
        grabs = grabs.len(),
        "Forwarding device"
    );
    Ok(ForwardedDevice { link, grabs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::LinkEvent;
    use crate::forwarder::link::LinkState;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;
    use tokio::sync::mpsc;

    /// Fake sysfs + /dev where hidraw nodes are plain files, so a link reads
    /// one report and then hits end of file
    fn fake_tree(root: &Path) -> DeviceConfig {
        let class = root.join("sys/class/hidraw");
        let dev = root.join("dev");
        fs::create_dir_all(&dev).unwrap();

        for (n, descriptor) in [(0, vec![0x75u8, 0x08, 0x95, 0x08, 0x81, 0x02]), (1, Vec::new())] {
            let device = root.join(format!("sys/devices/hid{n}"));
            fs::create_dir_all(device.join(format!("input{n}/event{n}"))).unwrap();
            fs::write(device.join("report_descriptor"), descriptor).unwrap();
            fs::create_dir_all(class.join(format!("hidraw{n}"))).unwrap();
            symlink(&device, class.join(format!("hidraw{n}/device"))).unwrap();
        }

        // Only hidraw0 has a node
        fs::write(dev.join("hidraw0"), [0x02, 0, 0x04, 0, 0, 0, 0, 0]).unwrap();
        fs::write(root.join("hidg0"), b"").unwrap();

        DeviceConfig {
            sysfs_hidraw: class,
            dev_root: dev,
            gadget_node_prefix: root.join("hidg").display().to_string(),
            grab_settle_ms: 0,
        }
    }

    #[test]
    fn test_acquire_skips_broken_devices() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_tree(dir.path());
        let (events, mut rx) = mpsc::unbounded_channel();

        let devices = acquire(&config, &HotkeyGate::disabled(), &events).unwrap();
        assert_eq!(devices.len(), 1);
        let device = devices.into_iter().next().unwrap();
        assert_eq!(device.link.name(), "hidraw0");
        assert_eq!(device.link.report_length(), 8);
        assert_eq!(device.link.state(), LinkState::Running);
        // Event nodes don't exist in the fake /dev
        assert_eq!(device.grabbed_nodes(), 0);

        // One report forwarded, then end of file closes the link
        match rx.blocking_recv().unwrap() {
            WorkerEvent::Link(LinkEvent::Closed { name, error }) => {
                assert_eq!(name, "hidraw0");
                assert!(error.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }

        device.shutdown();
        let sink = fs::read(dir.path().join("hidg0")).unwrap();
        assert_eq!(sink.len(), 32);
        assert_eq!(&sink[..8], &[0x02, 0, 0x04, 0, 0, 0, 0, 0]);
        assert!(sink[8..].iter().all(|&b| b == 0));
    }
}
