//! hidraw source discovery
//!
//! Walks the hidraw class directory in sysfs and, for every raw HID device,
//! works out which evdev event nodes belong to the same physical device. Those
//! nodes are grabbed while the device is forwarded so the local console stays
//! quiet.

use anyhow::{Context, Result};
use evdev::{Device, KeyCode};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::constants::input;
use crate::config::DeviceConfig;

/// One raw HID device and everything needed to forward it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidrawSource {
    /// Position in enumeration order, selects the gadget sink
    pub index: usize,
    /// `hidrawN`
    pub name: String,
    /// `/dev/hidrawN`
    pub node: PathBuf,
    /// sysfs report descriptor of the underlying device
    pub descriptor: PathBuf,
    /// Event nodes of the same physical device, sorted and de-duplicated
    pub event_nodes: Vec<PathBuf>,
}

/// Enumerate hidraw devices in name order
pub fn discover_hidraw(config: &DeviceConfig) -> Result<Vec<HidrawSource>> {
    info!(path = %config.sysfs_hidraw.display(), "Scanning for hidraw devices...");

    let mut names: Vec<String> = std::fs::read_dir(&config.sysfs_hidraw)
        .with_context(|| format!("Failed to read {}", config.sysfs_hidraw.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("hidraw"))
        .collect();
    names.sort();

    let sources: Vec<HidrawSource> = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let class_entry = config.sysfs_hidraw.join(&name);
            let event_nodes = event_nodes_for(&class_entry.join("device"), &config.dev_root);
            let source = HidrawSource {
                index,
                node: config.dev_root.join(&name),
                descriptor: class_entry.join("device").join("report_descriptor"),
                event_nodes,
                name,
            };
            info!(
                hidraw = %source.node.display(),
                events = ?source.event_nodes,
                "Found hidraw device"
            );
            source
        })
        .collect();

    if sources.is_empty() {
        warn!("No hidraw devices found");
    }
    Ok(sources)
}

/// Every event node belonging to any of `sources`, sorted and de-duplicated
pub fn event_node_set(sources: &[HidrawSource]) -> Vec<PathBuf> {
    let nodes: BTreeSet<&PathBuf> = sources
        .iter()
        .flat_map(|source| &source.event_nodes)
        .collect();
    nodes.into_iter().cloned().collect()
}

/// Event nodes under `input*/event*` and `input/input*/event*` of a device link
pub fn event_nodes_for(device_link: &Path, dev_root: &Path) -> Vec<PathBuf> {
    let device_dir = match std::fs::canonicalize(device_link) {
        Ok(dir) => dir,
        Err(e) => {
            debug!(link = %device_link.display(), error = %e, "Cannot resolve device link");
            return Vec::new();
        }
    };

    let mut events = BTreeSet::new();
    for entry in read_dir_names(&device_dir) {
        let path = device_dir.join(&entry);
        if entry == "input" && path.is_dir() {
            for sub in read_dir_names(&path) {
                let subpath = path.join(&sub);
                if sub.starts_with("input") && subpath.is_dir() {
                    collect_events(&subpath, &mut events);
                }
            }
        } else if entry.starts_with("input") && path.is_dir() {
            collect_events(&path, &mut events);
        }
    }

    events
        .into_iter()
        .map(|event| dev_root.join("input").join(event))
        .collect()
}

fn collect_events(dir: &Path, out: &mut BTreeSet<String>) {
    out.extend(
        read_dir_names(dir)
            .into_iter()
            .filter(|name| name.starts_with("event")),
    );
}

fn read_dir_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Human-readable name of an opened event device, for logs
pub fn describe_device(device: &Device) -> String {
    let is_keyboard = device
        .supported_keys()
        .is_some_and(|keys| keys.contains(KeyCode(input::KEY_TAB)));
    format!(
        "{} ({})",
        device.name().unwrap_or("unnamed"),
        if is_keyboard { "keyboard" } else { "other" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;

    /// Fake sysfs with two hidraw devices. hidraw1 uses the nested
    /// `input/inputN/eventN` layout, hidraw0 both layouts.
    fn fake_sysfs(root: &Path) -> DeviceConfig {
        let devices = root.join("sys/devices");
        let kbd = devices.join("usb1/1-1/1-1:1.0/0003:046D:C31C.0001");
        let mouse = devices.join("usb1/1-2/1-2:1.0/0003:046D:C077.0002");

        fs::create_dir_all(kbd.join("input7/event3")).unwrap();
        fs::create_dir_all(kbd.join("input/input8/event4")).unwrap();
        fs::create_dir_all(kbd.join("input/input8/mouse0")).unwrap();
        fs::create_dir_all(kbd.join("input/input9/event3")).unwrap();
        fs::write(kbd.join("report_descriptor"), [0x75, 0x08, 0x95, 0x08, 0x81, 0x02]).unwrap();
        fs::create_dir_all(mouse.join("input/input10/event10")).unwrap();

        let class = root.join("sys/class/hidraw");
        fs::create_dir_all(class.join("hidraw0")).unwrap();
        fs::create_dir_all(class.join("hidraw1")).unwrap();
        symlink(&kbd, class.join("hidraw0/device")).unwrap();
        symlink(&mouse, class.join("hidraw1/device")).unwrap();
        fs::create_dir_all(class.join("not-hidraw")).unwrap();

        DeviceConfig {
            sysfs_hidraw: class,
            dev_root: PathBuf::from("/dev"),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_discover_hidraw_sources() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_sysfs(dir.path());

        let sources = discover_hidraw(&config).unwrap();
        assert_eq!(sources.len(), 2);

        assert_eq!(sources[0].index, 0);
        assert_eq!(sources[0].name, "hidraw0");
        assert_eq!(sources[0].node, PathBuf::from("/dev/hidraw0"));
        assert_eq!(
            sources[0].event_nodes,
            vec![
                PathBuf::from("/dev/input/event3"),
                PathBuf::from("/dev/input/event4")
            ]
        );
        assert_eq!(
            crate::hid::descriptor::report_length_from_file(&sources[0].descriptor),
            8
        );

        assert_eq!(sources[1].index, 1);
        assert_eq!(sources[1].event_nodes, vec![PathBuf::from("/dev/input/event10")]);
    }

    #[test]
    fn test_event_node_set_dedups_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_sysfs(dir.path());
        let mut sources = discover_hidraw(&config).unwrap();
        sources.push(sources[1].clone());
        let nodes = event_node_set(&sources);
        assert_eq!(
            nodes,
            vec![
                PathBuf::from("/dev/input/event10"),
                PathBuf::from("/dev/input/event3"),
                PathBuf::from("/dev/input/event4"),
            ]
        );
    }

    #[test]
    fn test_dangling_device_link_has_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("device");
        symlink(dir.path().join("gone"), &link).unwrap();
        assert!(event_nodes_for(&link, Path::new("/dev")).is_empty());
    }

    #[test]
    fn test_missing_class_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig {
            sysfs_hidraw: dir.path().join("absent"),
            ..DeviceConfig::default()
        };
        assert!(discover_hidraw(&config).is_err());
    }
}
