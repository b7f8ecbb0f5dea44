use std::path::Path;
use std::process::Command;
use tracing::info;

/// Kernel modules the USB gadget depends on
const GADGET_MODULES: &[&str] = &["libcomposite", "dwc2", "usb_f_hid", "dwc3"];

/// Log system information for debugging purposes
pub fn log_system_info() {
    info!("=== System Information ===");

    // Kernel Version
    if let Ok(kernel) = get_command_output("uname", &["-sr"]) {
        info!("Kernel: {}", kernel);
    }

    // OS / Distribution
    if let Ok(os_release) = std::fs::read_to_string("/etc/os-release")
        && let Some(name) = pretty_name(&os_release)
    {
        info!("OS: {}", name);
    }

    // CPU Arch
    if let Ok(arch) = get_command_output("uname", &["-m"]) {
        info!("Architecture: {}", arch);
    }

    // USB device controllers, empty when the board cannot act as a gadget
    let controllers = list_dir(Path::new("/sys/class/udc"));
    if controllers.is_empty() {
        info!("USB Device Controllers: none");
    } else {
        info!("USB Device Controllers: {}", controllers.join(", "));
    }

    if let Ok(modules) = std::fs::read_to_string("/proc/modules") {
        let loaded = loaded_gadget_modules(&modules);
        if !loaded.is_empty() {
            info!("Gadget Modules: {}", loaded.join(", "));
        }
    }

    info!("==========================");
}

fn pretty_name(os_release: &str) -> Option<&str> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|name| name.trim_matches('"'))
}

fn loaded_gadget_modules(modules: &str) -> Vec<&str> {
    modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| GADGET_MODULES.contains(name))
        .collect()
}

fn list_dir(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn get_command_output(cmd: &str, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new(cmd).args(args).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
