//! Appliance configuration
//!
//! Loaded once at startup from a JSON file. Every field has a default, so a
//! missing file or a partial file is fine; a malformed file is a
//! configuration error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::constants::{input, keymap, paths, sandbox};

/// An external program plus its fixed leading arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeymapConfig {
    /// File holding XKBMODEL/XKBLAYOUT/XKBVARIANT/XKBOPTIONS
    pub keyboard_config: PathBuf,
    /// Turns the XKB settings into a console keymap on stdout
    pub compiler: CommandSpec,
    /// Turns a console keymap on stdin into C tables on stdout
    pub generator: CommandSpec,
    pub table_size: usize,
}

impl Default for KeymapConfig {
    fn default() -> Self {
        Self {
            keyboard_config: PathBuf::from(paths::KEYBOARD_CONFIG),
            compiler: CommandSpec::new("ckbcomp", &[]),
            generator: CommandSpec::new("loadkeys", &["--mktable", "-"]),
            table_size: keymap::NR_KEYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    pub enabled: bool,
    /// Control command; defaults to `usb-gadget.sh` next to the executable
    pub command: Option<PathBuf>,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

impl GadgetConfig {
    pub fn resolve_command(&self) -> Result<PathBuf> {
        if let Some(command) = &self.command {
            return Ok(command.clone());
        }
        let exe = std::env::current_exe().context("Failed to resolve executable path")?;
        let dir = exe
            .parent()
            .context("Executable path has no parent directory")?;
        Ok(dir.join(paths::GADGET_SCRIPT))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub sysfs_hidraw: PathBuf,
    pub dev_root: PathBuf,
    /// Sink for the N-th hidraw source is `<prefix>N`
    pub gadget_node_prefix: String,
    pub grab_settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sysfs_hidraw: PathBuf::from(paths::SYS_CLASS_HIDRAW),
            dev_root: PathBuf::from(paths::DEV_ROOT),
            gadget_node_prefix: paths::GADGET_NODE_PREFIX.to_string(),
            grab_settle_ms: input::GRAB_SETTLE_MS,
        }
    }
}

impl DeviceConfig {
    pub fn gadget_node(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}{}", self.gadget_node_prefix, index))
    }
}

/// Resource limits applied to the script engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: sandbox::MAX_OPERATIONS,
            max_call_levels: sandbox::MAX_CALL_LEVELS,
            max_expr_depth: sandbox::MAX_EXPR_DEPTH,
            max_string_size: sandbox::MAX_STRING_SIZE,
            max_array_size: sandbox::MAX_ARRAY_SIZE,
            max_map_size: sandbox::MAX_MAP_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shared data directory, handed to the unprivileged account
    pub data_dir: PathBuf,
    /// User script, relative paths resolve against `data_dir`
    pub script: PathBuf,
    pub keymap: KeymapConfig,
    pub gadget: GadgetConfig,
    pub devices: DeviceConfig,
    pub sandbox: SandboxLimits,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(paths::DATA_DIR),
            script: PathBuf::from(paths::SCRIPT_FILE),
            keymap: KeymapConfig::default(),
            gadget: GadgetConfig::default(),
            devices: DeviceConfig::default(),
            sandbox: SandboxLimits::default(),
        }
    }
}

impl AppConfig {
    /// Configuration file path, honoring the `TNK_CONFIG` override
    pub fn path() -> PathBuf {
        std::env::var_os(paths::CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(paths::CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn script_path(&self) -> PathBuf {
        if self.script.is_absolute() {
            self.script.clone()
        } else {
            self.data_dir.join(&self.script)
        }
    }
}
