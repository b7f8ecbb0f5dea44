#![deny(unsafe_code)]

mod common;
mod config;
mod daemon;
mod forwarder;
mod gadget;
mod hid;
mod input;
mod keymap;
mod sandbox;
mod supervisor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::SigSet;
use nix::unistd::geteuid;
use std::path::PathBuf;
use tracing::Level as TraceLevel;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::common::constants::exit;
use crate::common::constants::keymap::K_HOLE;
use crate::config::AppConfig;
use crate::gadget::{Gadget, GadgetAction};
use crate::keymap::{KeymapResolver, KeymapTable};

#[derive(Parser)]
#[command(name = "tnk")]
#[command(version)]
#[command(about = "USB keyboard pass-through with scriptable hotkeys", long_about = None)]
struct Cli {
    /// Configuration file (default: $TNK_CONFIG or /etc/tnk/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hotkey script, overriding the configured one
    #[arg(long)]
    script: Option<PathBuf>,

    /// Don't start or stop the USB gadget
    #[arg(long)]
    no_gadget: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the USB gadget control command directly
    Gadget {
        #[arg(value_enum)]
        action: GadgetAction,
    },
    /// Rebuild the keymap table from the keyboard layout and print it
    Keymap,
}

fn main() {
    // Before anything else so every thread and the forked worker inherit the mask
    let mask = match supervisor::signals::block_supervised() {
        Ok(mask) => mask,
        Err(e) => {
            eprintln!("tnk: failed to block signals: {e}");
            std::process::exit(exit::FAILURE);
        }
    };

    let cli = Cli::parse();
    init_logging(cli.debug);

    let code = match run(cli, &mask) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            exit::FAILURE
        }
    };
    std::process::exit(code);
}

fn init_logging(debug: bool) {
    let level = if debug {
        TraceLevel::DEBUG
    } else {
        TraceLevel::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tnk: failed to set tracing subscriber: {e}");
    }
}

fn run(cli: Cli, mask: &SigSet) -> Result<i32> {
    let config_path = cli.config.unwrap_or_else(AppConfig::path);
    let mut config = AppConfig::load(&config_path)?;

    match cli.command {
        Some(Command::Gadget { action }) => {
            if !geteuid().is_root() {
                anyhow::bail!("controlling the USB gadget requires root");
            }
            let gadget = Gadget::from_config(&config.gadget)?;
            gadget
                .run(action)
                .with_context(|| format!("Gadget {action} failed"))?;
            return Ok(exit::SUCCESS);
        }
        Some(Command::Keymap) => {
            let mut resolver = KeymapResolver::new(config.keymap.clone());
            let table = resolver.reload().context("Failed to build keymap")?;
            print_keymap(&table);
            return Ok(exit::SUCCESS);
        }
        None => {}
    }

    if let Some(script) = cli.script {
        config.script = std::path::absolute(&script)
            .with_context(|| format!("Invalid script path {}", script.display()))?;
    }
    if cli.no_gadget {
        config.gadget.enabled = false;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tnk");
    if cli.debug {
        common::debug::log_system_info();
    }
    supervisor::run(&config, mask)
}

/// One line per assigned scancode: scancode, raw keysym, typed character
fn print_keymap(table: &KeymapTable) {
    for scancode in (0..table.len()).filter_map(|i| u16::try_from(i).ok()) {
        let Some(sym) = table.sym(scancode).filter(|&sym| sym != K_HOLE) else {
            continue;
        };
        match table.char_for(scancode) {
            Some(ch) => println!("{scancode:3}  {sym:#06x}  {ch:?}"),
            None => println!("{scancode:3}  {sym:#06x}"),
        }
    }
    println!(
        "{} scancodes, {} typeable characters",
        table.len(),
        table.char_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keymap_subcommand() {
        let cli = Cli::try_parse_from(["tnk", "--config", "/tmp/tnk.json", "keymap"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Keymap)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tnk.json")));
    }

    #[test]
    fn test_gadget_subcommand_takes_action() {
        let cli = Cli::try_parse_from(["tnk", "gadget", "stop"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Gadget {
                action: GadgetAction::Stop
            })
        ));
        assert!(Cli::try_parse_from(["tnk", "gadget", "restart"]).is_err());
    }
}
