//! Builds the keymap table by driving the external layout pipeline
//!
//! The layout compiler turns the XKB settings into a console keymap, the
//! table generator turns that keymap into C tables. Only the unshifted table
//! is kept. The pipeline runs once per resolver; later calls share the
//! cached table until [`KeymapResolver::reload`] is called.

use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, info};

use super::layout::LayoutSettings;
use super::table::{KeymapTable, TableError};
use crate::config::{CommandSpec, KeymapConfig};

#[derive(Debug, Error)]
pub enum KeymapError {
    #[error("cannot read keyboard configuration {}: {source}", path.display())]
    Config { path: PathBuf, source: io::Error },
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },
    #[error("keymap pipeline I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{} failed: {status}", program.display())]
    Failed { program: PathBuf, status: ExitStatus },
    #[error("malformed keymap table: {0}")]
    Table(#[from] TableError),
    #[error("table generator output is not valid UTF-8")]
    InvalidOutput,
}

pub struct KeymapResolver {
    config: KeymapConfig,
    cache: OnceLock<Arc<KeymapTable>>,
}

impl KeymapResolver {
    pub fn new(config: KeymapConfig) -> Self {
        Self {
            config,
            cache: OnceLock::new(),
        }
    }

    /// The table for the configured layout, built on first call
    pub fn resolve(&self) -> Result<Arc<KeymapTable>, KeymapError> {
        if let Some(table) = self.cache.get() {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(self.build()?);
        Ok(Arc::clone(self.cache.get_or_init(|| table)))
    }

    /// Rebuild unconditionally. On failure the previous table stays cached.
    pub fn reload(&mut self) -> Result<Arc<KeymapTable>, KeymapError> {
        let table = Arc::new(self.build()?);
        self.cache = OnceLock::from(Arc::clone(&table));
        Ok(table)
    }

    fn build(&self) -> Result<KeymapTable, KeymapError> {
        let path = &self.config.keyboard_config;
        let contents = std::fs::read_to_string(path).map_err(|source| KeymapError::Config {
            path: path.clone(),
            source,
        })?;
        let layout = LayoutSettings::parse(&contents);
        info!(
            model = %layout.model,
            layout = %layout.layout,
            variant = %layout.variant,
            options = %layout.options,
            "Compiling console keymap"
        );

        let output = run_pipeline(
            &self.config.compiler,
            &layout.compiler_args(),
            &self.config.generator,
        )?;
        let table = KeymapTable::parse(&output, self.config.table_size)?;

        info!(
            entries = table.len(),
            characters = table.char_count(),
            "Keymap resolved"
        );
        Ok(table)
    }
}

/// `compiler <args> <layout args> | generator <args>`, returning the generator's stdout
fn run_pipeline(
    compiler: &CommandSpec,
    layout_args: &[String],
    generator: &CommandSpec,
) -> Result<String, KeymapError> {
    debug!(program = %compiler.program.display(), args = ?layout_args, "Spawning layout compiler");
    let mut compiler_child = Command::new(&compiler.program)
        .args(&compiler.args)
        .args(layout_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| KeymapError::Spawn {
            program: compiler.program.clone(),
            source,
        })?;

    let compiler_stdout = compiler_child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("layout compiler stdout was not captured"))?;

    let generator_child = Command::new(&generator.program)
        .args(&generator.args)
        .stdin(Stdio::from(compiler_stdout))
        .stdout(Stdio::piped())
        .spawn();

    let generator_child = match generator_child {
        Ok(child) => child,
        Err(source) => {
            let _ = compiler_child.kill();
            let _ = compiler_child.wait();
            return Err(KeymapError::Spawn {
                program: generator.program.clone(),
                source,
            });
        }
    };

    let output = generator_child.wait_with_output()?;
    let compiler_status = compiler_child.wait()?;

    if !compiler_status.success() {
        return Err(KeymapError::Failed {
            program: compiler.program.clone(),
            status: compiler_status,
        });
    }
    if !output.status.success() {
        return Err(KeymapError::Failed {
            program: generator.program.clone(),
            status: output.status,
        });
    }

    debug!(bytes = output.stdout.len(), "Table generator finished");
    String::from_utf8(output.stdout).map_err(|_| KeymapError::InvalidOutput)
}
