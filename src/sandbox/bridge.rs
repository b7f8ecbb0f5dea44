//! Script engine host
//!
//! The bridge owns a dedicated Rhai engine that only ever runs the user
//! script. The engine gets no module resolver, no `eval`, hard resource
//! limits and two native functions:
//!
//! - `encode(chord)` returns the canonical report of a chord as a blob
//! - `on_hotkey(chord, callback)` registers a callback while the script loads
//!
//! Chords are arrays of tokens such as `["ctrl", "alt", "t"]`.
//! Everything that goes wrong inside the engine, panics included, is turned
//! into an error value here and never reaches the forwarding path.

use std::any::Any;
use std::cell::RefCell;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Array, Blob, Dynamic, Engine, EvalAltResult, FnPtr, Scope};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::registry::HotkeyRegistry;
use super::value::BoundaryValue;
use crate::config::SandboxLimits;
use crate::hid::{ChordSpec, HidReport, decode, encode};
use crate::keymap::KeymapTable;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("cannot read script {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("script does not compile: {0}")]
    Parse(String),
    #[error("script failed while loading: {0}")]
    Load(String),
    #[error("script engine panicked: {0}")]
    Panic(String),
}

/// Result of offering one report to the script
#[derive(Debug, Clone, PartialEq)]
pub enum HotkeyOutcome {
    /// No hotkey for these bytes, nothing ran
    NotFound,
    /// The callback returned this value
    Completed(BoundaryValue),
    /// The callback matched but failed; the message is already logged
    Failed(String),
}

pub struct SandboxBridge {
    engine: Engine,
    ast: Option<AST>,
    registry: Rc<RefCell<HotkeyRegistry>>,
}

impl SandboxBridge {
    pub fn new(keymap: Arc<KeymapTable>, limits: &SandboxLimits) -> Self {
        let registry = Rc::new(RefCell::new(HotkeyRegistry::new()));
        let mut engine = Engine::new();

        engine
            .set_module_resolver(DummyModuleResolver::new())
            .set_max_operations(limits.max_operations)
            .set_max_call_levels(limits.max_call_levels)
            .set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth)
            .set_max_string_size(limits.max_string_size)
            .set_max_array_size(limits.max_array_size)
            .set_max_map_size(limits.max_map_size);
        engine.disable_symbol("eval");

        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, position| {
            debug!(target: "script", source = source.unwrap_or("main"), %position, "{text}");
        });

        let encode_keymap = Arc::clone(&keymap);
        engine.register_fn(
            "encode",
            move |chord: Array| -> Result<Blob, Box<EvalAltResult>> {
                let report = encode_chord(&chord, &encode_keymap)?;
                Ok(report.as_bytes().to_vec())
            },
        );

        let hotkeys = Rc::clone(&registry);
        engine.register_fn(
            "on_hotkey",
            move |chord: Array, callback: FnPtr| -> Result<(), Box<EvalAltResult>> {
                let report = encode_chord(&chord, &keymap)?;
                let replaced = hotkeys
                    .borrow_mut()
                    .register(report, callback)
                    .map_err(|e| e.to_string())?;
                if replaced.is_some() {
                    debug!(report = %report, "Hotkey registered again, replacing previous callback");
                } else {
                    debug!(report = %report, "Hotkey registered");
                }
                Ok(())
            },
        );

        Self {
            engine,
            ast: None,
            registry,
        }
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize, SandboxError> {
        let script = std::fs::read_to_string(path).map_err(|source| {
            self.registry.borrow_mut().seal();
            SandboxError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(path = %path.display(), "Loading hotkey script");
        self.load(&script)
    }

    /// Compile and run the script, returning the number of hotkeys it
    /// registered. A failed load keeps none of its registrations. Either
    /// way the registry is sealed afterwards.
    pub fn load(&mut self, script: &str) -> Result<usize, SandboxError> {
        let engine = &self.engine;
        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<AST, SandboxError> {
            let ast = engine
                .compile(script)
                .map_err(|e| SandboxError::Parse(e.to_string()))?;
            let mut scope = Scope::new();
            engine
                .run_ast_with_scope(&mut scope, &ast)
                .map_err(|e| SandboxError::Load(e.to_string()))?;
            Ok(ast)
        }))
        .unwrap_or_else(|panic| Err(SandboxError::Panic(panic_message(&*panic))));

        let mut registry = self.registry.borrow_mut();
        registry.seal();
        match outcome {
            Ok(ast) => {
                self.ast = Some(ast);
                if registry.is_empty() {
                    warn!("Hotkey script registered no hotkeys");
                }
                info!(hotkeys = registry.len(), "Hotkey script loaded");
                Ok(registry.len())
            }
            Err(e) => {
                registry.clear();
                self.ast = None;
                Err(e)
            }
        }
    }

    pub fn hotkey_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Look up a raw report and run its callback, if any
    pub fn handle_report(&mut self, bytes: &[u8]) -> HotkeyOutcome {
        let Some(callback) = self.registry.borrow().lookup(bytes) else {
            return HotkeyOutcome::NotFound;
        };
        let Some(ast) = &self.ast else {
            return HotkeyOutcome::NotFound;
        };

        if let Some(report) = HidReport::from_bytes(bytes) {
            let (modifiers, usages) = decode(&report);
            debug!(
                modifiers = %format!("{modifiers:#04x}"),
                usages = ?usages,
                callback = callback.fn_name(),
                "Running hotkey callback"
            );
        }
        let engine = &self.engine;
        let result = catch_unwind(AssertUnwindSafe(|| callback.call::<Dynamic>(engine, ast, ())));

        match result {
            Ok(Ok(value)) => match BoundaryValue::from_dynamic(&value) {
                Ok(value) => HotkeyOutcome::Completed(value),
                Err(e) => {
                    warn!(error = %e, "Hotkey callback returned a value that cannot be serialized");
                    HotkeyOutcome::Failed(e.to_string())
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Hotkey callback failed");
                HotkeyOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(error = %message, "Hotkey callback panicked");
                HotkeyOutcome::Failed(message)
            }
        }
    }
}

fn encode_chord(chord: &Array, keymap: &KeymapTable) -> Result<HidReport, Box<EvalAltResult>> {
    let tokens = chord
        .iter()
        .map(|token| {
            token
                .clone()
                .into_string()
                .map_err(|kind| format!("chord entries must be strings, got {kind}"))
        })
        .collect::<Result<Vec<String>, String>>()?;
    let spec = ChordSpec::from_tokens(&tokens).map_err(|e| e.to_string())?;
    encode(&spec, keymap).map_err(|e| e.to_string().into())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::table::tests::us_keymap;

    fn bridge() -> SandboxBridge {
        SandboxBridge::new(Arc::new(us_keymap()), &SandboxLimits::default())
    }

    const CTRL_A: [u8; 8] = [0x01, 0, 0x04, 0, 0, 0, 0, 0];
    const CTRL_B: [u8; 8] = [0x01, 0, 0x05, 0, 0, 0, 0, 0];

    #[test]
    fn test_hit_returns_detached_value() {
        let mut bridge = bridge();
        let count = bridge
            .load(r#"on_hotkey(["ctrl", "a"], || #{ hit: 1, name: "ctrl-a" });"#)
            .unwrap();
        assert_eq!(count, 1);

        match bridge.handle_report(&CTRL_A) {
            HotkeyOutcome::Completed(value) => {
                assert_eq!(value.as_json()["hit"], 1);
                assert_eq!(value.as_json()["name"], "ctrl-a");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_miss_runs_nothing() {
        let mut bridge = bridge();
        bridge
            .load(
                r#"
                on_hotkey(["ctrl", "a"], || { print("called"); });
                "#,
            )
            .unwrap();
        assert_eq!(bridge.handle_report(&CTRL_B), HotkeyOutcome::NotFound);
        assert_eq!(bridge.handle_report(&CTRL_A[..4]), HotkeyOutcome::NotFound);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut bridge = bridge();
        bridge
            .load(
                r#"
                on_hotkey(["ctrl", "a"], || "first");
                on_hotkey(["control", "a"], || "second");
                "#,
            )
            .unwrap();
        assert_eq!(bridge.hotkey_count(), 1);
        let HotkeyOutcome::Completed(value) = bridge.handle_report(&CTRL_A) else {
            panic!("expected completion");
        };
        assert_eq!(value.as_json(), "second");
    }

    #[test]
    fn test_failing_callback_is_contained() {
        let mut bridge = bridge();
        bridge
            .load(
                r#"
                on_hotkey(["ctrl", "a"], || { throw "boom"; });
                on_hotkey(["ctrl", "b"], || encode(["shift", "a"]));
                "#,
            )
            .unwrap();

        match bridge.handle_report(&CTRL_A) {
            HotkeyOutcome::Failed(message) => assert!(message.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }

        let HotkeyOutcome::Completed(value) = bridge.handle_report(&CTRL_B) else {
            panic!("second hotkey should still work");
        };
        assert_eq!(
            value.reports().unwrap(),
            vec![HidReport::from_array([0x02, 0, 0x04, 0, 0, 0, 0, 0])]
        );

        // Failure is not sticky
        assert!(matches!(bridge.handle_report(&CTRL_A), HotkeyOutcome::Failed(_)));
    }

    #[test]
    fn test_runaway_callback_hits_operation_limit() {
        let limits = SandboxLimits {
            max_operations: 10_000,
            ..SandboxLimits::default()
        };
        let mut bridge = SandboxBridge::new(Arc::new(us_keymap()), &limits);
        bridge
            .load(r#"on_hotkey(["ctrl", "a"], || { loop { } });"#)
            .unwrap();
        assert!(matches!(bridge.handle_report(&CTRL_A), HotkeyOutcome::Failed(_)));
    }

    #[test]
    fn test_registration_sealed_after_load() {
        let mut bridge = bridge();
        bridge
            .load(
                r#"
                fn late() { on_hotkey(["ctrl", "b"], || 1); }
                on_hotkey(["ctrl", "a"], Fn("late"));
                "#,
            )
            .unwrap();
        assert!(matches!(bridge.handle_report(&CTRL_A), HotkeyOutcome::Failed(_)));
        assert_eq!(bridge.handle_report(&CTRL_B), HotkeyOutcome::NotFound);
        assert_eq!(bridge.hotkey_count(), 1);
    }

    #[test]
    fn test_failed_load_discards_registrations() {
        let mut bridge = bridge();
        let err = bridge
            .load(
                r#"
                on_hotkey(["ctrl", "a"], || 1);
                on_hotkey(["ctrl", "no-such-key"], || 2);
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, SandboxError::Load(_)));
        assert_eq!(bridge.hotkey_count(), 0);
        assert_eq!(bridge.handle_report(&CTRL_A), HotkeyOutcome::NotFound);
    }

    #[test]
    fn test_neutral_chord_is_rejected() {
        let mut bridge = bridge();
        let err = bridge.load(r#"on_hotkey([], || 1);"#).unwrap_err();
        assert!(matches!(err, SandboxError::Load(_)));
    }

    #[test]
    fn test_no_ambient_capabilities() {
        let mut bridge = bridge();
        assert!(bridge.load(r#"eval("40 + 2")"#).is_err());

        let mut bridge = self::bridge();
        assert!(bridge.load(r#"import "os" as os;"#).is_err());
    }

    #[test]
    fn test_unencodable_chord_is_script_error() {
        let mut bridge = bridge();
        let err = bridge.load(r#"encode(["€"]);"#).unwrap_err();
        match err {
            SandboxError::Load(message) => assert!(message.contains("cannot be typed")),
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = bridge();
        assert!(matches!(
            bridge.load_file(&dir.path().join("main.rhai")),
            Err(SandboxError::Read { .. })
        ));
    }

    #[test]
    fn test_load_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rhai");
        std::fs::write(&path, r#"on_hotkey(["gui", "q"], || ());"#).unwrap();
        let mut bridge = bridge();
        assert_eq!(bridge.load_file(&path).unwrap(), 1);
    }
}
