//! Loom WASM Host -- Wasmtime backend for hot-swappable behavior code.
//!
//! Behavior code reaches the engine as already-built WASM bytes (binary or WAT
//! text). This crate turns those bytes into a [`ScriptType`], a compiled and
//! validated module that can be instantiated any number of times, and runs the
//! resulting [`ScriptInstance`]s under a fuel budget and memory cap.
//!
//! # Module contract
//!
//! - Must export `update: () -> ()`, called once per simulation tick.
//! - May export `on_event: (i32) -> ()`, called once per buffered world event
//!   before `update`.
//! - Exporting anything named `scene_logic` declares the module a scene-logic
//!   implementation ([`ScriptCategory::SceneLogic`]); every other module is
//!   ordinary per-object behavior.
//! - May import the host functions listed in [`host_api`] from the `"loom"`
//!   namespace. No WASI, no other imports.
//!
//! # Example
//!
//! ```no_run
//! use loom_wasm_host::{WasmConfig, WasmHost};
//!
//! let host = WasmHost::new(WasmConfig::default()).unwrap();
//! let wat = r#"
//!     (module
//!       (global $n (mut i32) (i32.const 0))
//!       (func (export "update")
//!         global.get $n
//!         i32.const 1
//!         i32.add
//!         global.set $n))
//! "#;
//! let script = host.compile(wat.as_bytes()).unwrap();
//! let mut instance = script.instantiate().unwrap();
//! let fuel_consumed = instance.call_update(1, 1.0 / 60.0).unwrap();
//! assert!(fuel_consumed > 0);
//! ```

#![deny(unsafe_code)]

pub mod host_api;
mod module;

pub use host_api::HostState;
pub use module::{ScriptCategory, ScriptInstance, ScriptType, WasmConfig, WasmHost};

/// Export name that marks a module as scene logic.
pub const SCENE_LOGIC_EXPORT: &str = "scene_logic";
/// Required per-tick entry point.
pub const UPDATE_EXPORT: &str = "update";
/// Optional event hook.
pub const EVENT_EXPORT: &str = "on_event";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by WASM module operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WasmError {
    /// The bytes could not be compiled (invalid bytecode or WAT syntax).
    #[error("WASM compilation failed: {0}")]
    CompileError(String),

    /// A required export is absent or has the wrong signature.
    #[error("missing required export '{name}' -- behavior modules must export `{name}: () -> ()`")]
    MissingExport {
        /// The name of the missing export.
        name: String,
    },

    /// The module compiled but could not be instantiated (unsatisfied imports,
    /// start function trap, memory limit at instantiation).
    #[error("WASM instantiation failed: {0}")]
    Instantiation(String),

    /// The module exhausted its fuel budget during execution.
    #[error("WASM module ran out of fuel (budget: {budget} units) -- possible infinite loop or excessive computation")]
    OutOfFuel {
        /// The fuel budget that was exceeded.
        budget: u64,
    },

    /// A WASM trap occurred during execution (unreachable, division by zero,
    /// out-of-bounds memory access).
    #[error("WASM trap: {0}")]
    Trap(String),

    /// A general runtime error from the Wasmtime engine.
    #[error("WASM runtime error: {0}")]
    Runtime(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOOP: &str = r#"(module (func (export "update") nop))"#;

    const COUNTER: &str = r#"
        (module
          (global $count (mut i32) (i32.const 0))
          (func (export "update")
            global.get $count
            i32.const 1
            i32.add
            global.set $count)
          (func (export "get_count") (result i32)
            global.get $count))
    "#;

    const SCENE: &str = r#"
        (module
          (func (export "scene_logic"))
          (func (export "update") nop))
    "#;

    const FUEL_HOG: &str = r#"
        (module
          (func (export "update")
            (loop $forever (br $forever))))
    "#;

    const TRAPS: &str = r#"(module (func (export "update") unreachable))"#;

    fn host() -> WasmHost {
        WasmHost::new(WasmConfig::default()).unwrap()
    }

    #[test]
    fn compile_noop_module() {
        let script = host().compile(NOOP.as_bytes()).unwrap();
        assert_eq!(script.category(), ScriptCategory::ObjectLogic);
    }

    #[test]
    fn scene_logic_export_sets_category() {
        let script = host().compile(SCENE.as_bytes()).unwrap();
        assert_eq!(script.category(), ScriptCategory::SceneLogic);
    }

    #[test]
    fn garbage_bytes_fail_to_compile() {
        let err = host().compile(b"definitely not wasm").unwrap_err();
        assert!(matches!(err, WasmError::CompileError(_)), "got {err:?}");
    }

    #[test]
    fn missing_update_export_is_rejected() {
        let err = host()
            .compile(br#"(module (func (export "tick") nop))"#)
            .unwrap_err();
        assert_eq!(
            err,
            WasmError::MissingExport {
                name: "update".to_owned()
            }
        );
    }

    #[test]
    fn update_with_wrong_signature_is_rejected() {
        let err = host()
            .compile(br#"(module (func (export "update") (param i32)))"#)
            .unwrap_err();
        assert!(matches!(err, WasmError::MissingExport { .. }));
    }

    #[test]
    fn wasi_import_fails_to_instantiate() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "fd_write"
                (func (param i32 i32 i32 i32) (result i32)))
              (func (export "update") nop))
        "#;
        let script = host().compile(wat.as_bytes()).unwrap();
        let err = script.instantiate().unwrap_err();
        assert!(matches!(err, WasmError::Instantiation(_)), "got {err:?}");
    }

    #[test]
    fn update_consumes_fuel() {
        let mut instance = host().compile(COUNTER.as_bytes()).unwrap().instantiate().unwrap();
        let fuel = instance.call_update(1, 0.0).unwrap();
        assert!(fuel > 0, "arithmetic should cost fuel");
    }

    #[test]
    fn instance_state_persists_across_updates() {
        let mut instance = host().compile(COUNTER.as_bytes()).unwrap().instantiate().unwrap();
        for tick in 1..=5 {
            instance.call_update(tick, 0.0).unwrap();
        }
        assert_eq!(instance.call_i32_export("get_count").unwrap(), 5);
    }

    #[test]
    fn instances_of_one_type_are_independent() {
        let script = host().compile(COUNTER.as_bytes()).unwrap();
        let mut a = script.instantiate().unwrap();
        let mut b = script.instantiate().unwrap();
        a.call_update(1, 0.0).unwrap();
        a.call_update(2, 0.0).unwrap();
        b.call_update(1, 0.0).unwrap();
        assert_eq!(a.call_i32_export("get_count").unwrap(), 2);
        assert_eq!(b.call_i32_export("get_count").unwrap(), 1);
    }

    #[test]
    fn fuel_exhaustion_returns_out_of_fuel() {
        let config = WasmConfig {
            fuel_per_update: 10_000,
            ..WasmConfig::default()
        };
        let host = WasmHost::new(config).unwrap();
        let mut instance = host.compile(FUEL_HOG.as_bytes()).unwrap().instantiate().unwrap();
        let err = instance.call_update(1, 0.0).unwrap_err();
        assert_eq!(err, WasmError::OutOfFuel { budget: 10_000 });
    }

    #[test]
    fn fuel_resets_between_updates() {
        let mut instance = host().compile(COUNTER.as_bytes()).unwrap().instantiate().unwrap();
        let first = instance.call_update(1, 0.0).unwrap();
        let second = instance.call_update(2, 0.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unreachable_is_reported_as_trap() {
        let mut instance = host().compile(TRAPS.as_bytes()).unwrap().instantiate().unwrap();
        let err = instance.call_update(1, 0.0).unwrap_err();
        assert!(matches!(err, WasmError::Trap(_)), "got {err:?}");
    }

    #[test]
    fn event_hook_is_optional() {
        let mut instance = host().compile(NOOP.as_bytes()).unwrap().instantiate().unwrap();
        assert!(!instance.has_event_hook());
        instance.call_event(3).unwrap();
    }

    #[test]
    fn event_hook_receives_codes() {
        let wat = r#"
            (module
              (global $last (mut i32) (i32.const -1))
              (func (export "on_event") (param i32)
                local.get 0
                global.set $last)
              (func (export "update") nop)
              (func (export "last_event") (result i32)
                global.get $last))
        "#;
        let mut instance = host().compile(wat.as_bytes()).unwrap().instantiate().unwrap();
        assert!(instance.has_event_hook());
        instance.call_event(4).unwrap();
        assert_eq!(instance.call_i32_export("last_event").unwrap(), 4);
    }
}
