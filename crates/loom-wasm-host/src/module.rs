//! Compiling behavior modules and running their instances.
//!
//! [`WasmHost`] owns the Wasmtime [`Engine`] and turns bytes into
//! [`ScriptType`]s. A `ScriptType` is the "loaded type handle" of the engine:
//! cheap to clone, immutable, and able to produce fresh [`ScriptInstance`]s.
//! Each instance has its own [`Store`], so two instances of one type never
//! share state and dropping an instance releases everything it allocated.

use std::fmt;

use wasmtime::{Engine, ExternType, Instance, Linker, Module, Store, StoreLimitsBuilder};

use crate::host_api::{register_host_api, HostState};
use crate::{WasmError, EVENT_EXPORT, SCENE_LOGIC_EXPORT, UPDATE_EXPORT};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sandbox limits applied to every instance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// Fuel units granted per `update()` or `on_event()` call. Running out
    /// traps with [`WasmError::OutOfFuel`]. Default: 1,000,000.
    pub fuel_per_update: u64,

    /// Maximum linear memory an instance may hold, in bytes.
    /// Default: 16 MiB.
    pub memory_limit_bytes: usize,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            fuel_per_update: 1_000_000,
            memory_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptCategory
// ---------------------------------------------------------------------------

/// What a compiled module declares itself to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScriptCategory {
    /// Drives a whole scene; loading one hot-swaps the scene's logic.
    SceneLogic,
    /// Ordinary behavior attached to a single object.
    ObjectLogic,
}

// ---------------------------------------------------------------------------
// WasmHost
// ---------------------------------------------------------------------------

/// Compiles behavior modules against one shared engine.
#[derive(Clone)]
pub struct WasmHost {
    engine: Engine,
    config: WasmConfig,
}

impl WasmHost {
    /// Build an engine with fuel metering enabled.
    ///
    /// # Errors
    ///
    /// [`WasmError::Runtime`] if Wasmtime rejects the engine configuration.
    pub fn new(config: WasmConfig) -> Result<Self, WasmError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(true);

        let engine = Engine::new(&engine_config)
            .map_err(|e| WasmError::Runtime(format!("failed to create Wasmtime engine: {e}")))?;

        Ok(Self { engine, config })
    }

    pub fn config(&self) -> &WasmConfig {
        &self.config
    }

    /// Compile and validate `bytes` (binary `.wasm` or `.wat` text).
    ///
    /// # Errors
    ///
    /// - [`WasmError::CompileError`] if the bytes are not valid WASM/WAT.
    /// - [`WasmError::MissingExport`] if `update: () -> ()` is not exported.
    pub fn compile(&self, bytes: &[u8]) -> Result<ScriptType, WasmError> {
        let module =
            Module::new(&self.engine, bytes).map_err(|e| WasmError::CompileError(format!("{e}")))?;

        // Check the entry point up front so callers get MissingExport rather
        // than a failure on the first update.
        let has_update = module.exports().any(|export| {
            export.name() == UPDATE_EXPORT
                && matches!(export.ty(), ExternType::Func(ref f)
                    if f.params().len() == 0 && f.results().len() == 0)
        });
        if !has_update {
            return Err(WasmError::MissingExport {
                name: UPDATE_EXPORT.to_owned(),
            });
        }

        let category = if module.exports().any(|e| e.name() == SCENE_LOGIC_EXPORT) {
            ScriptCategory::SceneLogic
        } else {
            ScriptCategory::ObjectLogic
        };
        let has_event_hook = module.exports().any(|e| e.name() == EVENT_EXPORT);

        tracing::debug!(
            ?category,
            has_event_hook,
            byte_len = bytes.len(),
            "WASM module compiled"
        );

        Ok(ScriptType {
            engine: self.engine.clone(),
            module,
            category,
            has_event_hook,
            config: self.config.clone(),
        })
    }
}

impl fmt::Debug for WasmHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmHost")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ScriptType
// ---------------------------------------------------------------------------

/// A compiled, validated behavior module.
#[derive(Clone)]
pub struct ScriptType {
    engine: Engine,
    module: Module,
    category: ScriptCategory,
    has_event_hook: bool,
    config: WasmConfig,
}

impl ScriptType {
    pub fn category(&self) -> ScriptCategory {
        self.category
    }

    pub fn is_scene_logic(&self) -> bool {
        self.category == ScriptCategory::SceneLogic
    }

    /// Module name from the WASM name section, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.module.name()
    }

    /// Create a fresh instance with its own store, host state and limits.
    ///
    /// # Errors
    ///
    /// - [`WasmError::Instantiation`] if imports are unsatisfied or the start
    ///   function fails.
    /// - [`WasmError::Runtime`] if the store cannot be set up.
    pub fn instantiate(&self) -> Result<ScriptInstance, WasmError> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.memory_limit_bytes)
            .build();
        let mut store = Store::new(&self.engine, HostState::new(limits));
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.config.fuel_per_update)
            .map_err(|e| WasmError::Runtime(format!("failed to set fuel: {e}")))?;

        let mut linker = Linker::new(&self.engine);
        register_host_api(&mut linker)
            .map_err(|e| WasmError::Runtime(format!("failed to register host API: {e}")))?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| WasmError::Instantiation(format!("{e}")))?;

        Ok(ScriptInstance {
            store,
            instance,
            has_event_hook: self.has_event_hook,
            config: self.config.clone(),
        })
    }
}

impl fmt::Debug for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptType")
            .field("name", &self.module.name())
            .field("category", &self.category)
            .field("has_event_hook", &self.has_event_hook)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ScriptInstance
// ---------------------------------------------------------------------------

/// A running behavior: one store, one instance.
pub struct ScriptInstance {
    store: Store<HostState>,
    instance: Instance,
    has_event_hook: bool,
    config: WasmConfig,
}

impl ScriptInstance {
    /// Run `update()` with a fresh fuel budget. Returns the fuel consumed.
    ///
    /// # Errors
    ///
    /// - [`WasmError::OutOfFuel`] if the budget is exhausted.
    /// - [`WasmError::Trap`] on a WASM trap.
    /// - [`WasmError::Runtime`] if the export cannot be resolved.
    pub fn call_update(&mut self, tick: u64, sim_time: f64) -> Result<u64, WasmError> {
        self.store.data_mut().begin_tick(tick, sim_time);
        self.reset_fuel()?;

        let update = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, UPDATE_EXPORT)
            .map_err(|e| WasmError::Runtime(format!("failed to resolve update(): {e}")))?;

        update
            .call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))?;

        let remaining = self
            .store
            .get_fuel()
            .map_err(|e| WasmError::Runtime(format!("failed to read fuel: {e}")))?;
        let consumed = self.config.fuel_per_update.saturating_sub(remaining);

        tracing::trace!(fuel_consumed = consumed, fuel_remaining = remaining, "update() completed");
        Ok(consumed)
    }

    /// Deliver one event code to `on_event(i32)`. A no-op when the module
    /// does not export the hook.
    pub fn call_event(&mut self, code: i32) -> Result<(), WasmError> {
        if !self.has_event_hook {
            return Ok(());
        }
        self.reset_fuel()?;

        let hook = self
            .instance
            .get_typed_func::<i32, ()>(&mut self.store, EVENT_EXPORT)
            .map_err(|e| WasmError::Runtime(format!("failed to resolve on_event(): {e}")))?;

        hook.call(&mut self.store, code)
            .map_err(|e| self.classify_trap(e))
    }

    pub fn has_event_hook(&self) -> bool {
        self.has_event_hook
    }

    /// Call a named `() -> i32` export. Fuel is not reset first.
    pub fn call_i32_export(&mut self, name: &str) -> Result<i32, WasmError> {
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, name)
            .map_err(|e| WasmError::Runtime(format!("failed to resolve export '{name}': {e}")))?;

        func.call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))
    }

    pub fn fuel_remaining(&self) -> u64 {
        self.store.get_fuel().unwrap_or(0)
    }

    pub fn host_state(&self) -> &HostState {
        self.store.data()
    }

    // -- Internal helpers ---------------------------------------------------

    fn reset_fuel(&mut self) -> Result<(), WasmError> {
        self.store
            .set_fuel(self.config.fuel_per_update)
            .map_err(|e| WasmError::Runtime(format!("failed to set fuel: {e}")))
    }

    fn classify_trap(&self, error: anyhow::Error) -> WasmError {
        // Fuel exhaustion and other traps may arrive wrapped in context.
        for cause in error.chain() {
            if let Some(trap) = cause.downcast_ref::<wasmtime::Trap>() {
                if *trap == wasmtime::Trap::OutOfFuel {
                    return WasmError::OutOfFuel {
                        budget: self.config.fuel_per_update,
                    };
                }
                return WasmError::Trap(format!("{error}"));
            }
        }
        WasmError::Runtime(format!("{error}"))
    }
}

impl fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("config", &self.config)
            .field("fuel_remaining", &self.fuel_remaining())
            .field("host", self.store.data())
            .finish_non_exhaustive()
    }
}
