//! Behavior bindings and the per-tick logic scheduler.
//!
//! A [`BehaviorType`] is a loaded, instantiable piece of behavior code (the
//! WASM backend's [`ScriptType`] is one). Instantiating it yields a
//! [`Behavior`], which is stored on an entity inside a [`LogicBinding`].
//!
//! Two systems live here:
//!
//! - [`swap_object_logic`] rebuilds the binding of every entity marked with
//!   [`ReplaceLogic`] from its freshly loaded type. This is the per-object
//!   hot-swap path; the scene-wide path lives in the code loader.
//! - [`run_logic`] invokes every binding's update hook, gated on the
//!   objects-loaded latch and on the simulation not being in edit mode.
//!
//! # Ordering
//!
//! Bindings run in the order their entities first received a `LogicBinding`.
//! A hot-swapped binding keeps its entity's original slot.

use std::fmt;
use std::sync::Arc;

use loom_ecs::prelude::*;
use loom_wasm_host::{ScriptCategory, ScriptInstance, ScriptType, WasmError};

use crate::components::{LoadedTypeHandle, ReplaceLogic, SceneLogicHost};
use crate::config::SimulationMode;
use crate::state::{WorldEvent, WorldState};

// ---------------------------------------------------------------------------
// Behavior traits
// ---------------------------------------------------------------------------

/// Timing passed to every update hook.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicContext {
    pub tick: u64,
    pub sim_time: f64,
    pub dt: f64,
}

/// Running behavior bound to an entity.
pub trait Behavior: Send {
    /// Called once per tick while the scheduler is open.
    fn update(&mut self, ctx: &LogicContext) -> Result<(), LogicError>;

    /// Called for each buffered world event before `update`. Only scene-logic
    /// hosts receive events.
    fn on_event(&mut self, _event: WorldEvent) -> Result<(), LogicError> {
        Ok(())
    }
}

/// A loaded behavior type: the resolved form of a code payload.
pub trait BehaviorType: Send + Sync + fmt::Debug {
    fn category(&self) -> ScriptCategory;

    fn type_name(&self) -> String;

    fn instantiate(&self) -> Result<Box<dyn Behavior>, LogicError>;

    fn is_scene_logic(&self) -> bool {
        self.category() == ScriptCategory::SceneLogic
    }
}

/// Shared reference to a loaded type.
pub type TypeHandle = Arc<dyn BehaviorType>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogicError {
    #[error(transparent)]
    Wasm(#[from] WasmError),

    /// A native behavior reported a failure.
    #[error("behavior failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// LogicBinding
// ---------------------------------------------------------------------------

/// The behavior currently driving an entity.
pub struct LogicBinding {
    pub implementation: Box<dyn Behavior>,
    pub type_name: String,
}

impl LogicBinding {
    pub fn new(type_name: impl Into<String>, implementation: Box<dyn Behavior>) -> Self {
        Self {
            implementation,
            type_name: type_name.into(),
        }
    }

    /// Instantiate `handle` into a fresh binding.
    pub fn from_type(handle: &TypeHandle) -> Result<Self, LogicError> {
        Ok(Self::new(handle.type_name(), handle.instantiate()?))
    }
}

impl fmt::Debug for LogicBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicBinding")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WASM-backed behaviors
// ---------------------------------------------------------------------------

/// A [`ScriptInstance`] driven through the [`Behavior`] interface.
#[derive(Debug)]
pub struct WasmBehavior {
    instance: ScriptInstance,
}

impl Behavior for WasmBehavior {
    fn update(&mut self, ctx: &LogicContext) -> Result<(), LogicError> {
        self.instance.call_update(ctx.tick, ctx.sim_time)?;
        Ok(())
    }

    fn on_event(&mut self, event: WorldEvent) -> Result<(), LogicError> {
        self.instance.call_event(event.code())?;
        Ok(())
    }
}

impl BehaviorType for ScriptType {
    fn category(&self) -> ScriptCategory {
        ScriptType::category(self)
    }

    fn type_name(&self) -> String {
        self.name().unwrap_or("<anonymous wasm>").to_owned()
    }

    fn instantiate(&self) -> Result<Box<dyn Behavior>, LogicError> {
        let instance = ScriptType::instantiate(self)?;
        Ok(Box::new(WasmBehavior { instance }))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What the logic systems did during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicReport {
    /// Whether the scheduler's gates were open.
    pub ran: bool,
    /// Update hooks that returned successfully.
    pub invoked: usize,
    /// Update or event hooks that failed.
    pub failed: usize,
    /// Per-object bindings rebuilt by the swap pass.
    pub swapped: usize,
    /// Events delivered to the scene logic.
    pub events_delivered: usize,
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Rebuild bindings for entities carrying both a loaded type and the
/// [`ReplaceLogic`] marker. The marker is cleared whatever the outcome; if
/// instantiation fails the old binding stays and the handle is nulled.
pub fn swap_object_logic(world: &mut World, report: &mut LogicReport) {
    let marked = world.query(
        &QueryFilter::new()
            .with::<LoadedTypeHandle>()
            .with::<ReplaceLogic>(),
    );

    for entity in marked {
        // The marker only ever triggers one attempt.
        let _ = world.remove_component::<ReplaceLogic>(entity);

        let Some(handle) = world
            .get_component::<LoadedTypeHandle>(entity)
            .and_then(|h| h.resolved.clone())
        else {
            continue;
        };

        match LogicBinding::from_type(&handle) {
            Ok(binding) => {
                tracing::debug!(%entity, type_name = %binding.type_name, "object logic swapped");
                if let Err(e) = world.replace_component(entity, binding) {
                    tracing::warn!(%entity, error = %e, "object logic swap target vanished");
                    continue;
                }
                report.swapped += 1;
            }
            Err(e) => {
                tracing::warn!(
                    %entity,
                    type_name = %handle.type_name(),
                    error = %e,
                    "object logic could not be instantiated, keeping previous binding"
                );
                if let Err(e) = world.replace_component(entity, LoadedTypeHandle { resolved: None }) {
                    tracing::warn!(%entity, error = %e, "could not clear loaded type handle");
                }
            }
        }
    }
}

/// Invoke every binding's update hook.
///
/// Gated on the objects-loaded latch and on `mode != Edit`. The scene-logic
/// host first receives the events buffered since its last run. A failing hook
/// is logged and does not affect other entities.
pub fn run_logic(
    world: &mut World,
    state: &mut WorldState,
    mode: SimulationMode,
    ctx: &LogicContext,
    report: &mut LogicReport,
) {
    if !state.objects_loaded() || mode == SimulationMode::Edit {
        return;
    }
    report.ran = true;

    let inbox = state.take_scene_inbox();
    let bound = world.query(&QueryFilter::new().with::<LogicBinding>());

    for entity in bound {
        let is_scene_host = world.has_component::<SceneLogicHost>(entity);
        let Some(binding) = world.get_component_mut::<LogicBinding>(entity) else {
            continue;
        };

        if is_scene_host {
            for &event in &inbox {
                match binding.implementation.on_event(event) {
                    Ok(()) => report.events_delivered += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(%entity, ?event, error = %e, "scene logic event hook failed");
                    }
                }
            }
        }

        match binding.implementation.update(ctx) {
            Ok(()) => report.invoked += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    %entity,
                    type_name = %binding.type_name,
                    tick = ctx.tick,
                    error = %e,
                    "logic update failed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
