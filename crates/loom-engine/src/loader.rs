//! The dynamic code loader.
//!
//! Reacts to every write of a [`CompiledCode`] component (identical bytes
//! included) and drives the entity's [`CodeLoadState`]:
//!
//! ```text
//! Idle | Loaded | Failed --write--> Loading
//! Loading --is_error / compile failure--> Failed   (handle untouched, user notified)
//! Loading --resolution failure----------> Failed   (handle = None)
//! Loading --ok, object logic------------> Loaded   (handle set, ReplaceLogic added)
//! Loading --ok, scene logic-------------> Loaded   (handle set, scene hot-swapped)
//! Loading --ok, object logic on the
//!           active scene host-----------> Failed   (handle = None)
//! ```
//!
//! A scene hot-swap instantiates the new implementation before anything else
//! changes; if that fails the load counts as a resolution failure and the
//! previous scene logic keeps running. Every notification observed in a tick
//! is processed in that tick.

use loom_ecs::prelude::*;

use crate::collab::{CodeCompiler, CompileOutcome, DiagnosticSink, Severity};
use crate::components::{CodeLoadState, CompiledCode, LoadedTypeHandle, ReplaceLogic, SceneLogicHost};
use crate::logic::{BehaviorType, LogicBinding, LogicError, TypeHandle};
use crate::state::{WorldEvent, WorldState};

// ---------------------------------------------------------------------------
// LoadReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Distinct entities whose payload was written since the last pass.
    pub observed: usize,
    pub loaded: usize,
    pub compile_errors: usize,
    pub resolution_failures: usize,
    pub scene_swaps: usize,
}

// ---------------------------------------------------------------------------
// CodeLoader
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CodeLoader {
    payloads: ChangeSubscription,
}

impl CodeLoader {
    /// Subscribe to payload writes on `world`. Writes made before this call
    /// are not observed.
    pub fn new(world: &mut World) -> Self {
        Self {
            payloads: world.subscribe::<CompiledCode>(),
        }
    }

    /// Process every payload write observed since the last pass.
    pub fn run(
        &mut self,
        world: &mut World,
        state: &mut WorldState,
        compiler: &dyn CodeCompiler,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> LoadReport {
        let mut report = LoadReport::default();

        let mut changed = world.read_changes(&self.payloads);
        // Several writes in one tick load the latest payload once.
        let mut seen = std::collections::HashSet::new();
        changed.retain(|entity| seen.insert(*entity));

        for entity in changed {
            let Some(payload) = world.get_component::<CompiledCode>(entity).cloned() else {
                continue;
            };
            report.observed += 1;
            set_state(world, entity, CodeLoadState::Loading);

            let digest = blake3::hash(&payload.bytes);
            tracing::debug!(
                %entity,
                digest = %digest.to_hex(),
                byte_len = payload.bytes.len(),
                is_error = payload.is_error,
                "loading code payload"
            );

            let outcome = if payload.is_error {
                CompileOutcome::CompileFailed(String::from_utf8_lossy(&payload.bytes).into_owned())
            } else {
                compiler.compile(&payload.bytes)
            };

            let next = match outcome {
                CompileOutcome::CompileFailed(message) => {
                    report.compile_errors += 1;
                    tracing::warn!(%entity, digest = %digest.to_hex(), %message, "code payload failed to compile");
                    diagnostics.report(Severity::Error, &format!("compile error on {entity}: {message}"));
                    CodeLoadState::Failed
                }
                CompileOutcome::ResolutionFailed(message) => {
                    report.resolution_failures += 1;
                    resolution_failed(world, entity, &message);
                    CodeLoadState::Failed
                }
                CompileOutcome::Loaded(handle) if handle.is_scene_logic() => {
                    match hot_swap_scene_logic(world, state, entity, &handle) {
                        Ok(()) => {
                            report.loaded += 1;
                            report.scene_swaps += 1;
                            write(world, entity, LoadedTypeHandle { resolved: Some(handle) });
                            CodeLoadState::Loaded
                        }
                        Err(e) => {
                            report.resolution_failures += 1;
                            resolution_failed(world, entity, &e.to_string());
                            CodeLoadState::Failed
                        }
                    }
                }
                CompileOutcome::Loaded(handle) if state.scene_logic().is_some_and(|s| s.host == entity) => {
                    // The scene binding is only ever replaced by a scene hot-swap.
                    report.resolution_failures += 1;
                    let message = format!("object logic {} cannot replace the active scene logic", handle.type_name());
                    resolution_failed(world, entity, &message);
                    CodeLoadState::Failed
                }
                CompileOutcome::Loaded(handle) => {
                    report.loaded += 1;
                    tracing::debug!(%entity, type_name = %handle.type_name(), "object logic loaded");
                    write(world, entity, LoadedTypeHandle { resolved: Some(handle) });
                    write(world, entity, ReplaceLogic);
                    CodeLoadState::Loaded
                }
            };
            set_state(world, entity, next);
        }

        report
    }
}

fn write<T: 'static>(world: &mut World, entity: EntityId, value: T) {
    if let Err(e) = world.replace_component(entity, value) {
        tracing::warn!(%entity, error = %e, "code loader write failed");
    }
}

fn set_state(world: &mut World, entity: EntityId, state: CodeLoadState) {
    write(world, entity, state);
}

fn resolution_failed(world: &mut World, entity: EntityId, message: &str) {
    tracing::warn!(%entity, %message, "code payload could not be resolved, keeping previous logic");
    write(world, entity, LoadedTypeHandle { resolved: None });
}

/// Make `entity` the scene-logic host running a fresh instance of `handle`.
///
/// Nothing is modified unless the new instance was created.
fn hot_swap_scene_logic(
    world: &mut World,
    state: &mut WorldState,
    entity: EntityId,
    handle: &TypeHandle,
) -> Result<(), LogicError> {
    let binding = LogicBinding::from_type(handle)?;
    let type_name = binding.type_name.clone();

    world
        .replace_component(entity, binding)
        .map_err(|e| LogicError::Failed(e.to_string()))?;
    write(world, entity, SceneLogicHost);
    // Absent unless an object payload was pending on this entity.
    let _ = world.remove_component::<ReplaceLogic>(entity);

    let previous = state.install_scene_logic(entity, type_name.clone());
    if previous != entity && world.is_alive(previous) {
        if let Err(e) = world.remove_component::<LogicBinding>(previous) {
            tracing::warn!(entity = %previous, error = %e, "previous scene host had no binding");
        }
        let _ = world.remove_component::<SceneLogicHost>(previous);
    }
    state.emit(WorldEvent::SceneLogicSwapped);

    tracing::info!(
        %entity,
        %type_name,
        generation = state.scene_logic().map_or(0, |s| s.generation),
        "scene logic hot-swapped"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
