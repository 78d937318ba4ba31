//! Loom Engine -- spawn, load-tracking and hot-swap pipeline.
//!
//! This crate builds on [`loom_ecs`] and [`loom_wasm_host`] to turn
//! declarative spawn requests into live objects, track asynchronous load
//! completion, and replace behavior code while the simulation keeps running.
//!
//! The [`Pipeline`](pipeline::Pipeline) runs five systems per tick in a fixed
//! order: load counters, spawn orchestrator, code loader, per-object logic
//! swap, logic scheduler. Everything the systems share beyond the entity store
//! lives in [`WorldState`](state::WorldState).
//!
//! # Quick Start
//!
//! ```
//! use loom_engine::prelude::*;
//!
//! let instantiator = |template: &TemplateRecord, _: &Transform| {
//!     Ok::<_, SpawnError>(LiveRepresentation::new(template.display_name.clone()))
//! };
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), instantiator).unwrap();
//!
//! pipeline.register_template(TemplateRecord::new(7, "lamp", TemplateHandle::new(())));
//! pipeline.enqueue_spawn(SpawnRequest::new(7, 1, "lamp #1"));
//!
//! // Nobody registered expectations: the objects gate opens on the second tick.
//! pipeline.run_ticks(2);
//! assert!(pipeline.live_object(1).is_some());
//! ```

#![deny(unsafe_code)]

pub mod collab;
pub mod components;
pub mod config;
pub mod counters;
pub mod loader;
pub mod logging;
pub mod logic;
pub mod pipeline;
pub mod spawn;
pub mod state;
pub mod teardown;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use loom_ecs;

/// Re-export the WASM host crate for convenience.
pub use loom_wasm_host;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common pipeline usage.
pub mod prelude {
    pub use loom_ecs::prelude::*;

    pub use crate::collab::{
        CodeCompiler, CompileOutcome, DiagnosticSink, DiscardJoints, JointPublisher, Severity,
        TemplateInstantiator, TracingDiagnostics, WasmCompiler,
    };
    pub use crate::components::{
        CodeLoadState, CompiledCode, JointData, LiveObject, LiveRepresentation, LoadedTypeHandle,
        ReplaceLogic, SceneLogicHost, SpawnFlags, SpawnRequest, TemplateHandle, TemplateRecord,
        Transform,
    };
    pub use crate::config::{BatchSignalPrecedence, ConfigError, PipelineConfig, SimulationMode};
    pub use crate::logic::{
        Behavior, BehaviorType, LogicBinding, LogicContext, LogicError, TypeHandle,
    };
    pub use crate::pipeline::{Pipeline, PipelineError, TickReport};
    pub use crate::spawn::SpawnError;
    pub use crate::state::{LoadKind, WorldEvent, WorldState};
    pub use crate::teardown::SweepReport;

    pub use loom_wasm_host::{ScriptCategory, WasmConfig};
}
