//! The fixed-timestep pipeline driver.
//!
//! [`Pipeline`] owns the [`World`], the [`WorldState`] and the external
//! collaborators, and runs the systems in a fixed order each tick:
//!
//! 1. **load counters** evaluate and may latch.
//! 2. **spawn** matches requests against templates.
//! 3. **code loader** drains every payload write observed so far.
//! 4. **logic swap** rebuilds bindings marked for replacement.
//! 5. **logic** runs update hooks.
//!
//! Because a counter that latches in step 1 opens the gate for steps 2 and 5
//! in the same tick, requests enqueued before the latching tick are spawned
//! on that tick.
//!
//! # Example
//!
//! ```
//! use loom_engine::prelude::*;
//!
//! let instantiator = |_: &TemplateRecord, _: &Transform| {
//!     Ok::<_, SpawnError>(LiveRepresentation::new(()))
//! };
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), instantiator).unwrap();
//! pipeline.register_template(TemplateRecord::new(1, "crate", TemplateHandle::new(())));
//! pipeline.enqueue_spawn(SpawnRequest::new(1, 42, "crate #42"));
//!
//! pipeline.set_expected_count(LoadKind::Objects, 1);
//! pipeline.report_completed(LoadKind::Objects);
//! pipeline.tick();
//!
//! assert!(pipeline.live_object(42).is_some());
//! assert!(pipeline.drain_events().contains(&WorldEvent::SpawnBatchCompleted));
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use loom_ecs::prelude::*;
use loom_wasm_host::WasmError;

use crate::collab::{
    CodeCompiler, DiagnosticSink, DiscardJoints, JointPublisher, TemplateInstantiator,
    TracingDiagnostics, WasmCompiler,
};
use crate::components::{CodeLoadState, CompiledCode, LiveObject, SpawnRequest, TemplateRecord};
use crate::config::{ConfigError, PipelineConfig, SimulationMode};
use crate::counters::run_load_counters;
use crate::loader::{CodeLoader, LoadReport};
use crate::logic::{run_logic, swap_object_logic, LogicBinding, LogicContext, LogicReport};
use crate::spawn::{SpawnOrchestrator, SpawnReport};
use crate::state::{LoadKind, WorldEvent, WorldState};
use crate::teardown::{sweep, SweepReport};

/// System names, in execution order.
pub const SYSTEM_ORDER: [&str; 5] = ["load_counters", "spawn", "code_loader", "logic_swap", "logic"];

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start the WASM backend: {0}")]
    Wasm(#[from] WasmError),
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// Diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Zero-based number of the tick this report describes.
    pub tick: u64,
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(&'static str, Duration)>,
    pub total_time: Duration,
    /// Counters that latched during this tick.
    pub latched: Vec<LoadKind>,
    pub spawn: SpawnReport,
    pub load: LoadReport,
    pub logic: LogicReport,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    world: World,
    state: WorldState,
    config: PipelineConfig,
    orchestrator: SpawnOrchestrator,
    loader: CodeLoader,
    instantiator: Box<dyn TemplateInstantiator>,
    compiler: Box<dyn CodeCompiler>,
    joints: Box<dyn JointPublisher>,
    diagnostics: Box<dyn DiagnosticSink>,
    tick_counter: u64,
    last_report: TickReport,
}

impl Pipeline {
    /// Create a pipeline over an empty world, using the WASM compiler, no
    /// joint publisher and `tracing`-only diagnostics.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Config`] if `config` does not validate.
    /// - [`PipelineError::Wasm`] if the WASM engine cannot be created.
    pub fn new(
        config: PipelineConfig,
        instantiator: impl TemplateInstantiator + 'static,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let compiler = WasmCompiler::new(config.wasm.clone())?;

        let mut world = World::new();
        let loader = CodeLoader::new(&mut world);

        tracing::debug!(
            fixed_dt = config.fixed_dt,
            mode = ?config.mode,
            batch_signal = ?config.batch_signal,
            "pipeline created"
        );

        Ok(Self {
            world,
            state: WorldState::new(),
            config,
            orchestrator: SpawnOrchestrator::new(),
            loader,
            instantiator: Box::new(instantiator),
            compiler: Box::new(compiler),
            joints: Box::new(DiscardJoints),
            diagnostics: Box::new(TracingDiagnostics),
            tick_counter: 0,
            last_report: TickReport::default(),
        })
    }

    pub fn with_compiler(mut self, compiler: impl CodeCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn with_joint_publisher(mut self, publisher: impl JointPublisher + 'static) -> Self {
        self.joints = Box::new(publisher);
        self
    }

    pub fn with_diagnostics(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    // -- ticking ------------------------------------------------------------

    /// Execute one tick and return its diagnostics.
    pub fn tick(&mut self) -> &TickReport {
        let tick_start = Instant::now();
        let tick = self.tick_counter;
        let _span = tracing::debug_span!("tick", tick).entered();

        let mut report = TickReport {
            tick,
            system_times: Vec::with_capacity(SYSTEM_ORDER.len()),
            ..Default::default()
        };

        let start = Instant::now();
        report.latched = run_load_counters(&mut self.state);
        report.system_times.push((SYSTEM_ORDER[0], start.elapsed()));

        let start = Instant::now();
        report.spawn = self.orchestrator.run(
            &mut self.world,
            &mut self.state,
            self.config.batch_signal,
            self.instantiator.as_mut(),
            self.joints.as_mut(),
        );
        report.system_times.push((SYSTEM_ORDER[1], start.elapsed()));

        let start = Instant::now();
        report.load = self.loader.run(
            &mut self.world,
            &mut self.state,
            self.compiler.as_ref(),
            self.diagnostics.as_mut(),
        );
        report.system_times.push((SYSTEM_ORDER[2], start.elapsed()));

        let start = Instant::now();
        swap_object_logic(&mut self.world, &mut report.logic);
        report.system_times.push((SYSTEM_ORDER[3], start.elapsed()));

        let start = Instant::now();
        let ctx = LogicContext {
            tick,
            sim_time: self.sim_time(),
            dt: self.config.fixed_dt,
        };
        run_logic(&mut self.world, &mut self.state, self.config.mode, &ctx, &mut report.logic);
        report.system_times.push((SYSTEM_ORDER[4], start.elapsed()));

        self.tick_counter += 1;
        report.total_time = tick_start.elapsed();
        self.last_report = report;
        &self.last_report
    }

    /// Run `count` ticks in sequence.
    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Destroy all templates and live objects and start a fresh
    /// [`WorldState`]. Pending requests and code payloads survive.
    pub fn teardown(&mut self) -> SweepReport {
        let report = sweep(&mut self.world);
        self.state = WorldState::new();
        self.orchestrator.clear();
        report
    }

    // -- inputs -------------------------------------------------------------

    /// Queue a request. It is considered from the next tick on.
    pub fn enqueue_spawn(&mut self, request: SpawnRequest) -> EntityId {
        self.world.create_with(request)
    }

    /// Drop a request that has not been processed yet. Returns whether
    /// `entity` was a pending request.
    pub fn cancel_spawn(&mut self, entity: EntityId) -> bool {
        self.world.has_component::<SpawnRequest>(entity) && self.world.destroy(entity).is_ok()
    }

    pub fn register_template(&mut self, template: TemplateRecord) -> EntityId {
        self.world.create_with(template)
    }

    pub fn set_expected_count(&mut self, kind: LoadKind, n: u32) {
        self.state.set_expected_count(kind, n);
    }

    pub fn report_expected(&mut self, kind: LoadKind, n: u32) {
        self.state.report_expected(kind, n);
    }

    pub fn report_completed(&mut self, kind: LoadKind) {
        self.state.report_completed(kind);
    }

    /// Attach (or replace) the code payload on `entity`. The loader picks it
    /// up on the next tick.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    pub fn attach_compiled_code(&mut self, entity: EntityId, code: CompiledCode) -> Result<(), EcsError> {
        self.world.replace_component(entity, code).map(|_| ())
    }

    /// Bind a native behavior directly, bypassing the loader.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    pub fn bind_logic(&mut self, entity: EntityId, binding: LogicBinding) -> Result<(), EcsError> {
        self.world.replace_component(entity, binding).map(|_| ())
    }

    /// Destroy the live object with `instance_id`. Returns whether one existed.
    pub fn destroy_live_object(&mut self, instance_id: i64) -> bool {
        let Some(entity) = self.live_object(instance_id).map(|(entity, _)| entity) else {
            return false;
        };
        tracing::debug!(%entity, instance_id, "destroying live object");
        self.world.destroy(entity).is_ok()
    }

    pub fn set_mode(&mut self, mode: SimulationMode) {
        if self.config.mode != mode {
            tracing::info!(from = ?self.config.mode, to = ?mode, "simulation mode changed");
        }
        self.config.mode = mode;
    }

    // -- outputs ------------------------------------------------------------

    /// Collect and clear the world events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.state.drain_events()
    }

    pub fn live_object(&self, instance_id: i64) -> Option<(EntityId, &LiveObject)> {
        self.world
            .iter::<LiveObject>()
            .find(|(_, object)| object.instance_id == instance_id)
    }

    pub fn code_load_state(&self, entity: EntityId) -> CodeLoadState {
        self.world
            .get_component::<CodeLoadState>(entity)
            .copied()
            .unwrap_or_default()
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// `tick_count * fixed_dt`, computed rather than accumulated.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.config.fixed_dt
    }

    pub fn mode(&self) -> SimulationMode {
        self.config.mode
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access, for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn last_report(&self) -> &TickReport {
        &self.last_report
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("tick_counter", &self.tick_counter)
            .field("config", &self.config)
            .field("entities", &self.world.entity_count())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{LiveRepresentation, TemplateHandle, Transform};
    use crate::spawn::SpawnError;

    fn pipeline() -> Pipeline {
        let instantiator =
            |_: &TemplateRecord, _: &Transform| Ok::<_, SpawnError>(LiveRepresentation::new(()));
        Pipeline::new(PipelineConfig::default(), instantiator).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            fixed_dt: f64::NAN,
            ..Default::default()
        };
        let instantiator =
            |_: &TemplateRecord, _: &Transform| Ok::<_, SpawnError>(LiveRepresentation::new(()));
        assert!(matches!(
            Pipeline::new(config, instantiator),
            Err(PipelineError::Config(ConfigError::InvalidTimestep(_)))
        ));
    }

    #[test]
    fn report_lists_systems_in_order() {
        let mut p = pipeline();
        let report = p.tick();
        let names: Vec<&str> = report.system_times.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, SYSTEM_ORDER);
        assert_eq!(report.tick, 0);
        assert_eq!(p.tick_count(), 1);
    }

    #[test]
    fn sim_time_is_computed_from_ticks() {
        let mut p = pipeline();
        p.run_ticks(120);
        assert!((p.sim_time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cancelled_request_is_never_spawned() {
        let mut p = pipeline();
        p.register_template(TemplateRecord::new(1, "a", TemplateHandle::new(())));
        let request = p.enqueue_spawn(SpawnRequest::new(1, 42, "a"));
        assert!(p.cancel_spawn(request));
        assert!(!p.cancel_spawn(request));
        p.run_ticks(3);
        assert!(p.live_object(42).is_none());
    }

    #[test]
    fn destroy_live_object_by_instance_id() {
        let mut p = pipeline();
        p.register_template(TemplateRecord::new(1, "a", TemplateHandle::new(())));
        p.enqueue_spawn(SpawnRequest::new(1, 42, "a"));
        p.run_ticks(2);
        assert!(p.live_object(42).is_some());
        assert!(p.destroy_live_object(42));
        assert!(!p.destroy_live_object(42));
        assert!(p.live_object(42).is_none());
    }

    #[test]
    fn teardown_resets_state() {
        let mut p = pipeline();
        p.register_template(TemplateRecord::new(1, "a", TemplateHandle::new(())));
        p.enqueue_spawn(SpawnRequest::new(1, 42, "a"));
        p.run_ticks(2);
        assert!(p.state().objects_loaded());

        let report = p.teardown();
        assert_eq!(
            report,
            SweepReport {
                templates: 1,
                live_objects: 1,
                scene_hosts: 0,
            }
        );
        assert!(!p.state().objects_loaded());
        assert!(p.drain_events().is_empty());
    }

    #[test]
    fn code_load_state_defaults_to_idle() {
        let mut p = pipeline();
        let entity = p.world_mut().create();
        assert_eq!(p.code_load_state(entity), CodeLoadState::Idle);
        p.attach_compiled_code(
            entity,
            CompiledCode {
                bytes: br#"(module (func (export "update") nop))"#.to_vec(),
                is_error: false,
            },
        )
        .unwrap();
        p.tick();
        assert_eq!(p.code_load_state(entity), CodeLoadState::Loaded);
    }
}
