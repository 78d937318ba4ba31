//! Process-wide simulation state shared by the pipeline's systems.
//!
//! [`WorldState`] holds everything that is global rather than per-entity: the
//! two load counters and their latches, the active scene logic, the event
//! outbox read by collaborators, and the scene-logic inbox. It is created with
//! the world, passed by reference into each system, and replaced wholesale on
//! teardown.

use loom_ecs::entity::EntityId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LoadKind
// ---------------------------------------------------------------------------

/// Which load counter an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadKind {
    Objects,
    Resources,
}

impl LoadKind {
    pub const ALL: [LoadKind; 2] = [LoadKind::Objects, LoadKind::Resources];

    /// The event fired when this counter latches.
    pub fn loaded_event(self) -> WorldEvent {
        match self {
            LoadKind::Objects => WorldEvent::ObjectsLoaded,
            LoadKind::Resources => WorldEvent::ResourcesLoaded,
        }
    }
}

// ---------------------------------------------------------------------------
// LoadCounter
// ---------------------------------------------------------------------------

/// Expected vs. completed count with a one-way latch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCounter {
    pub expected: u32,
    pub completed: u32,
    pub latched: bool,
    /// Number of evaluation passes run so far.
    pub evaluations: u64,
}

impl LoadCounter {
    /// Run one evaluation pass. Returns `true` only on the pass that latches.
    ///
    /// A counter nobody registered expectations for is not considered
    /// satisfied on its very first pass.
    pub fn evaluate(&mut self) -> bool {
        self.evaluations += 1;
        if self.latched || self.completed < self.expected {
            return false;
        }
        if self.expected == 0 && self.evaluations == 1 {
            return false;
        }
        self.latched = true;
        true
    }
}

// ---------------------------------------------------------------------------
// WorldEvent
// ---------------------------------------------------------------------------

/// Global one-shot signals emitted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldEvent {
    ObjectsLoaded,
    ResourcesLoaded,
    /// A tick's spawn batch included internal (bootstrap) spawns.
    InitialSpawnBatchCompleted,
    /// A tick's spawn batch was made of ordinary spawns.
    SpawnBatchCompleted,
    /// The active scene logic was replaced.
    SceneLogicSwapped,
}

impl WorldEvent {
    /// Stable code handed to WASM `on_event(i32)` hooks.
    pub fn code(self) -> i32 {
        match self {
            WorldEvent::ObjectsLoaded => 1,
            WorldEvent::ResourcesLoaded => 2,
            WorldEvent::InitialSpawnBatchCompleted => 3,
            WorldEvent::SpawnBatchCompleted => 4,
            WorldEvent::SceneLogicSwapped => 5,
        }
    }
}

// ---------------------------------------------------------------------------
// ActiveSceneLogic
// ---------------------------------------------------------------------------

/// Which entity currently hosts the scene's logic, and how often it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSceneLogic {
    pub host: EntityId,
    pub type_name: String,
    /// Number of hot-swaps installed since the world started.
    pub generation: u32,
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorldState {
    objects: LoadCounter,
    resources: LoadCounter,
    scene_logic: Option<ActiveSceneLogic>,
    /// Events not yet collected by collaborators.
    outbox: Vec<WorldEvent>,
    /// Events not yet delivered to the scene logic. Cleared on hot-swap.
    scene_inbox: Vec<WorldEvent>,
}

/// Most events held for the scene logic between two logic passes. Older
/// events are dropped first.
pub const SCENE_INBOX_CAPACITY: usize = 64;

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    // -- counters -------------------------------------------------------------

    pub fn counter(&self, kind: LoadKind) -> &LoadCounter {
        match kind {
            LoadKind::Objects => &self.objects,
            LoadKind::Resources => &self.resources,
        }
    }

    pub(crate) fn counter_mut(&mut self, kind: LoadKind) -> &mut LoadCounter {
        match kind {
            LoadKind::Objects => &mut self.objects,
            LoadKind::Resources => &mut self.resources,
        }
    }

    pub fn report_expected(&mut self, kind: LoadKind, n: u32) {
        let counter = self.counter_mut(kind);
        counter.expected = counter.expected.saturating_add(n);
    }

    pub fn set_expected_count(&mut self, kind: LoadKind, n: u32) {
        self.counter_mut(kind).expected = n;
    }

    pub fn report_completed(&mut self, kind: LoadKind) {
        let counter = self.counter_mut(kind);
        counter.completed = counter.completed.saturating_add(1);
    }

    pub fn is_loaded(&self, kind: LoadKind) -> bool {
        self.counter(kind).latched
    }

    /// The bootstrap gate for spawning and logic.
    pub fn objects_loaded(&self) -> bool {
        self.objects.latched
    }

    // -- events ---------------------------------------------------------------

    pub(crate) fn emit(&mut self, event: WorldEvent) {
        tracing::debug!(?event, "world event");
        self.outbox.push(event);
        if self.scene_logic.is_none() {
            return;
        }
        if self.scene_inbox.len() == SCENE_INBOX_CAPACITY {
            let dropped = self.scene_inbox.remove(0);
            tracing::warn!(?dropped, capacity = SCENE_INBOX_CAPACITY, "scene inbox full, dropping oldest event");
        }
        self.scene_inbox.push(event);
    }

    /// Collect and clear pending events.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_events(&self) -> &[WorldEvent] {
        &self.outbox
    }

    pub(crate) fn take_scene_inbox(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.scene_inbox)
    }

    pub fn scene_inbox(&self) -> &[WorldEvent] {
        &self.scene_inbox
    }

    // -- scene logic ----------------------------------------------------------

    pub fn scene_logic(&self) -> Option<&ActiveSceneLogic> {
        self.scene_logic.as_ref()
    }

    /// Record a completed hot-swap. Only the code loader calls this.
    pub(crate) fn install_scene_logic(&mut self, host: EntityId, type_name: String) -> EntityId {
        let generation = self.scene_logic.as_ref().map_or(1, |s| s.generation + 1);
        let previous = self.scene_logic.replace(ActiveSceneLogic {
            host,
            type_name,
            generation,
        });
        // Buffered events were addressed to the old implementation.
        self.scene_inbox.clear();
        previous.map_or(host, |p| p.host)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
