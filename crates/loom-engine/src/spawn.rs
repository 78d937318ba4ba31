//! The spawn orchestrator.
//!
//! Each tick (once the objects-loaded gate is open) every [`SpawnRequest`]
//! present at tick start is matched by `type_id` against every
//! [`TemplateRecord`] present at tick start. A match is instantiated through
//! the [`TemplateInstantiator`] and recorded as a new entity carrying a
//! [`LiveObject`].
//!
//! Failures are isolated per request: an instantiator error or panic is
//! logged with the request's name and server id, the request is destroyed,
//! and the batch carries on. After every request has been attempted, joint
//! data from the successful spawns is published in one call, one batch event
//! is emitted, and the tick-start requests are destroyed.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};

use loom_ecs::prelude::*;

use crate::collab::{JointPublisher, TemplateInstantiator};
use crate::components::{JointData, LiveObject, SpawnRequest, TemplateRecord};
use crate::config::BatchSignalPrecedence;
use crate::state::{WorldEvent, WorldState};

// ---------------------------------------------------------------------------
// SpawnError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// The instantiator rejected the template.
    #[error("template instantiation failed: {0}")]
    Instantiation(String),

    /// The instantiator panicked.
    #[error("template instantiator panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// SpawnReport
// ---------------------------------------------------------------------------

/// What the orchestrator did during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnReport {
    /// The gate was closed; requests were left pending.
    pub held: bool,
    /// Requests present at tick start.
    pub requests: usize,
    pub spawned: usize,
    pub failed: usize,
    /// Attempts skipped because the instance id was already live.
    pub duplicates: usize,
    /// Requests whose type id matched no template.
    pub unmatched: usize,
    /// Entries handed to the joint publisher.
    pub joints_published: usize,
    pub batch_event: Option<WorldEvent>,
    /// Requests destroyed by the end-of-tick cleanup.
    pub cleaned_up: usize,
}

enum Attempt {
    Spawned,
    Duplicate(EntityId),
}

// ---------------------------------------------------------------------------
// SpawnOrchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SpawnOrchestrator {
    /// Joint data of this tick's successful spawns. Empty between ticks.
    joints: BTreeMap<i64, JointData>,
}

impl SpawnOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any joint data accumulated so far.
    pub fn clear(&mut self) {
        self.joints.clear();
    }

    /// Run one orchestration pass.
    pub fn run(
        &mut self,
        world: &mut World,
        state: &mut WorldState,
        precedence: BatchSignalPrecedence,
        instantiator: &mut dyn TemplateInstantiator,
        publisher: &mut dyn JointPublisher,
    ) -> SpawnReport {
        let mut report = SpawnReport::default();
        let requests = world.query(&QueryFilter::new().with::<SpawnRequest>());
        report.requests = requests.len();

        if !state.objects_loaded() {
            report.held = true;
            if !requests.is_empty() {
                tracing::trace!(pending = requests.len(), "objects not loaded, holding spawn requests");
            }
            return report;
        }

        let templates: Vec<TemplateRecord> = world.iter::<TemplateRecord>().map(|(_, t)| t.clone()).collect();
        let mut live: HashMap<i64, EntityId> = world
            .iter::<LiveObject>()
            .map(|(entity, object)| (object.instance_id, entity))
            .collect();

        let mut saw_internal = false;
        let mut saw_external = false;

        for &request_entity in &requests {
            let Some(request) = world.get_component::<SpawnRequest>(request_entity).cloned() else {
                continue;
            };

            let mut matched = false;
            for template in templates.iter().filter(|t| t.type_id == request.type_id) {
                matched = true;
                match self.attempt(world, &mut live, &request, template, instantiator) {
                    Ok(Attempt::Spawned) => {
                        report.spawned += 1;
                        if request.flags.internal_spawn {
                            saw_internal = true;
                        } else {
                            saw_external = true;
                        }
                    }
                    Ok(Attempt::Duplicate(existing)) => {
                        report.duplicates += 1;
                        tracing::warn!(
                            instance_id = request.instance_id,
                            name = %request.name,
                            %existing,
                            "instance already live, skipping spawn"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            name = %request.name,
                            server_id = request.server_id,
                            instance_id = request.instance_id,
                            type_id = request.type_id,
                            error = %e,
                            "spawn failed, dropping request"
                        );
                        if let Err(e) = world.destroy(request_entity) {
                            tracing::warn!(entity = %request_entity, error = %e, "failed request already destroyed");
                        }
                        break;
                    }
                }
            }

            if !matched {
                report.unmatched += 1;
                tracing::warn!(
                    name = %request.name,
                    type_id = request.type_id,
                    instance_id = request.instance_id,
                    "no template registered for spawn request"
                );
            }
        }

        if !self.joints.is_empty() {
            let joints = std::mem::take(&mut self.joints);
            report.joints_published = joints.len();
            tracing::debug!(count = joints.len(), "publishing joint batch");
            publisher.publish_joints(joints);
        }

        if report.spawned > 0 {
            let initial = match precedence {
                BatchSignalPrecedence::InternalFirst => saw_internal,
                BatchSignalPrecedence::ExternalFirst => !saw_external,
            };
            let event = if initial {
                WorldEvent::InitialSpawnBatchCompleted
            } else {
                WorldEvent::SpawnBatchCompleted
            };
            state.emit(event);
            report.batch_event = Some(event);
        }

        for request_entity in requests {
            if world.has_component::<SpawnRequest>(request_entity)
                && world.destroy(request_entity).is_ok()
            {
                report.cleaned_up += 1;
            }
        }

        report
    }

    /// Spawn one live object from `request` and `template`.
    fn attempt(
        &mut self,
        world: &mut World,
        live: &mut HashMap<i64, EntityId>,
        request: &SpawnRequest,
        template: &TemplateRecord,
        instantiator: &mut dyn TemplateInstantiator,
    ) -> Result<Attempt, SpawnError> {
        if let Some(&existing) = live.get(&request.instance_id) {
            if world.is_alive(existing) {
                return Ok(Attempt::Duplicate(existing));
            }
        }

        let representation = panic::catch_unwind(AssertUnwindSafe(|| {
            instantiator.instantiate(template, &request.world_transform)
        }))
        .map_err(|payload| SpawnError::Panicked(panic_message(payload.as_ref())))??;

        let parent = request
            .parent_instance_id
            .and_then(|id| live.get(&id).copied())
            .filter(|&entity| world.is_alive(entity));
        if request.parent_instance_id.is_some() && parent.is_none() {
            tracing::debug!(
                instance_id = request.instance_id,
                parent_instance_id = ?request.parent_instance_id,
                "parent not live, spawning unparented"
            );
        }

        let entity = world.create_with(LiveObject {
            type_id: request.type_id,
            instance_id: request.instance_id,
            server_id: request.server_id,
            name: request.name.clone(),
            index: request.index,
            local_transform: request.local_transform,
            world_transform: request.world_transform,
            flags: request.flags,
            parent_instance_id: request.parent_instance_id,
            parent,
            representation,
        });
        live.insert(request.instance_id, entity);

        if let Some(joint) = &request.joint_data {
            self.joints.insert(request.instance_id, joint.clone());
        }

        tracing::debug!(
            %entity,
            instance_id = request.instance_id,
            template = %template.display_name,
            "spawned live object"
        );
        Ok(Attempt::Spawned)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::DiscardJoints;
    use crate::components::{LiveRepresentation, TemplateHandle, Transform};
    use crate::state::LoadKind;

    fn open_state() -> WorldState {
        let mut state = WorldState::new();
        state.set_expected_count(LoadKind::Objects, 1);
        state.report_completed(LoadKind::Objects);
        crate::counters::run_load_counters(&mut state);
        state.drain_events();
        state
    }

    fn ok_instantiator() -> impl FnMut(&TemplateRecord, &Transform) -> Result<LiveRepresentation, SpawnError> {
        |template: &TemplateRecord, _: &Transform| Ok(LiveRepresentation::new(template.display_name.clone()))
    }

    fn template(world: &mut World, type_id: i32) -> EntityId {
        world.create_with(TemplateRecord::new(type_id, format!("type-{type_id}"), TemplateHandle::new(())))
    }

    fn run(
        world: &mut World,
        state: &mut WorldState,
        instantiator: &mut dyn TemplateInstantiator,
    ) -> SpawnReport {
        SpawnOrchestrator::new().run(
            world,
            state,
            BatchSignalPrecedence::InternalFirst,
            instantiator,
            &mut DiscardJoints,
        )
    }

    #[test]
    fn closed_gate_holds_requests() {
        let mut world = World::new();
        let mut state = WorldState::new();
        template(&mut world, 1);
        world.create_with(SpawnRequest::new(1, 42, "a"));
        let report = run(&mut world, &mut state, &mut ok_instantiator());
        assert!(report.held);
        assert_eq!(world.count::<SpawnRequest>(), 1);
        assert_eq!(world.count::<LiveObject>(), 0);
    }

    #[test]
    fn matched_request_becomes_live_object() {
        let mut world = World::new();
        let mut state = open_state();
        template(&mut world, 1);
        world.create_with(
            SpawnRequest::new(1, 42, "crate")
                .with_server_id(9)
                .with_transforms(Transform::from_position([1.0, 0.0, 0.0]), Transform::from_position([2.0, 0.0, 0.0])),
        );

        let report = run(&mut world, &mut state, &mut ok_instantiator());
        assert_eq!(report.spawned, 1);
        assert_eq!(report.cleaned_up, 1);
        assert_eq!(report.batch_event, Some(WorldEvent::SpawnBatchCompleted));

        let (_, object) = world.iter::<LiveObject>().next().unwrap();
        assert_eq!(object.instance_id, 42);
        assert_eq!(object.server_id, 9);
        assert_eq!(object.name, "crate");
        assert_eq!(object.world_transform.position, [2.0, 0.0, 0.0]);
        assert_eq!(
            object.representation.downcast_ref::<String>().map(String::as_str),
            Some("type-1")
        );
        assert_eq!(world.count::<SpawnRequest>(), 0);
    }

    #[test]
    fn unmatched_request_is_cleaned_up_without_event() {
        let mut world = World::new();
        let mut state = open_state();
        template(&mut world, 1);
        world.create_with(SpawnRequest::new(2, 42, "a"));
        let report = run(&mut world, &mut state, &mut ok_instantiator());
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.cleaned_up, 1);
        assert_eq!(report.batch_event, None);
        assert!(state.drain_events().is_empty());
    }

    #[test]
    fn duplicate_instance_is_skipped() {
        let mut world = World::new();
        let mut state = open_state();
        template(&mut world, 1);
        world.create_with(SpawnRequest::new(1, 42, "first"));
        world.create_with(SpawnRequest::new(1, 42, "second"));
        let report = run(&mut world, &mut state, &mut ok_instantiator());
        assert_eq!(report.spawned, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(world.count::<LiveObject>(), 1);
        assert_eq!(world.count::<SpawnRequest>(), 0);
    }

    #[test]
    fn panicking_instantiator_only_loses_its_request() {
        let mut world = World::new();
        let mut state = open_state();
        template(&mut world, 1);
        world.create_with(SpawnRequest::new(1, 1, "ok-1"));
        world.create_with(SpawnRequest::new(1, 2, "bad"));
        world.create_with(SpawnRequest::new(1, 3, "ok-3"));

        let mut instantiator = |_: &TemplateRecord, transform: &Transform| {
            if transform.position[0] < 0.0 {
                panic!("corrupt template");
            }
            Ok::<_, SpawnError>(LiveRepresentation::new(()))
        };
        // Make request 2 trigger the panic.
        let bad = world.query(&QueryFilter::new().with::<SpawnRequest>())[1];
        world.get_component_mut::<SpawnRequest>(bad).unwrap().world_transform =
            Transform::from_position([-1.0, 0.0, 0.0]);

        let report = run(&mut world, &mut state, &mut instantiator);
        assert_eq!(report.spawned, 2);
        assert_eq!(report.failed, 1);
        assert!(!world.is_alive(bad));
        let mut ids: Vec<i64> = world.iter::<LiveObject>().map(|(_, o)| o.instance_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn parent_is_resolved_when_live() {
        let mut world = World::new();
        let mut state = open_state();
        template(&mut world, 1);
        world.create_with(SpawnRequest::new(1, 10, "parent"));
        world.create_with(SpawnRequest::new(1, 11, "child").with_parent(10));
        world.create_with(SpawnRequest::new(1, 12, "orphan").with_parent(99));
        run(&mut world, &mut state, &mut ok_instantiator());

        let by_id: HashMap<i64, (EntityId, Option<EntityId>)> = world
            .iter::<LiveObject>()
            .map(|(e, o)| (o.instance_id, (e, o.parent)))
            .collect();
        assert_eq!(by_id[&11].1, Some(by_id[&10].0));
        assert_eq!(by_id[&12].1, None);
    }

    #[test]
    fn precedence_decides_mixed_batches() {
        for (precedence, expected) in [
            (BatchSignalPrecedence::InternalFirst, WorldEvent::InitialSpawnBatchCompleted),
            (BatchSignalPrecedence::ExternalFirst, WorldEvent::SpawnBatchCompleted),
        ] {
            let mut world = World::new();
            let mut state = open_state();
            template(&mut world, 1);
            world.create_with(SpawnRequest::new(1, 1, "boot").internal());
            world.create_with(SpawnRequest::new(1, 2, "user"));
            let report = SpawnOrchestrator::new().run(
                &mut world,
                &mut state,
                precedence,
                &mut ok_instantiator(),
                &mut DiscardJoints,
            );
            assert_eq!(report.batch_event, Some(expected));
            assert_eq!(state.drain_events(), vec![expected]);
        }
    }

    #[test]
    fn internal_only_batch_is_initial_under_either_precedence() {
        for precedence in [BatchSignalPrecedence::InternalFirst, BatchSignalPrecedence::ExternalFirst] {
            let mut world = World::new();
            let mut state = open_state();
            template(&mut world, 1);
            world.create_with(SpawnRequest::new(1, 1, "boot").internal());
            let report = SpawnOrchestrator::new().run(
                &mut world,
                &mut state,
                precedence,
                &mut ok_instantiator(),
                &mut DiscardJoints,
            );
            assert_eq!(report.batch_event, Some(WorldEvent::InitialSpawnBatchCompleted));
        }
    }
}
