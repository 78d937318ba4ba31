//! The destruction sweep run when a world is torn down.

use loom_ecs::prelude::*;

use crate::components::{LiveObject, SceneLogicHost, TemplateRecord};
use crate::logic::LogicBinding;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub templates: usize,
    pub live_objects: usize,
    /// Scene-logic hosts whose binding was dropped.
    pub scene_hosts: usize,
}

/// Destroy every template and live-object entity in bulk.
///
/// Scene-logic hosts are unbound: the marker and the running scene binding
/// are both removed, so no scene implementation outlives the world state
/// that installed it.
pub fn sweep(world: &mut World) -> SweepReport {
    let mut report = SweepReport::default();

    for entity in world.query(&QueryFilter::new().with::<TemplateRecord>()) {
        if world.destroy(entity).is_ok() {
            report.templates += 1;
        }
    }
    for entity in world.query(&QueryFilter::new().with::<LiveObject>()) {
        if world.destroy(entity).is_ok() {
            report.live_objects += 1;
        }
    }
    for entity in world.query(&QueryFilter::new().with::<SceneLogicHost>()) {
        if let Err(e) = world.remove_component::<SceneLogicHost>(entity) {
            tracing::warn!(%entity, error = %e, "scene-logic host vanished during sweep");
            continue;
        }
        if world.remove_component::<LogicBinding>(entity).is_ok() {
            report.scene_hosts += 1;
        }
    }

    tracing::info!(
        templates = report.templates,
        live_objects = report.live_objects,
        scene_hosts = report.scene_hosts,
        "world torn down"
    );
    report
}
