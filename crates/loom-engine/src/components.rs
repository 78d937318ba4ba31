//! Component types exchanged between the pipeline's systems.
//!
//! Producers and consumers:
//!
//! | Component          | Created by                      | Consumed / destroyed by        |
//! |--------------------|---------------------------------|--------------------------------|
//! | [`TemplateRecord`] | template registration           | destruction sweep              |
//! | [`SpawnRequest`]   | any caller wanting an object    | spawn orchestrator (cleanup)   |
//! | [`LiveObject`]     | spawn orchestrator              | destruction sweep / deletion   |
//! | [`CompiledCode`]   | `attach_compiled_code`          | code loader (reacts on write)  |
//! | [`LoadedTypeHandle`] | code loader                   | object logic swap              |

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use loom_ecs::entity::EntityId;
use serde::{Deserialize, Serialize};

use crate::logic::TypeHandle;

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0; 3],
    };

    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Opaque reference to an instantiable asset, owned by the asset layer.
#[derive(Clone)]
pub struct TemplateHandle(Arc<dyn Any + Send + Sync>);

impl TemplateHandle {
    pub fn new<T: Any + Send + Sync>(asset: T) -> Self {
        Self(Arc::new(asset))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for TemplateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TemplateHandle(..)")
    }
}

/// A registered object type that spawn requests are matched against.
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub type_id: i32,
    pub display_name: String,
    pub template: TemplateHandle,
}

impl TemplateRecord {
    pub fn new(type_id: i32, display_name: impl Into<String>, template: TemplateHandle) -> Self {
        Self {
            type_id,
            display_name: display_name.into(),
            template,
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn requests
// ---------------------------------------------------------------------------

/// Opaque constraint data handed to the physics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointData(pub serde_json::Value);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnFlags {
    pub locked: bool,
    pub disabled: bool,
    pub disabled_in_hierarchy: bool,
    /// Part of the world's own bootstrap rather than a user action.
    pub internal_spawn: bool,
    pub duplicated: bool,
    pub spawned_by_hierarchy: bool,
}

/// A pending instruction to materialize a live object from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub type_id: i32,
    pub instance_id: i64,
    pub server_id: i64,
    pub name: String,
    pub local_transform: Transform,
    pub world_transform: Transform,
    pub parent_instance_id: Option<i64>,
    pub joint_data: Option<JointData>,
    pub index: i32,
    pub flags: SpawnFlags,
}

impl SpawnRequest {
    /// A request with identity transforms, no parent, no joints and no flags.
    pub fn new(type_id: i32, instance_id: i64, name: impl Into<String>) -> Self {
        Self {
            type_id,
            instance_id,
            server_id: 0,
            name: name.into(),
            local_transform: Transform::IDENTITY,
            world_transform: Transform::IDENTITY,
            parent_instance_id: None,
            joint_data: None,
            index: 0,
            flags: SpawnFlags::default(),
        }
    }

    pub fn with_server_id(mut self, server_id: i64) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_transforms(mut self, local: Transform, world: Transform) -> Self {
        self.local_transform = local;
        self.world_transform = world;
        self
    }

    pub fn with_parent(mut self, parent_instance_id: i64) -> Self {
        self.parent_instance_id = Some(parent_instance_id);
        self
    }

    pub fn with_joint(mut self, joint: JointData) -> Self {
        self.joint_data = Some(joint);
        self
    }

    pub fn with_flags(mut self, flags: SpawnFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn internal(mut self) -> Self {
        self.flags.internal_spawn = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Live objects
// ---------------------------------------------------------------------------

/// Whatever the asset layer produced when instantiating a template.
pub struct LiveRepresentation(Box<dyn Any + Send>);

impl LiveRepresentation {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for LiveRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LiveRepresentation(..)")
    }
}

/// A fulfilled spawn request.
#[derive(Debug)]
pub struct LiveObject {
    pub type_id: i32,
    pub instance_id: i64,
    pub server_id: i64,
    pub name: String,
    pub index: i32,
    pub local_transform: Transform,
    pub world_transform: Transform,
    pub flags: SpawnFlags,
    pub parent_instance_id: Option<i64>,
    /// The parent's entity, when the parent was live at spawn time.
    pub parent: Option<EntityId>,
    pub representation: LiveRepresentation,
}

// ---------------------------------------------------------------------------
// Code payloads
// ---------------------------------------------------------------------------

/// Compiled behavior code attached to an entity. Writing this component is
/// what triggers the code loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCode {
    pub bytes: Vec<u8>,
    /// The toolchain failed; `bytes` holds its error output.
    pub is_error: bool,
}

/// Result of the most recent successful or failed resolution on an entity.
#[derive(Debug, Clone, Default)]
pub struct LoadedTypeHandle {
    /// `None` after a resolution failure.
    pub resolved: Option<TypeHandle>,
}

/// Per-entity state of the code loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeLoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// Marker: the entity's logic binding should be rebuilt from its
/// [`LoadedTypeHandle`] on the next swap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceLogic;

/// Marker: the entity hosts the active scene logic and receives world events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneLogicHost;
