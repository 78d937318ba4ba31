//! Loom ECS -- the entity store underneath the spawn/load/logic pipeline.
//!
//! Entities are generational handles; components are arbitrary `'static`
//! values stored in one column per type. Beyond get/set, the store offers two
//! things the pipeline's systems are built on:
//!
//! - **Group queries** ([`QueryFilter`](query::QueryFilter)): "all entities
//!   with X and Y but not Z", returned as owned snapshots.
//! - **Change subscriptions** ([`ChangeSubscription`](change::ChangeSubscription)):
//!   a per-type stream of entities whose component was added or replaced,
//!   read once per tick by reactive systems. Replacing a value with an equal
//!   one still produces a notification.
//!
//! # Quick Start
//!
//! ```
//! use loom_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! let changes = world.subscribe::<Health>();
//!
//! let entity = world.create_with(Health(100));
//! world.replace_component(entity, Health(100)).unwrap();
//!
//! assert_eq!(world.read_changes(&changes), vec![entity, entity]);
//! assert_eq!(world.query(&QueryFilter::new().with::<Health>()), vec![entity]);
//! ```

#![deny(unsafe_code)]

pub mod change;
pub mod component;
pub mod entity;
pub mod query;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by entity store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    NoSuchEntity { entity: entity::EntityId },

    /// The entity exists but does not carry the requested component.
    #[error("entity {entity:?} has no '{component}' component")]
    MissingComponent {
        entity: entity::EntityId,
        component: &'static str,
    },

    /// `add_component` was called for a component the entity already has.
    #[error("entity {entity:?} already has a '{component}' component; replace it instead")]
    DuplicateComponent {
        entity: entity::EntityId,
        component: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::change::ChangeSubscription;
    pub use crate::component::ComponentKind;
    pub use crate::entity::EntityId;
    pub use crate::query::QueryFilter;
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
