//! The [`World`] owns the entity allocator, one [`Column`] per component type,
//! and the change logs that feed reactive systems.

use std::any::TypeId;
use std::collections::HashMap;

use crate::change::{ChangeLog, ChangeSubscription};
use crate::component::{Column, ComponentKind, ErasedColumn};
use crate::entity::{EntityAllocator, EntityId};
use crate::query::QueryFilter;
use crate::EcsError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entity store: entities are bags of typed components.
///
/// All operations take effect immediately. Adding or replacing a component
/// notifies subscribers of that component type (see [`World::subscribe`]),
/// whether or not the value changed.
#[derive(Default)]
pub struct World {
    allocator: EntityAllocator,
    columns: HashMap<TypeId, Box<dyn ErasedColumn>>,
    changes: HashMap<TypeId, ChangeLog>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("column_count", &self.columns.len())
            .finish()
    }
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an entity with no components.
    pub fn create(&mut self) -> EntityId {
        self.allocator.allocate()
    }

    /// Create an entity holding a single component.
    pub fn create_with<T: 'static>(&mut self, value: T) -> EntityId {
        let entity = self.create();
        self.column_mut::<T>().insert(entity, value);
        self.notify::<T>(entity);
        entity
    }

    /// Destroy an entity and drop all of its components.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    pub fn destroy(&mut self, entity: EntityId) -> Result<(), EcsError> {
        if !self.allocator.deallocate(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        for column in self.columns.values_mut() {
            column.erase(entity);
        }
        tracing::trace!(%entity, "entity destroyed");
        Ok(())
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    // -- components ---------------------------------------------------------

    /// Attach a component the entity does not have yet.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    /// - [`EcsError::DuplicateComponent`] if the entity already has a `T`;
    ///   use [`replace_component`](Self::replace_component) to overwrite.
    pub fn add_component<T: 'static>(&mut self, entity: EntityId, value: T) -> Result<(), EcsError> {
        self.ensure_alive(entity)?;
        if self.has_component::<T>(entity) {
            return Err(EcsError::DuplicateComponent {
                entity,
                component: ComponentKind::of::<T>().name(),
            });
        }
        self.column_mut::<T>().insert(entity, value);
        self.notify::<T>(entity);
        Ok(())
    }

    /// Set the entity's `T`, adding it if absent. Returns the replaced value.
    ///
    /// Subscribers are always notified, including when `value` equals the
    /// previous one.
    ///
    /// # Errors
    ///
    /// [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    pub fn replace_component<T: 'static>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<Option<T>, EcsError> {
        self.ensure_alive(entity)?;
        let previous = self.column_mut::<T>().insert(entity, value);
        self.notify::<T>(entity);
        Ok(previous)
    }

    /// Detach and return the entity's `T`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NoSuchEntity`] if `entity` is dead or stale.
    /// - [`EcsError::MissingComponent`] if the entity has no `T`.
    pub fn remove_component<T: 'static>(&mut self, entity: EntityId) -> Result<T, EcsError> {
        self.ensure_alive(entity)?;
        self.column_mut_if_exists::<T>()
            .and_then(|column| column.remove(entity))
            .ok_or(EcsError::MissingComponent {
                entity,
                component: ComponentKind::of::<T>().name(),
            })
    }

    pub fn get_component<T: 'static>(&self, entity: EntityId) -> Option<&T> {
        self.column::<T>()?.get(entity)
    }

    /// Mutable access that bypasses change notification. Use
    /// [`replace_component`](Self::replace_component) when reactive systems
    /// must observe the write.
    pub fn get_component_mut<T: 'static>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.column_mut_if_exists::<T>()?.get_mut(entity)
    }

    pub fn has_component<T: 'static>(&self, entity: EntityId) -> bool {
        self.column::<T>().is_some_and(|c| c.contains(entity))
    }

    /// `(entity, &T)` for every holder of `T`, in insertion order.
    pub fn iter<T: 'static>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.column::<T>().into_iter().flat_map(|c| c.iter())
    }

    /// Number of entities currently holding a `T`.
    pub fn count<T: 'static>(&self) -> usize {
        self.column::<T>().map_or(0, |c| c.len())
    }

    // -- queries ------------------------------------------------------------

    /// Entities matching `filter`, as an owned snapshot.
    pub fn query(&self, filter: &QueryFilter) -> Vec<EntityId> {
        let candidates: Vec<EntityId> = match filter.include.first() {
            Some(first) => match self.columns.get(&first.type_id()) {
                Some(column) => column.owners(),
                None => return Vec::new(),
            },
            None => self.allocator.iter_alive().collect(),
        };

        candidates
            .into_iter()
            .filter(|&entity| {
                filter.include.iter().skip(1).all(|k| self.has_kind(*k, entity))
                    && !filter.exclude.iter().any(|k| self.has_kind(*k, entity))
            })
            .collect()
    }

    fn has_kind(&self, kind: ComponentKind, entity: EntityId) -> bool {
        self.columns
            .get(&kind.type_id())
            .is_some_and(|c| c.has(entity))
    }

    // -- change notification ------------------------------------------------

    /// Start observing adds and replaces of `T`. Only writes that happen after
    /// this call are reported.
    pub fn subscribe<T: 'static>(&mut self) -> ChangeSubscription {
        let kind = ComponentKind::of::<T>();
        let slot = self
            .changes
            .entry(kind.type_id())
            .or_insert_with(ChangeLog::new)
            .add_subscriber();
        ChangeSubscription { kind, slot }
    }

    /// Stop observing. Pending notifications for this subscriber are dropped.
    pub fn unsubscribe(&mut self, subscription: ChangeSubscription) {
        if let Some(log) = self.changes.get_mut(&subscription.type_id()) {
            log.remove_subscriber(subscription.slot);
        }
    }

    /// Entities whose `T` was added or replaced since the last read, oldest
    /// first, one entry per write. Entities destroyed in the meantime are
    /// still reported; callers check liveness.
    pub fn read_changes(&mut self, subscription: &ChangeSubscription) -> Vec<EntityId> {
        self.changes
            .get_mut(&subscription.type_id())
            .map(|log| log.read(subscription.slot))
            .unwrap_or_default()
    }

    /// Number of unread notifications for `subscription`.
    pub fn pending_changes(&self, subscription: &ChangeSubscription) -> usize {
        self.changes
            .get(&subscription.type_id())
            .map_or(0, |log| log.pending(subscription.slot))
    }

    // -- internal helpers ---------------------------------------------------

    fn ensure_alive(&self, entity: EntityId) -> Result<(), EcsError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::NoSuchEntity { entity })
        }
    }

    fn notify<T: 'static>(&mut self, entity: EntityId) {
        if let Some(log) = self.changes.get_mut(&TypeId::of::<T>()) {
            log.record(entity);
        }
    }

    fn column<T: 'static>(&self) -> Option<&Column<T>> {
        self.columns
            .get(&TypeId::of::<T>())
            .and_then(|c| c.as_any().downcast_ref::<Column<T>>())
    }

    fn column_mut_if_exists<T: 'static>(&mut self) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(&TypeId::of::<T>())
            .and_then(|c| c.as_any_mut().downcast_mut::<Column<T>>())
    }

    fn column_mut<T: 'static>(&mut self) -> &mut Column<T> {
        let column = self
            .columns
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Column::<T>::new()));
        match column.as_any_mut().downcast_mut::<Column<T>>() {
            Some(column) => column,
            // Columns are keyed by the TypeId of their element type.
            None => unreachable!("column stored under a foreign TypeId"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(u32);

    #[test]
    fn create_with_then_get() {
        let mut world = World::new();
        let e = world.create_with(Position { x: 1.0, y: 2.0 });
        assert_eq!(world.get_component::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn destroy_drops_components_and_invalidates_handle() {
        let mut world = World::new();
        let e = world.create_with(Tag(1));
        world.destroy(e).unwrap();
        assert!(!world.is_alive(e));
        assert_eq!(world.count::<Tag>(), 0);
        assert!(matches!(world.destroy(e), Err(EcsError::NoSuchEntity { .. })));
    }

    #[test]
    fn add_rejects_duplicate() {
        let mut world = World::new();
        let e = world.create_with(Tag(1));
        let err = world.add_component(e, Tag(2)).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { component: "Tag", .. }));
        assert_eq!(world.get_component::<Tag>(e), Some(&Tag(1)));
    }

    #[test]
    fn replace_on_dead_entity_fails() {
        let mut world = World::new();
        let e = world.create();
        world.destroy(e).unwrap();
        assert!(matches!(
            world.replace_component(e, Tag(1)),
            Err(EcsError::NoSuchEntity { .. })
        ));
    }

    #[test]
    fn replace_returns_previous_value() {
        let mut world = World::new();
        let e = world.create_with(Tag(1));
        assert_eq!(world.replace_component(e, Tag(2)).unwrap(), Some(Tag(1)));
        assert_eq!(world.get_component::<Tag>(e), Some(&Tag(2)));
    }

    #[test]
    fn remove_missing_component_fails() {
        let mut world = World::new();
        let e = world.create();
        assert!(matches!(
            world.remove_component::<Tag>(e),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn query_include_and_exclude() {
        let mut world = World::new();
        let both = world.create_with(Tag(0));
        world.add_component(both, Position { x: 0.0, y: 0.0 }).unwrap();
        let tag_only = world.create_with(Tag(1));
        let _pos_only = world.create_with(Position { x: 1.0, y: 1.0 });

        let with_both = world.query(&QueryFilter::new().with::<Tag>().with::<Position>());
        assert_eq!(with_both, vec![both]);

        let tag_not_pos = world.query(&QueryFilter::new().with::<Tag>().without::<Position>());
        assert_eq!(tag_not_pos, vec![tag_only]);
    }

    #[test]
    fn query_on_unknown_component_is_empty() {
        let mut world = World::new();
        world.create_with(Tag(0));
        assert!(world.query(&QueryFilter::new().with::<Position>()).is_empty());
    }

    #[test]
    fn query_without_includes_walks_all_entities() {
        let mut world = World::new();
        let a = world.create();
        let b = world.create_with(Tag(0));
        assert_eq!(world.query(&QueryFilter::new()), vec![a, b]);
        assert_eq!(world.query(&QueryFilter::new().without::<Tag>()), vec![a]);
    }

    #[test]
    fn equal_replace_still_notifies() {
        let mut world = World::new();
        let sub = world.subscribe::<Tag>();
        let e = world.create_with(Tag(7));
        world.replace_component(e, Tag(7)).unwrap();
        world.replace_component(e, Tag(7)).unwrap();
        assert_eq!(world.read_changes(&sub), vec![e, e, e]);
        assert_eq!(world.pending_changes(&sub), 0);
    }

    #[test]
    fn mutable_access_does_not_notify() {
        let mut world = World::new();
        let e = world.create_with(Tag(1));
        let sub = world.subscribe::<Tag>();
        if let Some(tag) = world.get_component_mut::<Tag>(e) {
            tag.0 = 2;
        }
        assert!(world.read_changes(&sub).is_empty());
    }

    #[test]
    fn unsubscribe_stops_recording() {
        let mut world = World::new();
        let sub = world.subscribe::<Tag>();
        world.unsubscribe(sub);
        let e = world.create_with(Tag(1));
        let sub = world.subscribe::<Tag>();
        world.replace_component(e, Tag(2)).unwrap();
        assert_eq!(world.read_changes(&sub), vec![e]);
    }
}
