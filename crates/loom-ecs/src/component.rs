//! Component kinds and per-type column storage.
//!
//! Every component type lives in its own [`Column`], keyed by the entity that
//! owns the value. Columns remember the order in which entities first received
//! the component; iteration follows that order, and replacing a value keeps the
//! entity's original slot. Columns are type-erased behind [`ErasedColumn`] so
//! the [`World`](crate::world::World) can hold one map of all of them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ComponentKind
// ---------------------------------------------------------------------------

/// Runtime identity of a component type: its `TypeId` plus a readable name
/// for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKind {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentKind {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: short_type_name(std::any::type_name::<T>()),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKind({})", self.name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// `loom_engine::spawn::SpawnRequest` -> `SpawnRequest`. Generic arguments are
/// left as they are.
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) if !full.contains('<') => &full[pos + 2..],
        _ => full,
    }
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// Storage for every value of one component type.
///
/// Removal leaves a hole in the order vector; holes are compacted away once
/// they outnumber the live entries, so removal is amortized O(1).
pub struct Column<T> {
    /// Entities in the order they first received this component. `None`
    /// marks a removed entry.
    order: Vec<Option<EntityId>>,
    /// Value plus its slot in `order`.
    values: HashMap<EntityId, (usize, T)>,
}

impl<T: 'static> Column<T> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Store `value` for `entity`, returning the value it replaced.
    ///
    /// A replaced value keeps the entity's position in iteration order.
    pub fn insert(&mut self, entity: EntityId, value: T) -> Option<T> {
        if let Some((_, existing)) = self.values.get_mut(&entity) {
            return Some(std::mem::replace(existing, value));
        }
        self.values.insert(entity, (self.order.len(), value));
        self.order.push(Some(entity));
        None
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<T> {
        let (slot, removed) = self.values.remove(&entity)?;
        if let Some(entry) = self.order.get_mut(slot) {
            *entry = None;
        }
        if self.order.len() > 2 * self.values.len() {
            self.compact();
        }
        Some(removed)
    }

    fn compact(&mut self) {
        self.order.retain(Option::is_some);
        for (slot, entity) in self.order.iter().flatten().enumerate() {
            if let Some((s, _)) = self.values.get_mut(entity) {
                *s = slot;
            }
        }
    }

    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.values.get(&entity).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.values.get_mut(&entity).map(|(_, v)| v)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.values.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(entity, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.entities()
            .filter_map(move |e| self.values.get(&e).map(|(_, v)| (e, v)))
    }

    /// Owning entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.order.iter().flatten().copied()
    }
}

impl<T: 'static> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("len", &self.values.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ErasedColumn
// ---------------------------------------------------------------------------

/// Object-safe view of a [`Column`] used for whole-entity operations (destroy,
/// queries) that do not know the concrete component type.
pub(crate) trait ErasedColumn: Any {
    fn erase(&mut self, entity: EntityId) -> bool;
    fn has(&self, entity: EntityId) -> bool;
    fn owners(&self) -> Vec<EntityId>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedColumn for Column<T> {
    fn erase(&mut self, entity: EntityId) -> bool {
        self.remove(entity).is_some()
    }

    fn has(&self, entity: EntityId) -> bool {
        self.contains(entity)
    }

    fn owners(&self) -> Vec<EntityId> {
        self.entities().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    fn ids(n: u32) -> Vec<EntityId> {
        (0..n).map(|i| EntityId::new(i, 0)).collect()
    }

    #[test]
    fn kind_uses_short_name() {
        assert_eq!(ComponentKind::of::<Marker>().name(), "Marker");
        assert_eq!(ComponentKind::of::<u32>().name(), "u32");
    }

    #[test]
    fn kinds_of_distinct_types_differ() {
        assert_ne!(ComponentKind::of::<Marker>(), ComponentKind::of::<u32>());
        assert_eq!(ComponentKind::of::<Marker>(), ComponentKind::of::<Marker>());
    }

    #[test]
    fn iteration_follows_first_insertion() {
        let e = ids(3);
        let mut col = Column::new();
        col.insert(e[2], Marker(2));
        col.insert(e[0], Marker(0));
        col.insert(e[1], Marker(1));
        let order: Vec<_> = col.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![e[2], e[0], e[1]]);
    }

    #[test]
    fn replace_keeps_slot_and_returns_previous() {
        let e = ids(2);
        let mut col = Column::new();
        col.insert(e[0], Marker(0));
        col.insert(e[1], Marker(1));
        assert_eq!(col.insert(e[0], Marker(10)), Some(Marker(0)));
        let values: Vec<_> = col.iter().map(|(_, v)| v.0).collect();
        assert_eq!(values, vec![10, 1]);
    }

    #[test]
    fn remove_drops_from_order() {
        let e = ids(3);
        let mut col = Column::new();
        for (i, &id) in e.iter().enumerate() {
            col.insert(id, Marker(i as u32));
        }
        assert_eq!(col.remove(e[1]), Some(Marker(1)));
        assert_eq!(col.entities().collect::<Vec<_>>(), vec![e[0], e[2]]);
        assert_eq!(col.remove(e[1]), None);
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn order_survives_compaction() {
        let e = ids(100);
        let mut col = Column::new();
        for (i, &id) in e.iter().enumerate() {
            col.insert(id, Marker(i as u32));
        }
        for &id in e.iter().step_by(3) {
            col.remove(id);
        }
        for &id in e.iter().skip(1).step_by(3) {
            col.remove(id);
        }
        let expected: Vec<_> = e.iter().skip(2).step_by(3).copied().collect();
        assert_eq!(col.entities().collect::<Vec<_>>(), expected);
        assert_eq!(col.len(), expected.len());

        // Slots stay valid after compaction: replacement and removal still
        // hit the right entries.
        assert_eq!(col.insert(e[5], Marker(500)), Some(Marker(5)));
        assert_eq!(col.remove(e[8]), Some(Marker(8)));
        col.insert(e[0], Marker(0));
        let order: Vec<_> = col.iter().map(|(id, v)| (id, v.0)).collect();
        assert_eq!(order.first(), Some(&(e[2], 2)));
        assert_eq!(order.get(1), Some(&(e[5], 500)));
        assert_eq!(order.last(), Some(&(e[0], 0)));
        assert!(!col.contains(e[8]));
    }

    #[test]
    fn holes_never_outnumber_live_entries() {
        let e = ids(10_000);
        let mut col = Column::new();
        for &id in &e {
            col.insert(id, Marker(0));
        }
        for (removed, &id) in e.iter().enumerate() {
            col.remove(id);
            assert!(col.order.len() <= 2 * col.len() + 1, "after {} removals", removed + 1);
        }
        assert!(col.is_empty());
        assert!(col.order.is_empty());
    }
}
