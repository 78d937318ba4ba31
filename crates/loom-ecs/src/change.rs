//! Change notification for reactive systems.
//!
//! A system interested in a component type takes a [`ChangeSubscription`] from
//! the world and reads it once per tick. Every add or replace of that
//! component appends the owning entity to the type's [`ChangeLog`]; nothing is
//! de-duplicated, so writing a value equal to the current one, or writing the
//! same entity twice, produces one notification per write.
//!
//! The log only records while at least one subscriber exists, and entries are
//! discarded once every subscriber has read past them.

use std::any::TypeId;

use crate::component::ComponentKind;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ChangeSubscription
// ---------------------------------------------------------------------------

/// A reader's position in the change stream of one component type.
///
/// Obtained from [`World::subscribe`](crate::world::World::subscribe) and
/// passed back to [`World::read_changes`](crate::world::World::read_changes).
#[derive(Debug, PartialEq, Eq)]
pub struct ChangeSubscription {
    pub(crate) kind: ComponentKind,
    pub(crate) slot: usize,
}

impl ChangeSubscription {
    /// The component type this subscription observes.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.kind.type_id()
    }
}

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    events: Vec<EntityId>,
    /// Read position per subscriber slot; `None` marks a released slot.
    cursors: Vec<Option<usize>>,
}

impl ChangeLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber that sees only events recorded from now on.
    pub(crate) fn add_subscriber(&mut self) -> usize {
        let cursor = Some(self.events.len());
        match self.cursors.iter().position(Option::is_none) {
            Some(slot) => {
                self.cursors[slot] = cursor;
                slot
            }
            None => {
                self.cursors.push(cursor);
                self.cursors.len() - 1
            }
        }
    }

    pub(crate) fn remove_subscriber(&mut self, slot: usize) {
        if let Some(cursor) = self.cursors.get_mut(slot) {
            *cursor = None;
        }
        self.compact();
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        self.cursors.iter().any(Option::is_some)
    }

    pub(crate) fn record(&mut self, entity: EntityId) {
        if self.has_subscribers() {
            self.events.push(entity);
        }
    }

    /// Everything recorded since this subscriber last read, oldest first.
    pub(crate) fn read(&mut self, slot: usize) -> Vec<EntityId> {
        let Some(Some(cursor)) = self.cursors.get(slot).copied() else {
            return Vec::new();
        };
        let pending = self.events[cursor..].to_vec();
        self.cursors[slot] = Some(self.events.len());
        self.compact();
        pending
    }

    pub(crate) fn pending(&self, slot: usize) -> usize {
        match self.cursors.get(slot).copied().flatten() {
            Some(cursor) => self.events.len() - cursor,
            None => 0,
        }
    }

    /// Drop the prefix every live subscriber has already consumed.
    fn compact(&mut self) {
        let Some(consumed) = self.cursors.iter().flatten().copied().min() else {
            self.events.clear();
            return;
        };
        if consumed == 0 {
            return;
        }
        self.events.drain(..consumed);
        for cursor in self.cursors.iter_mut().flatten() {
            *cursor -= consumed;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn e(i: u32) -> EntityId {
        EntityId::new(i, 0)
    }

    #[test]
    fn nothing_recorded_without_subscribers() {
        let mut log = ChangeLog::new();
        log.record(e(1));
        let slot = log.add_subscriber();
        assert!(log.read(slot).is_empty());
    }

    #[test]
    fn repeated_writes_are_not_deduplicated() {
        let mut log = ChangeLog::new();
        let slot = log.add_subscriber();
        log.record(e(1));
        log.record(e(1));
        assert_eq!(log.read(slot), vec![e(1), e(1)]);
        assert!(log.read(slot).is_empty());
    }

    #[test]
    fn subscribers_read_independently() {
        let mut log = ChangeLog::new();
        let a = log.add_subscriber();
        log.record(e(1));
        let b = log.add_subscriber();
        log.record(e(2));

        assert_eq!(log.read(a), vec![e(1), e(2)]);
        assert_eq!(log.pending(b), 1);
        assert_eq!(log.read(b), vec![e(2)]);
        assert!(log.events.is_empty(), "fully consumed prefix is dropped");
    }

    #[test]
    fn released_slot_is_reused() {
        let mut log = ChangeLog::new();
        let a = log.add_subscriber();
        log.remove_subscriber(a);
        assert!(!log.has_subscribers());
        let b = log.add_subscriber();
        assert_eq!(a, b);
    }
}
