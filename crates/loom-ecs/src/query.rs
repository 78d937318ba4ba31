//! Group queries: "all entities having X and Y but not Z".
//!
//! A [`QueryFilter`] lists included and excluded component kinds. Results are
//! returned as an owned `Vec<EntityId>` snapshot, so a system can mutate the
//! world while walking the result without holding a borrow on it.
//!
//! ## Ordering
//!
//! Matches come back in the insertion order of the *first* included component.
//! A filter with no includes walks every live entity in slot order.

use crate::component::ComponentKind;

/// Component membership filter for [`World::query`](crate::world::World::query).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub(crate) include: Vec<ComponentKind>,
    pub(crate) exclude: Vec<ComponentKind>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T`.
    pub fn with<T: 'static>(mut self) -> Self {
        self.include.push(ComponentKind::of::<T>());
        self
    }

    /// Reject entities carrying component `T`.
    pub fn without<T: 'static>(mut self) -> Self {
        self.exclude.push(ComponentKind::of::<T>());
        self
    }

    /// Build a filter from raw kinds, for callers that assemble queries
    /// dynamically.
    pub fn from_kinds(include: &[ComponentKind], exclude: &[ComponentKind]) -> Self {
        Self {
            include: include.to_vec(),
            exclude: exclude.to_vec(),
        }
    }

    pub fn includes(&self) -> &[ComponentKind] {
        &self.include
    }

    pub fn excludes(&self) -> &[ComponentKind] {
        &self.exclude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;

    #[test]
    fn builder_collects_kinds_in_order() {
        let filter = QueryFilter::new().with::<A>().without::<B>();
        assert_eq!(filter.includes(), &[ComponentKind::of::<A>()]);
        assert_eq!(filter.excludes(), &[ComponentKind::of::<B>()]);
    }

    #[test]
    fn from_kinds_matches_builder() {
        let built = QueryFilter::new().with::<A>().with::<B>();
        let raw = QueryFilter::from_kinds(&[ComponentKind::of::<A>(), ComponentKind::of::<B>()], &[]);
        assert_eq!(built, raw);
    }
}
