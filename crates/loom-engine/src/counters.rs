//! The load-counter system: the first thing each tick runs.
//!
//! Counters are fed from outside the tick (`report_expected`,
//! `report_completed`) and evaluated here once per tick. A counter that
//! latches emits its "loaded" event exactly once per world instance.

use crate::state::{LoadKind, WorldState};

/// Evaluate both counters. Returns the kinds that latched on this pass.
pub fn run_load_counters(state: &mut WorldState) -> Vec<LoadKind> {
    let mut latched = Vec::new();
    for kind in LoadKind::ALL {
        let counter = state.counter_mut(kind);
        if !counter.evaluate() {
            continue;
        }
        tracing::info!(
            ?kind,
            expected = counter.expected,
            completed = counter.completed,
            "load counter latched"
        );
        state.emit(kind.loaded_event());
        latched.push(kind);
    }
    latched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorldEvent;

    #[test]
    fn latches_fire_once_each() {
        let mut state = WorldState::new();
        state.set_expected_count(LoadKind::Objects, 2);
        state.set_expected_count(LoadKind::Resources, 1);

        assert!(run_load_counters(&mut state).is_empty());

        state.report_completed(LoadKind::Objects);
        state.report_completed(LoadKind::Resources);
        assert_eq!(run_load_counters(&mut state), vec![LoadKind::Resources]);

        state.report_completed(LoadKind::Objects);
        assert_eq!(run_load_counters(&mut state), vec![LoadKind::Objects]);

        for _ in 0..10 {
            state.report_completed(LoadKind::Objects);
            assert!(run_load_counters(&mut state).is_empty());
        }

        assert_eq!(
            state.drain_events(),
            vec![WorldEvent::ResourcesLoaded, WorldEvent::ObjectsLoaded]
        );
    }

    #[test]
    fn unused_counters_open_on_second_pass() {
        let mut state = WorldState::new();
        assert!(run_load_counters(&mut state).is_empty());
        assert!(!state.objects_loaded());
        assert_eq!(run_load_counters(&mut state), LoadKind::ALL.to_vec());
        assert!(state.objects_loaded());
        assert!(state.is_loaded(LoadKind::Resources));
    }
}
