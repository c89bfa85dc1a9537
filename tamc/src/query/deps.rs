//! Dependency tracking between queries during execution.
//!
//! When query Q1's provider forces Q2, Q2 is recorded as a dependency of Q1.
//! The tracker also answers "would executing this key close a cycle?" by
//! scanning the active stack.

use std::sync::Mutex;

use crate::query::key::QueryKey;

#[derive(Debug, Default)]
struct TrackerState {
    /// Keys currently executing, outermost first.
    active: Vec<QueryKey>,
    /// Dependency list per active frame; parallel to `active`.
    frames: Vec<Vec<QueryKey>>,
}

/// Per-context execution stack with cycle detection.
///
/// One lock serializes all access; critical sections are O(stack depth).
#[derive(Debug, Default)]
pub struct DependencyTracker {
    state: Mutex<TrackerState>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a provider starts executing.
    pub fn push_active(&self, key: &QueryKey) {
        let mut state = self.state.lock().expect("dependency tracker lock poisoned");
        state.active.push(key.clone());
        state.frames.push(Vec::new());
    }

    /// Called when a provider finishes; returns the frame's dependencies in
    /// first-force order.
    pub fn pop_active(&self) -> Vec<QueryKey> {
        let mut state = self.state.lock().expect("dependency tracker lock poisoned");
        state.active.pop();
        state.frames.pop().unwrap_or_default()
    }

    /// Record that the currently active query depends on `callee`.
    ///
    /// Duplicates within one frame are kept once, at first-force position.
    /// A record with no active frame is ignored: the outermost force has no
    /// caller to charge the edge to.
    pub fn record_dependency(&self, callee: &QueryKey) {
        let mut state = self.state.lock().expect("dependency tracker lock poisoned");
        if let Some(frame) = state.frames.last_mut() {
            if !frame.contains(callee) {
                frame.push(callee.clone());
            }
        }
    }

    /// Dependencies recorded so far for the innermost active query.
    pub fn current_dependencies(&self) -> Vec<QueryKey> {
        let state = self.state.lock().expect("dependency tracker lock poisoned");
        state.frames.last().cloned().unwrap_or_default()
    }

    /// If executing `key` would close a cycle, returns the closed path
    /// `[key, ..intervening.., key]` for diagnostics.
    pub fn detect_cycle(&self, key: &QueryKey) -> Option<Vec<QueryKey>> {
        let state = self.state.lock().expect("dependency tracker lock poisoned");
        let position = state.active.iter().position(|active| active == key)?;
        let mut path: Vec<QueryKey> = state.active[position..].to_vec();
        path.push(key.clone());
        Some(path)
    }

    pub fn depth(&self) -> usize {
        let state = self.state.lock().expect("dependency tracker lock poisoned");
        state.active.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("dependency tracker lock poisoned");
        state.active.clear();
        state.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::key::QueryKind;

    fn key(path: &str) -> QueryKey {
        QueryKey::read_source(path)
    }

    #[test]
    fn dependencies_are_recorded_in_first_force_order() {
        let tracker = DependencyTracker::new();
        tracker.push_active(&key("top.tam"));
        tracker.record_dependency(&key("a.tam"));
        tracker.record_dependency(&key("b.tam"));
        tracker.record_dependency(&key("a.tam")); // duplicate, kept once
        let deps = tracker.pop_active();
        assert_eq!(deps, vec![key("a.tam"), key("b.tam")]);
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn frames_are_independent() {
        let tracker = DependencyTracker::new();
        tracker.push_active(&key("outer.tam"));
        tracker.record_dependency(&key("x.tam"));
        tracker.push_active(&key("inner.tam"));
        tracker.record_dependency(&key("y.tam"));
        assert_eq!(tracker.current_dependencies(), vec![key("y.tam")]);
        assert_eq!(tracker.pop_active(), vec![key("y.tam")]);
        assert_eq!(tracker.pop_active(), vec![key("x.tam")]);
    }

    #[test]
    fn cycle_path_is_closed() {
        let tracker = DependencyTracker::new();
        let k1 = key("k1.tam");
        let k2 = QueryKey::for_module(QueryKind::ParseModule, "k2.tam", "k2");
        tracker.push_active(&k1);
        tracker.push_active(&k2);

        let path = tracker.detect_cycle(&k1).expect("cycle expected");
        assert_eq!(path, vec![k1.clone(), k2.clone(), k1.clone()]);

        assert!(tracker.detect_cycle(&key("k3.tam")).is_none());
    }

    #[test]
    fn cycle_from_the_middle_of_the_stack() {
        let tracker = DependencyTracker::new();
        let k1 = key("k1.tam");
        let k2 = key("k2.tam");
        let k3 = key("k3.tam");
        tracker.push_active(&k1);
        tracker.push_active(&k2);
        tracker.push_active(&k3);
        let path = tracker.detect_cycle(&k2).expect("cycle expected");
        assert_eq!(path, vec![k2.clone(), k3.clone(), k2.clone()]);
    }

    #[test]
    fn record_without_frame_is_ignored() {
        let tracker = DependencyTracker::new();
        tracker.record_dependency(&key("stray.tam"));
        assert_eq!(tracker.current_dependencies(), Vec::<QueryKey>::new());
    }

    #[test]
    fn clear_resets_everything() {
        let tracker = DependencyTracker::new();
        tracker.push_active(&key("a.tam"));
        tracker.clear();
        assert_eq!(tracker.depth(), 0);
        assert_eq!(tracker.pop_active(), Vec::<QueryKey>::new());
    }
}
