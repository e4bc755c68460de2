//! Captures and restores the bindings map per turn. A checkpoint records
//! handle names only — the arrays they point at are already durable in
//! the registry, so restoring just re-points names, never resurrects a
//! dropped handle.

use crate::bindings::Bindings;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub turn: u32,
    pub bindings: HashMap<String, String>,
    pub timestamp_unix: u64,
}

#[derive(Debug, Default)]
pub struct CheckpointManager {
    by_turn: BTreeMap<u32, Checkpoint>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert-by-turn: at most one checkpoint per turn.
    pub fn save(&mut self, turn: u32, bindings: &Bindings, timestamp_unix: u64) {
        let snapshot = bindings.snapshot();
        self.by_turn.insert(
            turn,
            Checkpoint {
                turn,
                bindings: snapshot,
                timestamp_unix,
            },
        );
    }

    /// Installs the turn's snapshot as the live bindings, reinstalling
    /// `RESULTS`. Returns `false` (no-op) if no checkpoint exists for `turn`.
    pub fn restore(&self, turn: u32, bindings: &mut Bindings) -> bool {
        match self.by_turn.get(&turn) {
            Some(checkpoint) => {
                bindings.restore(checkpoint.bindings.clone());
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<u32> {
        self.by_turn.keys().copied().collect()
    }

    pub fn delete(&mut self, turn: u32) -> bool {
        self.by_turn.remove(&turn).is_some()
    }

    pub fn clear_all(&mut self) {
        self.by_turn.clear();
    }

    pub fn get(&self, turn: u32) -> Option<&Checkpoint> {
        self.by_turn.get(&turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_reinstalls_the_snapshot_taken_at_save() {
        let mut bindings = Bindings::new();
        bindings.set("a", "$res1");
        let mut mgr = CheckpointManager::new();
        mgr.save(1, &bindings, 0);

        bindings.set("a", "$res2");
        bindings.set("b", "$res3");
        assert!(mgr.restore(1, &mut bindings));

        assert_eq!(bindings.get("a"), Some("$res1"));
        assert_eq!(bindings.get("b"), None);
    }

    #[test]
    fn save_restore_save_leaves_bindings_unchanged() {
        let mut bindings = Bindings::new();
        bindings.set("a", "$res1");
        let mut mgr = CheckpointManager::new();
        mgr.save(1, &bindings, 0);
        mgr.restore(1, &mut bindings);
        let before = bindings.snapshot();
        mgr.save(1, &bindings, 1);
        let after = bindings.snapshot();
        assert_eq!(before, after);
    }

    #[test]
    fn restoring_an_unknown_turn_is_a_no_op() {
        let mut bindings = Bindings::new();
        bindings.set("a", "$res1");
        let mgr = CheckpointManager::new();
        assert!(!mgr.restore(5, &mut bindings));
        assert_eq!(bindings.get("a"), Some("$res1"));
    }

    #[test]
    fn list_and_delete_and_clear_all() {
        let bindings = Bindings::new();
        let mut mgr = CheckpointManager::new();
        mgr.save(1, &bindings, 0);
        mgr.save(2, &bindings, 1);
        assert_eq!(mgr.list(), vec![1, 2]);
        assert!(mgr.delete(1));
        assert_eq!(mgr.list(), vec![2]);
        mgr.clear_all();
        assert!(mgr.list().is_empty());
    }
}
