// Shared rule collection
//
// Flat ordered sequence of top-level rule nodes, written by builders and read
// by whatever consumes the finished rules. Writers only ever replace the whole
// sequence or reset it to empty.

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::rule_node::RuleNode;

#[derive(Debug, Default)]
struct StoreState {
    rules: Vec<RuleNode>,
    revision: u64,
    last_written_at: Option<DateTime<Utc>>,
}

impl StoreState {
    fn write(&mut self, rules: Vec<RuleNode>) {
        self.rules = rules;
        self.revision += 1;
        self.last_written_at = Some(Utc::now());
    }
}

/// Handle to a shared rule collection.
///
/// Cloning the handle shares the underlying collection.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    state: Arc<RwLock<StoreState>>,
}

impl RuleStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire collection with `rules`.
    pub fn replace_all(&self, rules: Vec<RuleNode>) {
        let count = rules.len();
        self.state.write().write(rules);
        debug!("Rule store replaced: {} top-level nodes", count);
    }

    /// Resets the collection to empty.
    pub fn reset(&self) {
        self.state.write().write(Vec::new());
        debug!("Rule store reset");
    }

    /// Copy of the current collection
    pub fn snapshot(&self) -> Vec<RuleNode> {
        self.state.read().rules.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().rules.is_empty()
    }

    /// Number of writes (replace or reset) applied so far.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Time of the most recent write, `None` before the first one.
    pub fn last_written_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_written_at
    }

    /// Applies `f` to the current collection and writes back its result.
    /// Read and write happen under one write lock.
    pub(crate) fn update<F>(&self, f: F) -> usize
    where
        F: FnOnce(Vec<RuleNode>) -> Vec<RuleNode>,
    {
        let mut state = self.state.write();
        let current = std::mem::take(&mut state.rules);
        let merged = f(current);
        let count = merged.len();
        state.write(merged);
        count
    }
}
