use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::models::TabId;

/// Ceiling on tracked nodes across all tabs.
pub const MAX_TRACKED_NODES: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Report,
    Suppress,
}

/// Suppresses mutation reports for a node that changed more than
/// `max_changes` times inside `window`. The window restarts once it elapses.
/// Nodes are keyed by tab since node ids are only unique within a document.
#[derive(Debug)]
pub struct MutationThrottle {
    max_changes: u32,
    window: Duration,
    nodes: HashMap<(TabId, i64), (Instant, u32)>,
}

impl MutationThrottle {
    #[must_use]
    pub fn new(max_changes: u32, window: Duration) -> Self {
        Self {
            max_changes: max_changes.max(1),
            window,
            nodes: HashMap::new(),
        }
    }

    pub fn observe(&mut self, tab_id: TabId, node_id: i64, now: Instant) -> ThrottleDecision {
        let key = (tab_id, node_id);
        if self.nodes.len() >= MAX_TRACKED_NODES && !self.nodes.contains_key(&key) {
            self.make_room(now);
        }

        let window = self.window;
        let slot = self.nodes.entry(key).or_insert((now, 0));
        if now.duration_since(slot.0) > window {
            *slot = (now, 0);
        }
        slot.1 += 1;

        if slot.1 > self.max_changes {
            ThrottleDecision::Suppress
        } else {
            ThrottleDecision::Report
        }
    }

    /// Drops windows that have fully elapsed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.nodes
            .retain(|_, (started, _)| now.duration_since(*started) <= window);
    }

    pub fn forget_tab(&mut self, tab_id: TabId) {
        self.nodes.retain(|(tab, _), _| *tab != tab_id);
    }

    /// Prunes elapsed windows; if every window is still live, drops the
    /// oldest one so the map stays at its ceiling.
    fn make_room(&mut self, now: Instant) {
        self.prune(now);
        if self.nodes.len() < MAX_TRACKED_NODES {
            return;
        }
        let oldest = self
            .nodes
            .iter()
            .min_by_key(|(_, (started, _))| *started)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.nodes.remove(&key);
        }
    }
}
