use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::agent::stores::now_ms;

#[derive(Debug, Clone)]
struct Snapshot {
    taken_at: i64,
    values: Map<String, Value>,
}

/// Before/after markers per extension. A new snapshot overwrites the previous
/// one; nothing expires on its own.
#[derive(Debug, Default)]
pub struct SnapshotMarkers {
    snapshots: HashMap<String, Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedKey {
    pub key: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub snapshot_taken_at: i64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<ChangedKey>,
}

impl StateDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl SnapshotMarkers {
    /// Records `values` for the extension and returns the number of keys kept.
    pub fn record(&mut self, extension_id: &str, values: Map<String, Value>) -> usize {
        let keys = values.len();
        self.snapshots.insert(
            extension_id.to_owned(),
            Snapshot {
                taken_at: now_ms(),
                values,
            },
        );
        keys
    }

    /// Compares `current` with the last snapshot. `None` when no snapshot exists.
    #[must_use]
    pub fn diff(&self, extension_id: &str, current: &Map<String, Value>) -> Option<StateDiff> {
        let snapshot = self.snapshots.get(extension_id)?;

        let mut added = current
            .keys()
            .filter(|key| !snapshot.values.contains_key(*key))
            .cloned()
            .collect::<Vec<_>>();
        let mut removed = snapshot
            .values
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect::<Vec<_>>();
        let mut changed = snapshot
            .values
            .iter()
            .filter_map(|(key, before)| {
                let after = current.get(key)?;
                (after != before).then(|| ChangedKey {
                    key: key.clone(),
                    before: before.clone(),
                    after: after.clone(),
                })
            })
            .collect::<Vec<_>>();

        added.sort();
        removed.sort();
        changed.sort_by(|left, right| left.key.cmp(&right.key));

        Some(StateDiff {
            snapshot_taken_at: snapshot.taken_at,
            added,
            removed,
            changed,
        })
    }
}
