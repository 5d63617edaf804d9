use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tabsentinel_core::script::is_sleeping_title;
use tabsentinel_core::{TabId, TabSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuspendState {
    /// Probe passed and the tab is reserved; the freeze script may still be in flight.
    Claimed,
    /// The freeze script completed and the placeholder is showing.
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendedEntry {
    pub state: SuspendState,
    pub since_ms: i64,
}

/// Tabs this scheduler has claimed or frozen. A tab in here is never
/// targeted again until it is released.
#[derive(Debug, Default, Clone)]
pub struct SuspendedSet {
    entries: HashMap<TabId, SuspendedEntry>,
}

impl SuspendedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TabId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &TabId) -> Option<&SuspendedEntry> {
        self.entries.get(id)
    }

    /// Reserve `id`. Returns false if someone else already holds it.
    pub fn claim(&mut self, id: TabId, now_ms: i64) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            SuspendedEntry {
                state: SuspendState::Claimed,
                since_ms: now_ms,
            },
        );
        true
    }

    pub fn mark_frozen(&mut self, id: &TabId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.state = SuspendState::Frozen;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, id: &TabId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Release `id` only if it is still frozen, leaving a fresh claim alone.
    pub fn release_frozen(&mut self, id: &TabId) -> bool {
        match self.entries.get(id) {
            Some(entry) if entry.state == SuspendState::Frozen => {
                self.entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.entries.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop entries for tabs that were closed. Frozen tabs whose title
    /// lost the sleep glyph are only reported: the page may have rewritten
    /// its own title, so the caller has to look for the overlay before
    /// releasing them. Claimed entries are left alone while their tab exists.
    pub fn reconcile(&mut self, tabs: &[TabSnapshot]) -> Reconciled {
        let open: HashMap<&TabId, &TabSnapshot> = tabs.iter().map(|t| (&t.id, t)).collect();
        let mut result = Reconciled::default();
        for (id, entry) in &self.entries {
            match open.get(id) {
                None => result.released.push(id.clone()),
                Some(tab)
                    if entry.state == SuspendState::Frozen && !is_sleeping_title(&tab.title) =>
                {
                    result.unconfirmed.push(id.clone())
                }
                Some(_) => {}
            }
        }
        for id in &result.released {
            self.entries.remove(id);
        }
        result.released.sort();
        result.unconfirmed.sort();
        result
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Closed tabs, already removed from the set.
    pub released: Vec<TabId>,
    /// Frozen tabs that no longer carry the sleep glyph.
    pub unconfirmed: Vec<TabId>,
}

/// Dedupe cache for diagnostics. Has no effect on behaviour.
#[derive(Debug, Default)]
pub struct LoggedSet {
    seen: HashSet<String>,
}

impl LoggedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen.
    pub fn first_time(&mut self, key: &str) -> bool {
        self.seen.insert(key.to_string())
    }

    pub fn forget(&mut self, key: &str) {
        self.seen.remove(key);
    }
}
