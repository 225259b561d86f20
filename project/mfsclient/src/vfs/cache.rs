//! Inode/attribute cache keyed by (parent inode, name).
//!
//! Entries live in one flat map; a second map groups child names per parent
//! so a subtree can be dropped with an iterative walk. Nothing expires: an
//! entry stays authoritative until it is purged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::meta::ops::Entry;

#[derive(Default)]
struct CacheState {
    children: HashMap<u32, HashSet<String>>,
    entries: HashMap<(u32, String), Arc<Entry>>,
}

pub struct InodeCache {
    enabled: bool,
    state: Mutex<CacheState>,
}

impl InodeCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, parent: u32, name: &str) -> Option<Arc<Entry>> {
        if !self.enabled {
            return None;
        }
        self.state
            .lock()
            .entries
            .get(&(parent, name.to_string()))
            .cloned()
    }

    pub fn insert(&self, parent: u32, name: &str, entry: Entry) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock();
        state
            .children
            .entry(parent)
            .or_default()
            .insert(name.to_string());
        state
            .entries
            .insert((parent, name.to_string()), Arc::new(entry));
    }

    /// Drop a single entry, leaving any cached children in place.
    pub fn forget(&self, parent: u32, name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let mut state = self.state.lock();
        Self::remove_entry(&mut state, parent, name).is_some()
    }

    fn remove_entry(state: &mut CacheState, parent: u32, name: &str) -> Option<Arc<Entry>> {
        let removed = state.entries.remove(&(parent, name.to_string()))?;
        if let Some(names) = state.children.get_mut(&parent) {
            names.remove(name);
            if names.is_empty() {
                state.children.remove(&parent);
            }
        }
        Some(removed)
    }

    /// Purge the entry `(parent, name)` together with everything cached
    /// below `inode`. Returns the number of entries removed.
    pub fn purge(&self, parent: u32, name: &str, inode: u32) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;
        if Self::remove_entry(&mut state, parent, name).is_some() {
            removed += 1;
        }
        removed + Self::purge_below(&mut state, inode)
    }

    /// Purge every cached descendant of `inode`.
    pub fn purge_children(&self, inode: u32) -> usize {
        let mut state = self.state.lock();
        Self::purge_below(&mut state, inode)
    }

    fn purge_below(state: &mut CacheState, inode: u32) -> usize {
        let mut removed = 0;
        let mut stack = vec![inode];
        while let Some(dir) = stack.pop() {
            let Some(names) = state.children.remove(&dir) else {
                continue;
            };
            for name in names {
                if let Some(entry) = state.entries.remove(&(dir, name)) {
                    removed += 1;
                    stack.push(entry.inode);
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
