use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{KvStore, Result, StoreError};

/// Key the seen identifiers are stored under
pub const SEEN_IDS_KEY: &str = "seen_ids";

/// How many identifiers we remember before dropping the oldest
pub const DEFAULT_SEEN_CAPACITY: usize = 100;

/// Insertion-ordered set of notification identifiers
///
/// Oldest at the front, newest at the back. Re-inserting an identifier that is
/// already present does not move it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from identifiers listed oldest first; duplicates keep their first position
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Returns false when the identifier was already there
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identifiers, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Drop the oldest entries until at most `capacity` remain; returns how many went
    pub fn retain_newest(&mut self, capacity: usize) -> usize {
        let mut dropped = 0;
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                dropped += 1;
            }
        }
        dropped
    }
}

/// Persistent home of the [`SeenSet`]
///
/// The whole set is serialised as one JSON array under [`SEEN_IDS_KEY`] and
/// written with a single statement, so a save is all-or-nothing.
pub struct SeenStore {
    kv: Arc<KvStore>,
    capacity: usize,
}

impl SeenStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self::with_capacity(kv, DEFAULT_SEEN_CAPACITY)
    }

    pub fn with_capacity(kv: Arc<KvStore>, capacity: usize) -> Self {
        Self { kv, capacity }
    }

    /// Load the stored set, empty if nothing was ever saved
    ///
    /// A value that no longer parses is a [`StoreError::Serialization`]; the
    /// row is left alone so dedup state isn't silently thrown away.
    pub fn load(&self) -> Result<SeenSet> {
        let Some(raw) = self.kv.get(SEEN_IDS_KEY)? else {
            return Ok(SeenSet::new());
        };

        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            warn!("Unreadable seen-notification list: {}", e);
            StoreError::from(e)
        })?;
        Ok(SeenSet::from_ids(ids))
    }

    /// Replace the stored set, keeping only the newest `capacity` identifiers
    pub fn save(&self, set: &SeenSet) -> Result<()> {
        let mut trimmed = set.clone();
        let dropped = trimmed.retain_newest(self.capacity);
        if dropped > 0 {
            debug!("Evicted {} oldest seen ids", dropped);
        }

        let ids: Vec<&str> = trimmed.iter().collect();
        let raw = serde_json::to_string(&ids)?;
        self.kv.put(SEEN_IDS_KEY, &raw)
    }

    /// Forget every remembered identifier; done on logout
    pub fn clear(&self) -> Result<()> {
        self.kv.remove(SEEN_IDS_KEY)?;
        Ok(())
    }
}
