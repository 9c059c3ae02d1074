//! Entity stores: keyed caches for empires and stars.
//!
//! The synchronizers only see the traits.  Implementations must be safe for
//! concurrent get/put from several background workers; the core adds no
//! locking of its own around store calls.  `put` is a full overwrite by id,
//! never a field merge, so unordered concurrent pushes stay safe.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Empire, SectorCoord, Star};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait EmpireStore: Send + Sync {
    fn get(&self, id: i64) -> Option<Empire>;
    fn put(&self, id: i64, empire: Empire);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StarQuery {
    /// Every cached star in a sector.
    Sector(SectorCoord),
    /// Every star owned by the attributed empire.
    Mine,
    /// Owned stars whose name contains the text (case-insensitive).
    MineMatching(String),
}

pub trait StarStore: Send + Sync {
    fn get(&self, id: i64) -> Option<Star>;

    /// Overwrite the star.  `attribution` is the empire the write is made on
    /// behalf of; the store uses it to track which stars are "ours".
    fn put(&self, id: i64, star: Star, attribution: Option<&Empire>);

    fn put_all(&self, stars: HashMap<i64, Star>, attribution: Option<&Empire>);

    /// Matching stars ordered by id.
    fn search(&self, query: &StarQuery) -> Vec<Star>;

    /// Largest `last_simulation` among owned stars.
    fn last_simulation_of_my_star(&self) -> Option<i64>;

    fn len(&self) -> usize;
    fn owned_len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// A lazy, restartable view over a store query.
///
/// Nothing is read until the cursor is iterated, and every iteration re-runs
/// the query, so a cursor held by a screen reflects later pushes.
#[derive(Clone)]
pub struct StarCursor {
    store: Arc<dyn StarStore>,
    query: StarQuery,
}

impl StarCursor {
    pub fn new(store: Arc<dyn StarStore>, query: StarQuery) -> Self {
        Self { store, query }
    }

    pub fn query(&self) -> &StarQuery {
        &self.query
    }

    pub fn iter(&self) -> std::vec::IntoIter<Star> {
        self.store.search(&self.query).into_iter()
    }

    pub fn count(&self) -> usize {
        self.store.search(&self.query).len()
    }
}

impl IntoIterator for &StarCursor {
    type Item = Star;
    type IntoIter = std::vec::IntoIter<Star>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl std::fmt::Debug for StarCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarCursor").field("query", &self.query).finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory empire store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEmpireStore {
    empires: RwLock<HashMap<i64, Empire>>,
}

impl MemoryEmpireStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmpireStore for MemoryEmpireStore {
    fn get(&self, id: i64) -> Option<Empire> {
        self.empires.read().get(&id).cloned()
    }

    fn put(&self, id: i64, empire: Empire) {
        self.empires.write().insert(id, empire);
    }

    fn len(&self) -> usize {
        self.empires.read().len()
    }
}

// ---------------------------------------------------------------------------
// In-memory star store
// ---------------------------------------------------------------------------

struct StoredStar {
    star: Star,
    owned: bool,
}

#[derive(Default)]
pub struct MemoryStarStore {
    stars: RwLock<HashMap<i64, StoredStar>>,
}

impl MemoryStarStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stored(star: Star, attribution: Option<&Empire>) -> StoredStar {
        let owned = attribution.is_some_and(|e| star.has_presence(e.id));
        StoredStar { star, owned }
    }
}

impl StarStore for MemoryStarStore {
    fn get(&self, id: i64) -> Option<Star> {
        self.stars.read().get(&id).map(|s| s.star.clone())
    }

    fn put(&self, id: i64, star: Star, attribution: Option<&Empire>) {
        let stored = Self::stored(star, attribution);
        self.stars.write().insert(id, stored);
    }

    fn put_all(&self, stars: HashMap<i64, Star>, attribution: Option<&Empire>) {
        let mut map = self.stars.write();
        for (id, star) in stars {
            map.insert(id, Self::stored(star, attribution));
        }
    }

    fn search(&self, query: &StarQuery) -> Vec<Star> {
        let map = self.stars.read();
        let mut out: Vec<Star> = match query {
            StarQuery::Sector(coord) => map
                .values()
                .filter(|s| s.star.sector == *coord)
                .map(|s| s.star.clone())
                .collect(),
            StarQuery::Mine => map
                .values()
                .filter(|s| s.owned)
                .map(|s| s.star.clone())
                .collect(),
            StarQuery::MineMatching(text) => {
                let needle = text.to_lowercase();
                map.values()
                    .filter(|s| s.owned && s.star.name.to_lowercase().contains(&needle))
                    .map(|s| s.star.clone())
                    .collect()
            }
        };
        out.sort_by_key(|s| s.id);
        out
    }

    fn last_simulation_of_my_star(&self) -> Option<i64> {
        self.stars
            .read()
            .values()
            .filter(|s| s.owned)
            .filter_map(|s| s.star.last_simulation)
            .max()
    }

    fn len(&self) -> usize {
        self.stars.read().len()
    }

    fn owned_len(&self) -> usize {
        self.stars.read().values().filter(|s| s.owned).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
