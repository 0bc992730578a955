//! Pooled slot storage with journal-aware deletion.
//!
//! A [`Pool`] hands out versioned keys backed by [`StorageMap`]. Allocation is
//! amortized O(1) and reuses the most recently released slot; a released key
//! never resolves again, even after its slot is reused, and growing the pool
//! never invalidates existing keys.
//!
//! Deletion is two-phase so a speculative edit can be undone without changing
//! any key:
//!
//! 1. [`Pool::retire`] hides a live slot but keeps its payload in place.
//! 2. [`Pool::revive`] (rollback) makes it visible again under the same key,
//!    or [`Pool::release`] (commit) frees the slot for reuse.
//!
//! Outside a speculative edit, [`Pool::remove`] frees a live slot directly.

use slotmap::Key;
use thiserror::Error;

use crate::core::collections::StorageMap;

/// Errors from slot lifecycle transitions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The key does not name a slot (never allocated or already released).
    #[error("Slot {key} does not exist")]
    Missing {
        /// Debug rendering of the key.
        key: String,
    },
    /// The slot is in the wrong lifecycle state for the requested transition.
    #[error("Slot {key} is {actual}, expected {expected}")]
    WrongState {
        /// Debug rendering of the key.
        key: String,
        /// `"live"` or `"retired"`.
        expected: &'static str,
        /// `"live"` or `"retired"`.
        actual: &'static str,
    },
}

#[derive(Clone, Debug)]
struct Slot<T> {
    value: T,
    live: bool,
}

const fn state_name(live: bool) -> &'static str {
    if live { "live" } else { "retired" }
}

/// Keyed object pool with retire/revive/release lifecycle.
#[derive(Clone, Debug)]
pub struct Pool<K: Key, T> {
    slots: StorageMap<K, Slot<T>>,
    live: usize,
}

impl<K: Key, T> Default for Pool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, T> Pool<K, T> {
    /// Empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: StorageMap::with_key(),
            live: 0,
        }
    }

    /// Empty pool with room for `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: StorageMap::with_capacity_and_key(capacity),
            live: 0,
        }
    }

    /// Stores a new live value.
    pub fn insert(&mut self, value: T) -> K {
        self.live += 1;
        self.slots.insert(Slot { value, live: true })
    }

    /// Live value for `key`.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key)
            .filter(|slot| slot.live)
            .map(|slot| &slot.value)
    }

    /// Mutable live value for `key`.
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key)
            .filter(|slot| slot.live)
            .map(|slot| &mut slot.value)
    }

    /// `true` if `key` names a live slot.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// `true` if `key` names a retired, not yet released slot.
    #[must_use]
    pub fn is_retired(&self, key: K) -> bool {
        self.slots.get(key).is_some_and(|slot| !slot.live)
    }

    /// Number of live slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// `true` when no slot is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live keys in storage order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Live entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.live)
            .map(|(k, slot)| (k, &slot.value))
    }

    fn transition(&mut self, key: K, from_live: bool) -> Result<&mut Slot<T>, PoolError> {
        let slot = self.slots.get_mut(key).ok_or_else(|| PoolError::Missing {
            key: format!("{key:?}"),
        })?;
        if slot.live != from_live {
            return Err(PoolError::WrongState {
                key: format!("{key:?}"),
                expected: state_name(from_live),
                actual: state_name(slot.live),
            });
        }
        Ok(slot)
    }

    /// Hides a live slot, keeping its payload for [`Pool::revive`].
    ///
    /// # Errors
    ///
    /// Fails if the key is unknown or already retired.
    pub fn retire(&mut self, key: K) -> Result<(), PoolError> {
        self.transition(key, true)?.live = false;
        self.live -= 1;
        Ok(())
    }

    /// Restores a retired slot under its original key.
    ///
    /// # Errors
    ///
    /// Fails if the key is unknown or live.
    pub fn revive(&mut self, key: K) -> Result<(), PoolError> {
        self.transition(key, false)?.live = true;
        self.live += 1;
        Ok(())
    }

    /// Frees a retired slot for reuse.
    ///
    /// # Errors
    ///
    /// Fails if the key is unknown or live.
    pub fn release(&mut self, key: K) -> Result<T, PoolError> {
        self.transition(key, false)?;
        self.slots
            .remove(key)
            .map(|slot| slot.value)
            .ok_or_else(|| PoolError::Missing {
                key: format!("{key:?}"),
            })
    }

    /// Frees a live slot immediately.
    ///
    /// # Errors
    ///
    /// Fails if the key is unknown or retired.
    pub fn remove(&mut self, key: K) -> Result<T, PoolError> {
        self.retire(key)?;
        self.release(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::new_key_type;

    new_key_type! {
        struct TestKey;
    }

    #[test]
    fn retire_then_revive_keeps_the_key() {
        let mut pool: Pool<TestKey, &str> = Pool::new();
        let a = pool.insert("a");
        let b = pool.insert("b");
        pool.retire(a).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get(a).is_none());
        assert!(pool.is_retired(a));
        assert_eq!(pool.keys().collect::<Vec<_>>(), vec![b]);

        pool.revive(a).unwrap();
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn released_keys_never_alias() {
        let mut pool: Pool<TestKey, u32> = Pool::new();
        let a = pool.insert(1);
        assert_eq!(pool.remove(a), Ok(1));
        let b = pool.insert(2);
        assert_ne!(a, b);
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(b), Some(&2));
        assert!(matches!(pool.retire(a), Err(PoolError::Missing { .. })));
    }

    #[test]
    fn most_recently_released_slot_is_reused() {
        let mut pool: Pool<TestKey, u32> = Pool::new();
        let keys: Vec<TestKey> = (0..4).map(|i| pool.insert(i)).collect();
        pool.remove(keys[1]).unwrap();
        pool.remove(keys[3]).unwrap();
        let reused = pool.insert(9);
        // Same slot index as keys[3], newer version.
        assert_eq!(
            reused.data().as_ffi() & 0xffff_ffff,
            keys[3].data().as_ffi() & 0xffff_ffff
        );
        assert_ne!(reused, keys[3]);
    }

    #[test]
    fn lifecycle_errors() {
        let mut pool: Pool<TestKey, u32> = Pool::new();
        let a = pool.insert(1);
        assert!(matches!(
            pool.revive(a),
            Err(PoolError::WrongState { expected: "retired", .. })
        ));
        assert!(pool.release(a).is_err());
        pool.retire(a).unwrap();
        assert!(matches!(
            pool.retire(a),
            Err(PoolError::WrongState { expected: "live", .. })
        ));
        assert_eq!(pool.release(a), Ok(1));
        assert!(pool.is_empty());
    }
}
