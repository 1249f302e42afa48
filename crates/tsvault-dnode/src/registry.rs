//! Vnode registry: the table of locally hosted vnodes keyed by vgroup id.
//!
//! Lookups take only the map's shard lock, which is never held across
//! repository I/O, so a lookup never waits on another vgroup's create or drop.
//! Lifecycle operations on the same key are serialized by a per-key claim,
//! and a vnode leaves the map before its teardown starts, so a lookup can
//! never hand out a vnode whose removal has already begun.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{DnodeError, DnodeResult};
use crate::types::VgroupId;
use crate::vnode::{Vnode, VnodeRef};

/// Fixed-capacity map from vgroup id to vnode.
pub struct VnodeRegistry {
    vnodes: DashMap<VgroupId, Arc<Vnode>>,
    // Per-key lifecycle locks; an entry lives only while some operation holds it.
    claims: DashMap<VgroupId, Arc<Mutex<()>>>,
    capacity: usize,
    // Slots reserved or occupied, counting vnodes still being built or torn down.
    reserved: AtomicUsize,
}

impl VnodeRegistry {
    /// Creates an empty registry holding at most `capacity` vnodes.
    pub fn new(capacity: usize) -> Self {
        Self {
            vnodes: DashMap::with_capacity(capacity),
            claims: DashMap::new(),
            capacity,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Maximum number of vnodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered vnodes.
    pub fn len(&self) -> usize {
        self.vnodes.len()
    }

    /// Returns true if no vnodes are registered.
    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    /// Returns true if a vnode is registered for `vgroup_id`.
    pub fn contains(&self, vgroup_id: VgroupId) -> bool {
        self.vnodes.contains_key(&vgroup_id)
    }

    /// Looks up a vnode and raises its reference count in one step.
    pub fn acquire(&self, vgroup_id: VgroupId) -> Option<VnodeRef> {
        let entry = self.vnodes.get(&vgroup_id)?;
        entry.acquire();
        Some(VnodeRef::adopt(Arc::clone(entry.value())))
    }

    /// Registers a vnode. Fails if the key is taken or the registry is full.
    pub fn insert(&self, vnode: Vnode) -> DnodeResult<()> {
        let vgroup_id = vnode.vgroup_id();
        let inserted = self.insert_with(vgroup_id, || Ok(vnode))?;
        if inserted {
            Ok(())
        } else {
            Err(DnodeError::VgroupAlreadyExists(vgroup_id))
        }
    }

    /// Builds and registers a vnode while holding the key's claim.
    ///
    /// Returns `Ok(false)` without calling `build` if the key is already
    /// registered. A capacity slot is reserved before `build` runs and given
    /// back if it fails, so nothing is left half-registered. `build` runs
    /// outside the map lock; lookups see the vnode only once it is complete.
    pub fn insert_with<F>(&self, vgroup_id: VgroupId, build: F) -> DnodeResult<bool>
    where
        F: FnOnce() -> DnodeResult<Vnode>,
    {
        self.with_claim(vgroup_id, || {
            if self.vnodes.contains_key(&vgroup_id) {
                return Ok(false);
            }
            self.reserve()?;
            match build() {
                Ok(vnode) => {
                    self.vnodes.insert(vgroup_id, Arc::new(vnode));
                    debug!(vgroup_id = %vgroup_id, "vnode registered");
                    Ok(true)
                }
                Err(e) => {
                    self.unreserve();
                    Err(e)
                }
            }
        })
    }

    /// Unregisters a vnode and tears it down while holding the key's claim.
    ///
    /// `retire` runs under the map lock just before the entry is removed and
    /// must not block; `teardown` runs after removal, outside the map lock.
    /// Fails with [`DnodeError::InvalidVgroupId`] if nothing is registered.
    pub fn remove_with<R, F, T>(
        &self,
        vgroup_id: VgroupId,
        retire: R,
        teardown: F,
    ) -> DnodeResult<T>
    where
        R: FnOnce(&Vnode),
        F: FnOnce(&Vnode) -> T,
    {
        self.with_claim(vgroup_id, || {
            let vnode = match self.vnodes.entry(vgroup_id) {
                Entry::Vacant(_) => return Err(DnodeError::InvalidVgroupId(vgroup_id)),
                Entry::Occupied(entry) => {
                    retire(&**entry.get());
                    entry.remove()
                }
            };
            debug!(vgroup_id = %vgroup_id, "vnode unregistered");

            let out = teardown(&vnode);
            self.unreserve();
            Ok(out)
        })
    }

    /// Runs `f` on a registered vnode while holding the key's claim, without
    /// touching its reference count.
    pub fn update<F, T>(&self, vgroup_id: VgroupId, f: F) -> DnodeResult<T>
    where
        F: FnOnce(&Vnode) -> T,
    {
        self.with_claim(vgroup_id, || {
            let vnode = self
                .vnodes
                .get(&vgroup_id)
                .map(|e| Arc::clone(e.value()))
                .ok_or(DnodeError::InvalidVgroupId(vgroup_id))?;
            Ok(f(&vnode))
        })
    }

    /// Unconditionally deletes an entry, returning the vnode if one was present.
    pub fn remove(&self, vgroup_id: VgroupId) -> Option<Arc<Vnode>> {
        self.with_claim(vgroup_id, || {
            let (_, vnode) = self.vnodes.remove(&vgroup_id)?;
            self.unreserve();
            debug!(vgroup_id = %vgroup_id, "vnode unregistered");
            Some(vnode)
        })
    }

    /// Registered vgroup ids, sorted.
    pub fn vgroup_ids(&self) -> Vec<VgroupId> {
        let mut ids: Vec<VgroupId> = self.vnodes.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Borrows every registered vnode, sorted by vgroup id.
    ///
    /// Each entry holds a reference, so the caller must let them drop promptly.
    pub fn acquire_all(&self) -> Vec<VnodeRef> {
        let mut refs: Vec<VnodeRef> = self
            .vnodes
            .iter()
            .map(|e| {
                e.value().acquire();
                VnodeRef::adopt(Arc::clone(e.value()))
            })
            .collect();
        refs.sort_by_key(|r| r.vgroup_id());
        refs
    }

    // Serializes lifecycle operations on one key. Lookups never take the claim.
    fn with_claim<T>(&self, vgroup_id: VgroupId, f: impl FnOnce() -> T) -> T {
        let claim = Arc::clone(&*self.claims.entry(vgroup_id).or_default());
        let out = {
            let _held = claim.lock();
            f()
        };
        drop(claim);
        self.claims
            .remove_if(&vgroup_id, |_, claim| Arc::strong_count(claim) == 1);
        out
    }

    fn reserve(&self) -> DnodeResult<()> {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.capacity {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .map(|_| ())
            .map_err(|_| DnodeError::ResourceExhausted {
                capacity: self.capacity,
            })
    }

    fn unreserve(&self) {
        let _ = self
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}
