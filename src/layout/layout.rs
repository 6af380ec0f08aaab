//! [`Layout`]: a per-directory partition of the 32-bit hash space.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::anomalies::{self, AnomalyCounters};
use super::disk::{DiskExtent, BLOB_LEN};
use super::entry::{LayoutEntry, HASH_INVALID};
use super::hash::{HashType, NameHasher};
use crate::error::{Error, Result};
use crate::external::{AttributeStore, Subvolume};

struct LayoutState<S> {
    entries: Vec<LayoutEntry<S>>,
}

/// A directory's hash-space partition across subvolumes.
///
/// `commit_hash` is tracked outside the entry-holding mutex as a plain
/// atomic: every entry merge updates it independently of which slot it
/// touches, reflecting layout-wide consensus rather than any one entry's
/// state.
pub struct Layout<S> {
    hash_type: HashType,
    /// Set once, monotonically, by a `DM_USER` sticky override from a
    /// per-entry disk merge. Split out as its own atomic rather than
    /// mutating `hash_type` in place, since the latter is otherwise a
    /// plain `Copy` field read without locking.
    dm_user_override: AtomicBool,
    spread_cnt: u32,
    gen: u64,
    preset: bool,
    commit_hash: AtomicU32,
    state: Mutex<LayoutState<S>>,
}

impl<S: Subvolume> Layout<S> {
    /// Allocates a layout with `count` unassigned entries.
    pub fn new(count: usize, hash_type: HashType, spread_cnt: u32) -> Arc<Self> {
        let entries = (0..count).map(|_| LayoutEntry::unassigned()).collect();
        Arc::new(Self {
            hash_type,
            dm_user_override: AtomicBool::new(false),
            spread_cnt,
            gen: 0,
            preset: false,
            commit_hash: AtomicU32::new(0),
            state: Mutex::new(LayoutState { entries }),
        })
    }

    /// A single-entry, full-range layout for one subvolume, created once at
    /// initialization and shared across every inode that needs it.
    pub fn preset(subvol: S, hash_type: HashType) -> Arc<Self> {
        let entry = LayoutEntry {
            subvol: Some(subvol),
            start: 0,
            stop: u32::MAX,
            commit_hash: 0,
            err: 0,
        };
        Arc::new(Self {
            hash_type,
            dm_user_override: AtomicBool::new(false),
            spread_cnt: 1,
            gen: 0,
            preset: true,
            commit_hash: AtomicU32::new(0),
            state: Mutex::new(LayoutState {
                entries: vec![entry],
            }),
        })
    }

    pub fn is_preset(&self) -> bool {
        self.preset
    }

    /// Effective hash type, accounting for a possible `DM_USER` sticky
    /// override from a per-entry disk merge.
    pub fn hash_type(&self) -> HashType {
        if self.dm_user_override.load(Ordering::Acquire) {
            HashType::DmUser
        } else {
            self.hash_type
        }
    }

    pub fn spread_cnt(&self) -> u32 {
        self.spread_cnt
    }

    pub fn gen(&self) -> u64 {
        self.gen
    }

    pub fn commit_hash(&self) -> u32 {
        self.commit_hash.load(Ordering::Acquire)
    }

    pub fn count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// A fresh handle to the same layout. For both owned and preset
    /// layouts this is exactly `Arc::clone` — preset layouts are modeled as
    /// shared-ownership handles rather than given their own free-standing
    /// refcount.
    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    /// Drops this handle. For an owned layout, the last drop frees it. For
    /// a preset layout this never happens in practice because the
    /// subvolume configuration retains a permanent handle; if it does
    /// happen anyway (a caller outlived the configuration's own handle) it
    /// is logged as a usage error rather than silently ignored.
    pub fn release(self: Arc<Self>) {
        if self.preset && Arc::strong_count(&self) == 1 {
            log::error!("releasing the last handle to a preset layout; this should not happen");
        }
    }

    /// Looks up the subvolume whose range covers `name`'s hash. Returns
    /// `None` — the "no subvolume" sentinel — and logs a warning on a hash
    /// failure or a hash that falls in no entry's range; never returns an
    /// `Err`.
    pub fn search<H: NameHasher>(&self, hasher: &H, name: &str) -> Option<S> {
        let hash = match hasher.hash(self.hash_type(), name) {
            Ok(h) => h,
            Err(_) => {
                log::warn!("hash computation failed for {name:?}; returning no subvolume");
                return None;
            }
        };
        let state = self.state.lock();
        for entry in state.entries.iter() {
            if entry.subvol.is_some() && entry.contains(hash) {
                return entry.subvol.clone();
            }
        }
        log::warn!("no subvolume in layout covers hash {hash:#x} for {name:?}");
        None
    }

    /// Returns `true` if `subvol`'s entry (if any) covers `hash` — a
    /// convenience over `search` for callers that already know which
    /// subvolume they expect to own a hash.
    pub fn subvol_has_range(&self, subvol: &S, hash: u32) -> bool {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .any(|e| e.subvol.as_ref() == Some(subvol) && e.contains(hash))
    }

    /// Per-brick merge. Tolerant: a bad brick is recorded on its entry and
    /// never turns into an `Err` here.
    pub fn merge(
        &self,
        subvol: S,
        op_ret: i32,
        op_errno: i32,
        xattr: &dyn AttributeStore,
    ) -> Result<()> {
        let pos = {
            let mut state = self.state.lock();
            let Some((pos, slot)) = state
                .entries
                .iter_mut()
                .enumerate()
                .find(|(_, e)| e.subvol.is_none())
            else {
                return Err(Error::SubvolNotInLayout);
            };
            slot.subvol = Some(subvol);

            if op_ret != 0 {
                slot.err = op_errno;
                return Ok(());
            }
            slot.err = 0;
            pos
        };

        let Some(raw) = xattr.get_ptr_and_len(LAYOUT_XATTR_KEY) else {
            // Missing layout attribute is not fatal; `err` is already 0.
            return Ok(());
        };

        // Route through the same decode-assign-promote path `merge_from_disk`
        // uses directly, so a per-brick merge and a raw disk merge behave
        // identically given the same bytes.
        if let Err(e) = self.merge_from_disk(pos, raw) {
            log::error!("invalid disk layout from brick: {e}");
            return Ok(());
        }

        let commit_hash = self.state.lock().entries[pos].commit_hash;
        self.adopt_commit_hash(commit_hash);
        Ok(())
    }

    fn adopt_commit_hash(&self, incoming: u32) {
        loop {
            let current = self.commit_hash.load(Ordering::Acquire);
            let next = if current == 0 {
                incoming
            } else if current != incoming {
                HASH_INVALID
            } else {
                current
            };
            if next == current {
                return;
            }
            if self
                .commit_hash
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Range sort by `start`, tie-broken by `stop` so non-participating
    /// `(0, 0)` entries cluster before any real range sharing `start == 0`.
    pub fn sort(&self) {
        let mut state = self.state.lock();
        state.entries.sort_by_key(|e| (e.start, e.stop));
    }

    /// Lexicographic sort by subvolume name. Entries without an assigned
    /// subvolume sort last.
    pub fn sort_volname(&self) {
        let mut state = self.state.lock();
        state
            .entries
            .sort_by(|a, b| match (&a.subvol, &b.subvol) {
                (Some(a), Some(b)) => a.name().cmp(b.name()),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
    }

    /// Anomaly detection over the current entry order. Requires entries to
    /// already be range-sorted; callers that can't guarantee that should
    /// call [`Layout::sort`] first, or use [`Layout::normalize`] which does
    /// so itself.
    pub fn anomalies(&self) -> AnomalyCounters {
        let state = self.state.lock();
        anomalies::detect(&state.entries)
    }

    /// Sorts, detects anomalies, and returns `-1` if any hole or overlap
    /// was found; otherwise the number of `ENOENT`-like missing entries.
    pub fn normalize(&self) -> i32 {
        self.sort();
        let counters = self.anomalies();
        if counters.holes > 0 || counters.overlaps > 0 {
            -1
        } else {
            counters.missing as i32
        }
    }

    /// Locates `subvol`'s entry and compares it against the on-disk blob in
    /// `xattr`. Returns `1` on mismatch (including an absent subvolume),
    /// `-1` if the blob is absent despite a non-empty in-memory range, `0`
    /// otherwise.
    pub fn dir_mismatch(&self, subvol: &S, xattr: &dyn AttributeStore) -> i32 {
        let state = self.state.lock();
        let Some(entry) = state.entries.iter().find(|e| e.subvol.as_ref() == Some(subvol)) else {
            return 1;
        };

        let Some(raw) = xattr.get_ptr_and_len(LAYOUT_XATTR_KEY) else {
            return if entry.start != entry.stop { -1 } else { 0 };
        };

        match DiskExtent::decode(raw) {
            Ok(extent) => {
                if extent.start != entry.start
                    || extent.stop != entry.stop
                    || extent.commit_hash != entry.commit_hash
                {
                    1
                } else {
                    0
                }
            }
            Err(_) => 1,
        }
    }

    /// Index of `subvol`'s entry.
    pub fn index_for_subvol(&self, subvol: &S) -> Result<usize> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .position(|e| e.subvol.as_ref() == Some(subvol))
            .ok_or(Error::SubvolNotInLayout)
    }

    /// Encodes entry `pos` as the 16-byte on-disk blob.
    pub fn extract(&self, pos: usize) -> Result<[u8; BLOB_LEN]> {
        let state = self.state.lock();
        let entry = state.entries.get(pos).ok_or(Error::SubvolNotInLayout)?;
        Ok(DiskExtent {
            commit_hash: entry.commit_hash,
            hash_type: self.hash_type(),
            start: entry.start,
            stop: entry.stop,
        }
        .encode())
    }

    /// Decodes a 16-byte on-disk blob into entry `pos`, rejecting unknown
    /// hash types and promoting the layout's own type on a `DM_USER`
    /// sticky override. The single point where a decoded extent's fields
    /// are written into an entry; `merge` calls through here too so both
    /// entry points assign the same three fields and apply the same
    /// promotion given identical bytes.
    pub fn merge_from_disk(&self, pos: usize, raw: &[u8]) -> Result<()> {
        let extent = DiskExtent::decode(raw)?;
        {
            let mut state = self.state.lock();
            let entry = state.entries.get_mut(pos).ok_or(Error::SubvolNotInLayout)?;
            entry.commit_hash = extent.commit_hash;
            entry.start = extent.start;
            entry.stop = extent.stop;
        }
        log::trace!(
            "merged range [{:#x}, {:#x}] commit_hash {:#x}",
            extent.start,
            extent.stop,
            extent.commit_hash
        );

        if extent.hash_type == HashType::DmUser {
            // Sticky user override: promote the whole layout, not just
            // this entry.
            self.promote_to_dm_user();
        }
        Ok(())
    }

    fn promote_to_dm_user(&self) {
        if !self.dm_user_override.swap(true, Ordering::AcqRel) {
            log::debug!("found user-set layout; promoting to DM_USER");
        }
    }
}

/// Well-known xattr key carrying a brick's on-disk layout extent. Kept as
/// a crate-private constant rather than part of the public API surface,
/// since the external attribute store is keyed by string in the original.
const LAYOUT_XATTR_KEY: &str = "trusted.glusterfs.dht";
