//! [`LayoutEntry`]: one (subvolume, range, commit hash, error) slot.

/// Reserved sentinel distinct from any valid commit hash.
pub const HASH_INVALID: u32 = 0xFFFF_FFFF;

/// One partition of the 32-bit hash space assigned to a subvolume.
///
/// `subvol` is `None` until a per-brick [`super::Layout::merge`] fills it
/// in; a freshly allocated layout's entries all start unset.
#[derive(Debug, Clone)]
pub struct LayoutEntry<S> {
    pub subvol: Option<S>,
    pub start: u32,
    pub stop: u32,
    pub commit_hash: u32,
    /// `0` on success; an errno-shaped code on brick failure. `-1` is used
    /// for "missing" by convention and is kept here as a plain `i32`, not a
    /// dedicated enum, since the anomaly classifier treats it as data, not
    /// as a Rust error type.
    pub err: i32,
}

impl<S> LayoutEntry<S> {
    pub(crate) fn unassigned() -> Self {
        Self {
            subvol: None,
            start: 0,
            stop: 0,
            commit_hash: 0,
            err: 0,
        }
    }

    /// A non-participating entry has no assigned range; it is skipped by
    /// hole/overlap detection.
    pub fn is_non_participating(&self) -> bool {
        self.start == 0 && self.stop == 0
    }

    pub fn contains(&self, hash: u32) -> bool {
        self.start <= hash && hash <= self.stop
    }
}
