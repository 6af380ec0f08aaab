//! Per-subvolume table of preset layouts, grounded in
//! `dht_layout_for_subvol`/`dht_layouts_init`.
//!
//! A single preset (full-range) layout exists per subvolume, but callers
//! need to look one up given just a subvolume handle; the original keeps
//! one per subvolume in the translator's private state and hands it out
//! by name. This table is that lookup, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::hash::HashType;
use super::layout::Layout;
use crate::external::Subvolume;

/// Owns exactly one preset (full-range) layout per subvolume name.
pub struct PresetLayouts<S> {
    hash_type: HashType,
    by_name: RwLock<HashMap<String, Arc<Layout<S>>>>,
}

impl<S: Subvolume> PresetLayouts<S> {
    pub fn new(hash_type: HashType) -> Self {
        Self {
            hash_type,
            by_name: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a preset layout for every subvolume up front (`dht_layouts_init`),
    /// rather than lazily on first [`for_subvol`] call — for hosts that want
    /// the table fully populated at startup so later lookups never take the
    /// write-lock path.
    ///
    /// [`for_subvol`]: PresetLayouts::for_subvol
    pub fn init(hash_type: HashType, subvols: impl IntoIterator<Item = S>) -> Self {
        let table = Self::new(hash_type);
        for subvol in subvols {
            table.for_subvol(&subvol);
        }
        table
    }

    /// Returns the existing preset layout for `subvol`, creating one on
    /// first use (`dht_layout_for_subvol`).
    pub fn for_subvol(&self, subvol: &S) -> Arc<Layout<S>> {
        if let Some(layout) = self.by_name.read().get(subvol.name()) {
            return layout.acquire();
        }
        let mut by_name = self.by_name.write();
        by_name
            .entry(subvol.name().to_string())
            .or_insert_with(|| Layout::preset(subvol.clone(), self.hash_type))
            .acquire()
    }

    pub fn len(&self) -> usize {
        self.by_name.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }
}
