//! Arenas: large mmap'd regions subdivided into fixed-size pages, and the
//! per-page bookkeeping cell ([`IobufCell`]) that backs every [`super::Iobuf`]
//! handle.
//!
//! Design note: rather than the original's intrusive `passive_list`/
//! `active_list` linked through each `iobuf`, a slot's membership is
//! represented by whether its index sits in [`ArenaState::free`] (passive)
//! or not (active) — an index-into-arena free stack, which avoids
//! aliasing a raw pointer between the iobuf and its owning arena.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::mmap::AnonMap;

/// Reference into the arena that owns a page, kept as a [`Weak`] to avoid an
/// `Arc` cycle: the arena owns its cells via `Arc`, so the cells must not own
/// a strong reference back.
pub(crate) enum CellOwner {
    Arena { arena: Weak<ArenaHandle>, index: usize },
    Standalone { layout: std::alloc::Layout },
}

/// Per-page bookkeeping: the combined (refcount, usable pointer) state a
/// [`super::Iobuf`] handle wraps an `Arc` around.
pub(crate) struct IobufCell {
    /// Guards the refcount-reaches-zero → list-membership transition.
    /// Ordinary reads of `ptr`/`page_size` need no lock.
    pub(crate) transition_lock: Mutex<()>,
    pub(crate) refcount: AtomicUsize,
    pub(crate) ptr: usize,
    pub(crate) page_size: usize,
    pub(crate) owner: CellOwner,
    /// The pool `release` reports back to. `Weak` so a leaked `Iobuf`
    /// outliving its pool cannot keep the pool alive.
    pub(crate) pool: Weak<super::pool::IobufPool>,
}

impl IobufCell {
    pub(crate) fn is_standalone(&self) -> bool {
        matches!(self.owner, CellOwner::Standalone { .. })
    }
}

/// One OS-mapped region, subdivided into `page_count` pages of `page_size`
/// bytes each.
pub(crate) struct ArenaHandle {
    pub(crate) page_size: usize,
    pub(crate) arena_size: usize,
    pub(crate) page_count: usize,
    map: AnonMap,
    /// One permanent cell per page; `Iobuf` handles hold additional clones
    /// of the `Arc` while a page is checked out.
    pub(crate) cells: Vec<Arc<IobufCell>>,
    pub(crate) state: Mutex<ArenaState>,
}

pub(crate) struct ArenaState {
    /// Indices of passive (free) pages.
    pub(crate) free: Vec<usize>,
    pub(crate) active_cnt: usize,
    pub(crate) max_active: usize,
    pub(crate) alloc_cnt: u64,
}

impl ArenaHandle {
    /// Maps a new arena sized to hold at least `page_count` pages of
    /// `page_size` bytes, and links every page into the passive free list.
    pub(crate) fn new(
        page_size: usize,
        page_count: usize,
        pool: Weak<super::pool::IobufPool>,
    ) -> std::io::Result<Arc<Self>> {
        let arena_size = page_size
            .checked_mul(page_count)
            .expect("arena_size = page_size * page_count must not overflow");
        let map = AnonMap::new(arena_size)?;
        let base = map.as_ptr() as usize;

        let arena = Arc::new_cyclic(|weak: &Weak<ArenaHandle>| {
            let cells = (0..page_count)
                .map(|i| {
                    Arc::new(IobufCell {
                        transition_lock: Mutex::new(()),
                        refcount: AtomicUsize::new(0),
                        ptr: base + i * page_size,
                        page_size,
                        owner: CellOwner::Arena {
                            arena: weak.clone(),
                            index: i,
                        },
                        pool: pool.clone(),
                    })
                })
                .collect::<Vec<_>>();

            ArenaHandle {
                page_size,
                arena_size,
                page_count,
                map,
                cells,
                state: Mutex::new(ArenaState {
                    free: (0..page_count).collect(),
                    active_cnt: 0,
                    max_active: 0,
                    alloc_cnt: 0,
                }),
            }
        });
        Ok(arena)
    }

    /// Total number of bytes this arena occupies (for stats reporting).
    pub(crate) fn base(&self) -> usize {
        self.map.as_ptr() as usize
    }

    pub(crate) fn mapped_len(&self) -> usize {
        self.map.len()
    }
}

/// Standalone (oversized) allocation, not backed by any arena.
pub(crate) fn standalone_alloc(
    page_size: usize,
    align: usize,
    pool: Weak<super::pool::IobufPool>,
) -> crate::Result<Arc<IobufCell>> {
    let layout =
        std::alloc::Layout::from_size_align(page_size, align).map_err(|_| crate::Error::OutOfMemory)?;
    // SAFETY: `layout` has non-zero size (callers never request a
    // zero-sized page) and is validated by `Layout::from_size_align` above.
    let raw = unsafe { std::alloc::alloc(layout) };
    if raw.is_null() {
        return Err(crate::Error::OutOfMemory);
    }
    Ok(Arc::new(IobufCell {
        transition_lock: Mutex::new(()),
        refcount: AtomicUsize::new(1),
        ptr: raw as usize,
        page_size,
        owner: CellOwner::Standalone { layout },
        pool,
    }))
}

pub(crate) fn standalone_dealloc(ptr: usize, layout: std::alloc::Layout) {
    // SAFETY: `ptr` was returned by the matching `std::alloc::alloc(layout)`
    // call in `standalone_alloc` and is freed exactly once, from `unref`
    // when the domain refcount reaches zero.
    unsafe {
        std::alloc::dealloc(ptr as *mut u8, layout);
    }
}
