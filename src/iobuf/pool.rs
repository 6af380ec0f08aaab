//! The process-wide [`IobufPool`]: size-class selection, arena lifecycle,
//! and the `get`/`unref` operations.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::arena::{standalone_alloc, standalone_dealloc, ArenaHandle, CellOwner};
use super::handle::{IoVec, Iobuf};
use crate::error::{Error, Result};

/// Alignment granule used when rounding requested sizes.
pub const ALIGN_GRANULE: usize = 512;
/// Requests larger than this bypass arenas entirely and are allocated
/// standalone.
pub const LARGE_THRESHOLD: usize = 131_072;
/// Number of size-class slots the pool partitions arenas into.
pub const SIZE_CLASS_COUNT: usize = 32;

/// Tunable pool parameters (ambient-stack addition, see SPEC_FULL.md).
///
/// Mirrors the builder pattern used by `ArenaAllocator::with_arena_size`
/// in `arena2/mod.rs` rather than free constants, so embedders can size the
/// pool for their workload.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    default_arena_size: usize,
    default_page_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_arena_size: 1024 * 1024,
            default_page_size: 4096,
        }
    }
}

impl PoolConfig {
    pub fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.default_arena_size = arena_size;
        self
    }

    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    fn pages_per_arena(&self, page_size: usize) -> usize {
        (self.default_arena_size / page_size).max(1)
    }
}

/// One size class's arena bins: `arenas` (has free pages), `filled` (fully
/// active), `purge` (candidates for OS return).
struct SizeClass {
    page_size: usize,
    arenas: Vec<Arc<ArenaHandle>>,
    filled: Vec<Arc<ArenaHandle>>,
    purge: Vec<Arc<ArenaHandle>>,
}

impl SizeClass {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            arenas: Vec::new(),
            filled: Vec::new(),
            purge: Vec::new(),
        }
    }
}

struct PoolInner {
    classes: Vec<SizeClass>,
    request_misses: u64,
    arena_cnt: usize,
}

/// Process-wide pool of refcounted, page-aligned memory regions. Guarded
/// by a single mutex: classes are not independently lockable, by design.
pub struct IobufPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

/// Maps a requested page size to its size-class slot, or `None` when the
/// request should bypass arenas and go standalone.
fn class_for_size(page_size: usize) -> Option<usize> {
    if page_size == 0 || page_size > LARGE_THRESHOLD {
        return None;
    }
    let class_size = page_size.next_power_of_two();
    let index = class_size.trailing_zeros() as usize;
    if index >= SIZE_CLASS_COUNT {
        None
    } else {
        Some(index)
    }
}

impl IobufPool {
    /// Initializes a pool with [`SIZE_CLASS_COUNT`] empty class slots.
    /// Arenas are not pre-created; the first `get` for a class creates one
    /// lazily.
    pub fn new() -> Arc<Self> {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Arc<Self> {
        let classes = (0..SIZE_CLASS_COUNT)
            .map(|i| SizeClass::new(1usize << i))
            .collect();
        Arc::new(Self {
            config,
            inner: Mutex::new(PoolInner {
                classes,
                request_misses: 0,
                arena_cnt: 0,
            }),
        })
    }

    /// Returns an iobuf sized to the pool's configured default page size.
    pub fn get(self: &Arc<Self>) -> Result<Iobuf> {
        self.get2(self.config.default_page_size)
    }

    /// Returns an iobuf with refcount 1, usable pointer pinned to
    /// `page_size` bytes.
    pub fn get2(self: &Arc<Self>, page_size: usize) -> Result<Iobuf> {
        match class_for_size(page_size) {
            Some(class_index) => self.get_from_class(class_index, page_size),
            None => self.get_standalone(page_size, ALIGN_GRANULE),
        }
    }

    /// As [`IobufPool::get2`], but the returned pointer is aligned to
    /// `align` inside an allocation of `page_size + align` bytes.
    pub fn get_page_aligned(self: &Arc<Self>, page_size: usize, align: usize) -> Result<Iobuf> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let padded = page_size
            .checked_add(align)
            .ok_or(Error::OutOfMemory)?;
        let iobuf = self.get2(padded)?;
        Ok(iobuf.aligned_to(align, page_size))
    }

    fn get_from_class(self: &Arc<Self>, class_index: usize, page_size: usize) -> Result<Iobuf> {
        let class_size = 1usize << class_index;
        let mut inner = self.inner.lock();

        loop {
            let class = &mut inner.classes[class_index];
            if let Some(arena) = class.arenas.last().cloned() {
                let mut state = arena.state.lock();
                let Some(index) = state.free.pop() else {
                    // Another thread raced us and drained this arena; move
                    // it to `filled` and retry from the top of the loop.
                    drop(state);
                    let arena = class.arenas.pop().expect("just observed non-empty");
                    class.filled.push(arena);
                    continue;
                };
                state.active_cnt += 1;
                state.alloc_cnt += 1;
                state.max_active = state.max_active.max(state.active_cnt);
                if state.free.is_empty() {
                    drop(state);
                    let arena = class.arenas.pop().expect("just observed non-empty");
                    class.filled.push(arena);
                }
                let cell = arena.cells[index].clone();
                cell.refcount.store(1, Ordering::Release);
                return Ok(Iobuf::from_cell_sized(cell, page_size));
            }

            // No arena with free pages: allocate one lazily, sized to the
            // class bucket so every page in it can serve any request that
            // rounds up to this class.
            let pages = self.config.pages_per_arena(class_size);
            let new_arena = ArenaHandle::new(class_size, pages, Arc::downgrade(self))
                .map_err(|_| Error::OutOfMemory)?;
            inner.arena_cnt += 1;
            inner.classes[class_index].arenas.push(new_arena);
        }
    }

    fn get_standalone(self: &Arc<Self>, page_size: usize, align: usize) -> Result<Iobuf> {
        let cell = standalone_alloc(page_size, align, Arc::downgrade(self))?;
        self.inner.lock().request_misses += 1;
        Ok(Iobuf::from_cell(cell))
    }

    /// Decrements `iobuf`'s refcount; on reaching zero, returns the page to
    /// its arena's passive list (or frees standalone memory directly).
    ///
    /// Called by [`super::handle::Iobuf::release`]; not public API on its
    /// own since the caller must hold the only remaining reference.
    pub(crate) fn unref_cell(&self, cell: &Arc<super::arena::IobufCell>) {
        let _transition = cell.transition_lock.lock();
        let prev = cell.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "refcount underflow");
        if prev != 1 {
            return;
        }

        match &cell.owner {
            CellOwner::Standalone { layout } => {
                standalone_dealloc(cell.ptr, *layout);
            }
            CellOwner::Arena { arena, index } => {
                let Some(arena) = arena.upgrade() else {
                    // Arena already torn down; only reachable if a caller
                    // held a reference past `destroy`, which requires every
                    // checked-out iobuf to have already been released.
                    return;
                };
                let mut inner = self.inner.lock();
                let class_index = class_for_size(arena.page_size).expect("arena page size is always class-backed");
                let class = &mut inner.classes[class_index];

                let mut state = arena.state.lock();
                state.free.push(*index);
                state.active_cnt -= 1;
                let now_fully_passive = state.free.len() == arena.page_count;
                drop(state);

                if let Some(pos) = class.filled.iter().position(|a| Arc::ptr_eq(a, &arena)) {
                    let arena = class.filled.remove(pos);
                    class.arenas.push(arena);
                }

                if now_fully_passive {
                    let already_free_arenas = class
                        .arenas
                        .iter()
                        .filter(|a| {
                            let s = a.state.lock();
                            s.free.len() == a.page_count
                        })
                        .count();
                    if already_free_arenas > 1 {
                        if let Some(pos) = class.arenas.iter().position(|a| Arc::ptr_eq(a, &arena)) {
                            let arena = class.arenas.remove(pos);
                            class.purge.push(arena);
                        }
                    }
                }
            }
        }
    }

    /// Drops every arena currently parked in a `purge` bin, allowing the OS
    /// to reclaim their backing mappings. Safe to call at any time; a
    /// purged arena is, by construction, fully passive.
    pub fn trim(&self) {
        let mut inner = self.inner.lock();
        for class in &mut inner.classes {
            class.purge.clear();
        }
    }

    /// Unmaps every arena and drops all standalone bookkeeping
    /// (`pool_destroy`). Only valid once every iobuf handed out by this pool
    /// has been released; a `filled` bin still holding arenas means some
    /// refcount has not reached zero, which is a caller contract violation,
    /// not something this crate can detect at runtime without scanning
    /// every live `Arc<IobufCell>` — so it is asserted in debug builds only,
    /// matching the refcount-underflow assertion in `unref_cell`.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        for class in &mut inner.classes {
            debug_assert!(
                class.filled.is_empty(),
                "pool_destroy called with iobufs still checked out"
            );
            class.arenas.clear();
            class.filled.clear();
            class.purge.clear();
        }
    }

    /// Fills a scatter/gather descriptor for `iobuf`.
    pub fn to_iovec(iob: &Iobuf, out: &mut IoVec) {
        out.ptr = iob.ptr();
        out.len = iob.page_size();
    }

    /// Copies `src` into a freshly obtained iobuf, pinning it into a fresh
    /// iobref (`iobuf_copy`).
    pub fn copy(self: &Arc<Self>, src: &[u8]) -> Result<(Iobuf, Arc<super::iobref::Iobref>)> {
        let iobuf = self.get2(src.len().max(1))?;
        // SAFETY: `iobuf` was just obtained with refcount 1 and is not
        // shared with any other handle yet.
        unsafe {
            let dst = std::slice::from_raw_parts_mut(iobuf.ptr(), src.len());
            dst.copy_from_slice(src);
        }
        let iobref = super::iobref::Iobref::new();
        iobref.add(iobuf.acquire())?;
        Ok((iobuf, iobref))
    }

    /// Logs a one-line summary of pool occupancy per size class, in the
    /// teacher's `log::debug!`-for-diagnostics style.
    pub fn stats_dump(&self) {
        let inner = self.inner.lock();
        log::debug!("iobuf pool: {} arenas, {} request misses", inner.arena_cnt, inner.request_misses);
        for class in &inner.classes {
            if class.arenas.is_empty() && class.filled.is_empty() && class.purge.is_empty() {
                continue;
            }
            log::debug!(
                "  class {}B: {} partial, {} filled, {} purge",
                class.page_size,
                class.arenas.len(),
                class.filled.len(),
                class.purge.len()
            );
        }
    }

    pub fn request_misses(&self) -> u64 {
        self.inner.lock().request_misses
    }

    pub fn arena_count(&self) -> usize {
        self.inner.lock().arena_cnt
    }

    /// Returns `true` if every page of every arena in `page_size`'s class is
    /// currently active (used by tests/stats, not part of the on-disk or
    /// wire contract).
    #[cfg(test)]
    pub(crate) fn class_all_active(&self, page_size: usize) -> bool {
        let Some(class_index) = class_for_size(page_size) else {
            return false;
        };
        let inner = self.inner.lock();
        let class = &inner.classes[class_index];
        class.arenas.is_empty()
            && class
                .filled
                .iter()
                .all(|a| a.state.lock().free.is_empty())
    }

    /// Sums `active_cnt + free.len()` and `page_count` across every arena in
    /// `page_size`'s class, for the property test asserting the
    /// `active_cnt + passive_cnt == page_count` invariant.
    #[cfg(test)]
    pub(crate) fn class_page_accounting(&self, page_size: usize) -> (usize, usize) {
        let Some(class_index) = class_for_size(page_size) else {
            return (0, 0);
        };
        let inner = self.inner.lock();
        let class = &inner.classes[class_index];
        let mut occupied = 0;
        let mut total = 0;
        for arena in class.arenas.iter().chain(class.filled.iter()) {
            let state = arena.state.lock();
            occupied += state.active_cnt + state.free.len();
            total += arena.page_count;
        }
        (occupied, total)
    }
}
