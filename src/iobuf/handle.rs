//! [`Iobuf`]: the public handle returned by [`super::IobufPool::get`] and
//! friends, and [`IoVec`], the scatter/gather descriptor handed to I/O paths.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::arena::IobufCell;

/// A checked-out, refcounted page from the pool.
///
/// Mirrors `iobuf_t` with the C manual-refcounting contract kept
/// intentionally explicit rather than hidden behind `Drop`: [`Iobuf::acquire`]
/// is the Rust spelling of `iobuf_ref`, and [`Iobuf::release`] of
/// `iobuf_unref`. There is no automatic release on scope exit — a caller that
/// neither stores nor releases a handle leaks the checked-out page, exactly
/// as the original does when a caller forgets to unref.
pub struct Iobuf {
    pub(crate) cell: Arc<IobufCell>,
    ptr: usize,
    len: usize,
}

impl Iobuf {
    /// Wraps `cell`, exposing its full bucket capacity as the usable length.
    pub(crate) fn from_cell(cell: Arc<IobufCell>) -> Self {
        let ptr = cell.ptr;
        let len = cell.page_size;
        Self { cell, ptr, len }
    }

    /// Wraps `cell`, exposing only `requested_len` bytes — used when a page
    /// is checked out of a size-class bucket larger than what the caller
    /// asked for: a request is satisfied by the smallest class at least as
    /// large as the request.
    pub(crate) fn from_cell_sized(cell: Arc<IobufCell>, requested_len: usize) -> Self {
        debug_assert!(requested_len <= cell.page_size);
        let ptr = cell.ptr;
        Self { cell, ptr, len: requested_len }
    }

    /// Narrows this handle to an aligned sub-window of its backing page,
    /// used by [`super::IobufPool::get_page_aligned`]. The refcount and
    /// underlying allocation are unaffected; only the exposed pointer/length
    /// change.
    pub(crate) fn aligned_to(mut self, align: usize, usable_len: usize) -> Self {
        let aligned = (self.cell.ptr + align - 1) & !(align - 1);
        debug_assert!(aligned + usable_len <= self.cell.ptr + self.cell.page_size);
        self.ptr = aligned;
        self.len = usable_len;
        self
    }

    /// Usable base pointer. Valid for `page_size()` bytes for as
    /// long as this handle (or a clone obtained via `acquire`) is live.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    pub fn page_size(&self) -> usize {
        self.len
    }

    /// Current domain refcount, for diagnostics/tests. Distinct from the
    /// `Arc<IobufCell>`'s own strong count, which merely keeps the
    /// bookkeeping cell alive after the page itself returns to the pool.
    pub fn ref_count(&self) -> usize {
        self.cell.refcount.load(Ordering::Acquire)
    }

    pub fn is_standalone(&self) -> bool {
        self.cell.is_standalone()
    }

    /// Read-only view of the checked-out bytes.
    ///
    /// # Safety
    /// The caller must ensure no other handle to the same page is being
    /// written through concurrently; the pool does not itself serialize
    /// access to page contents, only to pool/arena bookkeeping.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr(), self.len)
    }

    /// Mutable view of the checked-out bytes. See [`Iobuf::as_slice`]'s
    /// safety note.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr(), self.len)
    }

    /// Bumps the domain refcount and returns a second handle to the same
    /// page (`iobuf_ref`).
    pub fn acquire(&self) -> Iobuf {
        self.cell.refcount.fetch_add(1, Ordering::AcqRel);
        Iobuf {
            cell: self.cell.clone(),
            ptr: self.ptr,
            len: self.len,
        }
    }

    /// Drops the domain refcount by one; at zero, returns the page to its
    /// arena (or frees a standalone allocation) (`iobuf_unref`).
    ///
    /// Consumes `self` so the handle cannot be used again after release,
    /// but deliberately implements no `Drop` glue — see the type docs.
    pub fn release(self) {
        if let Some(pool) = self.cell.pool.upgrade() {
            pool.unref_cell(&self.cell);
        }
        // If the pool is already gone, the arena/allocation behind this
        // cell was torn down with it; nothing to do.
    }
}

/// Scatter/gather descriptor: a raw pointer and length pair handed to I/O
/// paths that write the network or disk directly into pool memory
/// (`struct iovec` equivalent).
#[derive(Debug, Clone, Copy, Default)]
pub struct IoVec {
    pub ptr: *mut u8,
    pub len: usize,
}

// SAFETY: `IoVec` is a plain (pointer, length) descriptor; it confers no
// access by itself; the `unsafe` barrier is on the read/write calls that
// dereference `ptr`, not on passing the descriptor between threads.
unsafe impl Send for IoVec {}
unsafe impl Sync for IoVec {}
