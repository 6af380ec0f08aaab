//! [`Iobref`]: a refcounted bundle of iobufs pinned together for the
//! lifetime of a single fop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::handle::Iobuf;
use crate::error::{Error, Result};

const INITIAL_CAPACITY: usize = 16;
/// Caps how large a single iobref's backing array may grow. The original
/// reallocates without bound; we cap it so a runaway caller fails fast with
/// [`Error::NoSpace`] instead of growing an unbounded `Vec` (an ambient-stack
/// decision, recorded in DESIGN.md).
const MAX_CAPACITY: usize = 1 << 16;

struct IobrefInner {
    iobufs: Vec<Iobuf>,
    allocated: usize,
}

/// Refcounted collection of iobufs (`iobref_ref`/`iobref_unref` mirrored as
/// [`Iobref::acquire`]/[`Iobref::release`], same manual-lifetime contract as
/// [`Iobuf`]).
pub struct Iobref {
    inner: Mutex<IobrefInner>,
    refcount: AtomicUsize,
}

impl Iobref {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(IobrefInner {
                iobufs: Vec::with_capacity(INITIAL_CAPACITY),
                allocated: INITIAL_CAPACITY,
            }),
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> Arc<Self> {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    /// Releases one reference; at zero, releases every contained iobuf in
    /// turn and drops the backing array.
    pub fn release(self: Arc<Self>) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut inner = self.inner.lock();
        for iobuf in inner.iobufs.drain(..) {
            iobuf.release();
        }
    }

    /// Pins `iobuf` into this bundle (`iobref_add`). Takes ownership of the
    /// handle; callers that still need their own reference should pass
    /// `iobuf.acquire()`.
    pub fn add(&self, iobuf: Iobuf) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.iobufs.len() == inner.allocated {
            let new_cap = (inner.allocated * 2).max(INITIAL_CAPACITY);
            if new_cap > MAX_CAPACITY {
                return Err(Error::NoSpace);
            }
            inner.iobufs.reserve(new_cap - inner.allocated);
            inner.allocated = new_cap;
        }
        inner.iobufs.push(iobuf);
        Ok(())
    }

    /// Adds each iobuf held by `other` into `self`, acquiring a fresh
    /// reference to each so that `other`'s own release does not affect the
    /// pages now shared with `self` (`iobref_merge`). Deduplicated by
    /// identity: an iobuf already present in `self` (whether from an
    /// earlier `add` or an earlier iteration of this same merge) is
    /// skipped rather than stored and ref'd a second time.
    pub fn merge(&self, other: &Iobref) -> Result<()> {
        let other_inner = other.inner.lock();
        for incoming in other_inner.iobufs.iter() {
            let already_present = {
                let inner = self.inner.lock();
                inner
                    .iobufs
                    .iter()
                    .any(|existing| Arc::ptr_eq(&existing.cell, &incoming.cell))
            };
            if already_present {
                continue;
            }
            self.add(incoming.acquire())?;
        }
        Ok(())
    }

    /// Releases every contained iobuf and empties the bundle without
    /// dropping `self` (`iobref_clear`); `self` remains usable afterwards.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for iobuf in inner.iobufs.drain(..) {
            iobuf.release();
        }
    }

    /// Sum of the page sizes of every contained iobuf (`iobref_size`).
    pub fn size(&self) -> usize {
        self.inner.lock().iobufs.iter().map(Iobuf::page_size).sum()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().iobufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().iobufs.is_empty()
    }
}
