//! Thin wrapper around anonymous memory mapping.
//!
//! Arenas are backed by `mmap(MAP_ANONYMOUS | MAP_PRIVATE)` rather than the
//! global allocator, matching the original's arena design (each arena is a
//! single region mapped straight from the operating system). Oversized,
//! non-arena-backed iobufs still go through the ordinary global allocator
//! (see [`super::arena::standalone_alloc`]), since they are one-shot and
//! gain nothing from a raw mapping.

use std::io;
use std::ptr::NonNull;

/// An anonymous mapping of `len` bytes, unmapped on drop.
pub(crate) struct AnonMap {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by the `AnonMap` and all access
// to it is synchronized by the arena/pool locks built on top of it.
unsafe impl Send for AnonMap {}
unsafe impl Sync for AnonMap {}

impl AnonMap {
    /// Maps `len` bytes of anonymous, zero-initialized memory.
    pub(crate) fn new(len: usize) -> io::Result<Self> {
        debug_assert!(len > 0);
        // SAFETY: a null `addr` hint, anonymous+private mapping, and a
        // read/write protection are all valid arguments to `mmap`. The
        // return value is checked for `MAP_FAILED` before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `mmap` succeeded, so `ptr` is a valid, non-null base for
        // `len` bytes.
        let base = unsafe { NonNull::new_unchecked(ptr.cast::<u8>()) };
        Ok(Self { base, len })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for AnonMap {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` are exactly the values returned by the
        // matching `mmap` call, and no other code retains the pointer past
        // this point (the arena that owns this mapping is itself being
        // dropped).
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}
