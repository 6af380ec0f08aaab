//! Interfaces the core consumes rather than owns: translator plumbing,
//! the attribute dictionary, inode context storage, and subvolume
//! identity all live on the host side of these traits.

use std::sync::Arc;

use crate::layout::Layout;

/// Opaque back-end identity. The core only ever compares and names
/// subvolumes; it never constructs or interprets them.
pub trait Subvolume: Clone + PartialEq {
    fn name(&self) -> &str;
}

/// Read-only view onto a per-inode xattr dictionary.
pub trait AttributeStore {
    /// Combined pointer+length accessor; `None` if `key` is absent.
    fn get_ptr_and_len(&self, key: &str) -> Option<&[u8]>;

    /// Raw-pointer-only accessor, for callers that only need an existence
    /// check or already know the expected length.
    fn get_ptr(&self, key: &str) -> Option<*const u8> {
        self.get_ptr_and_len(key).map(<[u8]>::as_ptr)
    }
}

/// Per-inode layout slot; the core does not store per-inode state itself.
pub trait InodeContext<S: Subvolume> {
    fn set_layout(&self, layout: Arc<Layout<S>>);
    fn get_layout(&self) -> Option<Arc<Layout<S>>>;
}
