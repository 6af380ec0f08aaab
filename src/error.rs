//! Crate-wide error taxonomy.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the IOBUF pool and the layout engine.
///
/// The merge path (`Layout::merge`) is tolerant of per-brick failures: a
/// bad brick is recorded on the offending [`crate::layout::LayoutEntry`]
/// and does not turn into one of these. The pool path is strict:
/// allocation failures always propagate as [`Error::OutOfMemory`].
#[derive(Debug, Error)]
pub enum Error {
    /// Arena or entry allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// An on-disk layout blob named an unknown hash type or had the wrong
    /// length. The affected entry is left unmodified.
    #[error("invalid disk layout: {0}")]
    InvalidDiskLayout(&'static str),

    /// The injected name hasher returned a non-zero status.
    #[error("hash computation failed for type {0:?}")]
    HashFailed(crate::layout::HashType),

    /// A subvolume has no corresponding entry in a layout.
    #[error("subvolume not present in layout")]
    SubvolNotInLayout,

    /// An iobref's backing array has hit its configured cap.
    #[error("no space left in iobref")]
    NoSpace,
}
