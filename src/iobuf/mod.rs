//! Process-wide pool of refcounted, page-aligned memory buffers.
//!
//! ```text
//! IobufPool -> SizeClass[0..32] -> ArenaHandle -> IobufCell (1 per page)
//!                                                      ^
//!                                                      |
//!                                                   Iobuf (handle, may alias)
//! ```
//!
//! Sub-modules split allocator mechanism from policy, mirroring
//! `arena2/alloc.rs` vs. `arena2/mod.rs`: [`arena`] and [`mmap`] are the
//! mechanism, [`pool`] is the policy, [`handle`] and [`iobref`] are the
//! public surface.

mod arena;
mod handle;
mod iobref;
mod mmap;
mod pool;

pub use handle::{IoVec, Iobuf};
pub use iobref::Iobref;
pub use pool::{IobufPool, PoolConfig, ALIGN_GRANULE, LARGE_THRESHOLD, SIZE_CLASS_COUNT};
