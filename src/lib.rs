//! Buffer pool and DHT layout engine for a distributed filesystem.
//!
//! Two independent cores live here: [`iobuf`], a process-wide pool of
//! refcounted, page-aligned memory regions; and [`layout`], a per-directory
//! structure that partitions a 32-bit hash space across subvolumes and
//! detects spatial anomalies (holes/overlaps) for self-heal.

pub mod error;
pub mod external;
pub mod iobuf;
pub mod layout;

pub use error::{Error, Result};
