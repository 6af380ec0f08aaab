//! Hash-type tagging and the injected name-hasher interface.

use crate::error::{Error, Result};

/// Which hash construction a layout's entries were computed with.
///
/// Only two values are meaningful; the numeric encoding matches the
/// on-disk `type` word so [`HashType::try_from`] can decode it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HashType {
    /// Plain Davies-Meyer hash over the filename.
    Dm = 1,
    /// Davies-Meyer hash salted with a user-supplied xattr ("sticky"
    /// override; see `merge_from_disk`).
    DmUser = 2,
}

impl TryFrom<u32> for HashType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(HashType::Dm),
            2 => Ok(HashType::DmUser),
            _ => Err(Error::InvalidDiskLayout("unknown hash type")),
        }
    }
}

/// Injected name-to-hash function: `(hash_type, name) -> u32` or error.
/// The core never implements the real GlusterFS Davies-Meyer tables
/// itself; it consumes whatever the host wires in here.
pub trait NameHasher {
    fn hash(&self, hash_type: HashType, name: &str) -> Result<u32>;
}

/// A self-consistent Davies-Meyer-style hasher usable as a default when no
/// host-specific hasher is wired in.
///
/// This does not reproduce GlusterFS's exact bit pattern (that table is not
/// part of this crate's inputs); it follows the same compression-function
/// shape — repeated block mixing of the message into a running state, no
/// truncation below 32 bits — so behavior here is deterministic and stable
/// across calls, which is what `search`'s correctness actually depends on.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaviesMeyerHasher;

impl DaviesMeyerHasher {
    const ROUNDS: usize = 4;

    fn compress(mut state: u32, block: u32) -> u32 {
        // One Davies-Meyer step: E(block, state) XOR state, with E a small
        // fixed-point-free mixing permutation (not a real cipher, just
        // enough avalanche to spread names across the hash space evenly).
        for round in 0..Self::ROUNDS {
            let round_key = block.rotate_left((round as u32) * 7 + 1) ^ (0x9E37_79B9u32.wrapping_mul(round as u32 + 1));
            state ^= round_key;
            state = state.wrapping_mul(0x85EB_CA6B);
            state = state.rotate_left(13);
        }
        state ^ block
    }

    fn hash_bytes(seed: u32, data: &[u8]) -> u32 {
        let mut state = seed ^ (data.len() as u32).wrapping_mul(0x27D4_EB2F);
        for chunk in data.chunks(4) {
            let mut block = [0u8; 4];
            block[..chunk.len()].copy_from_slice(chunk);
            state = Self::compress(state, u32::from_le_bytes(block));
        }
        state
    }
}

impl NameHasher for DaviesMeyerHasher {
    fn hash(&self, hash_type: HashType, name: &str) -> Result<u32> {
        let seed = match hash_type {
            HashType::Dm => 0x4F1B_BCDC,
            HashType::DmUser => 0xA953_FD4E,
        };
        Ok(Self::hash_bytes(seed, name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let hasher = DaviesMeyerHasher;
        let a = hasher.hash(HashType::Dm, "file.txt").unwrap();
        let b = hasher.hash(HashType::Dm, "file.txt").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_type_changes_output() {
        let hasher = DaviesMeyerHasher;
        let dm = hasher.hash(HashType::Dm, "file.txt").unwrap();
        let dm_user = hasher.hash(HashType::DmUser, "file.txt").unwrap();
        assert_ne!(dm, dm_user);
    }

    #[test]
    fn hash_type_round_trips_through_disk_encoding() {
        assert_eq!(HashType::try_from(1).unwrap(), HashType::Dm);
        assert_eq!(HashType::try_from(2).unwrap(), HashType::DmUser);
        assert!(HashType::try_from(3).is_err());
    }
}
