//! On-disk layout extent encoding: 16 bytes, four big-endian `u32`s, in the
//! order `[commit_hash, type, start, stop]`.

use crate::error::{Error, Result};

use super::hash::HashType;

pub const BLOB_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskExtent {
    pub commit_hash: u32,
    pub hash_type: HashType,
    pub start: u32,
    pub stop: u32,
}

impl DiskExtent {
    pub fn encode(&self) -> [u8; BLOB_LEN] {
        let mut out = [0u8; BLOB_LEN];
        out[0..4].copy_from_slice(&self.commit_hash.to_be_bytes());
        out[4..8].copy_from_slice(&(self.hash_type as u32).to_be_bytes());
        out[8..12].copy_from_slice(&self.start.to_be_bytes());
        out[12..16].copy_from_slice(&self.stop.to_be_bytes());
        out
    }

    /// Decodes a blob of exactly [`BLOB_LEN`] bytes.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != BLOB_LEN {
            return Err(Error::InvalidDiskLayout("disk layout blob must be 16 bytes"));
        }
        let commit_hash = u32::from_be_bytes(raw[0..4].try_into().unwrap());
        let type_word = u32::from_be_bytes(raw[4..8].try_into().unwrap());
        let start = u32::from_be_bytes(raw[8..12].try_into().unwrap());
        let stop = u32::from_be_bytes(raw[12..16].try_into().unwrap());
        let hash_type = HashType::try_from(type_word)?;
        Ok(Self {
            commit_hash,
            hash_type,
            start,
            stop,
        })
    }
}
