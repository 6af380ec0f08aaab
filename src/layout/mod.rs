//! DHT-style layout engine: partitions a 32-bit hash space across
//! subvolumes for one directory at a time.

mod anomalies;
mod disk;
mod entry;
mod hash;
mod layout;
mod preset;

pub use anomalies::AnomalyCounters;
pub use disk::{DiskExtent, BLOB_LEN};
pub use entry::{LayoutEntry, HASH_INVALID};
pub use hash::{DaviesMeyerHasher, HashType, NameHasher};
pub use layout::Layout;
pub use preset::PresetLayouts;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{AttributeStore, Subvolume};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Brick(&'static str);

    impl Subvolume for Brick {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct NoAttrs;
    impl AttributeStore for NoAttrs {
        fn get_ptr_and_len(&self, _key: &str) -> Option<&[u8]> {
            None
        }
    }

    /// An `AttributeStore` that always hands back the same encoded blob,
    /// for tests that need `Layout::merge` to take its real xattr-decode
    /// branch instead of the missing-attribute fast path `NoAttrs` forces.
    struct FixedAttrs(Vec<u8>);
    impl AttributeStore for FixedAttrs {
        fn get_ptr_and_len(&self, _key: &str) -> Option<&[u8]> {
            Some(self.0.as_slice())
        }
    }

    /// Fixed pool of brick names for property tests that need more than a
    /// handful of distinct subvolumes without leaking a `String` per case.
    const BRICK_NAMES: [&str; 16] = [
        "b0", "b1", "b2", "b3", "b4", "b5", "b6", "b7", "b8", "b9", "b10", "b11", "b12", "b13",
        "b14", "b15",
    ];

    fn merged_layout(ranges: &[(&'static str, u32, u32)]) -> std::sync::Arc<Layout<Brick>> {
        let layout = Layout::new(ranges.len(), HashType::Dm, ranges.len() as u32);
        for (name, start, stop) in ranges {
            layout.merge(Brick(name), 0, 0, &NoAttrs).unwrap();
            let pos = layout.index_for_subvol(&Brick(name)).unwrap();
            let blob = DiskExtent {
                commit_hash: 0xCAFE,
                hash_type: HashType::Dm,
                start: *start,
                stop: *stop,
            }
            .encode();
            layout.merge_from_disk(pos, &blob).unwrap();
        }
        layout
    }

    #[test]
    fn merge_decodes_a_real_xattr_and_sets_the_entry_commit_hash() {
        let layout = Layout::new(1, HashType::Dm, 1);
        let blob = DiskExtent {
            commit_hash: 0xABCD_EF01,
            hash_type: HashType::Dm,
            start: 10,
            stop: 20,
        }
        .encode();

        layout
            .merge(Brick("a"), 0, 0, &FixedAttrs(blob.to_vec()))
            .unwrap();

        let decoded = DiskExtent::decode(&layout.extract(0).unwrap()).unwrap();
        assert_eq!(decoded.commit_hash, 0xABCD_EF01);
        assert_eq!(decoded.start, 10);
        assert_eq!(decoded.stop, 20);
    }

    #[test]
    fn merge_with_a_dm_user_xattr_promotes_hash_type() {
        let layout = Layout::new(1, HashType::Dm, 1);
        let blob = DiskExtent {
            commit_hash: 1,
            hash_type: HashType::DmUser,
            start: 0,
            stop: u32::MAX,
        }
        .encode();

        layout
            .merge(Brick("a"), 0, 0, &FixedAttrs(blob.to_vec()))
            .unwrap();

        assert_eq!(layout.hash_type(), HashType::DmUser);
    }

    #[test]
    fn search_finds_the_subvol_whose_range_contains_the_hash() {
        let layout = merged_layout(&[
            ("a", 0, 0x3FFF_FFFF),
            ("b", 0x4000_0000, 0x7FFF_FFFF),
            ("c", 0x8000_0000, 0xBFFF_FFFF),
            ("d", 0xC000_0000, 0xFFFF_FFFF),
        ]);

        struct FixedHash(u32);
        impl NameHasher for FixedHash {
            fn hash(&self, _t: HashType, _name: &str) -> crate::Result<u32> {
                Ok(self.0)
            }
        }

        let found = layout.search(&FixedHash(0x9000_0000), "whatever");
        assert_eq!(found, Some(Brick("c")));
    }

    #[test]
    fn search_returns_none_when_no_entry_covers_the_hash() {
        let layout = merged_layout(&[("a", 0, 0x3FFF_FFFF)]);
        struct FixedHash(u32);
        impl NameHasher for FixedHash {
            fn hash(&self, _t: HashType, _name: &str) -> crate::Result<u32> {
                Ok(self.0)
            }
        }
        assert_eq!(layout.search(&FixedHash(0xF000_0000), "x"), None);
    }

    #[test]
    fn commit_hash_agreement_across_bricks() {
        let layout = Layout::new(2, HashType::Dm, 2);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        let pos_a = layout.index_for_subvol(&Brick("a")).unwrap();
        layout
            .merge_from_disk(
                pos_a,
                &DiskExtent {
                    commit_hash: 0xCAFE,
                    hash_type: HashType::Dm,
                    start: 0,
                    stop: 0x7FFF_FFFF,
                }
                .encode(),
            )
            .unwrap();

        layout.merge(Brick("b"), 0, 0, &NoAttrs).unwrap();
        let pos_b = layout.index_for_subvol(&Brick("b")).unwrap();
        layout
            .merge_from_disk(
                pos_b,
                &DiskExtent {
                    commit_hash: 0xCAFE,
                    hash_type: HashType::Dm,
                    start: 0x8000_0000,
                    stop: 0xFFFF_FFFF,
                }
                .encode(),
            )
            .unwrap();

        assert_eq!(layout.commit_hash(), 0xCAFE);
    }

    #[test]
    fn disagreeing_commit_hash_becomes_invalid_sentinel() {
        let layout = Layout::new(2, HashType::Dm, 2);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        let pos_a = layout.index_for_subvol(&Brick("a")).unwrap();
        layout
            .merge_from_disk(
                pos_a,
                &DiskExtent {
                    commit_hash: 0xCAFE,
                    hash_type: HashType::Dm,
                    start: 0,
                    stop: 0x7FFF_FFFF,
                }
                .encode(),
            )
            .unwrap();

        layout.merge(Brick("b"), 0, 0, &NoAttrs).unwrap();
        let pos_b = layout.index_for_subvol(&Brick("b")).unwrap();
        layout
            .merge_from_disk(
                pos_b,
                &DiskExtent {
                    commit_hash: 0xBABE,
                    hash_type: HashType::Dm,
                    start: 0x8000_0000,
                    stop: 0xFFFF_FFFF,
                }
                .encode(),
            )
            .unwrap();

        assert_eq!(layout.commit_hash(), HASH_INVALID);
    }

    #[test]
    fn dm_user_disk_extent_promotes_layout_hash_type() {
        let layout = Layout::new(1, HashType::Dm, 1);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        let blob = DiskExtent {
            commit_hash: 1,
            hash_type: HashType::DmUser,
            start: 0,
            stop: u32::MAX,
        }
        .encode();
        layout.merge_from_disk(0, &blob).unwrap();
        assert_eq!(layout.hash_type(), HashType::DmUser);
    }

    #[test]
    fn extract_then_merge_from_disk_is_the_identity() {
        let layout = Layout::new(1, HashType::Dm, 1);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        layout
            .merge_from_disk(
                0,
                &DiskExtent {
                    commit_hash: 0x1234,
                    hash_type: HashType::Dm,
                    start: 10,
                    stop: 20,
                }
                .encode(),
            )
            .unwrap();

        let blob = layout.extract(0).unwrap();
        layout.merge_from_disk(0, &blob).unwrap();

        let blob2 = layout.extract(0).unwrap();
        assert_eq!(blob, blob2);
    }

    #[test]
    fn normalize_reports_minus_one_on_overlap() {
        let layout = merged_layout(&[("a", 0, 0x7FFF_FFFF), ("b", 0x7000_0000, 0xFFFF_FFFF)]);
        assert_eq!(layout.normalize(), -1);
    }

    #[test]
    fn normalize_reports_missing_count_with_no_holes() {
        let layout = Layout::new(2, HashType::Dm, 2);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        let pos_a = layout.index_for_subvol(&Brick("a")).unwrap();
        layout
            .merge_from_disk(
                pos_a,
                &DiskExtent {
                    commit_hash: 1,
                    hash_type: HashType::Dm,
                    start: 0,
                    stop: u32::MAX,
                }
                .encode(),
            )
            .unwrap();
        layout.merge(Brick("b"), -1, libc::ENOENT, &NoAttrs).unwrap();

        assert_eq!(layout.normalize(), 1);
    }

    #[test]
    fn sort_is_idempotent() {
        let layout = merged_layout(&[("b", 0x4000_0000, 0x7FFF_FFFF), ("a", 0, 0x3FFF_FFFF)]);
        layout.sort();
        let first = layout.extract(0).unwrap();
        layout.sort();
        let first_again = layout.extract(0).unwrap();
        assert_eq!(first, first_again);
    }

    #[test]
    fn sort_round_trips_through_volname_sort() {
        let layout = merged_layout(&[("b", 0x4000_0000, 0x7FFF_FFFF), ("a", 0, 0x3FFF_FFFF)]);
        layout.sort();
        let before = (0..2).map(|i| layout.extract(i).unwrap()).collect::<Vec<_>>();
        layout.sort_volname();
        layout.sort();
        let after = (0..2).map(|i| layout.extract(i).unwrap()).collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn dir_mismatch_flags_absent_subvol() {
        let layout = merged_layout(&[("a", 0, 0x3FFF_FFFF)]);
        assert_eq!(layout.dir_mismatch(&Brick("missing"), &NoAttrs), 1);
    }

    #[test]
    fn preset_layout_release_does_not_panic() {
        let layout = Layout::preset(Brick("only"), HashType::Dm);
        assert!(layout.is_preset());
        let handle = layout.acquire();
        handle.release();
        layout.release();
    }

    #[quickcheck_macros::quickcheck]
    fn extract_then_merge_from_disk_preserves_range_and_commit_hash(
        commit_hash: u32,
        start: u32,
        stop: u32,
        dm_user: bool,
    ) -> bool {
        let hash_type = if dm_user { HashType::DmUser } else { HashType::Dm };
        let layout = Layout::new(1, HashType::Dm, 1);
        layout.merge(Brick("a"), 0, 0, &NoAttrs).unwrap();
        let blob = DiskExtent {
            commit_hash,
            hash_type,
            start,
            stop,
        }
        .encode();
        layout.merge_from_disk(0, &blob).unwrap();

        let extracted = layout.extract(0).unwrap();
        let decoded = DiskExtent::decode(&extracted).unwrap();
        decoded.commit_hash == commit_hash && decoded.start == start && decoded.stop == stop
    }

    #[quickcheck_macros::quickcheck]
    fn sort_is_idempotent_for_arbitrary_ranges(mut ranges: Vec<(u32, u32)>) -> bool {
        ranges.truncate(12);
        if ranges.is_empty() {
            return true;
        }
        let layout = Layout::new(ranges.len(), HashType::Dm, ranges.len() as u32);
        for (i, (start, stop)) in ranges.iter().enumerate() {
            let name = BRICK_NAMES[i];
            layout.merge(Brick(name), 0, 0, &NoAttrs).unwrap();
            let pos = layout.index_for_subvol(&Brick(name)).unwrap();
            let blob = DiskExtent {
                commit_hash: 0,
                hash_type: HashType::Dm,
                start: *start,
                stop: *stop,
            }
            .encode();
            layout.merge_from_disk(pos, &blob).unwrap();
        }

        layout.sort();
        let once: Vec<_> = (0..ranges.len()).map(|i| layout.extract(i).unwrap()).collect();
        layout.sort();
        let twice: Vec<_> = (0..ranges.len()).map(|i| layout.extract(i).unwrap()).collect();
        once == twice
    }

    #[quickcheck_macros::quickcheck]
    fn even_split_of_the_hash_space_has_no_anomalies(slices: u8) -> bool {
        let k = (slices % 6) as u64 + 1;
        let layout = Layout::new(k as usize, HashType::Dm, k as u32);
        let chunk = (u32::MAX as u64 + 1) / k;
        for i in 0..k {
            let name = BRICK_NAMES[i as usize];
            layout.merge(Brick(name), 0, 0, &NoAttrs).unwrap();
            let pos = layout.index_for_subvol(&Brick(name)).unwrap();
            let start = (i * chunk) as u32;
            let stop = if i == k - 1 { u32::MAX } else { ((i + 1) * chunk - 1) as u32 };
            let blob = DiskExtent {
                commit_hash: 1,
                hash_type: HashType::Dm,
                start,
                stop,
            }
            .encode();
            layout.merge_from_disk(pos, &blob).unwrap();
        }
        layout.sort();
        let counters = layout.anomalies();
        counters.holes == 0 && counters.overlaps == 0
    }
}
