//! Groups records by line and orders each line by timestamp.
//!
//! A single file is sequenced in memory with [`sequence_by_line`]. Across a
//! corpus each file contributes one sorted run per line, and
//! [`merge_sorted_runs`] interleaves the runs of a line lazily, so only one
//! record per run is held at a time.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use tracing::debug;

use crate::ping::{Ping, RawPing};

/// Partitions records by line and stable-sorts each line by timestamp.
///
/// Records without a line or timestamp are left out. Records with equal
/// timestamps keep their input order; duplicates are kept.
pub fn sequence_by_line<I>(records: I) -> BTreeMap<String, Vec<Ping>>
where
    I: IntoIterator<Item = RawPing>,
{
    let mut by_line: BTreeMap<String, Vec<Ping>> = BTreeMap::new();
    let mut excluded = 0usize;

    for raw in records {
        match Ping::try_from(raw) {
            Ok(ping) => by_line.entry(ping.line_id.clone()).or_default().push(ping),
            Err(e) => {
                excluded += 1;
                debug!(error = %e, "Record excluded from sequencing");
            }
        }
    }

    for pings in by_line.values_mut() {
        sort_sequence(pings);
    }

    if excluded > 0 {
        debug!(excluded, lines = by_line.len(), "Sequenced with exclusions");
    }

    by_line
}

/// Stable sort by timestamp.
pub fn sort_sequence(pings: &mut [Ping]) {
    pings.sort_by_key(|p| p.timestamp_ms);
}

struct Head {
    timestamp_ms: i64,
    run: usize,
    ping: Ping,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // BinaryHeap is a max-heap: reverse so the earliest timestamp, then the
    // earliest run, pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.timestamp_ms, other.run).cmp(&(self.timestamp_ms, self.run))
    }
}

/// Lazy k-way merge of runs that are each sorted by timestamp.
pub struct MergedRuns<I: Iterator<Item = Ping>> {
    runs: Vec<I>,
    heap: BinaryHeap<Head>,
}

impl<I: Iterator<Item = Ping>> Iterator for MergedRuns<I> {
    type Item = Ping;

    fn next(&mut self) -> Option<Ping> {
        let Head { run, ping, .. } = self.heap.pop()?;
        if let Some(next) = self.runs[run].next() {
            self.heap.push(Head {
                timestamp_ms: next.timestamp_ms,
                run,
                ping: next,
            });
        }
        Some(ping)
    }
}

/// Merges sorted runs into one sorted sequence.
///
/// Ties are broken by run order, then by position within the run, so
/// passing runs in arrival order keeps the merge stable.
pub fn merge_sorted_runs<I>(mut runs: Vec<I>) -> MergedRuns<I>
where
    I: Iterator<Item = Ping>,
{
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (run, iter) in runs.iter_mut().enumerate() {
        if let Some(ping) = iter.next() {
            heap.push(Head {
                timestamp_ms: ping.timestamp_ms,
                run,
                ping,
            });
        }
    }
    MergedRuns { runs, heap }
}
