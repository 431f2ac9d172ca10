use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use log::info;

use crate::overlap::partition::{load_partition, load_partition_count, sid_group_ranges, GroupCursor};
use crate::overlap::record::OverlapRecord;
use crate::sequence::packed_store::load_db_info;
use crate::trim::clipped::{dump_clipped_ranges, ClippedRange};
use crate::trim::intervals::IntervalList;

/// Templates with more overlaps than this keep only the highest-identity
/// ones; deeper piles add nothing to the cover range.
pub const MAX_OVERLAPS_PER_TEMPLATE: usize = 300;

#[derive(Clone, Debug)]
pub struct LcrOptions {
    pub min_ovlp_size: i32,
    pub min_cov: i32,
    pub min_read_size: i32,
    pub num_threads: usize,
}

impl Default for LcrOptions {
    fn default() -> Self {
        LcrOptions { min_ovlp_size: 1, min_cov: 1, min_read_size: 500, num_threads: 1 }
    }
}

/// The largest cover range of one template: the longest merged cover
/// interval, restricted (when `min_cov > 0`) to intervals supported by at
/// least one maximal depth-`min_cov` run.
pub fn largest_cover_range(
    records: &[OverlapRecord],
    min_ovlp_size: i32,
    min_cov: i32,
) -> Option<(i32, i32)> {
    let mut cover = IntervalList::new();
    for r in records {
        cover.add(r.soff as i32, (r.send - r.soff) as i32, 0);
    }

    let mut deep_runs = IntervalList::new();
    if min_cov > 0 {
        let depth = IntervalList::depth_from(&cover);
        let (mut ib, mut ie) = (0i32, 0i32);
        for seg in depth.intervals() {
            if seg.count < min_cov {
                if ie > ib {
                    deep_runs.add(ib, ie - ib, 0);
                }
                ib = 0;
                ie = 0;
            } else if ib == 0 && ie == 0 {
                ib = seg.lo;
                ie = seg.hi;
            } else if ie == seg.lo {
                ie = seg.hi;
            } else {
                if ie > ib {
                    deep_runs.add(ib, ie - ib, 0);
                }
                ib = seg.lo;
                ie = seg.hi;
            }
        }
        if ie > ib {
            deep_runs.add(ib, ie - ib, 0);
        }
    }

    cover.merge(min_ovlp_size);

    let mut best = (0i32, 0i32);
    for iv in cover.intervals() {
        if min_cov > 0 {
            let supported = deep_runs
                .intervals()
                .iter()
                .any(|run| run.lo < iv.hi && iv.lo < run.hi);
            if !supported {
                continue;
            }
        }
        if iv.hi - iv.lo > best.1 - best.0 {
            best = (iv.lo, iv.hi);
        }
    }
    if best.1 > 0 {
        Some(best)
    } else {
        None
    }
}

/// Top `MAX_OVERLAPS_PER_TEMPLATE` by descending identity, or a borrow of
/// the whole group when it is small enough.
fn truncate_group(records: &[OverlapRecord]) -> Option<Vec<OverlapRecord>> {
    if records.len() <= MAX_OVERLAPS_PER_TEMPLATE {
        return None;
    }
    let mut owned = records.to_vec();
    owned.sort_by(|a, b| b.ident_perc.partial_cmp(&a.ident_perc).unwrap());
    owned.truncate(MAX_OVERLAPS_PER_TEMPLATE);
    Some(owned)
}

pub fn lcr_for_partition(
    records: &[OverlapRecord],
    clipped: &Mutex<Vec<ClippedRange>>,
    opts: &LcrOptions,
) {
    let ranges = sid_group_ranges(records);
    let cursor = GroupCursor::new();
    std::thread::scope(|scope| {
        for _ in 0..opts.num_threads.max(1) {
            scope.spawn(|| loop {
                let idx = cursor.claim();
                if idx >= ranges.len() {
                    break;
                }
                let (lo, hi) = ranges[idx];
                let group = &records[lo..hi];
                let owned = truncate_group(group);
                let group = owned.as_deref().unwrap_or(group);
                if let Some((left, right)) =
                    largest_cover_range(group, opts.min_ovlp_size, opts.min_cov)
                {
                    let sid = group[0].sid as usize;
                    let mut table = clipped.lock().unwrap();
                    table[sid] =
                        ClippedRange { left, right, size: group[0].ssize as i32 };
                }
            });
        }
    });
}

pub fn lcr_main(
    can_dir: &Path,
    reads_dir: &Path,
    title: &str,
    opts: &LcrOptions,
    output: &Path,
) -> Result<()> {
    let db_info = load_db_info(reads_dir, title)?;
    let clipped = Mutex::new(vec![ClippedRange::default(); db_info.num_seqs]);
    let np = load_partition_count(can_dir)?;
    for pid in 0..np {
        info!("largest cover range: partition {pid} of {np}");
        let records = load_partition(can_dir, pid)?;
        if records.is_empty() {
            continue;
        }
        lcr_for_partition(&records, &clipped, opts);
    }
    dump_clipped_ranges(output, &clipped.into_inner().unwrap(), opts.min_read_size)
}
