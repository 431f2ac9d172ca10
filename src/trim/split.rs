use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use log::info;

use crate::overlap::partition::{load_partition, load_partition_count, sid_group_ranges, GroupCursor};
use crate::overlap::record::OverlapRecord;
use crate::sequence::dna::{FWD, REV};
use crate::sequence::packed_store::load_db_info;
use crate::trim::clipped::{dump_clipped_ranges, load_clipped_ranges, ClippedRange};
use crate::trim::intervals::IntervalList;
use crate::trim::lcr::MAX_OVERLAPS_PER_TEMPLATE;

/// Gap regions between the two halves of a doubled overlap are "bad"
/// candidates up to this length, and corroborating evidence up to the
/// extended length.
const SUBREAD_LOOP_MAX_SIZE: i32 = 500;
const SUBREAD_LOOP_EXT_SIZE: i32 = 2000;

/// An overlap after both endpoints were pulled inside the clear ranges of
/// the template and of the other read. Template coordinates only.
#[derive(Clone, Copy, Debug)]
struct AdjustedOverlap {
    qid: i32,
    tbgn: i32,
    tend: i32,
    qbgn: i32,
    qend: i32,
}

#[derive(Clone, Copy, Debug)]
struct BadRegion {
    bgn: i32,
    end: i32,
}

#[derive(Clone, Debug)]
pub struct SplitOptions {
    pub min_read_size: i32,
    pub num_threads: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions { min_read_size: 500, num_threads: 1 }
    }
}

/// Pulls the overlap's endpoints inside both participants' clear ranges by
/// trimming the same fraction off each side, then snaps overhangs under
/// 15 bp back onto the clear-range boundary. Returns nothing when the
/// adjusted ranges no longer intersect the clear regions.
fn adjust_offsets(clr: &[ClippedRange], rec: &OverlapRecord) -> Option<AdjustedOverlap> {
    let qid = rec.qid as usize;
    if clr[qid].size == 0 {
        return None;
    }
    let tid = rec.sid as usize;
    debug_assert_eq!(rec.sdir, FWD as i32);
    debug_assert_eq!(clr[tid].size as i64, rec.ssize);
    let mut tovlbgn = rec.soff as i32;
    let mut tovlend = rec.send as i32;
    let tclrbgn = clr[tid].left;
    let tclrend = clr[tid].right;

    let (mut qovlbgn, mut qovlend, qclrbgn, qclrend) = if rec.qdir == FWD as i32 {
        (rec.qoff as i32, rec.qend as i32, clr[qid].left, clr[qid].right)
    } else {
        debug_assert_eq!(rec.qdir, REV as i32);
        let qsize = rec.qsize as i32;
        (
            qsize - rec.qend as i32,
            qsize - rec.qoff as i32,
            qsize - clr[qid].right,
            qsize - clr[qid].left,
        )
    };

    if qclrend <= qovlbgn || qovlend <= qclrbgn || tclrend <= tovlbgn || tovlend <= tclrbgn {
        return None;
    }

    let qlen = (qovlend - qovlbgn) as f64;
    let tlen = (tovlend - tovlbgn) as f64;
    let qfbgn = 0f64.max((qclrbgn - qovlbgn) as f64) / qlen;
    let tfbgn = 0f64.max((tclrbgn - tovlbgn) as f64) / tlen;
    let qfend = 0f64.max((qovlend - qclrend) as f64) / qlen;
    let tfend = 0f64.max((tovlend - tclrend) as f64) / tlen;
    let maxbgn = qfbgn.max(tfbgn);
    let maxend = qfend.max(tfend);
    debug_assert!(maxbgn < 1.0 && maxend < 1.0);

    qovlbgn += (maxbgn * qlen).round() as i32;
    tovlbgn += (maxbgn * tlen).round() as i32;
    qovlend -= (maxend * qlen).round() as i32;
    tovlend -= (maxend * tlen).round() as i32;

    // snap near-zero overhangs back to the clear range
    if qovlbgn - qclrbgn < 15 {
        let adjust = (qovlbgn - qclrbgn).min(tovlbgn - tclrbgn);
        tovlbgn -= adjust;
        qovlbgn -= adjust;
    }
    if qclrend - qovlend < 15 {
        let adjust = (qclrend - qovlend).min(tclrend - tovlend);
        tovlend += adjust;
        qovlend += adjust;
    }

    let (qbgn, qend) = if rec.qdir == FWD as i32 {
        (qovlbgn, qovlend)
    } else {
        (rec.qsize as i32 - qovlend, rec.qsize as i32 - qovlbgn)
    };
    Some(AdjustedOverlap { qid: rec.qid, tbgn: tovlbgn, tend: tovlend, qbgn, qend })
}

fn add_and_filter_overlaps(
    records: &[OverlapRecord],
    clr: &[ClippedRange],
) -> Vec<AdjustedOverlap> {
    records.iter().filter_map(|rec| adjust_offsets(clr, rec)).collect()
}

fn interval_overlap(b1: i32, e1: i32, b2: i32, e2: i32) -> i32 {
    (e1.min(e2) - b1.max(b2)).max(0)
}

/// Palindrome/subread detection over reads that overlap the template
/// exactly twice. The gap between the two placements is a suspected
/// subread joint; it is discarded only with enough corroboration and
/// without many spanning overlaps.
fn detect_subread(adjusted: &[AdjustedOverlap], blist: &mut Vec<BadRegion>) {
    let mut next_idx: HashMap<i32, usize> = HashMap::new();
    let mut num_ovlps: HashMap<i32, usize> = HashMap::new();
    for (i, aov) in adjusted.iter().enumerate() {
        next_idx.insert(aov.qid, i);
        *num_ovlps.entry(aov.qid).or_insert(0) += 1;
    }

    let mut large_palindrome = 0i32;
    let mut bad = IntervalList::new();
    let mut bad_all = IntervalList::new();
    for (i, a) in adjusted.iter().enumerate() {
        if num_ovlps[&a.qid] != 2 {
            continue;
        }
        let j = next_idx[&a.qid];
        if i == j {
            continue;
        }
        let b = &adjusted[j];
        debug_assert_eq!(a.qid, b.qid);

        let tovlp = interval_overlap(a.tbgn, a.tend, b.tbgn, b.tend);
        let qovlp = interval_overlap(a.qbgn, a.qend, b.qbgn, b.qend);
        if tovlp == 0 && qovlp == 0 {
            continue;
        }
        if tovlp > 1000 && qovlp > 1000 {
            large_palindrome = 1;
        }
        if tovlp > 250 || qovlp < 250 {
            continue;
        }

        let (mut badbgn, mut badend) = if a.tbgn < b.tbgn { (a.tend, b.tbgn) } else { (b.tend, a.tbgn) };
        if badbgn > badend {
            std::mem::swap(&mut badbgn, &mut badend);
        }
        if badend - badbgn <= SUBREAD_LOOP_MAX_SIZE {
            bad.add(badbgn, badend - badbgn, 0);
        }
        if badend - badbgn <= SUBREAD_LOOP_EXT_SIZE {
            bad_all.add(badbgn, badend - badbgn, 0);
        }
    }
    bad.merge(0);
    bad_all.merge(0);

    for candidate in bad.intervals() {
        let mut all_hits = 0i32;
        for witness in bad_all.intervals() {
            if witness.lo <= candidate.lo && candidate.hi <= witness.hi {
                all_hits += witness.count;
            }
        }
        debug_assert!(all_hits > 0);

        let num_span = adjusted
            .iter()
            .filter(|aov| aov.tbgn + 100 < candidate.lo && candidate.hi + 100 < aov.tend)
            .count();
        if num_span > 9 {
            continue;
        }
        if candidate.count + all_hits / 4 + large_palindrome < 3 {
            continue;
        }
        blist.push(BadRegion { bgn: candidate.lo, end: candidate.hi });
    }
}

/// Longest sub-interval of the clear range not covered by a bad region.
fn trim_bad_intervals(blist: &[BadRegion], clrbgn: i32, clrend: i32) -> (i32, i32) {
    if blist.is_empty() {
        return (clrbgn, clrend);
    }
    let mut good = IntervalList::new();
    for region in blist {
        good.add(region.bgn, region.end - region.bgn, 0);
    }
    good.invert(clrbgn, clrend);
    let mut best = (0i32, 0i32);
    for iv in good.intervals() {
        if iv.hi - iv.lo > best.1 - best.0 {
            best = (iv.lo, iv.hi);
        }
    }
    best
}

fn split_one_template(
    records: &[OverlapRecord],
    clear_ranges: &[ClippedRange],
) -> Option<ClippedRange> {
    let tid = records[0].sid as usize;
    let clr = clear_ranges[tid];
    if clr.size == 0 {
        return None;
    }
    debug_assert_eq!(clr.size as i64, records[0].ssize);
    let adjusted = add_and_filter_overlaps(records, clear_ranges);
    let mut blist = Vec::new();
    detect_subread(&adjusted, &mut blist);
    let (left, right) = trim_bad_intervals(&blist, clr.left, clr.right);
    Some(ClippedRange { left, right, size: clr.size })
}

pub fn split_for_partition(
    records: &[OverlapRecord],
    clear_ranges: &[ClippedRange],
    split_ranges: &Mutex<Vec<ClippedRange>>,
    opts: &SplitOptions,
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
                let owned;
                let group = if group.len() > MAX_OVERLAPS_PER_TEMPLATE {
                    let mut sorted = group.to_vec();
                    sorted.sort_by(|a, b| b.ident_perc.partial_cmp(&a.ident_perc).unwrap());
                    sorted.truncate(MAX_OVERLAPS_PER_TEMPLATE);
                    owned = sorted;
                    owned.as_slice()
                } else {
                    group
                };
                if let Some(range) = split_one_template(group, clear_ranges) {
                    let sid = group[0].sid as usize;
                    split_ranges.lock().unwrap()[sid] = range;
                }
            });
        }
    });
}

pub fn split_main(
    can_dir: &Path,
    reads_dir: &Path,
    title: &str,
    clear_range_path: &Path,
    opts: &SplitOptions,
    output: &Path,
) -> Result<()> {
    let db_info = load_db_info(reads_dir, title)?;
    let clear_ranges = load_clipped_ranges(clear_range_path, db_info.num_seqs)?;
    let split_ranges = Mutex::new(vec![ClippedRange::default(); db_info.num_seqs]);
    let np = load_partition_count(can_dir)?;
    for pid in 0..np {
        info!("split reads: partition {pid} of {np}");
        let records = load_partition(can_dir, pid)?;
        if records.is_empty() {
            continue;
        }
        split_for_partition(&records, &clear_ranges, &split_ranges, opts);
    }
    dump_clipped_ranges(output, &split_ranges.into_inner().unwrap(), opts.min_read_size)
}
