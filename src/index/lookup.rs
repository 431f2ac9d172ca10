use std::collections::{HashMap, HashSet};

use log::info;

use crate::index::radix_sort::{radix_sort, RadixKey};
use crate::sequence::dna::FWD;
use crate::sequence::packed_store::PackedDb;

/// Bit budget of the packed `(count << 34) | start_index` stats word:
/// 34 bits for offsets/start indices, 30 bits for counts and hashes.
pub const OFFSET_BITS: u64 = 34;
pub const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

const REMOVED_OCC: u64 = u64::MAX;

#[derive(Clone, Copy)]
struct KmerOcc {
    hash: u64,
    offset: u64,
}

impl RadixKey for KmerOcc {
    fn sort_key(&self) -> u64 {
        (self.hash << OFFSET_BITS) | self.offset
    }
}

/// Thresholds bounding the fraction-driven repetitive cull. The fraction
/// picks a provisional number of distinct k-mers to drop (most frequent
/// first); the cut point then retreats past groups smaller than `floor_occ`
/// and advances past groups larger than `ceil_occ`.
#[derive(Clone, Copy, Debug)]
pub struct RepeatCullTunables {
    pub floor_occ: usize,
    pub ceil_occ: usize,
}

impl Default for RepeatCullTunables {
    fn default() -> Self {
        RepeatCullTunables { floor_occ: 200, ceil_occ: 500 }
    }
}

#[derive(Clone, Debug)]
pub struct KmerIndexOptions {
    pub kmer_size: usize,
    pub window_size: usize,
    pub max_kmer_occ: usize,
    pub repeat_frac: Option<f64>,
    pub cull_tunables: RepeatCullTunables,
}

impl Default for KmerIndexOptions {
    fn default() -> Self {
        KmerIndexOptions {
            kmer_size: 13,
            window_size: 5,
            max_kmer_occ: 1000,
            repeat_frac: None,
            cull_tunables: RepeatCullTunables::default(),
        }
    }
}

/// The 2k-bit hash of a k-mer, high bits holding the first base.
pub fn kmer_hash(residues: &[u8]) -> u64 {
    let mut hash = 0u64;
    for &c in residues {
        hash = (hash << 2) | c as u64;
    }
    hash
}

/// Immutable hash → occurrence-run index over the packed store. Queries are
/// plain reads of shared state, so concurrent lookups need no locking.
pub struct KmerIndex {
    offsets: Vec<u64>,
    stats: HashMap<u64, u64>,
    kmer_size: usize,
    window_size: usize,
}

impl KmerIndex {
    pub fn build(db: &PackedDb, opts: &KmerIndexOptions, num_threads: usize) -> KmerIndex {
        assert!(opts.kmer_size >= 1 && opts.kmer_size <= 15);
        assert!(opts.window_size >= 1);
        assert!(db.max_offset() <= OFFSET_MASK);
        let mut occs = collect_occurrences(db, opts.kmer_size, opts.window_size);
        info!(
            "indexing {} k-mer occurrences (k = {}, w = {})",
            occs.len(),
            opts.kmer_size,
            opts.window_size
        );
        radix_sort(&mut occs, num_threads);
        if let Some(frac) = opts.repeat_frac {
            mark_fraction_cull(&mut occs, frac, &opts.cull_tunables);
        }
        mark_occ_cap_cull(&mut occs, opts.max_kmer_occ);
        let (kept, stats) = compact_and_index(occs);
        KmerIndex {
            offsets: kept,
            stats,
            kmer_size: opts.kmer_size,
            window_size: opts.window_size,
        }
    }

    /// O(1); repetitive k-mers culled at build time come back empty.
    pub fn lookup(&self, hash: u64) -> &[u64] {
        match self.stats.get(&hash) {
            Some(&word) => {
                let cnt = (word >> OFFSET_BITS) as usize;
                let start = (word & OFFSET_MASK) as usize;
                debug_assert!(start + cnt <= self.offsets.len());
                &self.offsets[start..start + cnt]
            }
            None => &[],
        }
    }

    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn num_occurrences(&self) -> usize {
        self.offsets.len()
    }
}

fn collect_occurrences(db: &PackedDb, kmer_size: usize, window_size: usize) -> Vec<KmerOcc> {
    let mut occs = Vec::new();
    let intersect = kmer_size > window_size;
    let stride = kmer_size.saturating_sub(window_size);
    let intersect_mask = if intersect { (1u64 << (2 * stride)) - 1 } else { 0 };
    for id in 0..db.num_seqs() {
        let size = db.seq_size(id);
        if size < kmer_size {
            continue;
        }
        let seq = db.extract_full(id, FWD);
        let start = db.seq_offset(id);
        if !intersect {
            let mut j = 0usize;
            while j + kmer_size <= size {
                let hash = kmer_hash(&seq[j..j + kmer_size]);
                occs.push(KmerOcc { hash, offset: start + j as u64 });
                j += window_size;
            }
        } else {
            // rolling: keep the low 2(k-w) bits, shift in the next w bases
            let mut hash = kmer_hash(&seq[0..kmer_size]);
            occs.push(KmerOcc { hash, offset: start });
            let mut j = window_size;
            while j + kmer_size <= size {
                hash &= intersect_mask;
                for k in stride..kmer_size {
                    hash = (hash << 2) | seq[j + k] as u64;
                }
                occs.push(KmerOcc { hash, offset: start + j as u64 });
                j += window_size;
            }
        }
    }
    occs
}

fn for_each_group(occs: &[KmerOcc], mut f: impl FnMut(usize, usize)) {
    let mut i = 0usize;
    while i < occs.len() {
        let mut j = i + 1;
        while j < occs.len() && occs[j].hash == occs[i].hash {
            j += 1;
        }
        f(i, j);
        i = j;
    }
}

fn mark_fraction_cull(occs: &mut [KmerOcc], frac: f64, tunables: &RepeatCullTunables) {
    let mut groups: Vec<(u64, usize)> = Vec::new();
    let mut i = 0usize;
    while i < occs.len() {
        let mut j = i + 1;
        while j < occs.len() && occs[j].hash == occs[i].hash {
            j += 1;
        }
        groups.push((occs[i].hash, j - i));
        i = j;
    }
    let distinct = groups.len();
    if distinct == 0 {
        return;
    }
    groups.sort_unstable_by(|a, b| b.1.cmp(&a.1));
    let mut removed = ((distinct as f64) * frac) as usize;
    removed = removed.min(distinct.saturating_sub(1));
    while removed > 0 && groups[removed].1 < tunables.floor_occ {
        removed -= 1;
    }
    while removed < distinct && groups[removed].1 > tunables.ceil_occ {
        removed += 1;
    }
    if removed == 0 {
        return;
    }
    let doomed: HashSet<u64> = groups[..removed].iter().map(|g| g.0).collect();
    for occ in occs.iter_mut() {
        if doomed.contains(&occ.hash) {
            occ.offset = REMOVED_OCC;
        }
    }
    info!(
        "fraction cull: dropping {} of {} distinct k-mers (cutoff occ = {})",
        removed,
        distinct,
        groups[removed.min(distinct - 1)].1
    );
}

fn mark_occ_cap_cull(occs: &mut [KmerOcc], max_kmer_occ: usize) {
    let total = occs.len();
    let mut distinct = 0usize;
    let mut removed_distinct = 0usize;
    let mut removed = 0usize;
    let mut i = 0usize;
    while i < occs.len() {
        let mut j = i + 1;
        while j < occs.len() && occs[j].hash == occs[i].hash {
            j += 1;
        }
        distinct += 1;
        let n = j - i;
        if n > max_kmer_occ {
            removed_distinct += 1;
            removed += n;
            for occ in &mut occs[i..j] {
                occ.offset = REMOVED_OCC;
            }
        }
        i = j;
    }
    if total > 0 {
        info!(
            "total k-mers: {}, {} ({:.2}%) filtered out",
            total,
            removed,
            100.0 * removed as f64 / total as f64
        );
    }
    if distinct > 0 {
        info!(
            "distinct k-mers: {}, {} ({:.2}%) filtered out",
            distinct,
            removed_distinct,
            100.0 * removed_distinct as f64 / distinct as f64
        );
    }
}

fn compact_and_index(mut occs: Vec<KmerOcc>) -> (Vec<u64>, HashMap<u64, u64>) {
    occs.retain(|occ| occ.offset != REMOVED_OCC);
    let mut stats = HashMap::new();
    for_each_group(&occs, |i, j| {
        let n = (j - i) as u64;
        debug_assert!(n < (1u64 << 30));
        stats.insert(occs[i].hash, (n << OFFSET_BITS) | i as u64);
    });
    let offsets = occs.iter().map(|occ| occ.offset).collect();
    (offsets, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::dna::encode_seq;
    use crate::sequence::mkdb::PackedDbBuilder;
    use tempfile::TempDir;

    fn tiny_db(reads: &[&[u8]]) -> (TempDir, PackedDb) {
        let tmp = TempDir::new().unwrap();
        let mut b = PackedDbBuilder::new(tmp.path(), "reads", 1 << 30);
        for (i, seq) in reads.iter().enumerate() {
            b.add_read(&format!("r{i}"), seq).unwrap();
        }
        b.finish().unwrap();
        let db = PackedDb::load(tmp.path(), "reads").unwrap();
        (tmp, db)
    }

    fn opts(k: usize, w: usize) -> KmerIndexOptions {
        KmerIndexOptions { kmer_size: k, window_size: w, ..KmerIndexOptions::default() }
    }

    #[test]
    fn tiny_index_counts() {
        let (_tmp, db) = tiny_db(&[b"ACGTAC", b"GTAC"]);
        let index = KmerIndex::build(&db, &opts(3, 1), 1);
        let h = |s: &[u8]| kmer_hash(&encode_seq(s));
        assert_eq!(index.lookup(h(b"ACG")).len(), 1);
        assert_eq!(index.lookup(h(b"CGT")).len(), 1);
        assert_eq!(index.lookup(h(b"GTA")).len(), 2);
        let tac = index.lookup(h(b"TAC"));
        assert_eq!(tac, &[3, db.seq_offset(1) + 1][..]);
        assert_eq!(index.lookup(h(b"AAA")), &[] as &[u64]);
        assert_eq!(index.num_occurrences(), 6);
    }

    #[test]
    fn occurrences_decode_to_their_hash() {
        let (_tmp, db) = tiny_db(&[b"ACGTACGGTTACGATCG", b"TTTACGATCGGG"]);
        let index = KmerIndex::build(&db, &opts(5, 2), 2);
        for id in 0..db.num_seqs() {
            let seq = db.extract_full(id, FWD);
            let mut j = 0usize;
            while j + 5 <= seq.len() {
                let hash = kmer_hash(&seq[j..j + 5]);
                let global = db.seq_offset(id) + j as u64;
                for &occ in index.lookup(hash) {
                    let (oid, within) = db.resolve(occ);
                    let decoded = db.extract(oid, within as usize, within as usize + 5, FWD);
                    assert_eq!(kmer_hash(&decoded), hash);
                }
                assert!(index.lookup(hash).contains(&global));
                j += 2;
            }
        }
    }

    #[test]
    fn rolling_hash_matches_direct() {
        // k > w exercises the rolling path; compare against k <= w emission
        let (_tmp, db) = tiny_db(&[b"ACGTACGGTTACGATCGACGTTGCA"]);
        let rolled = KmerIndex::build(&db, &opts(7, 3), 1);
        let seq = db.extract_full(0, FWD);
        let mut j = 0usize;
        while j + 7 <= seq.len() {
            let hash = kmer_hash(&seq[j..j + 7]);
            assert!(rolled.lookup(hash).contains(&(j as u64)), "position {j}");
            j += 3;
        }
    }

    #[test]
    fn occ_cap_cull_removes_whole_groups() {
        let (_tmp, db) = tiny_db(&[b"AAAAAAAAAAAAAAAAAAAACGT"]);
        let mut o = opts(3, 1);
        o.max_kmer_occ = 4;
        let index = KmerIndex::build(&db, &o, 1);
        // AAA occurs 18 times and is culled entirely
        assert_eq!(index.lookup(kmer_hash(&encode_seq(b"AAA"))), &[] as &[u64]);
        assert_eq!(index.lookup(kmer_hash(&encode_seq(b"CGT"))).len(), 1);
    }

    #[test]
    fn fraction_cull_respects_tunables() {
        let (_tmp, db) = tiny_db(&[b"AAAAAAAAAAAAAAAAAAAACGT"]);
        let mut o = opts(3, 1);
        o.repeat_frac = Some(0.5);
        o.cull_tunables = RepeatCullTunables { floor_occ: 2, ceil_occ: 3 };
        let index = KmerIndex::build(&db, &o, 1);
        assert_eq!(index.lookup(kmer_hash(&encode_seq(b"AAA"))), &[] as &[u64]);
        // with the default floor of 200 nothing here is frequent enough
        let mut o2 = opts(3, 1);
        o2.repeat_frac = Some(0.5);
        let index2 = KmerIndex::build(&db, &o2, 1);
        assert!(!index2.lookup(kmer_hash(&encode_seq(b"AAA"))).is_empty());
    }
}
