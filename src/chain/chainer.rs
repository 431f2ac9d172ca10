use crate::sequence::dna::FWD;

/// A k-mer match between a query and a subject. Offsets are on the strand
/// the seed producer scanned; the producer owns any coordinate transform for
/// reverse-strand scans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSeed {
    pub qoff: i64,
    pub soff: i64,
    pub length: i32,
    pub sdir: u8,
    pub hash: u64,
}

pub fn sort_seeds(seeds: &mut [ChainSeed]) {
    seeds.sort_unstable_by(|a, b| (a.soff, a.qoff).cmp(&(b.soff, b.qoff)));
}

/// One surviving chain: anchored at the midpoint of its longest seed, with
/// its seed run stored in a side list at `[chain_seed_offset,
/// chain_seed_offset + chain_seed_count)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitHit {
    pub score: i32,
    pub qoff: i64,
    pub soff: i64,
    pub qdir: u8,
    pub sdir: u8,
    pub chain_seed_offset: usize,
    pub chain_seed_count: usize,
}

/// Scratch state for the colinear chain DP. `f` is the best score ending at
/// a seed, `p` its predecessor, `v` the peak score visible from it, `t` a
/// claim marker reused across phases.
pub struct ChainWorkData {
    pub max_dist_ref: i64,
    pub max_dist_qry: i64,
    pub max_band_width: i64,
    pub max_skip: i32,
    pub min_cnt: i32,
    pub min_score: i32,
    f: Vec<i32>,
    p: Vec<i32>,
    t: Vec<i32>,
    v: Vec<i32>,
    u: Vec<(i32, i32)>,
}

impl ChainWorkData {
    pub fn new(min_cnt: i32, min_score: i32) -> ChainWorkData {
        ChainWorkData {
            max_dist_ref: 1000,
            max_dist_qry: 1000,
            max_band_width: 250,
            max_skip: 25,
            min_cnt,
            min_score,
            f: Vec::new(),
            p: Vec::new(),
            t: Vec::new(),
            v: Vec::new(),
            u: Vec::new(),
        }
    }

    fn setup(&mut self, n: usize) {
        self.f.clear();
        self.f.resize(n, 0);
        self.p.clear();
        self.p.resize(n, -1);
        self.t.clear();
        self.t.resize(n, 0);
        self.v.clear();
        self.v.resize(n, 0);
        self.u.clear();
        self.u.resize(n, (0, 0));
    }

    /// Fills the score and backtrack arrays. `mem_mode` demands that a
    /// predecessor seed end strictly before the current seed starts on both
    /// axes; otherwise a strict start-before-start test is used.
    fn score_seeds(&mut self, seeds: &[ChainSeed], mem_mode: bool) {
        let n = seeds.len();
        self.setup(n);
        let sum_cov: i64 = seeds.iter().map(|s| s.length as i64).sum();
        let avg_cov = (sum_cov / n as i64) as i32;
        let mut st = 0usize;
        for i in 0..n {
            let ri = seeds[i].soff;
            let qi = seeds[i].qoff;
            let cov = seeds[i].length;
            let mut max_f = cov;
            let mut max_j: i32 = -1;
            let mut n_skip = 0;
            while st < i && ri > seeds[st].soff + self.max_dist_ref {
                st += 1;
            }
            let mut j = i as i64 - 1;
            while j >= st as i64 {
                let js = j as usize;
                let upper_left = if mem_mode {
                    seeds[js].qoff + (seeds[js].length as i64) < qi
                        && seeds[js].soff + (seeds[js].length as i64) < ri
                } else {
                    seeds[js].qoff < qi && seeds[js].soff < ri
                };
                if !upper_left {
                    j -= 1;
                    continue;
                }
                let dr = ri - seeds[js].soff;
                let dq = qi - seeds[js].qoff;
                if dr == 0 || dq <= 0 || dq > self.max_dist_qry || dr > self.max_dist_ref {
                    j -= 1;
                    continue;
                }
                let dd = (dr - dq).abs();
                if dd > self.max_band_width {
                    j -= 1;
                    continue;
                }
                let min_d = dq.min(dr);
                let mut sc = if min_d > cov as i64 { cov } else { min_d as i32 };
                let log_dd = if dd > 0 { (dd as u64).ilog2() as i32 } else { 0 };
                sc -= (dd as f64 * 0.01 * avg_cov as f64) as i32 + (log_dd >> 1);
                sc += self.f[js];
                if sc > max_f {
                    max_f = sc;
                    max_j = js as i32;
                    if n_skip > 0 {
                        n_skip -= 1;
                    }
                } else if self.t[js] == i as i32 {
                    n_skip += 1;
                    if n_skip > self.max_skip {
                        break;
                    }
                }
                if self.p[js] >= 0 {
                    self.t[self.p[js] as usize] = i as i32;
                }
                j -= 1;
            }
            self.f[i] = max_f;
            self.p[i] = max_j;
            self.v[i] = if max_j >= 0 && self.v[max_j as usize] > max_f {
                self.v[max_j as usize]
            } else {
                max_f
            };
        }
    }

    /// Marks chain ends (seeds no later seed points back to) that clear
    /// `min_score`, walks each back to its peak, and leaves `u[..n_u]`
    /// sorted best-first. Returns the number of candidate ends.
    fn collect_chain_ends(&mut self, n: usize) -> usize {
        for x in &mut self.t[..n] {
            *x = 0;
        }
        for i in 0..n {
            if self.p[i] >= 0 {
                self.t[self.p[i] as usize] = 1;
            }
        }
        let mut n_u = 0usize;
        for i in 0..n {
            if self.t[i] == 0 && self.v[i] >= self.min_score {
                let mut j = i as i32;
                while j >= 0 && self.f[j as usize] < self.v[j as usize] {
                    j = self.p[j as usize];
                }
                if j < 0 {
                    j = i as i32;
                }
                self.u[n_u] = (self.f[j as usize], j);
                n_u += 1;
            }
        }
        self.u[..n_u].sort_unstable();
        self.u[..n_u].reverse();
        n_u
    }

    /// Reports the anchor seed and score of the best chain, or nothing.
    /// Only the single highest-scoring chain end is ever inspected; when it
    /// fails `min_cnt` or `min_score`, the search reports no match even if a
    /// lower-scoring end would qualify. Callers depend on this.
    pub fn find_best_kmer_match(&mut self, seeds: &[ChainSeed]) -> Option<(usize, i32)> {
        let n = seeds.len();
        if n == 0 {
            return None;
        }
        self.score_seeds(seeds, false);
        let n_u = self.collect_chain_ends(n);
        if n_u == 0 {
            return None;
        }
        for x in &mut self.t[..n] {
            *x = 0;
        }
        let mut n_v = 0usize;
        for i in 0..n_u {
            let n_v0 = n_v;
            let mut j = self.u[i].1;
            loop {
                self.v[n_v] = j;
                n_v += 1;
                self.t[j as usize] = 1;
                j = self.p[j as usize];
                if j < 0 || self.t[j as usize] != 0 {
                    break;
                }
            }
            let cnt = (n_v - n_v0) as i32;
            let score = if j < 0 {
                self.u[i].0
            } else {
                self.u[i].0 - self.f[j as usize]
            };
            let found = cnt >= self.min_cnt && (j < 0 || score >= self.min_score);
            return if found {
                Some((self.v[n_v0] as usize, score))
            } else {
                None
            };
        }
        None
    }

    /// Chains in MEM mode and emits every surviving chain: one `InitHit`
    /// plus its seed run appended to `chain_seed_list` in ascending order.
    pub fn find_candidates(
        &mut self,
        seeds: &[ChainSeed],
        subject_strand: u8,
        hits: &mut Vec<InitHit>,
        chain_seed_list: &mut Vec<ChainSeed>,
    ) {
        let n = seeds.len();
        if n == 0 {
            return;
        }
        self.score_seeds(seeds, true);
        let n_u = self.collect_chain_ends(n);
        if n_u == 0 {
            return;
        }
        for x in &mut self.t[..n] {
            *x = 0;
        }
        let mut n_v = 0usize;
        for i in 0..n_u {
            let n_v0 = n_v;
            let mut j = self.u[i].1;
            if self.t[j as usize] != 0 {
                continue;
            }
            loop {
                self.v[n_v] = j;
                n_v += 1;
                self.t[j as usize] = 1;
                j = self.p[j as usize];
                if j < 0 || self.t[j as usize] != 0 {
                    break;
                }
            }
            let cnt = (n_v - n_v0) as i32;
            let score = if j < 0 {
                self.u[i].0
            } else {
                self.u[i].0 - self.f[j as usize]
            };
            let found = cnt >= self.min_cnt && (j < 0 || score >= self.min_score);
            if found {
                let mut hit = InitHit {
                    score,
                    qoff: 0,
                    soff: 0,
                    qdir: FWD,
                    sdir: subject_strand,
                    chain_seed_offset: chain_seed_list.len(),
                    chain_seed_count: n_v - n_v0,
                };
                let mut max_size = 0i32;
                for x in (n_v0 + 1..=n_v).rev() {
                    let y = self.v[x - 1] as usize;
                    chain_seed_list.push(seeds[y]);
                    if seeds[y].length > max_size {
                        max_size = seeds[y].length;
                        hit.qoff = seeds[y].qoff + (max_size / 2) as i64;
                        hit.soff = seeds[y].soff + (max_size / 2) as i64;
                    }
                }
                hits.push(hit);
            } else {
                n_v = n_v0;
            }
        }
    }

    #[cfg(test)]
    fn dp_state(&self, n: usize) -> (&[i32], &[i32]) {
        (&self.f[..n], &self.p[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(qoff: i64, soff: i64, length: i32) -> ChainSeed {
        ChainSeed { qoff, soff, length, sdir: FWD, hash: 0 }
    }

    #[test]
    fn linear_seeds_form_one_chain() {
        let seeds = vec![seed(0, 0, 10), seed(20, 20, 10), seed(40, 40, 10)];
        let mut data = ChainWorkData::new(2, 5);
        let mut hits = Vec::new();
        let mut chain_seeds = Vec::new();
        data.find_candidates(&seeds, FWD, &mut hits, &mut chain_seeds);
        assert_eq!(hits.len(), 1);
        let hit = hits[0];
        assert_eq!(hit.score, 30);
        assert_eq!(hit.chain_seed_count, 3);
        let (f, p) = data.dp_state(3);
        assert_eq!(f, &[10, 20, 30]);
        assert_eq!(p, &[-1, 0, 1]);
        // anchor is the midpoint of the longest (here, first) seed
        assert_eq!((hit.qoff, hit.soff), (5, 5));
        // emitted seeds ascend on both axes
        for w in chain_seeds.windows(2) {
            assert!(w[0].soff < w[1].soff && w[0].qoff < w[1].qoff);
        }
    }

    #[test]
    fn banded_out_seeds_stay_separate() {
        let seeds = vec![seed(0, 0, 10), seed(20, 2000, 10)];
        let mut data = ChainWorkData::new(1, 5);
        let mut hits = Vec::new();
        let mut chain_seeds = Vec::new();
        data.find_candidates(&seeds, FWD, &mut hits, &mut chain_seeds);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chain_seed_count == 1));
        assert!(hits.iter().all(|h| h.score == 10));
    }

    #[test]
    fn no_seeds_is_a_noop() {
        let mut data = ChainWorkData::new(1, 1);
        let mut hits = Vec::new();
        let mut chain_seeds = Vec::new();
        data.find_candidates(&[], FWD, &mut hits, &mut chain_seeds);
        assert!(hits.is_empty());
        assert_eq!(data.find_best_kmer_match(&[]), None);
    }

    #[test]
    fn best_match_only_inspects_top_end() {
        // a lone high-scoring seed outranks a three-seed chain; with
        // min_cnt = 2 the top end fails and the qualifying chain below it
        // must NOT be reported
        let mut seeds = vec![
            seed(0, 0, 10),
            seed(20, 20, 10),
            seed(40, 40, 10),
            seed(5000, 5000, 100),
        ];
        sort_seeds(&mut seeds);
        let mut data = ChainWorkData::new(2, 5);
        assert_eq!(data.find_best_kmer_match(&seeds), None);

        let mut relaxed = ChainWorkData::new(1, 5);
        let (idx, score) = relaxed.find_best_kmer_match(&seeds).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(score, 100);
    }

    #[test]
    fn chained_scores_beat_singletons() {
        // small gap mismatch costs a penalty but chaining still wins
        let seeds = vec![seed(0, 0, 10), seed(25, 20, 10)];
        let mut data = ChainWorkData::new(2, 1);
        let mut hits = Vec::new();
        let mut chain_seeds = Vec::new();
        data.find_candidates(&seeds, FWD, &mut hits, &mut chain_seeds);
        assert_eq!(hits.len(), 1);
        let (f, p) = data.dp_state(2);
        assert_eq!(p, &[-1, 0]);
        // dd = 5: penalty floor(5 * 0.01 * 10) + ilog2(5)/2 = 0 + 1
        assert_eq!(f[1], 19);
    }
}
