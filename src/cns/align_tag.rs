use crate::sequence::dna::GAP_CHAR;

/// Insertions longer than this are silently dropped from the tag stream;
/// losing pathological insertions is deliberate.
pub const ALIGN_TAG_MAX_DELTA: i32 = u16::MAX as i32;

pub const DEFAULT_CNS_WEIGHT: f64 = 1.0;

/// One alignment column anchored on the template: the column's own
/// `(t_pos, delta, q_base)` plus the same triple of the previous column.
/// `delta` counts inserted query bases since the template base at `t_pos`;
/// match/mismatch columns have `delta == 0`.
#[derive(Clone, Copy, Debug)]
pub struct AlignTag {
    pub weight: f64,
    pub t_pos: i32,
    pub p_t_pos: i32,
    pub delta: u16,
    pub p_delta: u16,
    pub q_base: u8,
    pub p_q_base: u8,
}

impl AlignTag {
    fn sort_key(&self) -> (i32, u16, u8, i32, u16, u8) {
        (self.t_pos, self.delta, self.q_base, self.p_t_pos, self.p_delta, self.p_q_base)
    }
}

pub fn sort_tags(tags: &mut [AlignTag]) {
    tags.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

pub fn plink_eq(a: &AlignTag, b: &AlignTag) -> bool {
    a.p_t_pos == b.p_t_pos && a.p_delta == b.p_delta && a.p_q_base == b.p_q_base
}

/// Walks one gapped alignment and appends a tag per column. `qoff`/`toff`
/// are the half-open windows the alignment covers on the two sequences.
#[allow(clippy::too_many_arguments)]
pub fn make_align_tags(
    qaln: &[u8],
    taln: &[u8],
    qoff: i32,
    qend: i32,
    toff: i32,
    tend: i32,
    weight: f64,
    tags: &mut Vec<AlignTag>,
) {
    debug_assert_eq!(qaln.len(), taln.len());
    let mut i = qoff - 1;
    let mut j = toff - 1;
    let mut jj = 0i32;
    let mut p_j = -1i32;
    let mut p_jj = 0i32;
    let mut p_q_base = GAP_CHAR;

    for p in 0..qaln.len() {
        if qaln[p] != GAP_CHAR {
            i += 1;
            jj += 1;
        }
        if taln[p] != GAP_CHAR {
            j += 1;
            jj = 0;
        }
        debug_assert!(i >= qoff && i < qend);
        debug_assert!(j >= toff && j < tend);

        if jj >= ALIGN_TAG_MAX_DELTA || p_jj >= ALIGN_TAG_MAX_DELTA {
            continue;
        }

        tags.push(AlignTag {
            weight,
            t_pos: j,
            p_t_pos: p_j,
            delta: jj as u16,
            p_delta: p_jj as u16,
            q_base: qaln[p],
            p_q_base,
        });
        p_j = j;
        p_jj = jj;
        p_q_base = qaln[p];
    }
}

/// Rewrites an alignment so mismatch columns become an insertion plus a
/// deletion, then pushes gaps as far right as they can travel without
/// changing the aligned sequences. Tag streams built from the normalized
/// form are insensitive to aligner-specific gap placement.
pub fn normalize_gaps(qaln: &[u8], taln: &[u8], qnorm: &mut Vec<u8>, tnorm: &mut Vec<u8>, push: bool) {
    qnorm.clear();
    tnorm.clear();
    debug_assert_eq!(qaln.len(), taln.len());

    for p in 0..qaln.len() {
        let qc = qaln[p];
        let tc = taln[p];
        if qc != tc && qc != GAP_CHAR && tc != GAP_CHAR {
            qnorm.push(GAP_CHAR);
            qnorm.push(qc);
            tnorm.push(tc);
            tnorm.push(GAP_CHAR);
        } else {
            qnorm.push(qc);
            tnorm.push(tc);
        }
    }

    if push {
        let len = qnorm.len();
        // a run of gaps always ends before the implicit terminator, so the
        // scan below stops at the first non-gap or at the end of the row
        for i in 0..len.saturating_sub(1) {
            if tnorm[i] == GAP_CHAR {
                let mut j = i;
                loop {
                    j += 1;
                    let c = if j < len { tnorm[j] } else { 0 };
                    if c != GAP_CHAR {
                        if c == qnorm[i] {
                            tnorm[i] = c;
                            tnorm[j] = GAP_CHAR;
                        }
                        break;
                    }
                }
            }
            if qnorm[i] == GAP_CHAR {
                let mut j = i;
                loop {
                    j += 1;
                    let c = if j < len { qnorm[j] } else { 0 };
                    if c != GAP_CHAR {
                        if c == tnorm[i] {
                            qnorm[i] = c;
                            qnorm[j] = GAP_CHAR;
                        }
                        break;
                    }
                }
            }
        }
    }

    debug_assert_eq!(
        qaln.iter().filter(|&&c| c != GAP_CHAR).count(),
        qnorm.iter().filter(|&&c| c != GAP_CHAR).count()
    );
    debug_assert_eq!(
        taln.iter().filter(|&&c| c != GAP_CHAR).count(),
        tnorm.iter().filter(|&&c| c != GAP_CHAR).count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_columns_have_delta_zero() {
        let mut tags = Vec::new();
        make_align_tags(b"ACGT", b"ACGT", 0, 4, 10, 14, 1.0, &mut tags);
        assert_eq!(tags.len(), 4);
        for (k, tag) in tags.iter().enumerate() {
            assert_eq!(tag.t_pos, 10 + k as i32);
            assert_eq!(tag.delta, 0);
            assert_eq!(tag.q_base, b"ACGT"[k]);
        }
        assert_eq!(tags[0].p_t_pos, -1);
        assert_eq!(tags[1].p_t_pos, 10);
    }

    #[test]
    fn insertions_count_delta() {
        // two inserted bases after template position 0
        let mut tags = Vec::new();
        make_align_tags(b"AGGC", b"A--C", 0, 4, 0, 2, 1.0, &mut tags);
        assert_eq!(tags.len(), 4);
        assert_eq!((tags[1].t_pos, tags[1].delta), (0, 1));
        assert_eq!((tags[2].t_pos, tags[2].delta), (0, 2));
        // the first template base after the run resets delta
        assert_eq!((tags[3].t_pos, tags[3].delta), (1, 0));
        assert_eq!((tags[3].p_delta, tags[3].p_q_base), (2, b'G'));
    }

    #[test]
    fn deletion_columns_tag_the_template_base() {
        let mut tags = Vec::new();
        make_align_tags(b"A-C", b"AGC", 0, 2, 0, 3, 1.0, &mut tags);
        assert_eq!(tags.len(), 3);
        assert_eq!((tags[1].t_pos, tags[1].q_base), (1, GAP_CHAR));
    }

    #[test]
    fn normalize_expands_mismatches() {
        let mut qn = Vec::new();
        let mut tn = Vec::new();
        normalize_gaps(b"ACT", b"AGT", &mut qn, &mut tn, false);
        assert_eq!(qn, b"A-CT".to_vec());
        assert_eq!(tn, b"AG-T".to_vec());
    }

    #[test]
    fn normalize_pushes_gaps_right() {
        let mut qn = Vec::new();
        let mut tn = Vec::new();
        // the template gap can slide right across the equal base
        normalize_gaps(b"AAAT", b"A-AT", &mut qn, &mut tn, true);
        assert_eq!(qn, b"AAAT".to_vec());
        assert_eq!(tn, b"AA-T".to_vec());
        let mut qn2 = Vec::new();
        let mut tn2 = Vec::new();
        normalize_gaps(b"AAAT", b"A-AT", &mut qn2, &mut tn2, false);
        assert_eq!(tn2, b"A-AT".to_vec());
    }

    #[test]
    fn tag_sort_orders_all_six_keys() {
        let tag = |t_pos, delta, q_base, p_t_pos| AlignTag {
            weight: 1.0,
            t_pos,
            p_t_pos,
            delta,
            p_delta: 0,
            q_base,
            p_q_base: b'A',
        };
        let mut tags = vec![tag(2, 0, b'A', 1), tag(1, 1, b'C', 0), tag(1, 0, b'C', 0), tag(1, 0, b'A', 0)];
        sort_tags(&mut tags);
        let keys: Vec<_> = tags.iter().map(|t| (t.t_pos, t.delta, t.q_base)).collect();
        assert_eq!(keys, vec![(1, 0, b'A'), (1, 0, b'C'), (1, 1, b'C'), (2, 0, b'A')]);
    }
}
