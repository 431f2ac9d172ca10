use crate::cns::backbone::{encode_cns_base, Backbone};
use crate::sequence::dna::decode_base;

const INDEL_FACTOR: f64 = 0.1;

/// Max-score path through the tag graph over template window `[from, to)`.
/// Each cell's score is its best incoming link weight, coverage-penalized,
/// plus the predecessor cell's score; the global argmax is walked back to
/// emit the corrected bases (gap symbols dropped). Returns the
/// `[cns_from, cns_to)` window the path actually covers.
pub fn consensus_backbone_segment(
    bb: &mut Backbone,
    from: usize,
    to: usize,
    cns_seq: &mut Vec<u8>,
) -> (usize, usize) {
    cns_seq.clear();
    let mut g_best_score = -1.0f64;
    let mut g_best: Option<(usize, u32, usize)> = None;

    for i in from..to {
        let (delta_start, n_delta) = bb.items[i];
        for j in 0..n_delta {
            for kk in 0..5usize {
                let cell = bb.dci.get(delta_start + j).links[kk];
                if cell.coverage == 0 {
                    continue;
                }
                let mut best_score = -1.0f64;
                let mut best_p_t_pos = -1i32;
                let mut best_p_delta = u16::MAX;
                let mut best_p_q_base = b'.';
                for ck in 0..cell.n_link {
                    let link = *bb.links.get(cell.links_start + ck);
                    let mut score = link.weight - INDEL_FACTOR * bb.cov[i] as f64;
                    if link.p_t_pos != -1 {
                        let pkk = encode_cns_base(link.p_q_base);
                        score += bb.cell(link.p_t_pos as usize, link.p_delta as u32).links[pkk].score;
                    }
                    if score > best_score {
                        best_score = score;
                        best_p_t_pos = link.p_t_pos;
                        best_p_delta = link.p_delta;
                        best_p_q_base = link.p_q_base;
                    }
                }
                let cell = &mut bb.dci.get_mut(delta_start + j).links[kk];
                cell.score = best_score;
                cell.best_p_t_pos = best_p_t_pos;
                cell.best_p_delta = best_p_delta;
                cell.best_p_q_base = best_p_q_base;
                if best_score > g_best_score {
                    g_best_score = best_score;
                    g_best = Some((i, j, kk));
                }
            }
        }
    }

    let (mut i, mut j, mut kk) = match g_best {
        Some(best) => best,
        None => return (from, from),
    };
    let cns_to = i + 1;
    let mut cns_from = i;
    loop {
        let (delta_start, _) = bb.items[i];
        let cell = bb.dci.get(delta_start + j).links[kk];
        let base = kk;
        if cell.best_p_t_pos == -1 {
            break;
        }
        cns_from = cell.best_p_t_pos as usize;
        if base != 4 {
            cns_seq.push(decode_base(base as u8));
        }
        i = cell.best_p_t_pos as usize;
        j = cell.best_p_delta as u32;
        kk = encode_cns_base(cell.best_p_q_base);
    }
    cns_seq.reverse();
    (cns_from, cns_to)
}

/// Maximal runs of `[from, to)` where template coverage stays at or above
/// `min_cov`; the driver decodes each segment separately.
pub fn coverage_segments(coverage: &[i32], min_cov: i32) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &cov) in coverage.iter().enumerate() {
        if cov >= min_cov {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            segments.push((s, i));
        }
    }
    if let Some(s) = start {
        segments.push((s, coverage.len()));
    }
    segments
}
