use bio::alignment::pairwise::banded;
use bio::alignment::pairwise::MatchParams;
use bio::alignment::AlignmentOperation;

use crate::sequence::dna::GAP_CHAR;

/// The record every downstream consumer (tag graph, candidate refinement)
/// works from: gap-padded ASCII rows plus half-open offsets on the forward
/// orientation of the two inputs as they were passed in.
#[derive(Clone, Debug, Default)]
pub struct AlignedPair {
    pub qaln: Vec<u8>,
    pub taln: Vec<u8>,
    pub qoff: usize,
    pub qend: usize,
    pub toff: usize,
    pub tend: usize,
    pub ident_perc: f64,
    pub score: i32,
}

/// Banded gapped aligner collaborator. Scoring is fixed for raw long reads;
/// the band follows shared k-mers of size `band_kmer` within `band_width`.
pub struct GappedAligner {
    inner: banded::Aligner<MatchParams>,
}

impl GappedAligner {
    pub fn new(band_kmer: usize, band_width: usize) -> GappedAligner {
        let scoring = MatchParams::new(2, -4);
        GappedAligner { inner: banded::Aligner::new(-4, -2, scoring, band_kmer, band_width) }
    }

    /// Best local alignment of `query` against `target` (both plain ASCII
    /// ACGT). Returns `None` when nothing aligns.
    pub fn align_local(&mut self, query: &[u8], target: &[u8]) -> Option<AlignedPair> {
        if query.is_empty() || target.is_empty() {
            return None;
        }
        let alignment = self.inner.local(query, target);
        let mut pair = AlignedPair {
            qoff: alignment.xstart,
            qend: alignment.xend,
            toff: alignment.ystart,
            tend: alignment.yend,
            score: alignment.score,
            ..AlignedPair::default()
        };
        let mut qi = alignment.xstart;
        let mut ti = alignment.ystart;
        let mut matches = 0usize;
        for op in &alignment.operations {
            match op {
                AlignmentOperation::Match => {
                    pair.qaln.push(query[qi]);
                    pair.taln.push(target[ti]);
                    qi += 1;
                    ti += 1;
                    matches += 1;
                }
                AlignmentOperation::Subst => {
                    pair.qaln.push(query[qi]);
                    pair.taln.push(target[ti]);
                    qi += 1;
                    ti += 1;
                }
                AlignmentOperation::Ins => {
                    pair.qaln.push(query[qi]);
                    pair.taln.push(GAP_CHAR);
                    qi += 1;
                }
                AlignmentOperation::Del => {
                    pair.qaln.push(GAP_CHAR);
                    pair.taln.push(target[ti]);
                    ti += 1;
                }
                AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
            }
        }
        if pair.qaln.is_empty() {
            return None;
        }
        debug_assert_eq!(qi, alignment.xend);
        debug_assert_eq!(ti, alignment.yend);
        pair.ident_perc = 100.0 * matches as f64 / pair.qaln.len() as f64;
        Some(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_align_fully() {
        let mut aligner = GappedAligner::new(5, 10);
        let seq = b"ACGTACGGTTACGATCGAC";
        let pair = aligner.align_local(seq, seq).unwrap();
        assert_eq!(pair.qaln, pair.taln);
        assert_eq!((pair.qoff, pair.qend), (0, seq.len()));
        assert_eq!((pair.toff, pair.tend), (0, seq.len()));
        assert!((pair.ident_perc - 100.0).abs() < 1e-9);
    }

    #[test]
    fn substitution_lowers_identity() {
        let mut aligner = GappedAligner::new(5, 10);
        let q = b"ACGTACGGTTACGATCGAC";
        let t = b"ACGTACGGTAACGATCGAC";
        let pair = aligner.align_local(q, t).unwrap();
        assert!(pair.ident_perc < 100.0);
        assert_eq!(pair.qaln.len(), pair.taln.len());
    }

    #[test]
    fn gap_columns_are_padded() {
        let mut aligner = GappedAligner::new(4, 10);
        let q = b"ACGTACGGATCGATTT";
        let t = b"ACGTACGGTTTATCGATTT";
        let pair = aligner.align_local(q, t).unwrap();
        let q_bases = pair.qaln.iter().filter(|&&c| c != GAP_CHAR).count();
        let t_bases = pair.taln.iter().filter(|&&c| c != GAP_CHAR).count();
        assert_eq!(q_bases, pair.qend - pair.qoff);
        assert_eq!(t_bases, pair.tend - pair.toff);
    }
}
