use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use itertools::Itertools;
use log::info;

use crate::align::gapped::GappedAligner;
use crate::chain::chainer::{sort_seeds, ChainSeed, ChainWorkData};
use crate::cns::align_tag::{make_align_tags, normalize_gaps, AlignTag, DEFAULT_CNS_WEIGHT};
use crate::cns::backbone::Backbone;
use crate::cns::decoder::{consensus_backbone_segment, coverage_segments};
use crate::index::lookup::kmer_hash;
use crate::overlap::partition::{load_partition, load_partition_count, sid_group_ranges, GroupCursor};
use crate::overlap::record::OverlapRecord;
use crate::sequence::dna::{decode_seq, encode_base, FWD, REV};
use crate::sequence::packed_store::PackedDb;

/// In batch mode a template keeps at most this many supporting hits.
pub const MAX_CNS_OVLPS: usize = 60;
/// Per-position alignment coverage cap; hits whose template range is
/// already saturated are skipped.
pub const MAX_CNS_COV: u8 = 15;
const COV_SATURATION_FRAC: f64 = 0.9;
/// Anchoring k-mer stride over the query window.
const MEM_ANCHOR_WINDOW: usize = 2;

#[derive(Clone, Debug)]
pub struct CnsOptions {
    pub num_threads: usize,
    pub batch_size: usize,
    pub use_batch_mode: bool,
    pub min_cov: i32,
    pub min_size: i32,
    pub perc_identity: f64,
    pub band_kmer: usize,
    pub band_width: usize,
}

impl Default for CnsOptions {
    fn default() -> Self {
        CnsOptions {
            num_threads: 1,
            batch_size: 1000,
            use_batch_mode: false,
            min_cov: 4,
            min_size: 500,
            perc_identity: 65.0,
            band_kmer: 13,
            band_width: 100,
        }
    }
}

/// One template of the current batch: its id and hit run.
#[derive(Clone, Copy, Debug, Default)]
struct RawReadCnsInfo {
    oid: i32,
    can_from: usize,
    can_to: usize,
}

/// Shared batch output: one append-only buffer plus the span table used to
/// drain it in template order.
#[derive(Default)]
struct CnsBatchOutput {
    buf: String,
    spans: Vec<(usize, usize, usize)>, // (info_idx, offset, len)
}

/// Per-worker scratch, reset between templates, never shared.
struct CnsThreadData {
    qnorm: Vec<u8>,
    tnorm: Vec<u8>,
    fwd_subject: Vec<u8>,
    cov_stats: Vec<u8>,
    tags: Vec<AlignTag>,
    backbone: Backbone,
    chain: ChainWorkData,
    aligner: GappedAligner,
}

impl CnsThreadData {
    fn new(opts: &CnsOptions) -> CnsThreadData {
        CnsThreadData {
            qnorm: Vec::new(),
            tnorm: Vec::new(),
            fwd_subject: Vec::new(),
            cov_stats: Vec::new(),
            tags: Vec::new(),
            backbone: Backbone::new(),
            chain: ChainWorkData::new(2, 4),
            aligner: GappedAligner::new(opts.band_kmer, opts.band_width),
        }
    }
}

/// Confirms a k-mer chain between a query and its template window before
/// paying for gapped alignment. Only the top-scoring chain end is ever
/// considered; a hit whose best end fails the chain thresholds is dropped.
fn find_mem_anchor(
    chain: &mut ChainWorkData,
    query: &[u8],
    template_window: &[u8],
    kmer_size: usize,
) -> Option<(usize, i32)> {
    if query.len() < kmer_size || template_window.len() < kmer_size {
        return None;
    }
    let encode = |s: &[u8]| -> Vec<u8> { s.iter().map(|&c| encode_base(c)).collect() };
    let tres = encode(template_window);
    let qres = encode(query);
    let mut template_kmers: std::collections::HashMap<u64, Vec<i64>> = std::collections::HashMap::new();
    for j in 0..=tres.len() - kmer_size {
        template_kmers.entry(kmer_hash(&tres[j..j + kmer_size])).or_default().push(j as i64);
    }
    let mut seeds: Vec<ChainSeed> = Vec::new();
    let mut j = 0usize;
    while j + kmer_size <= qres.len() {
        let hash = kmer_hash(&qres[j..j + kmer_size]);
        if let Some(positions) = template_kmers.get(&hash) {
            for &soff in positions {
                seeds.push(ChainSeed {
                    qoff: j as i64,
                    soff,
                    length: kmer_size as i32,
                    sdir: FWD,
                    hash,
                });
            }
        }
        j += MEM_ANCHOR_WINDOW;
    }
    sort_seeds(&mut seeds);
    chain.find_best_kmer_match(&seeds)
}

/// Loads a consensus partition sorted by template id; batch mode caps every
/// template at `MAX_CNS_OVLPS` hits.
fn load_and_sort_cns_hits(can_dir: &Path, pid: usize, use_batch_mode: bool) -> Result<Vec<OverlapRecord>> {
    let hits = load_partition(can_dir, pid)?;
    if !use_batch_mode {
        return Ok(hits);
    }
    let mut capped = Vec::with_capacity(hits.len());
    for (lo, hi) in sid_group_ranges(&hits) {
        let take = (hi - lo).min(MAX_CNS_OVLPS);
        capped.extend_from_slice(&hits[lo..lo + take]);
    }
    Ok(capped)
}

fn range_is_saturated(cov_stats: &[u8], from: usize, to: usize) -> bool {
    if from >= to {
        return false;
    }
    let saturated = cov_stats[from..to].iter().filter(|&&c| c >= MAX_CNS_COV).count();
    saturated as f64 >= (to - from) as f64 * COV_SATURATION_FRAC
}

fn process_one_template(
    data: &mut CnsThreadData,
    store: &PackedDb,
    hits: &[OverlapRecord],
    opts: &CnsOptions,
) -> Option<(Vec<u8>, usize, usize)> {
    let sid = hits[0].sid as usize;
    let template_size = store.seq_size(sid);
    if template_size == 0 {
        return None;
    }
    data.fwd_subject = decode_seq(&store.extract_full(sid, FWD));
    data.cov_stats.clear();
    data.cov_stats.resize(template_size, 0);
    data.tags.clear();

    for hit in hits {
        debug_assert_eq!(hit.sid as usize, sid);
        debug_assert_eq!(hit.sdir, FWD as i32);
        let soff = (hit.soff.max(0) as usize).min(template_size);
        let send = (hit.send.max(0) as usize).min(template_size);
        if soff >= send || range_is_saturated(&data.cov_stats, soff, send) {
            continue;
        }
        let qid = hit.qid as usize;
        let qsize = store.seq_size(qid);
        let qoff = (hit.qoff.max(0) as usize).min(qsize);
        let qend = (hit.qend.max(0) as usize).min(qsize);
        if qoff >= qend {
            continue;
        }
        // forward-strand window, read out on the aligned orientation
        let qdir = hit.qdir as u8;
        let query = if qdir == FWD {
            decode_seq(&store.extract(qid, qoff, qend, FWD))
        } else {
            debug_assert_eq!(qdir, REV);
            decode_seq(&store.extract(qid, qoff, qend, REV))
        };
        if find_mem_anchor(&mut data.chain, &query, &data.fwd_subject[soff..send], opts.band_kmer)
            .is_none()
        {
            continue;
        }
        let pair = match data.aligner.align_local(&query, &data.fwd_subject[soff..send]) {
            Some(pair) => pair,
            None => continue,
        };
        if pair.ident_perc < opts.perc_identity {
            continue;
        }
        normalize_gaps(&pair.qaln, &pair.taln, &mut data.qnorm, &mut data.tnorm, true);
        let toff = soff + pair.toff;
        let tend = soff + pair.tend;
        make_align_tags(
            &data.qnorm,
            &data.tnorm,
            pair.qoff as i32,
            pair.qend as i32,
            toff as i32,
            tend as i32,
            DEFAULT_CNS_WEIGHT,
            &mut data.tags,
        );
        for c in &mut data.cov_stats[toff..tend] {
            *c = c.saturating_add(1);
        }
    }

    if data.tags.is_empty() {
        return None;
    }
    data.backbone.build(&mut data.tags, template_size);
    let segments = coverage_segments(data.backbone.coverage(), opts.min_cov);
    if segments.is_empty() {
        return None;
    }
    let mut cns_seq = Vec::new();
    let mut seg_seq = Vec::new();
    let mut cns_from = usize::MAX;
    let mut cns_to = 0usize;
    for (from, to) in segments {
        let (seg_from, seg_to) = consensus_backbone_segment(&mut data.backbone, from, to, &mut seg_seq);
        if seg_seq.is_empty() {
            continue;
        }
        cns_from = cns_from.min(seg_from);
        cns_to = cns_to.max(seg_to);
        cns_seq.extend_from_slice(&seg_seq);
    }
    if cns_seq.len() < opts.min_size as usize || cns_from >= cns_to {
        return None;
    }
    debug_assert!(cns_to <= template_size);
    debug_assert!(cns_seq.len() <= cns_to - cns_from);
    Some((cns_seq, cns_from, cns_to))
}

/// Splits the hit stream at `hit_idx` into the next batch of at most
/// `batch_size` templates.
fn next_batch(hits: &[OverlapRecord], hit_idx: &mut usize, batch_size: usize) -> Vec<RawReadCnsInfo> {
    let mut infos = Vec::new();
    let mut i = *hit_idx;
    while i < hits.len() && infos.len() < batch_size {
        let mut j = i + 1;
        while j < hits.len() && hits[j].sid == hits[i].sid {
            j += 1;
        }
        infos.push(RawReadCnsInfo { oid: hits[i].sid, can_from: i, can_to: j });
        i = j;
    }
    *hit_idx = i;
    infos
}

fn window_for_batch(store: &PackedDb, hits: &[OverlapRecord], infos: &[RawReadCnsInfo]) -> Vec<bool> {
    let mut needed = vec![false; store.num_seqs()];
    for info in infos {
        needed[info.oid as usize] = true;
        for hit in &hits[info.can_from..info.can_to] {
            needed[hit.qid as usize] = true;
        }
    }
    needed
}

fn run_batch(
    store: &PackedDb,
    hits: &[OverlapRecord],
    infos: &[RawReadCnsInfo],
    opts: &CnsOptions,
    out: &mut BufWriter<File>,
    bar: &ProgressBar,
) -> Result<()> {
    let cursor = GroupCursor::new();
    let output = Mutex::new(CnsBatchOutput::default());
    std::thread::scope(|scope| {
        for _ in 0..opts.num_threads.max(1) {
            scope.spawn(|| {
                let mut data = CnsThreadData::new(opts);
                loop {
                    let idx = cursor.claim();
                    if idx >= infos.len() {
                        break;
                    }
                    let info = infos[idx];
                    let result = process_one_template(
                        &mut data,
                        store,
                        &hits[info.can_from..info.can_to],
                        opts,
                    );
                    bar.inc(1);
                    if let Some((seq, cns_from, cns_to)) = result {
                        let text = format!(
                            ">{} [{}:{})\n{}\n",
                            info.oid,
                            cns_from,
                            cns_to,
                            std::str::from_utf8(&seq).unwrap_or_default()
                        );
                        let mut guard = output.lock().unwrap();
                        let offset = guard.buf.len();
                        guard.buf.push_str(&text);
                        guard.spans.push((idx, offset, text.len()));
                    }
                }
            });
        }
    });
    let output = output.into_inner().unwrap();
    for (_, offset, len) in output.spans.into_iter().sorted() {
        out.write_all(output.buf[offset..offset + len].as_bytes())?;
    }
    Ok(())
}

pub fn cns_main(
    can_dir: &Path,
    reads_dir: &Path,
    title: &str,
    out_dir: &Path,
    opts: &CnsOptions,
) -> Result<()> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut store = if opts.use_batch_mode {
        PackedDb::open_windowed(reads_dir, title)?
    } else {
        PackedDb::load(reads_dir, title)?
    };
    let np = load_partition_count(can_dir)?;
    for pid in 0..np {
        let hits = load_and_sort_cns_hits(can_dir, pid, opts.use_batch_mode)?;
        if hits.is_empty() {
            continue;
        }
        let num_templates = sid_group_ranges(&hits).len();
        info!("consensus: partition {pid} of {np}, {num_templates} templates");
        let out_path = out_dir.join(format!("p{pid:08}.cns.fasta"));
        let mut out = BufWriter::new(
            File::create(&out_path).with_context(|| format!("creating {}", out_path.display()))?,
        );
        let bar = ProgressBar::new(num_templates as u64);
        let mut hit_idx = 0usize;
        loop {
            let infos = next_batch(&hits, &mut hit_idx, opts.batch_size.max(1));
            if infos.is_empty() {
                break;
            }
            if opts.use_batch_mode {
                let needed = window_for_batch(&store, &hits, &infos);
                store.load_window(&needed)?;
            }
            run_batch(&store, &hits, &infos, opts, &mut out, &bar)?;
        }
        bar.finish_and_clear();
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlap::partition::{partition_records, PartitionOptions};
    use crate::overlap::record::write_records;
    use crate::sequence::dna::{encode_seq, reverse_complement};
    use crate::sequence::mkdb::PackedDbBuilder;
    use tempfile::TempDir;

    const TEMPLATE: &[u8] = b"ACGGTTACAGATTACACCGGTTAAACCGTATCGCGATCAGTTAACCGGATCGATCCGTAG";

    fn hit(qid: i32, qdir: u8, qsize: i64, sid: i32, ssize: i64) -> OverlapRecord {
        OverlapRecord {
            qid,
            qdir: qdir as i32,
            qoff: 0,
            qend: qsize,
            qsize,
            sid,
            sdir: FWD as i32,
            soff: 0,
            send: ssize,
            ssize,
            ident_perc: 99.0,
            score: 100,
        }
    }

    fn test_opts() -> CnsOptions {
        CnsOptions {
            num_threads: 2,
            batch_size: 4,
            min_cov: 2,
            min_size: 10,
            band_kmer: 8,
            band_width: 20,
            ..CnsOptions::default()
        }
    }

    fn setup_pipeline(use_batch_mode: bool) -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let reads_dir = tmp.path().join("db");
        std::fs::create_dir_all(&reads_dir).unwrap();

        // read 1 carries one substitution, read 2 is the reverse complement,
        // read 3 a clean forward copy; the error is outvoted two to one
        let mut noisy = TEMPLATE.to_vec();
        noisy[30] = b'C';
        let rc = crate::sequence::dna::decode_seq(&reverse_complement(&encode_seq(TEMPLATE)));
        let mut builder = PackedDbBuilder::new(&reads_dir, "reads", 1 << 30);
        builder.add_read("template", TEMPLATE).unwrap();
        builder.add_read("noisy", &noisy).unwrap();
        builder.add_read("flipped", &rc).unwrap();
        builder.add_read("copy", TEMPLATE).unwrap();
        builder.finish().unwrap();

        let len = TEMPLATE.len() as i64;
        let records =
            vec![hit(1, FWD, len, 0, len), hit(2, REV, len, 0, len), hit(3, FWD, len, 0, len)];
        let rec_path = tmp.path().join("cns_hits.bin");
        write_records(&rec_path, &records).unwrap();
        let can_dir = tmp.path().join("parts");
        let popts = PartitionOptions { batch_size: 10, min_ident_perc: 0.0, ..Default::default() };
        partition_records(&rec_path, &can_dir, 4, &popts).unwrap();

        let out_dir = tmp.path().join("cns");
        let mut opts = test_opts();
        opts.use_batch_mode = use_batch_mode;
        cns_main(&can_dir, &reads_dir, "reads", &out_dir, &opts).unwrap();
        let fasta = std::fs::read_to_string(out_dir.join("p00000000.cns.fasta")).unwrap();
        (tmp, fasta)
    }

    #[test]
    fn corrects_a_template_from_its_overlaps() {
        let (_tmp, fasta) = setup_pipeline(false);
        let mut lines = fasta.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with(">0 ["));
        let seq = lines.next().unwrap();
        // consensus follows the two error-free strands
        assert!(std::str::from_utf8(TEMPLATE).unwrap().contains(seq));
        assert!(seq.len() + 1 >= TEMPLATE.len() - 2);
    }

    #[test]
    fn batch_mode_matches_full_mode() {
        let (_tmp_a, full) = setup_pipeline(false);
        let (_tmp_b, windowed) = setup_pipeline(true);
        assert_eq!(full, windowed);
    }

    #[test]
    fn saturation_check_trips_only_on_deep_cover() {
        let mut cov = vec![0u8; 100];
        assert!(!range_is_saturated(&cov, 0, 100));
        for c in cov.iter_mut() {
            *c = MAX_CNS_COV;
        }
        assert!(range_is_saturated(&cov, 0, 100));
        assert!(!range_is_saturated(&cov, 0, 0));
    }

    #[test]
    fn batches_split_on_template_groups() {
        let len = 100i64;
        let hits = vec![
            hit(1, FWD, len, 0, len),
            hit(2, FWD, len, 0, len),
            hit(3, FWD, len, 5, len),
            hit(4, FWD, len, 7, len),
        ];
        let mut idx = 0usize;
        let b1 = next_batch(&hits, &mut idx, 2);
        assert_eq!(b1.len(), 2);
        assert_eq!((b1[0].oid, b1[0].can_from, b1[0].can_to), (0, 0, 2));
        assert_eq!((b1[1].oid, b1[1].can_from, b1[1].can_to), (5, 2, 3));
        let b2 = next_batch(&hits, &mut idx, 2);
        assert_eq!(b2.len(), 1);
        assert_eq!(b2[0].oid, 7);
        assert!(next_batch(&hits, &mut idx, 2).is_empty());
    }
}
