use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::info;

use crate::align::gapped::GappedAligner;
use crate::chain::chainer::{sort_seeds, ChainSeed, ChainWorkData, InitHit};
use crate::index::lookup::{kmer_hash, KmerIndex, KmerIndexOptions};
use crate::overlap::partition::GroupCursor;
use crate::overlap::record::OverlapRecord;
use crate::sequence::dna::{decode_seq, FWD, REV};
use crate::sequence::packed_store::PackedDb;

/// Slack added around a chain's seed extent before gapped refinement.
const REFINE_MARGIN: i64 = 50;

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub index: KmerIndexOptions,
    pub min_seed_count: i32,
    pub min_chain_score: i32,
    pub min_ovlp_size: i64,
    pub min_ident_perc: f64,
    pub band_kmer: usize,
    pub band_width: usize,
    pub num_threads: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            index: KmerIndexOptions::default(),
            min_seed_count: 3,
            min_chain_score: 20,
            min_ovlp_size: 500,
            min_ident_perc: 65.0,
            band_kmer: 13,
            band_width: 128,
            num_threads: 1,
        }
    }
}

struct SearchThreadData {
    chain: ChainWorkData,
    aligner: GappedAligner,
    seeds: Vec<(i32, ChainSeed)>,
    hits: Vec<InitHit>,
    chain_seeds: Vec<ChainSeed>,
    records: Vec<OverlapRecord>,
}

impl SearchThreadData {
    fn new(opts: &SearchOptions) -> SearchThreadData {
        SearchThreadData {
            chain: ChainWorkData::new(opts.min_seed_count, opts.min_chain_score),
            aligner: GappedAligner::new(opts.band_kmer, opts.band_width),
            seeds: Vec::new(),
            hits: Vec::new(),
            chain_seeds: Vec::new(),
            records: Vec::new(),
        }
    }
}

/// Collects seeds of one query strand against every larger-id subject.
fn collect_seeds(
    db: &PackedDb,
    index: &KmerIndex,
    qid: usize,
    qseq: &[u8],
    qdir: u8,
    seeds: &mut Vec<(i32, ChainSeed)>,
) {
    let k = index.kmer_size();
    let w = index.window_size();
    let mut j = 0usize;
    while j + k <= qseq.len() {
        let hash = kmer_hash(&qseq[j..j + k]);
        for &occ in index.lookup(hash) {
            let (sid, spos) = db.resolve(occ);
            if sid <= qid {
                continue;
            }
            seeds.push((
                sid as i32,
                ChainSeed { qoff: j as i64, soff: spos as i64, length: k as i32, sdir: qdir, hash },
            ));
        }
        j += w;
    }
}

/// Refines one chain into a full overlap record via the gapped aligner.
/// Query coordinates come back on the forward strand regardless of the
/// scanned orientation.
#[allow(clippy::too_many_arguments)]
fn refine_hit(
    data_aligner: &mut GappedAligner,
    db: &PackedDb,
    qid: usize,
    qseq: &[u8],
    qdir: u8,
    sid: usize,
    hit: &InitHit,
    chain_seeds: &[ChainSeed],
    opts: &SearchOptions,
) -> Option<OverlapRecord> {
    let run = &chain_seeds[hit.chain_seed_offset..hit.chain_seed_offset + hit.chain_seed_count];
    let qsize = qseq.len() as i64;
    let ssize = db.seq_size(sid) as i64;
    let qb = (run[0].qoff - REFINE_MARGIN).max(0);
    let qe = (run[run.len() - 1].qoff + run[run.len() - 1].length as i64 + REFINE_MARGIN).min(qsize);
    let sb = (run[0].soff - REFINE_MARGIN).max(0);
    let se = (run[run.len() - 1].soff + run[run.len() - 1].length as i64 + REFINE_MARGIN).min(ssize);
    if qb >= qe || sb >= se {
        return None;
    }
    let sseq = decode_seq(&db.extract(sid, sb as usize, se as usize, FWD));
    let qwin = &qseq[qb as usize..qe as usize];
    let qascii = decode_seq(qwin);
    let pair = data_aligner.align_local(&qascii, &sseq)?;
    if pair.ident_perc < opts.min_ident_perc {
        return None;
    }
    let soff = sb + pair.toff as i64;
    let send = sb + pair.tend as i64;
    let scan_qoff = qb + pair.qoff as i64;
    let scan_qend = qb + pair.qend as i64;
    if (send - soff).min(scan_qend - scan_qoff) < opts.min_ovlp_size {
        return None;
    }
    // scanned-strand coordinates back onto the forward strand
    let (qoff, qend) = if qdir == FWD {
        (scan_qoff, scan_qend)
    } else {
        (qsize - scan_qend, qsize - scan_qoff)
    };
    Some(OverlapRecord {
        qid: qid as i32,
        qdir: qdir as i32,
        qoff,
        qend,
        qsize,
        sid: sid as i32,
        sdir: FWD as i32,
        soff,
        send,
        ssize,
        ident_perc: pair.ident_perc,
        score: hit.score,
    })
}

fn search_one_query(
    data: &mut SearchThreadData,
    db: &PackedDb,
    index: &KmerIndex,
    qid: usize,
    opts: &SearchOptions,
) {
    data.records.clear();
    let k = index.kmer_size();
    if db.seq_size(qid) < k {
        return;
    }
    for qdir in [FWD, REV] {
        let qseq = db.extract_full(qid, qdir);
        data.seeds.clear();
        collect_seeds(db, index, qid, &qseq, qdir, &mut data.seeds);
        if data.seeds.is_empty() {
            continue;
        }
        data.seeds.sort_unstable_by_key(|(sid, seed)| (*sid, seed.soff, seed.qoff));
        let mut i = 0usize;
        while i < data.seeds.len() {
            let sid = data.seeds[i].0;
            let mut j = i + 1;
            while j < data.seeds.len() && data.seeds[j].0 == sid {
                j += 1;
            }
            let mut group: Vec<ChainSeed> = data.seeds[i..j].iter().map(|(_, s)| *s).collect();
            sort_seeds(&mut group);
            data.hits.clear();
            data.chain_seeds.clear();
            data.chain.find_candidates(&group, FWD, &mut data.hits, &mut data.chain_seeds);
            for hit in &data.hits {
                if let Some(record) = refine_hit(
                    &mut data.aligner,
                    db,
                    qid,
                    &qseq,
                    qdir,
                    sid as usize,
                    hit,
                    &data.chain_seeds,
                    opts,
                ) {
                    data.records.push(record);
                }
            }
            i = j;
        }
    }
}

/// Indexes the whole store, scans every query on both strands, chains the
/// seeds per subject and streams refined overlap records to `output`.
pub fn candidates_main(
    reads_dir: &Path,
    title: &str,
    output: &Path,
    opts: &SearchOptions,
) -> Result<()> {
    let db = PackedDb::load(reads_dir, title)?;
    let index = KmerIndex::build(&db, &opts.index, opts.num_threads);
    info!("searching {} reads for overlap candidates", db.num_seqs());
    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let out = Mutex::new(BufWriter::new(file));
    let cursor = GroupCursor::new();
    let bar = ProgressBar::new(db.num_seqs() as u64);
    let mut n_records = 0usize;
    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for _ in 0..opts.num_threads.max(1) {
            handles.push(scope.spawn(|| -> Result<usize> {
                let mut data = SearchThreadData::new(opts);
                let mut bytes = Vec::new();
                let mut produced = 0usize;
                loop {
                    let qid = cursor.claim();
                    if qid >= db.num_seqs() {
                        return Ok(produced);
                    }
                    search_one_query(&mut data, &db, &index, qid, opts);
                    bar.inc(1);
                    if data.records.is_empty() {
                        continue;
                    }
                    bytes.clear();
                    for record in &data.records {
                        record.write_to(&mut bytes);
                    }
                    produced += data.records.len();
                    out.lock().unwrap().write_all(&bytes)?;
                }
            }));
        }
        for handle in handles {
            n_records += handle.join().expect("search worker panicked")?;
        }
        Ok(())
    })?;
    bar.finish_and_clear();
    out.into_inner().unwrap().flush()?;
    info!("found {} overlap candidates", n_records);
    Ok(())
}
