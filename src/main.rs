extern crate anyhow;
extern crate bio;
extern crate clap;
extern crate indicatif;
extern crate itertools;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate rayon;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::chain::search::{candidates_main, SearchOptions};
use crate::cns::worker::{cns_main, CnsOptions};
use crate::overlap::partition::{partition_records, PartitionOptions};
use crate::overlap::show::show_records;
use crate::sequence::mkdb::{mkdb_main, DEFAULT_DB_TITLE};
use crate::sequence::packed_store::load_db_info;
use crate::sequence::stat::stat_main;
use crate::trim::lcr::{lcr_main, LcrOptions};
use crate::trim::split::{split_main, SplitOptions};
use crate::trim::trim_bases::trim_bases_main;

mod sequence {
    pub mod dna;
    pub mod mkdb;
    pub mod packed_store;
    pub mod stat;
}

mod index {
    pub mod lookup;
    pub mod radix_sort;
}

mod chain {
    pub mod chainer;
    pub mod search;
}

mod align {
    pub mod gapped;
}

mod overlap {
    pub mod partition;
    pub mod record;
    pub mod show;
}

mod trim {
    pub mod clipped;
    pub mod intervals;
    pub mod lcr;
    pub mod split;
    pub mod trim_bases;
}

mod cns {
    pub mod align_tag;
    pub mod arena;
    pub mod backbone;
    pub mod decoder;
    pub mod worker;
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build a packed 2-bit read database from FASTA files
    Mkdb {
        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long, default_value_t = 2_000_000_000)]
        volume_size: u64,

        #[clap(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Find overlap candidates between all reads of the database
    Candidates {
        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long)]
        output: PathBuf,

        #[clap(long, default_value_t = 13)]
        kmer_size: usize,

        #[clap(long, default_value_t = 5)]
        window_size: usize,

        #[clap(long, default_value_t = 1000)]
        max_kmer_occ: usize,

        #[clap(long, default_value_t = 3)]
        min_seed_count: i32,

        #[clap(long, default_value_t = 20)]
        min_chain_score: i32,

        #[clap(long, default_value_t = 500)]
        min_ovlp_size: i64,

        #[clap(long, default_value_t = 65.0)]
        min_identity: f64,

        #[clap(long, short = 't', default_value_t = 1)]
        threads: usize,
    },
    /// Shard overlap records into subject-id batches
    Partition {
        #[clap(long)]
        candidates: PathBuf,

        #[clap(long)]
        wrk_dir: PathBuf,

        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long, default_value_t = 100000)]
        batch_size: usize,

        #[clap(long, default_value_t = 100)]
        dumped_files: usize,

        #[clap(long, default_value_t = 0.0)]
        min_identity: f64,

        #[clap(long, short = 't', default_value_t = 1)]
        threads: usize,
    },
    /// Largest-cover-range clear ranges per read
    Lcr {
        #[clap(long)]
        candidates_dir: PathBuf,

        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long, default_value_t = 1)]
        min_ovlp_size: i32,

        #[clap(long, default_value_t = 1)]
        min_cov: i32,

        #[clap(long, default_value_t = 500)]
        min_read_size: i32,

        #[clap(long)]
        output: PathBuf,

        #[clap(long, short = 't', default_value_t = 1)]
        threads: usize,
    },
    /// Subread and palindrome detection on top of LCR clear ranges
    Split {
        #[clap(long)]
        candidates_dir: PathBuf,

        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long)]
        clear_ranges: PathBuf,

        #[clap(long, default_value_t = 500)]
        min_read_size: i32,

        #[clap(long)]
        output: PathBuf,

        #[clap(long, short = 't', default_value_t = 1)]
        threads: usize,
    },
    /// Apply final clear ranges and emit trimmed FASTA
    Trim {
        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long)]
        split_ranges: PathBuf,

        #[clap(long)]
        numeric_headers: bool,

        #[clap(long)]
        output: PathBuf,
    },
    /// Print binary overlap records (a file or a partition directory) as TSV
    Show {
        #[clap(long)]
        records: PathBuf,
    },
    /// Summary statistics of a packed read database
    Stat {
        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,
    },
    /// Consensus-correct reads from partitioned candidates
    Cns {
        #[clap(long)]
        candidates_dir: PathBuf,

        #[clap(long)]
        reads_dir: PathBuf,

        #[clap(long, default_value = DEFAULT_DB_TITLE)]
        title: String,

        #[clap(long)]
        out_dir: PathBuf,

        #[clap(long, default_value_t = 1000)]
        batch_size: usize,

        #[clap(long)]
        batch_mode: bool,

        #[clap(long, default_value_t = 4)]
        min_cov: i32,

        #[clap(long, default_value_t = 500)]
        min_size: i32,

        #[clap(long, default_value_t = 65.0)]
        min_identity: f64,

        #[clap(long, default_value_t = 13)]
        band_kmer: usize,

        #[clap(long, default_value_t = 100)]
        band_width: usize,

        #[clap(long, short = 't', default_value_t = 1)]
        threads: usize,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Cmd,
}

fn run(args: Args) -> Result<()> {
    match args.cmd {
        Cmd::Mkdb { reads_dir, title, volume_size, inputs } => {
            mkdb_main(&inputs, &reads_dir, &title, volume_size)
        }
        Cmd::Candidates {
            reads_dir,
            title,
            output,
            kmer_size,
            window_size,
            max_kmer_occ,
            min_seed_count,
            min_chain_score,
            min_ovlp_size,
            min_identity,
            threads,
        } => {
            let mut opts = SearchOptions {
                min_seed_count,
                min_chain_score,
                min_ovlp_size,
                min_ident_perc: min_identity,
                num_threads: threads,
                ..SearchOptions::default()
            };
            opts.index.kmer_size = kmer_size;
            opts.index.window_size = window_size;
            opts.index.max_kmer_occ = max_kmer_occ;
            candidates_main(&reads_dir, &title, &output, &opts)
        }
        Cmd::Partition {
            candidates,
            wrk_dir,
            reads_dir,
            title,
            batch_size,
            dumped_files,
            min_identity,
            threads,
        } => {
            let db_info = load_db_info(&reads_dir, &title)?;
            let opts = PartitionOptions {
                batch_size,
                num_dumped_files: dumped_files,
                num_threads: threads,
                min_ident_perc: min_identity,
            };
            let np = partition_records(&candidates, &wrk_dir, db_info.num_seqs, &opts)?;
            info!("wrote {np} partitions under {}", wrk_dir.display());
            Ok(())
        }
        Cmd::Lcr {
            candidates_dir,
            reads_dir,
            title,
            min_ovlp_size,
            min_cov,
            min_read_size,
            output,
            threads,
        } => {
            let opts = LcrOptions { min_ovlp_size, min_cov, min_read_size, num_threads: threads };
            lcr_main(&candidates_dir, &reads_dir, &title, &opts, &output)
        }
        Cmd::Split {
            candidates_dir,
            reads_dir,
            title,
            clear_ranges,
            min_read_size,
            output,
            threads,
        } => {
            let opts = SplitOptions { min_read_size, num_threads: threads };
            split_main(&candidates_dir, &reads_dir, &title, &clear_ranges, &opts, &output)
        }
        Cmd::Trim { reads_dir, title, split_ranges, numeric_headers, output } => {
            trim_bases_main(&reads_dir, &title, &split_ranges, numeric_headers, &output)
        }
        Cmd::Show { records } => show_records(&records, &mut std::io::stdout().lock()),
        Cmd::Stat { reads_dir, title } => {
            stat_main(&reads_dir, &title, &mut std::io::stdout().lock())
        }
        Cmd::Cns {
            candidates_dir,
            reads_dir,
            title,
            out_dir,
            batch_size,
            batch_mode,
            min_cov,
            min_size,
            min_identity,
            band_kmer,
            band_width,
            threads,
        } => {
            let opts = CnsOptions {
                num_threads: threads,
                batch_size,
                use_batch_mode: batch_mode,
                min_cov,
                min_size,
                perc_identity: min_identity,
                band_kmer,
                band_width,
            };
            cns_main(&candidates_dir, &reads_dir, &title, &out_dir, &opts)
        }
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init_timed();

    let args = Args::parse();
    trace!("{:?}", &args.cmd);
    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::dna::{decode_seq, encode_seq, reverse_complement};
    use crate::trim::clipped::load_clipped_ranges;
    use rand::prelude::*;
    use std::fmt::Write as _;
    use std::io::Write as _;

    fn random_genome(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    fn write_fasta(path: &std::path::Path, reads: &[(&str, &[u8])]) {
        let mut text = String::new();
        for (name, seq) in reads {
            writeln!(text, ">{}", name).unwrap();
            writeln!(text, "{}", std::str::from_utf8(seq).unwrap()).unwrap();
        }
        let mut out = std::fs::File::create(path).unwrap();
        out.write_all(text.as_bytes()).unwrap();
    }

    /// The whole pipeline on three mutually overlapping error-free reads
    /// plus one junk read: database build, candidate search, partitioning,
    /// both trim stages, trimmed output, consensus.
    #[test]
    fn pipeline_end_to_end() {
        let tmp = tempfile::TempDir::new().unwrap();
        let genome = random_genome(400, 42);
        let rc_genome = decode_seq(&reverse_complement(&encode_seq(&genome)));
        let flipped = decode_seq(&reverse_complement(&encode_seq(&genome[100..350])));
        let junk = vec![b'A'; 60];
        let fasta = tmp.path().join("reads.fasta");
        write_fasta(
            &fasta,
            &[
                ("r0", &genome[0..250]),
                ("r1", &genome[150..400]),
                ("r2", &flipped),
                ("r3", &junk),
            ],
        );

        let reads_dir = tmp.path().join("db");
        mkdb_main(&[fasta], &reads_dir, "reads", 1 << 30).unwrap();

        let candidates = tmp.path().join("candidates.bin");
        let mut sopts = SearchOptions {
            min_seed_count: 2,
            min_chain_score: 10,
            min_ovlp_size: 50,
            band_kmer: 8,
            band_width: 30,
            num_threads: 2,
            ..SearchOptions::default()
        };
        sopts.index.kmer_size = 9;
        sopts.index.window_size = 3;
        candidates_main(&reads_dir, "reads", &candidates, &sopts).unwrap();
        let found = crate::overlap::record::read_records(&candidates).unwrap();
        assert!(found.len() >= 3, "expected the three true overlaps, got {}", found.len());
        assert!(found.iter().all(|r| r.qid < r.sid));

        let can_dir = tmp.path().join("pm");
        let popts = PartitionOptions {
            batch_size: 2,
            num_dumped_files: 1,
            num_threads: 2,
            min_ident_perc: 0.0,
        };
        let db_info = load_db_info(&reads_dir, "reads").unwrap();
        let np = crate::overlap::partition::partition_records(
            &candidates,
            &can_dir,
            db_info.num_seqs,
            &popts,
        )
        .unwrap();
        assert_eq!(np, 2);

        let clear_path = tmp.path().join("lcr.txt");
        let lopts = LcrOptions { min_ovlp_size: 1, min_cov: 1, min_read_size: 50, num_threads: 2 };
        lcr_main(&can_dir, &reads_dir, "reads", &lopts, &clear_path).unwrap();
        let clear = load_clipped_ranges(&clear_path, 4).unwrap();
        for id in 0..3 {
            assert!(clear[id].right - clear[id].left >= 50, "read {id}: {:?}", clear[id]);
        }
        assert!(clear[3].is_discarded());

        let split_path = tmp.path().join("split.txt");
        let spopts = SplitOptions { min_read_size: 50, num_threads: 2 };
        split_main(&can_dir, &reads_dir, "reads", &clear_path, &spopts, &split_path).unwrap();
        let split = load_clipped_ranges(&split_path, 4).unwrap();
        for id in 0..3 {
            // no chimeric joints here: split leaves the clear ranges alone
            assert_eq!(split[id], clear[id]);
        }

        let trimmed = tmp.path().join("trimmed.fasta");
        trim_bases_main(&reads_dir, "reads", &split_path, false, &trimmed).unwrap();
        let trimmed_text = std::fs::read_to_string(&trimmed).unwrap();
        assert_eq!(trimmed_text.lines().filter(|l| l.starts_with('>')).count(), 3);

        let cns_dir = tmp.path().join("cns");
        let copts = CnsOptions {
            num_threads: 2,
            batch_size: 2,
            min_cov: 1,
            min_size: 50,
            band_kmer: 8,
            band_width: 30,
            ..CnsOptions::default()
        };
        cns_main(&can_dir, &reads_dir, "reads", &cns_dir, &copts).unwrap();
        let genome_str = String::from_utf8(genome.clone()).unwrap();
        let rc_str = String::from_utf8(rc_genome).unwrap();
        let mut corrected = 0usize;
        for pid in 0..np {
            let path = cns_dir.join(format!("p{pid:08}.cns.fasta"));
            let text = std::fs::read_to_string(&path).unwrap();
            let mut lines = text.lines();
            while let Some(header) = lines.next() {
                assert!(header.starts_with('>'));
                let seq = lines.next().unwrap();
                assert!(
                    genome_str.contains(seq) || rc_str.contains(seq),
                    "corrected read is not a genome substring"
                );
                assert!(seq.len() >= 50);
                corrected += 1;
            }
        }
        assert_eq!(corrected, 3);
    }
}
