use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::overlap::partition::{load_partition, load_partition_count};
use crate::overlap::record::{read_records, OverlapRecord};

/// Text rendering of one record, fields in the order the tab-separated
/// overlap listings use everywhere else in the pipeline.
pub fn record_to_tsv(rec: &OverlapRecord) -> String {
    format!(
        "{}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        rec.qid,
        rec.sid,
        rec.ident_perc,
        rec.score,
        rec.qdir,
        rec.qoff,
        rec.qend,
        rec.qsize,
        rec.sdir,
        rec.soff,
        rec.send,
        rec.ssize
    )
}

/// Dumps a raw candidate file, or every batch of a partition directory, as
/// TSV to `out`.
pub fn show_records(path: &Path, out: &mut dyn Write) -> Result<()> {
    if path.is_dir() {
        let np = load_partition_count(path)?;
        for pid in 0..np {
            for rec in load_partition(path, pid)? {
                writeln!(out, "{}", record_to_tsv(&rec))?;
            }
        }
    } else {
        for rec in read_records(path)? {
            writeln!(out, "{}", record_to_tsv(&rec))?;
        }
    }
    Ok(())
}
