use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::sequence::dna::{decode_seq, FWD};
use crate::sequence::packed_store::PackedDb;
use crate::trim::clipped::load_clipped_ranges;

/// Applies final clear ranges to the packed store and emits trimmed FASTA.
/// With `numeric_headers` the surviving reads are renumbered from 1.
pub fn trim_bases_main(
    reads_dir: &Path,
    title: &str,
    split_ranges_path: &Path,
    numeric_headers: bool,
    output: &Path,
) -> Result<()> {
    let db = PackedDb::load(reads_dir, title)?;
    let ranges = load_clipped_ranges(split_ranges_path, db.num_seqs())?;
    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let mut next_id = 1usize;
    let mut kept = 0usize;
    for id in 0..db.num_seqs() {
        let range = ranges[id];
        if range.size == 0 {
            continue;
        }
        debug_assert_eq!(range.size as usize, db.seq_size(id));
        let seq = decode_seq(&db.extract(id, range.left as usize, range.right as usize, FWD));
        let span = format!(
            "[From:To:OrgSeqSize:TrimSeqSize] = [{}:{}:{}:{}]",
            range.left,
            range.right,
            range.size,
            range.right - range.left
        );
        if numeric_headers {
            writeln!(out, ">{} {} {}", next_id, db.name(id), span)?;
            next_id += 1;
        } else {
            writeln!(out, ">{} {}", db.name(id), span)?;
        }
        out.write_all(&seq)?;
        writeln!(out)?;
        kept += 1;
    }
    out.flush()?;
    info!("trimmed {} of {} reads into {}", kept, db.num_seqs(), output.display());
    Ok(())
}
