use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::sequence::packed_store::PackedDb;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub num_reads: usize,
    pub num_residues: u64,
    pub min_size: usize,
    pub max_size: usize,
    pub n50: usize,
}

pub fn collect_read_stats(db: &PackedDb) -> ReadStats {
    let mut sizes: Vec<usize> = (0..db.num_seqs()).map(|id| db.seq_size(id)).collect();
    if sizes.is_empty() {
        return ReadStats::default();
    }
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    let num_residues: u64 = sizes.iter().map(|&s| s as u64).sum();
    let mut acc = 0u64;
    let mut n50 = 0usize;
    for &size in &sizes {
        acc += size as u64;
        if acc * 2 >= num_residues {
            n50 = size;
            break;
        }
    }
    ReadStats {
        num_reads: sizes.len(),
        num_residues,
        min_size: *sizes.last().unwrap(),
        max_size: sizes[0],
        n50,
    }
}

pub fn stat_main(reads_dir: &Path, title: &str, out: &mut dyn Write) -> Result<()> {
    let db = PackedDb::load(reads_dir, title)?;
    let stats = collect_read_stats(&db);
    writeln!(out, "reads\t{}", stats.num_reads)?;
    writeln!(out, "residues\t{}", stats.num_residues)?;
    writeln!(out, "min\t{}", stats.min_size)?;
    writeln!(out, "max\t{}", stats.max_size)?;
    writeln!(out, "n50\t{}", stats.n50)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::mkdb::PackedDbBuilder;
    use tempfile::TempDir;

    #[test]
    fn n50_weighs_long_reads() {
        let tmp = TempDir::new().unwrap();
        let mut builder = PackedDbBuilder::new(tmp.path(), "reads", 1 << 30);
        for (name, len) in [("a", 100usize), ("b", 400), ("c", 500)] {
            builder.add_read(name, &vec![b'A'; len]).unwrap();
        }
        builder.finish().unwrap();
        let db = PackedDb::load(tmp.path(), "reads").unwrap();
        let stats = collect_read_stats(&db);
        assert_eq!(stats.num_reads, 3);
        assert_eq!(stats.num_residues, 1000);
        assert_eq!((stats.min_size, stats.max_size), (100, 500));
        assert_eq!(stats.n50, 500);
    }

    #[test]
    fn empty_store_is_all_zero() {
        let tmp = TempDir::new().unwrap();
        PackedDbBuilder::new(tmp.path(), "reads", 1 << 30).finish().unwrap();
        let db = PackedDb::load(tmp.path(), "reads").unwrap();
        assert_eq!(collect_read_stats(&db), ReadStats::default());
    }
}
