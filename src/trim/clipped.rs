use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Clear range of one read. `left == right == 0` encodes a discarded read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClippedRange {
    pub left: i32,
    pub right: i32,
    pub size: i32,
}

impl ClippedRange {
    pub fn is_discarded(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

/// Writes the 4-column table `id\tleft\tright\tsize`, one dense line per
/// read id. Ranges shorter than `min_size` are zeroed out on the way.
pub fn dump_clipped_ranges(path: &Path, ranges: &[ClippedRange], min_size: i32) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for (id, range) in ranges.iter().enumerate() {
        let mut r = *range;
        if r.right - r.left < min_size {
            r = ClippedRange::default();
        }
        writeln!(out, "{}\t{}\t{}\t{}", id, r.left, r.right, r.size)?;
    }
    out.flush()?;
    Ok(())
}

pub fn load_clipped_ranges(path: &Path, num_reads: usize) -> Result<Vec<ClippedRange>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut ranges = Vec::with_capacity(num_reads);
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let mut next_i32 = || -> Result<i32> {
            fields
                .next()
                .with_context(|| format!("{}:{}: missing field", path.display(), lineno + 1))?
                .parse::<i32>()
                .with_context(|| format!("{}:{}: malformed field", path.display(), lineno + 1))
        };
        let id = next_i32()?;
        if id as usize != lineno {
            bail!("{}:{}: ids must be dense from 0", path.display(), lineno + 1);
        }
        ranges.push(ClippedRange { left: next_i32()?, right: next_i32()?, size: next_i32()? });
    }
    if ranges.len() != num_reads {
        bail!(
            "{}: expected {} rows, found {}",
            path.display(),
            num_reads,
            ranges.len()
        );
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn table_round_trip_with_min_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clear_ranges.txt");
        let ranges = vec![
            ClippedRange { left: 100, right: 900, size: 1000 },
            ClippedRange { left: 10, right: 40, size: 1000 },
            ClippedRange::default(),
        ];
        dump_clipped_ranges(&path, &ranges, 100).unwrap();
        let loaded = load_clipped_ranges(&path, 3).unwrap();
        assert_eq!(loaded[0], ranges[0]);
        // the 30 bp range fell under min_size and was discarded
        assert!(loaded[1].is_discarded());
        assert!(loaded[2].is_discarded());
        assert!(load_clipped_ranges(&path, 5).is_err());
    }
}
