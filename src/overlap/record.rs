use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::sequence::dna::{FWD, REV};

/// The 12-field overlap/candidate tuple. Offsets always live on the forward
/// strand of their own sequence; only `qdir ^ sdir` carries orientation
/// meaning. The normalized (on-disk) form has `sdir == FWD`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlapRecord {
    pub qid: i32,
    pub qdir: i32,
    pub qoff: i64,
    pub qend: i64,
    pub qsize: i64,
    pub sid: i32,
    pub sdir: i32,
    pub soff: i64,
    pub send: i64,
    pub ssize: i64,
    pub ident_perc: f64,
    pub score: i32,
}

/// Fixed little-endian wire size; partition files are raw concatenations of
/// records with no header.
pub const RECORD_BYTES: usize = 76;

impl OverlapRecord {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.qid.to_le_bytes());
        out.extend_from_slice(&self.qdir.to_le_bytes());
        out.extend_from_slice(&self.qoff.to_le_bytes());
        out.extend_from_slice(&self.qend.to_le_bytes());
        out.extend_from_slice(&self.qsize.to_le_bytes());
        out.extend_from_slice(&self.sid.to_le_bytes());
        out.extend_from_slice(&self.sdir.to_le_bytes());
        out.extend_from_slice(&self.soff.to_le_bytes());
        out.extend_from_slice(&self.send.to_le_bytes());
        out.extend_from_slice(&self.ssize.to_le_bytes());
        out.extend_from_slice(&self.ident_perc.to_le_bytes());
        out.extend_from_slice(&self.score.to_le_bytes());
    }

    pub fn from_bytes(b: &[u8]) -> OverlapRecord {
        debug_assert!(b.len() >= RECORD_BYTES);
        let i32_at = |o: usize| i32::from_le_bytes(b[o..o + 4].try_into().unwrap());
        let i64_at = |o: usize| i64::from_le_bytes(b[o..o + 8].try_into().unwrap());
        OverlapRecord {
            qid: i32_at(0),
            qdir: i32_at(4),
            qoff: i64_at(8),
            qend: i64_at(16),
            qsize: i64_at(24),
            sid: i32_at(32),
            sdir: i32_at(36),
            soff: i64_at(40),
            send: i64_at(48),
            ssize: i64_at(56),
            ident_perc: f64::from_le_bytes(b[64..72].try_into().unwrap()),
            score: i32_at(72),
        }
    }

    /// Exchanges the query and subject roles; offsets travel with their
    /// sequence, so no coordinate transform is needed.
    pub fn swapped_roles(&self) -> OverlapRecord {
        OverlapRecord {
            qid: self.sid,
            qdir: self.sdir,
            qoff: self.soff,
            qend: self.send,
            qsize: self.ssize,
            sid: self.qid,
            sdir: self.qdir,
            soff: self.qoff,
            send: self.qend,
            ssize: self.qsize,
            ident_perc: self.ident_perc,
            score: self.score,
        }
    }

    /// Rewrites to the normalized form `sdir == FWD`, flipping both
    /// direction fields. The orientation XOR is preserved.
    pub fn normalize_sdir(&mut self) {
        if self.sdir == REV as i32 {
            self.sdir = FWD as i32;
            self.qdir ^= 1;
        }
    }
}

pub fn write_records(path: &Path, records: &[OverlapRecord]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut buf = Vec::with_capacity(RECORD_BYTES);
    for rec in records {
        buf.clear();
        rec.write_to(&mut buf);
        out.write_all(&buf)?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<OverlapRecord>> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    if raw.len() % RECORD_BYTES != 0 {
        bail!(
            "{}: size {} is not a multiple of the {}-byte record",
            path.display(),
            raw.len(),
            RECORD_BYTES
        );
    }
    Ok(raw.chunks_exact(RECORD_BYTES).map(OverlapRecord::from_bytes).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn sample(qid: i32, sid: i32) -> OverlapRecord {
        OverlapRecord {
            qid,
            qdir: FWD as i32,
            qoff: 10,
            qend: 900,
            qsize: 1000,
            sid,
            sdir: REV as i32,
            soff: 40,
            send: 960,
            ssize: 1200,
            ident_perc: 86.25,
            score: 512,
        }
    }

    #[test]
    fn codec_round_trip() {
        let rec = sample(3, 7);
        let mut buf = Vec::new();
        rec.write_to(&mut buf);
        assert_eq!(buf.len(), RECORD_BYTES);
        assert_eq!(OverlapRecord::from_bytes(&buf), rec);
    }

    #[test]
    fn file_round_trip_and_capacity_check() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.bin");
        let records = vec![sample(1, 2), sample(2, 3)];
        write_records(&path, &records).unwrap();
        assert_eq!(read_records(&path).unwrap(), records);

        let mut truncated = std::fs::read(&path).unwrap();
        truncated.pop();
        std::fs::write(&path, &truncated).unwrap();
        assert!(read_records(&path).is_err());
    }

    #[test]
    fn normalize_keeps_orientation_xor() {
        let mut rec = sample(1, 2);
        let xor = rec.qdir ^ rec.sdir;
        rec.normalize_sdir();
        assert_eq!(rec.sdir, FWD as i32);
        assert_eq!(rec.qdir ^ rec.sdir, xor);
        // normalizing twice is a no-op
        let once = rec;
        rec.normalize_sdir();
        assert_eq!(rec, once);
    }

    #[test]
    fn swap_is_involution() {
        let rec = sample(4, 9);
        assert_eq!(rec.swapped_roles().swapped_roles(), rec);
        let sw = rec.swapped_roles();
        assert_eq!(sw.qid, rec.sid);
        assert_eq!(sw.soff, rec.qoff);
    }
}
