use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use crate::sequence::dna::{complement, packed_residue, FWD, REV};

/// On-disk per-read record in a `.seqinfo` file: four little-endian u64s.
/// Offsets are volume-relative; the loader rebases them to global values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeqInfo {
    pub name_offset: u64,
    pub name_size: u64,
    pub seq_offset: u64,
    pub seq_size: u64,
}

pub const SEQ_INFO_BYTES: usize = 32;

impl SeqInfo {
    pub fn to_bytes(&self) -> [u8; SEQ_INFO_BYTES] {
        let mut b = [0u8; SEQ_INFO_BYTES];
        b[0..8].copy_from_slice(&self.name_offset.to_le_bytes());
        b[8..16].copy_from_slice(&self.name_size.to_le_bytes());
        b[16..24].copy_from_slice(&self.seq_offset.to_le_bytes());
        b[24..32].copy_from_slice(&self.seq_size.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> SeqInfo {
        let u = |r: std::ops::Range<usize>| u64::from_le_bytes(b[r].try_into().unwrap());
        SeqInfo {
            name_offset: u(0..8),
            name_size: u(8..16),
            seq_offset: u(16..24),
            seq_size: u(24..32),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DbInfo {
    pub num_volumes: usize,
    pub num_seqs: usize,
    pub volume_seq_counts: Vec<usize>,
}

pub fn info_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{title}.info"))
}

pub fn pac_path(dir: &Path, title: &str, vol: usize) -> PathBuf {
    dir.join(format!("{title}.{vol}.pac"))
}

pub fn hdr_path(dir: &Path, title: &str, vol: usize) -> PathBuf {
    dir.join(format!("{title}.{vol}.hdr"))
}

pub fn seqinfo_path(dir: &Path, title: &str, vol: usize) -> PathBuf {
    dir.join(format!("{title}.{vol}.seqinfo"))
}

pub fn dump_db_info(dir: &Path, title: &str, info: &DbInfo) -> Result<()> {
    let path = info_path(dir, title);
    let mut out = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(out, "{}", info.num_volumes)?;
    writeln!(out, "{}", info.num_seqs)?;
    for n in &info.volume_seq_counts {
        writeln!(out, "{n}")?;
    }
    Ok(())
}

pub fn load_db_info(dir: &Path, title: &str) -> Result<DbInfo> {
    let path = info_path(dir, title);
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let mut lines = text.lines();
    let mut next_usize = |what: &str| -> Result<usize> {
        lines
            .next()
            .with_context(|| format!("{}: missing {what}", path.display()))?
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{}: malformed {what}", path.display()))
    };
    let num_volumes = next_usize("volume count")?;
    let num_seqs = next_usize("read count")?;
    let mut volume_seq_counts = Vec::with_capacity(num_volumes);
    for _ in 0..num_volumes {
        volume_seq_counts.push(next_usize("per-volume read count")?);
    }
    if volume_seq_counts.iter().sum::<usize>() != num_seqs {
        bail!("{}: volume read counts do not sum to the read count", path.display());
    }
    Ok(DbInfo { num_volumes, num_seqs, volume_seq_counts })
}

/// In batch mode the packed residues of a subset of reads are windowed in
/// from the volume `.pac` files; `offsets[id]` is the windowed residue
/// offset of read `id`, or `u64::MAX` when the read is not resident.
struct WindowState {
    vol_pac_paths: Vec<PathBuf>,
    vol_base_bytes: Vec<u64>,
    offsets: Vec<u64>,
}

/// Random-access packed read store over a volume directory. Global read ids
/// are volume-order concatenation; every read's residue offset is a multiple
/// of four so each read begins on a byte boundary.
pub struct PackedDb {
    seq_info: Vec<SeqInfo>,
    names: Vec<u8>,
    packed: Vec<u8>,
    total_residues: u64,
    window: Option<WindowState>,
}

impl PackedDb {
    pub fn load(dir: &Path, title: &str) -> Result<PackedDb> {
        let mut db = PackedDb::open_common(dir, title)?;
        let window = db.window.take().expect("open_common always sets a window");
        let mut packed = Vec::new();
        for path in &window.vol_pac_paths {
            let mut f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            f.read_to_end(&mut packed)?;
        }
        db.packed = packed;
        Ok(db)
    }

    /// Opens the directory without loading any residues; `load_window` pages
    /// subsets in. Metadata (sizes, names) is always fully resident.
    pub fn open_windowed(dir: &Path, title: &str) -> Result<PackedDb> {
        PackedDb::open_common(dir, title)
    }

    fn open_common(dir: &Path, title: &str) -> Result<PackedDb> {
        let info = load_db_info(dir, title)?;
        let mut seq_info = Vec::with_capacity(info.num_seqs);
        let mut names = Vec::new();
        let mut vol_pac_paths = Vec::with_capacity(info.num_volumes);
        let mut vol_base_bytes = Vec::with_capacity(info.num_volumes);
        let mut res_base = 0u64;
        let mut name_base = 0u64;
        for vol in 0..info.num_volumes {
            let si_path = seqinfo_path(dir, title, vol);
            let raw = std::fs::read(&si_path).with_context(|| format!("reading {}", si_path.display()))?;
            if raw.len() != info.volume_seq_counts[vol] * SEQ_INFO_BYTES {
                bail!("{}: expected {} records", si_path.display(), info.volume_seq_counts[vol]);
            }
            for chunk in raw.chunks_exact(SEQ_INFO_BYTES) {
                let mut si = SeqInfo::from_bytes(chunk);
                si.seq_offset += res_base;
                si.name_offset += name_base;
                seq_info.push(si);
            }

            let h_path = hdr_path(dir, title, vol);
            let hdr = std::fs::read(&h_path).with_context(|| format!("reading {}", h_path.display()))?;
            name_base += hdr.len() as u64;
            names.extend_from_slice(&hdr);

            let p_path = pac_path(dir, title, vol);
            let pac_bytes = std::fs::metadata(&p_path)
                .with_context(|| format!("stat {}", p_path.display()))?
                .len();
            vol_base_bytes.push(res_base / 4);
            vol_pac_paths.push(p_path);
            res_base += pac_bytes * 4;
        }
        let offsets = vec![u64::MAX; info.num_seqs];
        Ok(PackedDb {
            seq_info,
            names,
            packed: Vec::new(),
            total_residues: res_base,
            window: Some(WindowState { vol_pac_paths, vol_base_bytes, offsets }),
        })
    }

    /// Replaces the resident window with exactly the reads flagged in
    /// `needed`. Returned offsets stay 4-residue aligned, and extraction is
    /// byte-identical to the fully loaded form.
    pub fn load_window(&mut self, needed: &[bool]) -> Result<()> {
        let window = match self.window.as_mut() {
            Some(w) => w,
            None => bail!("store was fully loaded, not windowed"),
        };
        assert_eq!(needed.len(), self.seq_info.len());
        let mut total_bytes = 0usize;
        for (id, &want) in needed.iter().enumerate() {
            window.offsets[id] = u64::MAX;
            if want {
                total_bytes += (self.seq_info[id].seq_size as usize).div_ceil(4);
            }
        }
        let mut packed = vec![0u8; total_bytes];
        let mut byte_idx = 0usize;
        let mut stream: Option<(usize, File)> = None;
        let mut loaded_seqs = 0usize;
        let mut loaded_res = 0u64;
        for (id, &want) in needed.iter().enumerate() {
            if !want {
                continue;
            }
            let si = self.seq_info[id];
            debug_assert_eq!(si.seq_offset % 4, 0);
            let global_byte = si.seq_offset / 4;
            let vol = window
                .vol_base_bytes
                .partition_point(|&b| b <= global_byte)
                .saturating_sub(1);
            let local_byte = global_byte - window.vol_base_bytes[vol];
            let n = (si.seq_size as usize).div_ceil(4);
            if stream.as_ref().map(|(v, _)| *v) != Some(vol) {
                let path = &window.vol_pac_paths[vol];
                let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                stream = Some((vol, f));
            }
            let (_, f) = stream.as_mut().unwrap();
            f.seek(SeekFrom::Start(local_byte))?;
            f.read_exact(&mut packed[byte_idx..byte_idx + n])
                .with_context(|| format!("short read in volume {vol} pac"))?;
            window.offsets[id] = (byte_idx * 4) as u64;
            byte_idx += n;
            loaded_seqs += 1;
            loaded_res += si.seq_size;
        }
        self.packed = packed;
        info!("windowed in {} sequences, {} residues", loaded_seqs, loaded_res);
        Ok(())
    }

    pub fn num_seqs(&self) -> usize {
        self.seq_info.len()
    }

    pub fn seq_size(&self, id: usize) -> usize {
        self.seq_info[id].seq_size as usize
    }

    pub fn seq_offset(&self, id: usize) -> u64 {
        self.seq_info[id].seq_offset
    }

    /// One past the largest valid global residue offset.
    pub fn max_offset(&self) -> u64 {
        self.total_residues
    }

    pub fn name(&self, id: usize) -> &str {
        let si = &self.seq_info[id];
        let from = si.name_offset as usize;
        let to = from + si.name_size as usize;
        std::str::from_utf8(&self.names[from..to]).unwrap_or("?")
    }

    /// Maps a global residue offset back to `(read_id, offset_within_read)`.
    pub fn resolve(&self, offset: u64) -> (usize, u64) {
        let id = self.seq_info.partition_point(|si| si.seq_offset <= offset) - 1;
        let within = offset - self.seq_info[id].seq_offset;
        debug_assert!(within < self.seq_info[id].seq_size);
        (id, within)
    }

    fn resident_offset(&self, id: usize) -> u64 {
        match &self.window {
            Some(w) => {
                let off = w.offsets[id];
                assert!(off != u64::MAX, "read {id} is not in the current window");
                off
            }
            None => self.seq_info[id].seq_offset,
        }
    }

    /// Extracts residues of `[from, to)` on the forward strand of read `id`;
    /// `strand == REV` yields the reverse complement of that window.
    pub fn extract(&self, id: usize, from: usize, to: usize, strand: u8) -> Vec<u8> {
        assert!(from <= to && to <= self.seq_size(id));
        let base = self.resident_offset(id) as usize;
        let mut out = Vec::with_capacity(to - from);
        if strand == FWD {
            for i in base + from..base + to {
                out.push(packed_residue(&self.packed, i));
            }
        } else {
            debug_assert_eq!(strand, REV);
            for i in (base + from..base + to).rev() {
                out.push(complement(packed_residue(&self.packed, i)));
            }
        }
        out
    }

    pub fn extract_full(&self, id: usize, strand: u8) -> Vec<u8> {
        self.extract(id, 0, self.seq_size(id), strand)
    }
}
