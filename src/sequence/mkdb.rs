use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bio::io::fasta;
use log::info;

use crate::sequence::dna::{encode_base, pack_residues};
use crate::sequence::packed_store::{
    dump_db_info, hdr_path, pac_path, seqinfo_path, DbInfo, SeqInfo,
};

pub const DEFAULT_DB_TITLE: &str = "reads";

/// Streams reads into packed volumes. A volume is closed once its padded
/// residue count would exceed the budget; every read starts on a byte
/// boundary of the `.pac` file, which keeps `seq_offset % 4 == 0`.
pub struct PackedDbBuilder {
    dir: PathBuf,
    title: String,
    volume_residue_budget: u64,
    vol_index: usize,
    vol_seq_counts: Vec<usize>,
    cur_pac: Vec<u8>,
    cur_hdr: Vec<u8>,
    cur_info: Vec<SeqInfo>,
    total_reads: usize,
}

impl PackedDbBuilder {
    pub fn new(dir: &Path, title: &str, volume_residue_budget: u64) -> PackedDbBuilder {
        PackedDbBuilder {
            dir: dir.to_path_buf(),
            title: title.to_string(),
            volume_residue_budget: volume_residue_budget.max(4),
            vol_index: 0,
            vol_seq_counts: Vec::new(),
            cur_pac: Vec::new(),
            cur_hdr: Vec::new(),
            cur_info: Vec::new(),
            total_reads: 0,
        }
    }

    pub fn add_read(&mut self, name: &str, seq: &[u8]) -> Result<()> {
        let padded = (seq.len() as u64).div_ceil(4) * 4;
        let cur_residues = (self.cur_pac.len() as u64) * 4;
        if !self.cur_info.is_empty() && cur_residues + padded > self.volume_residue_budget {
            self.flush_volume()?;
        }
        let residues: Vec<u8> = seq.iter().map(|&c| encode_base(c)).collect();
        let info = SeqInfo {
            name_offset: self.cur_hdr.len() as u64,
            name_size: name.len() as u64,
            seq_offset: (self.cur_pac.len() as u64) * 4,
            seq_size: seq.len() as u64,
        };
        self.cur_hdr.extend_from_slice(name.as_bytes());
        self.cur_pac.extend_from_slice(&pack_residues(&residues));
        self.cur_info.push(info);
        self.total_reads += 1;
        Ok(())
    }

    fn flush_volume(&mut self) -> Result<()> {
        let vol = self.vol_index;
        let write = |path: PathBuf, bytes: &[u8]| -> Result<()> {
            let mut out =
                File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            out.write_all(bytes)?;
            Ok(())
        };
        write(pac_path(&self.dir, &self.title, vol), &self.cur_pac)?;
        write(hdr_path(&self.dir, &self.title, vol), &self.cur_hdr)?;
        let mut info_bytes = Vec::with_capacity(self.cur_info.len() * 32);
        for si in &self.cur_info {
            info_bytes.extend_from_slice(&si.to_bytes());
        }
        write(seqinfo_path(&self.dir, &self.title, vol), &info_bytes)?;
        self.vol_seq_counts.push(self.cur_info.len());
        self.vol_index += 1;
        self.cur_pac.clear();
        self.cur_hdr.clear();
        self.cur_info.clear();
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if !self.cur_info.is_empty() || self.vol_index == 0 {
            self.flush_volume()?;
        }
        let info = DbInfo {
            num_volumes: self.vol_index,
            num_seqs: self.total_reads,
            volume_seq_counts: self.vol_seq_counts.clone(),
        };
        dump_db_info(&self.dir, &self.title, &info)?;
        info!(
            "packed {} reads into {} volume(s) under {}",
            self.total_reads,
            self.vol_index,
            self.dir.display()
        );
        Ok(())
    }
}

pub fn mkdb_main(
    inputs: &[PathBuf],
    dir: &Path,
    title: &str,
    volume_residue_budget: u64,
) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut builder = PackedDbBuilder::new(dir, title, volume_residue_budget);
    for input in inputs {
        let reader = fasta::Reader::from_file(input)
            .with_context(|| format!("opening {}", input.display()))?;
        for record in reader.records() {
            let record = record.with_context(|| format!("parsing {}", input.display()))?;
            builder.add_read(record.id(), record.seq())?;
        }
    }
    builder.finish()
}
