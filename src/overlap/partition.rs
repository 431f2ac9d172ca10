use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use log::info;

use crate::overlap::record::{read_records, OverlapRecord, RECORD_BYTES};

/// Workers pull whole-record chunks of this many bytes under the read lock.
const CHUNK_BYTES: u64 = (256 * 1024 * 1024 / RECORD_BYTES as u64) * RECORD_BYTES as u64;

pub fn partition_path(dir: &Path, pid: usize) -> PathBuf {
    dir.join(format!("p{pid:08}"))
}

fn np_path(dir: &Path) -> PathBuf {
    dir.join("np")
}

pub fn dump_partition_count(dir: &Path, np: usize) -> Result<()> {
    let path = np_path(dir);
    let mut out = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(out, "{np}")?;
    Ok(())
}

/// Reads the partition count and refuses the directory when the number of
/// batch files on disk disagrees with it.
pub fn load_partition_count(dir: &Path) -> Result<usize> {
    let path = np_path(dir);
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let np: usize = text
        .trim()
        .parse()
        .with_context(|| format!("{}: malformed partition count", path.display()))?;
    let mut found = 0usize;
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.len() == 9 && name.starts_with('p') && name[1..].bytes().all(|b| b.is_ascii_digit()) {
            found += 1;
        }
    }
    if found != np {
        bail!(
            "{} holds {} batch files but its np file says {}",
            dir.display(),
            found,
            np
        );
    }
    Ok(np)
}

#[derive(Clone, Debug)]
pub struct PartitionOptions {
    pub batch_size: usize,
    pub num_dumped_files: usize,
    pub num_threads: usize,
    pub min_ident_perc: f64,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        PartitionOptions {
            batch_size: 100_000,
            num_dumped_files: 100,
            num_threads: 1,
            min_ident_perc: 0.0,
        }
    }
}

/// Open batch files of one dump pass. Workers borrow the writer immutably;
/// the single write lock serializes only the file appends, never the
/// per-chunk computation.
pub struct PartitionWriter {
    pid_from: usize,
    batch_size: usize,
    outs: Mutex<Vec<BufWriter<File>>>,
}

impl PartitionWriter {
    pub fn create(dir: &Path, pid_from: usize, pid_to: usize, batch_size: usize) -> Result<PartitionWriter> {
        let mut outs = Vec::with_capacity(pid_to - pid_from);
        for pid in pid_from..pid_to {
            let path = partition_path(dir, pid);
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            outs.push(BufWriter::new(file));
        }
        Ok(PartitionWriter { pid_from, batch_size, outs: Mutex::new(outs) })
    }

    /// Appends rows already sorted by `sid`, splitting at batch boundaries.
    fn append_sorted(&self, rows: &[OverlapRecord]) -> Result<()> {
        let mut outs = self.outs.lock().unwrap();
        let mut bytes = Vec::new();
        let mut i = 0usize;
        while i < rows.len() {
            let pid = rows[i].sid as usize / self.batch_size;
            let sid_to = ((pid + 1) * self.batch_size) as i32;
            let mut j = i + 1;
            while j < rows.len() && rows[j].sid < sid_to {
                j += 1;
            }
            let fid = pid - self.pid_from;
            bytes.clear();
            for rec in &rows[i..j] {
                rec.write_to(&mut bytes);
            }
            outs[fid].write_all(&bytes)?;
            i = j;
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        for mut out in self.outs.into_inner().unwrap() {
            out.flush()?;
        }
        Ok(())
    }
}

fn partition_pass_worker(
    reader: &Mutex<BufReader<File>>,
    writer: &PartitionWriter,
    opts: &PartitionOptions,
    min_read_id: i32,
    max_read_id: i32,
) -> Result<()> {
    let in_range = |id: i32| id >= min_read_id && id < max_read_id;
    let mut buf: Vec<u8> = Vec::new();
    let mut rows: Vec<OverlapRecord> = Vec::new();
    loop {
        {
            let mut guard = reader.lock().unwrap();
            buf.clear();
            guard.by_ref().take(CHUNK_BYTES).read_to_end(&mut buf)?;
        }
        if buf.is_empty() {
            return Ok(());
        }
        if buf.len() % RECORD_BYTES != 0 {
            bail!("record stream truncated mid-record ({} trailing bytes)", buf.len() % RECORD_BYTES);
        }
        rows.clear();
        for chunk in buf.chunks_exact(RECORD_BYTES) {
            let rec = OverlapRecord::from_bytes(chunk);
            if rec.ident_perc < opts.min_ident_perc {
                continue;
            }
            if in_range(rec.sid) {
                let mut r = rec;
                r.normalize_sdir();
                rows.push(r);
            }
            if in_range(rec.qid) {
                let mut r = rec.swapped_roles();
                r.normalize_sdir();
                rows.push(r);
            }
        }
        if rows.is_empty() {
            continue;
        }
        rows.sort_by_key(|r| r.sid);
        writer.append_sorted(&rows)?;
    }
}

/// Shards an overlap-record stream into `ceil(num_reads / batch_size)`
/// batch files. Each pass opens at most `num_dumped_files` outputs and
/// rescans the input; a record lands once per in-range id, with that id in
/// the subject slot and `sdir` normalized to FWD.
pub fn partition_records(
    record_path: &Path,
    dir: &Path,
    num_reads: usize,
    opts: &PartitionOptions,
) -> Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let np = num_reads.div_ceil(opts.batch_size.max(1));
    dump_partition_count(dir, np)?;
    let num_threads = opts.num_threads.max(1);
    let mut sfid = 0usize;
    while sfid < np {
        let efid = (sfid + opts.num_dumped_files.max(1)).min(np);
        info!("dumping records for partitions [{sfid}, {efid})");
        let writer = PartitionWriter::create(dir, sfid, efid, opts.batch_size)?;
        let file =
            File::open(record_path).with_context(|| format!("opening {}", record_path.display()))?;
        let reader = Mutex::new(BufReader::new(file));
        let min_read_id = (sfid * opts.batch_size) as i32;
        let max_read_id = (efid * opts.batch_size) as i32;
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(num_threads);
            for _ in 0..num_threads {
                handles.push(scope.spawn(|| {
                    partition_pass_worker(&reader, &writer, opts, min_read_id, max_read_id)
                }));
            }
            for handle in handles {
                handle.join().expect("partition worker panicked")?;
            }
            Ok(())
        })?;
        writer.finish()?;
        sfid = efid;
    }
    Ok(np)
}

/// Loads one partition file sorted by subject id. Batch files carry no
/// global order; consumers always sort after load.
pub fn load_partition(dir: &Path, pid: usize) -> Result<Vec<OverlapRecord>> {
    let mut records = read_records(&partition_path(dir, pid))?;
    records.sort_by_key(|r| r.sid);
    Ok(records)
}

/// Half-open index ranges of equal-`sid` runs in a sorted record slice.
pub fn sid_group_ranges(records: &[OverlapRecord]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut i = 0usize;
    while i < records.len() {
        let mut j = i + 1;
        while j < records.len() && records[j].sid == records[i].sid {
            j += 1;
        }
        ranges.push((i, j));
        i = j;
    }
    ranges
}

/// The "next work unit" counter trim and consensus workers pull from.
pub struct GroupCursor {
    next: Mutex<usize>,
}

impl GroupCursor {
    pub fn new() -> GroupCursor {
        GroupCursor { next: Mutex::new(0) }
    }

    pub fn claim(&self) -> usize {
        let mut guard = self.next.lock().unwrap();
        let idx = *guard;
        *guard += 1;
        idx
    }
}

impl Default for GroupCursor {
    fn default() -> Self {
        GroupCursor::new()
    }
}
