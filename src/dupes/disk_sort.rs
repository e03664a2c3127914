use crate::errors::{DemarkError, Result};
use log::debug;
use rayon::slice::ParallelSliceMut;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};

/// A record the sorter can spill to disk and read back.
///
/// `decode` must return `Ok(None)` on clean end-of-file and an error on a
/// torn record.
pub trait DiskRecord: Ord + Send + Sized {
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode<R: Read>(reader: &mut R) -> io::Result<Option<Self>>;
}

/// Read exactly `buf.len()` bytes, or report clean EOF before the first
/// byte as `Ok(false)`.
pub fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated spill record",
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// External-memory sorter: batches records in RAM, spills sorted runs to a
/// temporary directory, and k-way merges them on `finish`.
///
/// The merge never holds more than `max_open` run files open at once; when
/// a run count exceeds the budget, runs are first merged in cascades.
pub struct DiskSorter<T: DiskRecord> {
    batch: Vec<T>,
    capacity: usize,
    dir: TempDir,
    runs: Vec<PathBuf>,
    max_open: usize,
    scratch: Vec<u8>,
    pushed: u64,
}

impl<T: DiskRecord> DiskSorter<T> {
    /// `capacity` is the in-RAM batch size in records; `max_open` caps
    /// simultaneously open spill files during merge.
    pub fn new(tmp_dir: Option<&Path>, capacity: usize, max_open: usize) -> Result<Self> {
        let builder = {
            let mut b = Builder::new();
            b.prefix("demark-sort-");
            b
        };
        let dir = match tmp_dir {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(|e| DemarkError::ResourceExhausted(format!("creating spill directory: {}", e)))?;
        Ok(DiskSorter {
            batch: Vec::new(),
            capacity: capacity.max(1),
            dir,
            runs: Vec::new(),
            max_open: max_open.max(2),
            scratch: Vec::new(),
            pushed: 0,
        })
    }

    /// Derive the batch capacity from a byte budget and a per-record
    /// estimate.
    pub fn with_memory_budget(
        tmp_dir: Option<&Path>,
        budget_bytes: usize,
        per_record_bytes: usize,
        max_open: usize,
    ) -> Result<Self> {
        let capacity = (budget_bytes / per_record_bytes.max(1)).max(1024);
        Self::new(tmp_dir, capacity, max_open)
    }

    /// Records accepted so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn push(&mut self, record: T) -> Result<()> {
        self.batch.push(record);
        self.pushed += 1;
        if self.batch.len() >= self.capacity {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.batch.par_sort_unstable();
        let path = self
            .dir
            .path()
            .join(format!("run_{:06}.bin", self.runs.len()));
        let file = File::create(&path).map_err(|e| {
            DemarkError::ResourceExhausted(format!("creating spill run {:?}: {}", path, e))
        })?;
        let mut writer = BufWriter::new(file);
        for record in self.batch.drain(..) {
            self.scratch.clear();
            record.encode(&mut self.scratch);
            writer.write_all(&self.scratch).map_err(|e| {
                DemarkError::ResourceExhausted(format!("writing spill run: {}", e))
            })?;
        }
        writer
            .flush()
            .map_err(|e| DemarkError::ResourceExhausted(format!("flushing spill run: {}", e)))?;
        self.runs.push(path);
        debug!("spilled run {} ({} total records)", self.runs.len(), self.pushed);
        Ok(())
    }

    /// Finalise: sort what is in RAM, cascade-merge runs down to the open
    /// file budget, and hand back the sorted stream.
    pub fn finish(mut self) -> Result<SortedStream<T>> {
        if self.runs.is_empty() {
            self.batch.par_sort_unstable();
            return Ok(SortedStream::Mem(self.batch.into_iter()));
        }
        self.spill()?;

        let DiskSorter {
            dir,
            mut runs,
            max_open,
            ..
        } = self;

        let mut cascade = 0usize;
        while runs.len() > max_open {
            let merged: Vec<PathBuf> = runs.drain(..max_open).collect();
            let out = dir.path().join(format!("cascade_{:06}.bin", cascade));
            cascade += 1;
            merge_runs::<T>(&merged, &out)?;
            for path in merged {
                let _ = std::fs::remove_file(path);
            }
            runs.push(out);
        }

        let merger = RunMerger::open(dir, &runs)?;
        Ok(SortedStream::Merge(merger))
    }
}

/// Sorted read-out of a finished sorter: fully in-RAM when nothing was
/// spilled, a heap merge over run files otherwise.
pub enum SortedStream<T: DiskRecord> {
    Mem(std::vec::IntoIter<T>),
    Merge(RunMerger<T>),
}

impl<T: DiskRecord> Iterator for SortedStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedStream::Mem(it) => it.next().map(Ok),
            SortedStream::Merge(merger) => merger.next_record(),
        }
    }
}

struct HeapEntry<T> {
    rec: T,
    src: usize,
}

impl<T: Ord> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rec.cmp(&other.rec).then(self.src.cmp(&other.src))
    }
}

impl<T: Ord> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for HeapEntry<T> {}

/// K-way merge over sorted run files. Keeps the spill directory alive for
/// as long as the merge is read.
pub struct RunMerger<T: DiskRecord> {
    _dir: TempDir,
    readers: Vec<BufReader<File>>,
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
}

impl<T: DiskRecord> RunMerger<T> {
    fn open(dir: TempDir, runs: &[PathBuf]) -> Result<Self> {
        let (readers, heap) = seed_heap::<T>(runs)?;
        Ok(RunMerger {
            _dir: dir,
            readers,
            heap,
        })
    }

    fn next_record(&mut self) -> Option<Result<T>> {
        let Reverse(entry) = self.heap.pop()?;
        match T::decode(&mut self.readers[entry.src]) {
            Ok(Some(rec)) => self.heap.push(Reverse(HeapEntry {
                rec,
                src: entry.src,
            })),
            Ok(None) => {}
            Err(e) => return Some(Err(DemarkError::Io(e))),
        }
        Some(Ok(entry.rec))
    }
}

type SeededHeap<T> = (Vec<BufReader<File>>, BinaryHeap<Reverse<HeapEntry<T>>>);

fn seed_heap<T: DiskRecord>(runs: &[PathBuf]) -> Result<SeededHeap<T>> {
    let mut readers = Vec::with_capacity(runs.len());
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (src, path) in runs.iter().enumerate() {
        let file = File::open(path).map_err(|e| {
            DemarkError::ResourceExhausted(format!("opening spill run {:?}: {}", path, e))
        })?;
        let mut reader = BufReader::new(file);
        if let Some(rec) = T::decode(&mut reader)? {
            heap.push(Reverse(HeapEntry { rec, src }));
        }
        readers.push(reader);
    }
    Ok((readers, heap))
}

/// Stream-merge a set of sorted runs into one new run file.
fn merge_runs<T: DiskRecord>(runs: &[PathBuf], out: &Path) -> Result<()> {
    let (mut readers, mut heap) = seed_heap::<T>(runs)?;
    let file = File::create(out).map_err(|e| {
        DemarkError::ResourceExhausted(format!("creating cascade run {:?}: {}", out, e))
    })?;
    let mut writer = BufWriter::new(file);
    let mut buf = Vec::new();
    while let Some(Reverse(entry)) = heap.pop() {
        if let Some(rec) = T::decode(&mut readers[entry.src])? {
            heap.push(Reverse(HeapEntry {
                rec,
                src: entry.src,
            }));
        }
        buf.clear();
        entry.rec.encode(&mut buf);
        writer
            .write_all(&buf)
            .map_err(|e| DemarkError::ResourceExhausted(format!("writing cascade run: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| DemarkError::ResourceExhausted(format!("flushing cascade run: {}", e)))?;
    Ok(())
}
