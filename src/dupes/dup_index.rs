use crate::dupes::disk_sort::{read_exact_or_eof, DiskRecord, DiskSorter, SortedStream};
use crate::errors::Result;
use std::io::{self, Read};
use std::path::Path;

impl DiskRecord for u64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut bytes = [0u8; 8];
        if !read_exact_or_eof(reader, &mut bytes)? {
            return Ok(None);
        }
        Ok(Some(u64::from_le_bytes(bytes)))
    }
}

/// Sorted, spill-capable collection of the file indices to flag as
/// duplicates on the second pass.
pub struct DuplicateIndex {
    sorter: DiskSorter<u64>,
}

impl DuplicateIndex {
    pub fn new(tmp_dir: Option<&Path>, capacity: usize, max_open: usize) -> Result<Self> {
        Ok(DuplicateIndex {
            sorter: DiskSorter::new(tmp_dir, capacity, max_open)?,
        })
    }

    pub fn add(&mut self, file_index: u64) -> Result<()> {
        self.sorter.push(file_index)
    }

    pub fn len(&self) -> u64 {
        self.sorter.pushed()
    }

    pub fn is_empty(&self) -> bool {
        self.sorter.pushed() == 0
    }

    pub fn finish(self) -> Result<DuplicateIndexIter> {
        let mut stream = self.sorter.finish()?;
        let front = match stream.next() {
            None => None,
            Some(idx) => Some(idx?),
        };
        Ok(DuplicateIndexIter { stream, front })
    }
}

/// In-order cursor over the flagged file indices.
pub struct DuplicateIndexIter {
    stream: SortedStream<u64>,
    front: Option<u64>,
}

impl DuplicateIndexIter {
    /// True when `file_index` is flagged. Must be called with strictly
    /// increasing indices; the cursor advances past every index at or
    /// below the queried one (repeated entries collapse).
    pub fn matches(&mut self, file_index: u64) -> Result<bool> {
        let mut hit = false;
        while let Some(front) = self.front {
            if front > file_index {
                break;
            }
            if front == file_index {
                hit = true;
            }
            self.front = match self.stream.next() {
                None => None,
                Some(idx) => Some(idx?),
            };
        }
        Ok(hit)
    }
}
