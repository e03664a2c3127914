use crate::dupes::disk_sort::{read_exact_or_eof, DiskRecord};
use rust_htslib::bam::record::Cigar;
use rust_htslib::bam::Record;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::io::{self, Read};

/// Base qualities below this do not contribute to the duplicate score.
pub const SCORE_BASE_QUALITY_CUTOFF: u8 = 15;

/// Strand layout of a read end (fragments) or of both ends of a pair,
/// ordered by which end comes first along the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Orientation {
    F = 0,
    R = 1,
    FF = 2,
    FR = 3,
    RF = 4,
    RR = 5,
}

impl Orientation {
    pub fn fragment(reverse: bool) -> Self {
        if reverse {
            Orientation::R
        } else {
            Orientation::F
        }
    }

    /// Pair orientation from the strands of the lower-coordinate end and
    /// the higher-coordinate end, in that order.
    pub fn pair(first_reverse: bool, second_reverse: bool) -> Self {
        match (first_reverse, second_reverse) {
            (false, false) => Orientation::FF,
            (false, true) => Orientation::FR,
            (true, false) => Orientation::RF,
            (true, true) => Orientation::RR,
        }
    }

    fn from_u8(v: u8) -> io::Result<Self> {
        Ok(match v {
            0 => Orientation::F,
            1 => Orientation::R,
            2 => Orientation::FF,
            3 => Orientation::FR,
            4 => Orientation::RF,
            5 => Orientation::RR,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad orientation byte {}", other),
                ));
            }
        })
    }
}

/// The compact sort key of duplicate marking: one entry per fragment or
/// per completed pair. Plain value type; the sorter owns it exclusively.
#[derive(Debug, Clone)]
pub struct ReadEnd {
    pub library_id: u32,
    pub ref1: i32,
    pub coord1: i64,
    pub orient: Orientation,
    pub ref2: i32,
    pub coord2: i64,
    pub read_group: u32,
    pub score: u32,
    pub file_index_1: u64,
    pub file_index_2: u64,
    /// For fragment entries: whether the source alignment belongs to a
    /// complete pair (such fragments never win a positional slot).
    pub paired: bool,
    pub umi: SmallVec<[u8; 12]>,
}

impl ReadEnd {
    /// A single-end entry; second-end fields zeroed.
    #[allow(clippy::too_many_arguments)]
    pub fn fragment(
        library_id: u32,
        ref1: i32,
        coord1: i64,
        reverse: bool,
        read_group: u32,
        score: u32,
        file_index: u64,
        paired: bool,
        umi: SmallVec<[u8; 12]>,
    ) -> Self {
        ReadEnd {
            library_id,
            ref1,
            coord1,
            orient: Orientation::fragment(reverse),
            ref2: 0,
            coord2: 0,
            read_group,
            score,
            file_index_1: file_index,
            file_index_2: 0,
            paired,
            umi,
        }
    }

    /// Positional equality for fragment grouping.
    pub fn same_fragment_position(&self, other: &Self) -> bool {
        self.library_id == other.library_id
            && self.ref1 == other.ref1
            && self.coord1 == other.coord1
            && self.orient == other.orient
    }

    /// Positional equality for pair grouping.
    pub fn same_pair_position(&self, other: &Self) -> bool {
        self.same_fragment_position(other)
            && self.ref2 == other.ref2
            && self.coord2 == other.coord2
    }

    fn key(&self) -> (u32, i32, i64, Orientation, i32, i64, u64, u64) {
        (
            self.library_id,
            self.ref1,
            self.coord1,
            self.orient,
            self.ref2,
            self.coord2,
            self.file_index_1,
            self.file_index_2,
        )
    }
}

// The comparator is a strict total order: file indices are unique per
// record, so equal keys mean the same record.
impl Ord for ReadEnd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for ReadEnd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadEnd {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadEnd {}

const FIXED_LEN: usize = 4 + 4 + 8 + 1 + 4 + 8 + 4 + 4 + 8 + 8 + 1 + 2;

impl DiskRecord for ReadEnd {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.library_id.to_le_bytes());
        buf.extend_from_slice(&self.ref1.to_le_bytes());
        buf.extend_from_slice(&self.coord1.to_le_bytes());
        buf.push(self.orient as u8);
        buf.extend_from_slice(&self.ref2.to_le_bytes());
        buf.extend_from_slice(&self.coord2.to_le_bytes());
        buf.extend_from_slice(&self.read_group.to_le_bytes());
        buf.extend_from_slice(&self.score.to_le_bytes());
        buf.extend_from_slice(&self.file_index_1.to_le_bytes());
        buf.extend_from_slice(&self.file_index_2.to_le_bytes());
        buf.push(self.paired as u8);
        buf.extend_from_slice(&(self.umi.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.umi);
    }

    fn decode<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut fixed = [0u8; FIXED_LEN];
        if !read_exact_or_eof(reader, &mut fixed)? {
            return Ok(None);
        }
        let mut at = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let slice = &fixed[at..at + $n];
                at += $n;
                slice
            }};
        }
        let library_id = u32::from_le_bytes(take!(4).try_into().unwrap());
        let ref1 = i32::from_le_bytes(take!(4).try_into().unwrap());
        let coord1 = i64::from_le_bytes(take!(8).try_into().unwrap());
        let orient = Orientation::from_u8(take!(1)[0])?;
        let ref2 = i32::from_le_bytes(take!(4).try_into().unwrap());
        let coord2 = i64::from_le_bytes(take!(8).try_into().unwrap());
        let read_group = u32::from_le_bytes(take!(4).try_into().unwrap());
        let score = u32::from_le_bytes(take!(4).try_into().unwrap());
        let file_index_1 = u64::from_le_bytes(take!(8).try_into().unwrap());
        let file_index_2 = u64::from_le_bytes(take!(8).try_into().unwrap());
        let paired = take!(1)[0] != 0;
        let umi_len = u16::from_le_bytes(take!(2).try_into().unwrap()) as usize;
        let _ = at;

        let mut umi = SmallVec::from_elem(0u8, umi_len);
        if umi_len > 0 {
            reader.read_exact(&mut umi)?;
        }
        Ok(Some(ReadEnd {
            library_id,
            ref1,
            coord1,
            orient,
            ref2,
            coord2,
            read_group,
            score,
            file_index_1,
            file_index_2,
            paired,
            umi,
        }))
    }
}

/* ---------- alignment-record helpers -------------------------------- */

/// Leftmost reference position including clipped bases.
pub fn unclipped_start(rec: &Record) -> i64 {
    let mut clip = 0i64;
    for entry in rec.cigar().iter() {
        match entry {
            Cigar::SoftClip(n) | Cigar::HardClip(n) => clip += *n as i64,
            _ => break,
        }
    }
    rec.pos() - clip
}

/// Rightmost reference position (exclusive) including clipped bases.
pub fn unclipped_end(rec: &Record) -> i64 {
    let cigar = rec.cigar();
    let mut clip = 0i64;
    for entry in cigar.iter().rev() {
        match entry {
            Cigar::SoftClip(n) | Cigar::HardClip(n) => clip += *n as i64,
            _ => break,
        }
    }
    cigar.end_pos() + clip
}

/// The 5' unclipped coordinate: start for forward reads, end for reverse.
pub fn five_prime_coordinate(rec: &Record) -> i64 {
    if rec.is_reverse() {
        unclipped_end(rec)
    } else {
        unclipped_start(rec)
    }
}

/// Duplicate score of one alignment: sum of base qualities at or above
/// the cutoff.
pub fn duplicate_score(rec: &Record) -> u32 {
    rec.qual()
        .iter()
        .filter(|&&q| q >= SCORE_BASE_QUALITY_CUTOFF)
        .map(|&q| q as u32)
        .sum()
}

/// Extract UMI bytes from a read name: split on `delimiter`, pick the
/// 1-based `slots` (negative values count from the end), concatenate in
/// slot order. `None` when any slot index falls outside the token list.
pub fn umi_from_name(name: &[u8], delimiter: u8, slots: &[i32]) -> Option<SmallVec<[u8; 12]>> {
    let tokens: SmallVec<[&[u8]; 8]> = name.split(|&b| b == delimiter).collect();
    let mut umi = SmallVec::new();
    for &slot in slots {
        let idx = resolve_slot(slot, tokens.len())?;
        umi.extend_from_slice(tokens[idx]);
    }
    Some(umi)
}

/// Map a 1-based (or negative, from-the-end) slot index onto a token list.
pub fn resolve_slot(slot: i32, n_tokens: usize) -> Option<usize> {
    if slot > 0 {
        let idx = (slot - 1) as usize;
        (idx < n_tokens).then_some(idx)
    } else if slot < 0 {
        let back = (-slot) as usize;
        n_tokens.checked_sub(back)
    } else {
        None
    }
}
