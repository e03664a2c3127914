use crate::cli::counters::LibraryMetrics;
use crate::dupes::disk_sort::{DiskSorter, SortedStream};
use crate::dupes::dup_index::{DuplicateIndex, DuplicateIndexIter};
use crate::dupes::grouper::{GroupBy, PositionalGrouper};
use crate::dupes::read_end::{
    duplicate_score, five_prime_coordinate, resolve_slot, umi_from_name, Orientation, ReadEnd,
};
use crate::dupes::umi::{select_duplicates, split_closed, split_open, ExpectedUmis, UmiParams};
use crate::errors::{DemarkError, Result};
use fxhash::FxHashMap;
use indicatif::ProgressBar;
use log::{info, warn};
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self, Read as BamRead, Record};
use smallvec::SmallVec;
use std::io;
use std::path::{Path, PathBuf};

/// SAM FLAG bit for PCR/optical duplicates.
const FLAG_DUPLICATE: u16 = 0x400;

/// Rough per-record footprint inside the sorter, for capacity derivation.
const READ_END_BYTES: usize = 96;

/// Everything the duplicate marker is configured with.
pub struct MarkdupOptions {
    /// UMI mismatch budget.
    pub mismatches: u32,
    /// Max ambiguous bases before a UMI is degenerate.
    pub max_n: u32,
    /// 1-based (or negative) name tokens carrying the UMI.
    pub umi_slots: Vec<i32>,
    pub expected_umis: Option<ExpectedUmis>,
    /// Name-token delimiter.
    pub delimiter: u8,
    /// When set, these name tokens are removed on the second pass.
    pub trim_slots: Option<Vec<i32>>,
    pub tmp_dir: Option<PathBuf>,
    /// Byte budget for the in-RAM sort batches.
    pub sort_memory_bytes: usize,
    pub max_open_files: usize,
}

impl Default for MarkdupOptions {
    fn default() -> Self {
        MarkdupOptions {
            mismatches: 1,
            max_n: 1,
            umi_slots: vec![-1],
            expected_umis: None,
            delimiter: b':',
            trim_slots: None,
            tmp_dir: None,
            sort_memory_bytes: 1 << 30,
            max_open_files: 8000,
        }
    }
}

/// Read-group to library resolution, parsed from `@RG` header lines.
///
/// Library 0 is the fallback for records without a read group (or with an
/// unlisted one).
pub struct LibraryTable {
    entries: FxHashMap<Vec<u8>, (u32, u32)>,
    libraries: Vec<String>,
}

impl LibraryTable {
    pub fn from_header_text(text: &str) -> Self {
        let mut entries: FxHashMap<Vec<u8>, (u32, u32)> = FxHashMap::default();
        let mut libraries: Vec<String> = vec!["unknown".to_string()];
        let mut rg_count = 0u32;
        for line in text.lines() {
            if !line.starts_with("@RG") {
                continue;
            }
            let mut id: Option<&str> = None;
            let mut lib: Option<&str> = None;
            for field in line.split('\t').skip(1) {
                if let Some(v) = field.strip_prefix("ID:") {
                    id = Some(v);
                } else if let Some(v) = field.strip_prefix("LB:") {
                    lib = Some(v);
                }
            }
            let Some(id) = id else { continue };
            rg_count += 1;
            let lib_name = lib.unwrap_or("unknown");
            let lib_idx = match libraries.iter().position(|l| l == lib_name) {
                Some(idx) => idx as u32,
                None => {
                    libraries.push(lib_name.to_string());
                    (libraries.len() - 1) as u32
                }
            };
            entries.insert(id.as_bytes().to_vec(), (rg_count, lib_idx));
        }
        LibraryTable { entries, libraries }
    }

    /// `(read-group index, library index)`; `(0, 0)` without a read group.
    pub fn resolve(&self, rg: Option<&[u8]>) -> (u32, u32) {
        rg.and_then(|id| self.entries.get(id).copied())
            .unwrap_or((0, 0))
    }

    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }
}

/// Remove the designated delimiter-separated tokens from a read name.
/// Indices are resolved against the actual token count, so negative
/// indices follow the name's own length.
pub fn trim_name(name: &[u8], delimiter: u8, slots: &[i32]) -> Vec<u8> {
    let tokens: Vec<&[u8]> = name.split(|&b| b == delimiter).collect();
    let drop: SmallVec<[usize; 4]> = slots
        .iter()
        .filter_map(|&s| resolve_slot(s, tokens.len()))
        .collect();
    let mut out = Vec::with_capacity(name.len());
    let mut first = true;
    for (i, token) in tokens.iter().enumerate() {
        if drop.contains(&i) {
            continue;
        }
        if !first {
            out.push(delimiter);
        }
        first = false;
        out.extend_from_slice(token);
    }
    out
}

/// Mark duplicates on a coordinate-sorted alignment file.
///
/// Two passes: the first builds read-end records, sorts them and computes
/// the duplicate index; the second streams the file again and stamps the
/// flag (optionally trimming names). Returns per-library metrics in
/// library order.
pub fn run_markdup(
    bam_in: &Path,
    bam_out: &Path,
    opts: &MarkdupOptions,
    progress: Option<&ProgressBar>,
) -> Result<Vec<(String, LibraryMetrics)>> {
    let mut reader = open_bam(bam_in)?;
    let header_text =
        String::from_utf8_lossy(&bam::Header::from_template(reader.header()).to_bytes())
            .into_owned();
    let libraries = LibraryTable::from_header_text(&header_text);
    let mut metrics = vec![LibraryMetrics::default(); libraries.libraries().len()];

    let (pairs, frags) = first_pass(&mut reader, opts, &libraries, &mut metrics, progress)?;
    drop(reader);

    let mut dup_index = DuplicateIndex::new(
        opts.tmp_dir.as_deref(),
        opts.sort_memory_bytes / 16,
        opts.max_open_files,
    )?;
    collect_pair_duplicates(pairs, opts, &mut dup_index, &mut metrics)?;
    collect_fragment_duplicates(frags, opts, &mut dup_index, &mut metrics)?;
    info!("{} duplicate record indices collected", dup_index.len());

    let dup_iter = dup_index.finish()?;
    second_pass(bam_in, bam_out, opts, dup_iter, progress)?;

    Ok(libraries
        .libraries()
        .iter()
        .cloned()
        .zip(metrics)
        .collect())
}

struct PendingMate {
    ref_id: i32,
    coord: i64,
    reverse: bool,
    score: u32,
    file_index: u64,
    umi: SmallVec<[u8; 12]>,
}

type SortedEnds = SortedStream<ReadEnd>;

fn first_pass(
    reader: &mut bam::Reader,
    opts: &MarkdupOptions,
    libraries: &LibraryTable,
    metrics: &mut [LibraryMetrics],
    progress: Option<&ProgressBar>,
) -> Result<(SortedEnds, SortedEnds)> {
    let mut pairs = DiskSorter::<ReadEnd>::with_memory_budget(
        opts.tmp_dir.as_deref(),
        opts.sort_memory_bytes / 2,
        READ_END_BYTES,
        opts.max_open_files,
    )?;
    let mut frags = DiskSorter::<ReadEnd>::with_memory_budget(
        opts.tmp_dir.as_deref(),
        opts.sort_memory_bytes / 2,
        READ_END_BYTES,
        opts.max_open_files,
    )?;
    let mut pending: FxHashMap<Vec<u8>, PendingMate> = FxHashMap::default();

    let mut file_index = 0u64;
    let mut umi_checked = false;
    for result in reader.records() {
        let rec = result.map_err(hts_err)?;
        let idx = file_index;
        file_index += 1;
        if let Some(pb) = progress {
            pb.inc(1);
        }

        if rec.is_secondary() || rec.is_supplementary() {
            continue;
        }
        let rg = read_group_of(&rec);
        let (rg_idx, lib) = libraries.resolve(rg.as_deref());
        if rec.is_unmapped() {
            metrics[lib as usize].unmapped += 1;
            continue;
        }

        let umi = umi_from_name(rec.qname(), opts.delimiter, &opts.umi_slots).unwrap_or_default();
        if !umi_checked {
            if let Some(expected) = &opts.expected_umis {
                let width = expected.word_len();
                if umi.is_empty() || umi.len() % width != 0 {
                    return Err(DemarkError::UmiSlotLengthMismatch {
                        observed: umi.len(),
                        expected: width,
                    });
                }
            }
            umi_checked = true;
        }

        let coord = five_prime_coordinate(&rec);
        let score = duplicate_score(&rec);
        let in_pair = rec.is_paired() && !rec.is_mate_unmapped();

        frags.push(ReadEnd::fragment(
            lib,
            rec.tid(),
            coord,
            rec.is_reverse(),
            rg_idx,
            score,
            idx,
            in_pair,
            umi.clone(),
        ))?;

        if !in_pair {
            metrics[lib as usize].unpaired_examined += 1;
            continue;
        }

        let lookup = pending_key(rec.tid(), rg.as_deref(), rec.qname());
        if let Some(mate) = pending.remove(&lookup) {
            pairs.push(complete_pair(
                &mate,
                rec.tid(),
                coord,
                rec.is_reverse(),
                score,
                idx,
                lib,
                rg_idx,
            ))?;
            metrics[lib as usize].paired_examined += 1;
        } else {
            let key = pending_key(rec.mtid(), rg.as_deref(), rec.qname());
            pending.insert(
                key,
                PendingMate {
                    ref_id: rec.tid(),
                    coord,
                    reverse: rec.is_reverse(),
                    score,
                    file_index: idx,
                    umi,
                },
            );
        }
    }

    if !pending.is_empty() {
        warn!(
            "{} paired alignments never met their mate; treated as fragments",
            pending.len()
        );
    }
    info!(
        "first pass: {} records, {} pairs, {} fragments",
        file_index,
        pairs.pushed(),
        frags.pushed()
    );

    Ok((pairs.finish()?, frags.finish()?))
}

/// Both ends known: canonicalise so `(ref1, coord1) <= (ref2, coord2)` and
/// derive the pair orientation from the reference-ordered strands.
#[allow(clippy::too_many_arguments)]
fn complete_pair(
    mate: &PendingMate,
    ref_id: i32,
    coord: i64,
    reverse: bool,
    score: u32,
    file_index: u64,
    library_id: u32,
    read_group: u32,
) -> ReadEnd {
    let first = (mate.ref_id, mate.coord, mate.reverse, mate.file_index);
    let second = (ref_id, coord, reverse, file_index);
    let (lower, upper) = if (second.0, second.1) < (first.0, first.1) {
        (second, first)
    } else {
        (first, second)
    };
    ReadEnd {
        library_id,
        ref1: lower.0,
        coord1: lower.1,
        orient: Orientation::pair(lower.2, upper.2),
        ref2: upper.0,
        coord2: upper.1,
        read_group,
        score: mate.score + score,
        file_index_1: lower.3,
        file_index_2: upper.3,
        paired: true,
        umi: mate.umi.clone(),
    }
}

fn pending_key(ref_id: i32, rg: Option<&[u8]>, name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + name.len() + rg.map_or(0, |r| r.len() + 1));
    key.extend_from_slice(&ref_id.to_le_bytes());
    if let Some(rg) = rg {
        key.extend_from_slice(rg);
    }
    key.push(0xff);
    key.extend_from_slice(name);
    key
}

fn read_group_of(rec: &Record) -> Option<Vec<u8>> {
    match rec.aux(b"RG") {
        Ok(Aux::String(s)) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

fn split_group(group: &[ReadEnd], opts: &MarkdupOptions) -> Vec<crate::dupes::umi::SubGroup> {
    let params = UmiParams {
        mismatches: opts.mismatches,
        max_n: opts.max_n,
    };
    match &opts.expected_umis {
        Some(expected) => split_closed(group, expected, &params),
        None => split_open(group, &params),
    }
}

fn collect_pair_duplicates(
    stream: SortedEnds,
    opts: &MarkdupOptions,
    dup_index: &mut DuplicateIndex,
    metrics: &mut [LibraryMetrics],
) -> Result<()> {
    for group in PositionalGrouper::new(stream, GroupBy::Pairs) {
        let group = group?;
        if group.len() < 2 {
            continue;
        }
        let subgroups = split_group(&group, opts);
        for member in select_duplicates(&group, &subgroups) {
            let rec = &group[member];
            dup_index.add(rec.file_index_1)?;
            dup_index.add(rec.file_index_2)?;
            metrics[rec.library_id as usize].paired_duplicates += 1;
        }
    }
    Ok(())
}

fn collect_fragment_duplicates(
    stream: SortedEnds,
    opts: &MarkdupOptions,
    dup_index: &mut DuplicateIndex,
    metrics: &mut [LibraryMetrics],
) -> Result<()> {
    for group in PositionalGrouper::new(stream, GroupBy::Fragments) {
        let group = group?;
        let has_pair = group.iter().any(|r| r.paired);
        if has_pair {
            // Pairs own this slot; every true fragment here is a duplicate
            // of the pair, no UMI processing.
            for rec in group.iter().filter(|r| !r.paired) {
                dup_index.add(rec.file_index_1)?;
                metrics[rec.library_id as usize].unpaired_duplicates += 1;
            }
            continue;
        }
        if group.len() < 2 {
            continue;
        }
        let subgroups = split_group(&group, opts);
        for member in select_duplicates(&group, &subgroups) {
            let rec = &group[member];
            dup_index.add(rec.file_index_1)?;
            metrics[rec.library_id as usize].unpaired_duplicates += 1;
        }
    }
    Ok(())
}

fn second_pass(
    bam_in: &Path,
    bam_out: &Path,
    opts: &MarkdupOptions,
    mut dup_iter: DuplicateIndexIter,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    let mut reader = open_bam(bam_in)?;
    let header = bam::Header::from_template(reader.header());
    let mut writer =
        bam::Writer::from_path(bam_out, &header, bam::Format::Bam).map_err(hts_err)?;

    let mut file_index = 0u64;
    for result in reader.records() {
        let mut rec = result.map_err(hts_err)?;
        if dup_iter.matches(file_index)? {
            rec.set_flags(rec.flags() | FLAG_DUPLICATE);
        } else {
            // Recomputing from scratch also clears stale flags, so marking
            // an already-marked file is idempotent.
            rec.set_flags(rec.flags() & !FLAG_DUPLICATE);
        }
        if let Some(slots) = &opts.trim_slots {
            let trimmed = trim_name(rec.qname(), opts.delimiter, slots);
            rec.set_qname(&trimmed);
        }
        writer.write(&rec).map_err(hts_err)?;
        file_index += 1;
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }
    Ok(())
}

fn open_bam(path: &Path) -> Result<bam::Reader> {
    bam::Reader::from_path(path).map_err(hts_err)
}

fn hts_err(e: rust_htslib::errors::Error) -> DemarkError {
    DemarkError::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
}
