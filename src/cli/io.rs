use crate::cli::counters::LibraryMetrics;
use crate::demux::barcode_table::SampleSheet;
use crate::demux::output::OutputLayout;
use crate::demux::pipeline::DemuxReport;
use crate::demux::writer::{FastqSink, SampleSinks};
use crate::errors::{DemarkError, Result};
use flate2::Compression;
use needletail::parse_fastx_file;
use needletail::parser::FastxReader;
use std::fs::{create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hard cap on output file handles; checked before any file is created.
pub const MAX_OUTPUT_HANDLES: usize = 4096;

/// Fallback when `/proc/meminfo` is unavailable.
const DEFAULT_MEMORY_BYTES: u64 = 8 << 30;

/// Open one FASTQ reader per input path (gzip transparent).
pub fn open_fastq_readers(paths: &[PathBuf]) -> Result<Vec<Box<dyn FastxReader>>> {
    paths
        .iter()
        .map(|path| {
            parse_fastx_file(path).map_err(|e| {
                DemarkError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("opening {:?}: {}", path, e),
                ))
            })
        })
        .collect()
}

/// Writer construction options for a demultiplex run.
pub struct SinkOptions {
    pub compression: Compression,
    pub asynchronous: bool,
    pub keep_unassigned: bool,
    pub force: bool,
}

/// Plan and create every output sink: one file per (sample, output
/// stream), plus per-input unassigned files when requested.
///
/// Pre-flight: the handle budget is asserted and existing files are
/// refused without `force`, all violations reported together.
pub fn build_sample_sinks(
    sheet: &SampleSheet,
    outputs: &[OutputLayout],
    out_dir: &Path,
    n_inputs: usize,
    opts: &SinkOptions,
) -> Result<SampleSinks> {
    create_dir_all(out_dir)?;

    let mut sample_paths: Vec<Vec<PathBuf>> = Vec::with_capacity(sheet.len());
    for sample in sheet.samples() {
        let paths = outputs
            .iter()
            .map(|output| {
                let name = sample
                    .output_name(output.stream)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_{}.fastq.gz", sample.name, output.stream));
                out_dir.join(name)
            })
            .collect();
        sample_paths.push(paths);
    }
    let unassigned_paths: Vec<PathBuf> = if opts.keep_unassigned {
        (1..=n_inputs)
            .map(|n| out_dir.join(format!("unassigned_{}.fastq.gz", n)))
            .collect()
    } else {
        Vec::new()
    };

    let total = sample_paths.iter().map(|p| p.len()).sum::<usize>() + unassigned_paths.len();
    if total > MAX_OUTPUT_HANDLES {
        return Err(DemarkError::ResourceExhausted(format!(
            "{} output files exceed the handle budget of {}",
            total, MAX_OUTPUT_HANDLES
        )));
    }

    if !opts.force {
        let existing: Vec<String> = sample_paths
            .iter()
            .flatten()
            .chain(&unassigned_paths)
            .filter(|p| p.exists())
            .map(|p| format!("{:?}", p))
            .collect();
        if !existing.is_empty() {
            return Err(DemarkError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "refusing to overwrite without --force: {}",
                    existing.join(", ")
                ),
            )));
        }
    }

    let mut per_sample = Vec::with_capacity(sample_paths.len());
    for paths in &sample_paths {
        let mut sinks = Vec::with_capacity(paths.len());
        for path in paths {
            sinks.push(FastqSink::create(path, opts.compression, opts.asynchronous)?);
        }
        per_sample.push(sinks);
    }
    let mut unassigned = Vec::with_capacity(unassigned_paths.len());
    for path in &unassigned_paths {
        unassigned.push(FastqSink::create(path, opts.compression, opts.asynchronous)?);
    }

    Ok(SampleSinks::new(per_sample, unassigned))
}

/// Per-sample assignment counts plus the run summary, tab-separated.
pub fn write_demux_metrics(path: &Path, sheet: &SampleSheet, report: &DemuxReport) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "## demark demux metrics")?;
    writeln!(writer, "SAMPLE\tRECORDS")?;
    for (sample, count) in sheet.samples().iter().zip(&report.per_sample) {
        writeln!(writer, "{}\t{}", sample.name, count)?;
    }
    writeln!(writer, "unassigned\t{}", report.counters.unassigned)?;
    writeln!(writer)?;
    writeln!(writer, "## totals")?;
    writeln!(
        writer,
        "TOTAL\tASSIGNED\tUNASSIGNED\tTRUNCATED\tNO_MATCH\tUNKNOWN_COMBINATION"
    )?;
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}",
        report.counters.total,
        report.counters.assigned,
        report.counters.unassigned,
        report.counters.truncated,
        report.counters.no_match,
        report.counters.unknown_combination
    )?;
    writer.flush()?;
    Ok(())
}

/// Per-library duplicate-marking metrics, tab-separated.
pub fn write_markdup_metrics(path: &Path, metrics: &[(String, LibraryMetrics)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "## demark markdup metrics")?;
    writeln!(
        writer,
        "LIBRARY\tUNMAPPED_READS\tUNPAIRED_READS_EXAMINED\tREAD_PAIRS_EXAMINED\t\
         UNPAIRED_READ_DUPLICATES\tREAD_PAIR_DUPLICATES\tOPTICAL_DUPLICATE_CLUSTERS"
    )?;
    for (library, m) in metrics {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            library,
            m.unmapped,
            m.unpaired_examined,
            m.paired_examined,
            m.unpaired_duplicates,
            m.paired_duplicates,
            m.optical_duplicate_clusters
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// `MemAvailable` from `/proc/meminfo`, with a conservative fallback.
pub fn available_memory_bytes() -> u64 {
    let Ok(text) = std::fs::read_to_string("/proc/meminfo") else {
        return DEFAULT_MEMORY_BYTES;
    };
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            if let Some(kb) = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
            {
                return kb * 1024;
            }
        }
    }
    DEFAULT_MEMORY_BYTES
}
