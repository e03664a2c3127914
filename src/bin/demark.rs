use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use demark::cli::io::{
    available_memory_bytes, build_sample_sinks, open_fastq_readers, write_demux_metrics,
    write_markdup_metrics, SinkOptions,
};
use demark::cli::opts::{DemuxArgs, MarkdupArgs};
use demark::demux::barcode_table::SampleSheet;
use demark::demux::layout::ReadLayout;
use demark::demux::matcher::MatchParams;
use demark::demux::output::OutputLayout;
use demark::demux::pipeline::Demultiplexer;
use demark::dupes::markdup::{self, MarkdupOptions};
use demark::dupes::umi::ExpectedUmis;
use flate2::Compression;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "demark",
    about = "Demultiplex sequencing reads by barcode and mark UMI-aware duplicates",
    version = "0.1.0"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split parallel FASTQ streams into per-sample files by barcode
    Demux(DemuxArgs),
    /// Mark PCR duplicates in a coordinate-sorted BAM by position and UMI
    Markdup(MarkdupArgs),
}

fn main() {
    env_logger::init();
    // Catch and handle errors
    // Ensures that tempfile has time to remove the spill dirs
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    match cli.command {
        Commands::Demux(args) => run_demux(&args)?,
        Commands::Markdup(args) => run_markdup(&args)?,
    }
    println!("Elapsed time: {:.2?}", start_time.elapsed());
    Ok(())
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("       {spinner} {pos} records [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.set_message(msg);
    pb
}

fn delimiter_byte(c: char) -> Result<u8> {
    if !c.is_ascii() {
        bail!("delimiter '{}' is not an ASCII character", c);
    }
    Ok(c as u8)
}

fn run_demux(args: &DemuxArgs) -> Result<()> {
    if args.fastq.len() != args.read_layout.len() {
        bail!(
            "{} input files but {} read layouts; need exactly one layout per file",
            args.fastq.len(),
            args.read_layout.len()
        );
    }
    let delimiter = delimiter_byte(args.delimiter)?;

    let layouts: Vec<ReadLayout> = args
        .read_layout
        .iter()
        .map(|text| ReadLayout::parse(text))
        .collect::<std::result::Result<_, _>>()
        .context("parsing read layouts")?;
    let outputs: Vec<OutputLayout> = args
        .out_layout
        .iter()
        .enumerate()
        .map(|(i, text)| OutputLayout::parse(text, (i + 1) as u32, delimiter))
        .collect::<std::result::Result<_, _>>()
        .context("parsing output layouts")?;

    println!("Start: Loading barcode table");
    let sheet = SampleSheet::from_path(&args.barcodes, None).context("loading barcode table")?;
    println!(
        "Loaded {} samples across {} barcode slot(s)",
        sheet.len(),
        sheet.sets().len()
    );

    let params = MatchParams {
        max_mismatches: args.max_mismatches,
        min_delta: args.min_delta,
        min_quality: args.min_quality,
    };
    let pipeline = Demultiplexer::new(layouts, outputs, sheet, params)?;

    let readers = open_fastq_readers(&args.fastq)?;
    let sinks = build_sample_sinks(
        pipeline.sheet(),
        pipeline.outputs(),
        &args.output_dir,
        args.fastq.len(),
        &SinkOptions {
            compression: Compression::new(args.compression_level),
            asynchronous: args.async_writers,
            keep_unassigned: args.keep_unassigned,
            force: args.force,
        },
    )
    .context("creating output files")?;

    println!("Start: Demultiplexing");
    let pb = spinner("demultiplexing");
    let report = pipeline.run(readers, sinks, Some(&pb))?;
    pb.finish_with_message("| Finished demultiplexing");

    write_demux_metrics(
        &args.output_dir.join("demux_metrics.txt"),
        pipeline.sheet(),
        &report,
    )
    .context("writing metrics")?;

    println!(
        "{} records: {} assigned, {} unassigned ({} truncated, {} without a barcode match, {} with an unknown combination)",
        report.counters.total,
        report.counters.assigned,
        report.counters.unassigned,
        report.counters.truncated,
        report.counters.no_match,
        report.counters.unknown_combination
    );
    Ok(())
}

fn run_markdup(args: &MarkdupArgs) -> Result<()> {
    if !args.force && args.output.exists() {
        bail!(
            "output {:?} exists; pass --force to overwrite",
            args.output
        );
    }
    if !(0.0..=1.0).contains(&args.sort_memory_fraction) {
        bail!("--sort-memory-fraction must lie in [0, 1]");
    }

    let expected_umis = match &args.expected_umis {
        Some(path) => Some(ExpectedUmis::from_path(path).context("loading expected UMIs")?),
        None => None,
    };
    let trim_slots = if args.trim_header {
        if args.trim_slots.is_empty() {
            Some(args.umi_slots.clone())
        } else {
            Some(args.trim_slots.clone())
        }
    } else {
        None
    };
    let sort_memory_bytes =
        ((available_memory_bytes() as f64 * args.sort_memory_fraction) as usize).max(64 << 20);

    let opts = MarkdupOptions {
        mismatches: args.mismatches,
        max_n: args.max_n.unwrap_or(args.mismatches),
        umi_slots: args.umi_slots.clone(),
        expected_umis,
        delimiter: delimiter_byte(args.delimiter)?,
        trim_slots,
        tmp_dir: args.tmp_dir.clone(),
        sort_memory_bytes,
        max_open_files: args.max_open_files,
    };

    println!("Start: Marking duplicates");
    let pb = spinner("marking duplicates");
    let metrics = markdup::run_markdup(&args.bam, &args.output, &opts, Some(&pb))?;
    pb.finish_with_message("| Finished marking duplicates");

    if let Some(path) = &args.metrics {
        write_markdup_metrics(path, &metrics).context("writing metrics")?;
    }
    for (library, m) in &metrics {
        println!(
            "{}: {} pairs and {} unpaired reads examined, {} pair and {} unpaired duplicates",
            library, m.paired_examined, m.unpaired_examined, m.paired_duplicates, m.unpaired_duplicates
        );
    }
    Ok(())
}
