use clap::{value_parser, Args};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct DemuxArgs {
    /// Input FASTQ file(s), one per read layout; gzip is transparent [path]
    #[clap(short = 'f', long = "fastq", num_args = 1.., required = true, help_heading = "Core")]
    pub fastq: Vec<PathBuf>,

    /// Read layout per input stream, e.g. '<BARCODE1:6><SAMPLE1:x>'
    #[clap(short = 'l', long = "read-layout", num_args = 1.., required = true, help_heading = "Core")]
    pub read_layout: Vec<String>,

    /// Output layout(s), '[index:]<name refs>:<sequence refs>',
    /// e.g. '1:<READBAR1><UMI1>:<SAMPLE1>'
    #[clap(short = 'O', long = "out-layout", num_args = 1.., required = true, help_heading = "Core")]
    pub out_layout: Vec<String>,

    /// Expected-barcode table (TSV: SAMPLE, BARCODE<n>, OUT<n>) [path]
    #[clap(short = 'b', long, required = true, help_heading = "Core")]
    pub barcodes: PathBuf,

    /// Output directory for per-sample files [path]
    #[clap(short = 'o', long, required = true, help_heading = "Core")]
    pub output_dir: PathBuf,

    /// Maximum mismatches for an accepted barcode match [integer]
    #[clap(long, alias = "mm", default_value = "1", help_heading = "Matching")]
    pub max_mismatches: u32,

    /// Required mismatch gap to the second-best barcode [integer]
    #[clap(long, default_value = "1", help_heading = "Matching")]
    pub min_delta: u32,

    /// Phred score under which a compared base counts as a mismatch;
    /// 0 disables the quality rule [integer]
    #[clap(long, default_value = "0", value_parser = value_parser!(u8).range(0..=93), help_heading = "Matching")]
    pub min_quality: u8,

    /// Delimiter between the original name and appended slots [char]
    #[clap(long, default_value = ":", help_heading = "Output")]
    pub delimiter: char,

    /// Also write unassigned reads to unassigned_<n> files [flag]
    #[clap(long, help_heading = "Output")]
    pub keep_unassigned: bool,

    /// One writer thread per output file, with a bounded queue [flag]
    #[clap(long, help_heading = "Output")]
    pub async_writers: bool,

    /// Gzip compression level for output files [integer]
    #[clap(long, default_value = "6", value_parser = value_parser!(u32).range(0..=9), help_heading = "Output")]
    pub compression_level: u32,

    /// Overwrite existing output files [flag]
    #[clap(long, help_heading = "Output")]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct MarkdupArgs {
    /// Coordinate-sorted BAM input file [path]
    #[clap(short = 'i', long, required = true, help_heading = "Core")]
    pub bam: PathBuf,

    /// Flagged BAM output file [path]
    #[clap(short = 'o', long, required = true, help_heading = "Core")]
    pub output: PathBuf,

    /// Per-library metrics file [path]
    #[clap(short = 'm', long, help_heading = "Core")]
    pub metrics: Option<PathBuf>,

    /// UMI mismatch budget [integer]
    #[clap(long, alias = "mm", default_value = "1", help_heading = "UMI")]
    pub mismatches: u32,

    /// Max N bases before a UMI is degenerate (default: --mismatches) [integer]
    #[clap(long, help_heading = "UMI")]
    pub max_n: Option<u32>,

    /// 1-based name tokens carrying the UMI; negative counts from the end
    #[clap(long = "umi-slot", num_args = 1.., default_values_t = vec![-1], allow_negative_numbers = true, help_heading = "UMI")]
    pub umi_slots: Vec<i32>,

    /// File of expected UMI words, one per line [path]
    #[clap(long, help_heading = "UMI")]
    pub expected_umis: Option<PathBuf>,

    /// Delimiter splitting the read name into tokens [char]
    #[clap(long, default_value = ":", help_heading = "UMI")]
    pub delimiter: char,

    /// Remove the --trim-slot name tokens on the second pass [flag]
    #[clap(long, help_heading = "Header")]
    pub trim_header: bool,

    /// Name tokens to remove with --trim-header (default: the UMI slots)
    #[clap(long = "trim-slot", num_args = 1.., allow_negative_numbers = true, help_heading = "Header")]
    pub trim_slots: Vec<i32>,

    /// Directory for sort spill files (default: system temp) [path]
    #[clap(long, help_heading = "Resources")]
    pub tmp_dir: Option<PathBuf>,

    /// Fraction of available memory for the in-RAM sort batches [float]
    #[clap(long, default_value = "0.25", help_heading = "Resources")]
    pub sort_memory_fraction: f64,

    /// Max spill files open at once during merge [integer]
    #[clap(long, default_value = "8000", help_heading = "Resources")]
    pub max_open_files: usize,

    /// Overwrite an existing output file [flag]
    #[clap(long, help_heading = "Core")]
    pub force: bool,
}
