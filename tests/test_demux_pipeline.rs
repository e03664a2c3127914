#[cfg(test)]
mod demux_pipeline_tests {
    use demark::cli::io::{build_sample_sinks, open_fastq_readers, SinkOptions};
    use demark::demux::barcode_table::SampleSheet;
    use demark::demux::layout::ReadLayout;
    use demark::demux::matcher::MatchParams;
    use demark::demux::output::OutputLayout;
    use demark::demux::pipeline::Demultiplexer;
    use demark::errors::DemarkError;
    use flate2::Compression;
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn sink_options() -> SinkOptions {
        SinkOptions {
            compression: Compression::default(),
            asynchronous: false,
            keep_unassigned: false,
            force: false,
        }
    }

    fn params(max_mismatches: u32, min_delta: u32, min_quality: u8) -> MatchParams {
        MatchParams {
            max_mismatches,
            min_delta,
            min_quality,
        }
    }

    // One stream, one barcode slot, payload passed through. The matched
    // barcode lands in the name, the remainder in the sequence.
    #[test]
    fn single_stream_demultiplex() {
        let dir = TempDir::new().unwrap();
        let fastq = write_file(
            dir.path(),
            "in.fastq",
            "@r1\nAAATTTCGATG\n+\nIIIIIIEEEEE\n",
        );
        // Plain-text OUT names so the files can be read back directly.
        let table = "SAMPLE\tBARCODE1\tOUT1\n\
                     sample1\tAAATTT\ts1.fastq\n\
                     sample2\tCCCGGG\ts2.fastq\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();

        let layouts = vec![ReadLayout::parse("<BARCODE1:6><SAMPLE1:x>").unwrap()];
        let outputs = vec![OutputLayout::parse("1:<READBAR1>:<SAMPLE1>", 1, b':').unwrap()];
        let pipeline =
            Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).unwrap();

        let out_dir = dir.path().join("out");
        let sinks = build_sample_sinks(
            pipeline.sheet(),
            pipeline.outputs(),
            &out_dir,
            1,
            &sink_options(),
        )
        .unwrap();
        let readers = open_fastq_readers(&[fastq]).unwrap();
        let report = pipeline.run(readers, sinks, None).unwrap();

        assert_eq!(report.counters.total, 1);
        assert_eq!(report.counters.assigned, 1);
        assert_eq!(report.per_sample, vec![1, 0]);

        let s1 = fs::read_to_string(out_dir.join("s1.fastq")).unwrap();
        assert_eq!(s1, "@r1:AAATTT\nCGATG\n+\nEEEEE\n");
        let s2 = fs::read_to_string(out_dir.join("s2.fastq")).unwrap();
        assert!(s2.is_empty());
    }

    // Two streams sharing barcode slot 1: one composite match, both
    // output records carry the matched word, each keeps its own payload.
    #[test]
    fn paired_streams_with_redundant_barcode() {
        let dir = TempDir::new().unwrap();
        let r1 = write_file(
            dir.path(),
            "r1.fastq",
            "@p1\nCTGAGTAAAACCCC\n+\nIIIIIIJJJJJJJJ\n",
        );
        let r2 = write_file(
            dir.path(),
            "r2.fastq",
            "@p1\nCTGAGTGGGGTTTT\n+\nIIIIIIKKKKKKKK\n",
        );
        let table = "SAMPLE\tBARCODE1\tOUT1\tOUT2\n\
                     sampleA\tCTGAGT\ta_1.fastq\ta_2.fastq\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();

        let layouts = vec![
            ReadLayout::parse("<BARCODE1:6><SAMPLE1:x>").unwrap(),
            ReadLayout::parse("<BARCODE1:6><SAMPLE2:x>").unwrap(),
        ];
        let outputs = vec![
            OutputLayout::parse("1:<READBAR1>:<SAMPLE1>", 1, b':').unwrap(),
            OutputLayout::parse("2:<READBAR1>:<SAMPLE2>", 2, b':').unwrap(),
        ];
        let pipeline =
            Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).unwrap();

        let out_dir = dir.path().join("out");
        let sinks = build_sample_sinks(
            pipeline.sheet(),
            pipeline.outputs(),
            &out_dir,
            2,
            &sink_options(),
        )
        .unwrap();
        let readers = open_fastq_readers(&[r1, r2]).unwrap();
        let report = pipeline.run(readers, sinks, None).unwrap();
        assert_eq!(report.counters.assigned, 1);

        let a1 = fs::read_to_string(out_dir.join("a_1.fastq")).unwrap();
        assert_eq!(a1, "@p1:CTGAGT\nAAAACCCC\n+\nJJJJJJJJ\n");
        let a2 = fs::read_to_string(out_dir.join("a_2.fastq")).unwrap();
        assert_eq!(a2, "@p1:CTGAGT\nGGGGTTTT\n+\nKKKKKKKK\n");
    }

    // UMI slot into the name, payload into the sequence.
    #[test]
    fn umi_in_output_name() {
        let dir = TempDir::new().unwrap();
        let fastq = write_file(
            dir.path(),
            "in.fastq",
            "@r1\nAAATTTGCGCACGT\n+\nIIIIIIJJJJEEEE\n",
        );
        let table = "SAMPLE\tBARCODE1\tOUT1\nsample1\tAAATTT\ts1.fastq\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();

        let layouts = vec![ReadLayout::parse("<BARCODE1:6><UMI1:4><SAMPLE1:x>").unwrap()];
        let outputs =
            vec![OutputLayout::parse("1:<READBAR1><UMI1>:<SAMPLE1>", 1, b':').unwrap()];
        let pipeline =
            Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).unwrap();

        let out_dir = dir.path().join("out");
        let sinks = build_sample_sinks(
            pipeline.sheet(),
            pipeline.outputs(),
            &out_dir,
            1,
            &sink_options(),
        )
        .unwrap();
        let readers = open_fastx(&[fastq]);
        let _ = pipeline.run(readers, sinks, None).unwrap();

        let s1 = fs::read_to_string(out_dir.join("s1.fastq")).unwrap();
        assert_eq!(s1, "@r1:AAATTT:GCGC\nACGT\n+\nEEEE\n");
    }

    fn open_fastx(paths: &[PathBuf]) -> Vec<Box<dyn needletail::parser::FastxReader>> {
        open_fastq_readers(paths).unwrap()
    }

    // Unmatched barcodes and short reads are counted, and routed to the
    // unassigned files when enabled.
    #[test]
    fn unassigned_reads_are_counted_and_kept() {
        let dir = TempDir::new().unwrap();
        let fastq = write_file(
            dir.path(),
            "in.fastq",
            "@ok\nAAATTTCGATG\n+\nIIIIIIEEEEE\n\
             @bad\nGGGGGGCGATG\n+\nIIIIIIEEEEE\n\
             @short\nAAA\n+\nIII\n",
        );
        let table = "SAMPLE\tBARCODE1\tOUT1\nsample1\tAAATTT\ts1.fastq\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();
        let layouts = vec![ReadLayout::parse("<BARCODE1:6><SAMPLE1:x>").unwrap()];
        let outputs = vec![OutputLayout::parse("1:<READBAR1>:<SAMPLE1>", 1, b':').unwrap()];
        let pipeline =
            Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).unwrap();

        let out_dir = dir.path().join("out");
        let sinks = build_sample_sinks(
            pipeline.sheet(),
            pipeline.outputs(),
            &out_dir,
            1,
            &SinkOptions {
                keep_unassigned: true,
                ..sink_options()
            },
        )
        .unwrap();
        let readers = open_fastx(&[fastq]);
        let report = pipeline.run(readers, sinks, None).unwrap();

        assert_eq!(report.counters.total, 3);
        assert_eq!(report.counters.assigned, 1);
        assert_eq!(report.counters.unassigned, 2);
        assert_eq!(report.counters.truncated, 1);
        assert_eq!(report.counters.no_match, 1);

        // Unassigned sinks default to gzip; only check they exist and are
        // non-empty.
        let unassigned = out_dir.join("unassigned_1.fastq.gz");
        assert!(unassigned.exists());
        assert!(fs::metadata(unassigned).unwrap().len() > 0);
    }

    #[test]
    fn desynchronised_streams_are_fatal() {
        let dir = TempDir::new().unwrap();
        let r1 = write_file(
            dir.path(),
            "r1.fastq",
            "@a\nAAATTTC\n+\nIIIIIII\n@b\nAAATTTC\n+\nIIIIIII\n",
        );
        let r2 = write_file(dir.path(), "r2.fastq", "@a\nAAATTTG\n+\nIIIIIII\n");
        let table = "SAMPLE\tBARCODE1\tOUT1\tOUT2\ns1\tAAATTT\to1.fastq\to2.fastq\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();
        let layouts = vec![
            ReadLayout::parse("<BARCODE1:6><SAMPLE1:x>").unwrap(),
            ReadLayout::parse("<BARCODE1:6><SAMPLE2:x>").unwrap(),
        ];
        let outputs = vec![
            OutputLayout::parse("1:<READBAR1>:<SAMPLE1>", 1, b':').unwrap(),
            OutputLayout::parse("2:<READBAR1>:<SAMPLE2>", 2, b':').unwrap(),
        ];
        let pipeline =
            Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).unwrap();
        let out_dir = dir.path().join("out");
        let sinks = build_sample_sinks(
            pipeline.sheet(),
            pipeline.outputs(),
            &out_dir,
            2,
            &sink_options(),
        )
        .unwrap();
        let readers = open_fastx(&[r1, r2]);
        let err = pipeline.run(readers, sinks, None).unwrap_err();
        assert!(matches!(err, DemarkError::StreamMisaligned(_)));
    }

    #[test]
    fn mismatched_slot_length_is_rejected_up_front() {
        let table = "SAMPLE\tBARCODE1\ns1\tACGT\n";
        let sheet = SampleSheet::from_reader(Cursor::new(table.as_bytes()), None).unwrap();
        let layouts = vec![ReadLayout::parse("<BARCODE1:6><SAMPLE1:x>").unwrap()];
        let outputs = vec![OutputLayout::parse("1:<READBAR1>:<SAMPLE1>", 1, b':').unwrap()];
        assert!(Demultiplexer::new(layouts, outputs, sheet, params(0, 1, 0)).is_err());
    }
}
