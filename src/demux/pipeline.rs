use crate::cli::counters::DemuxCounters;
use crate::demux::barcode_table::SampleSheet;
use crate::demux::layout::ReadLayout;
use crate::demux::matcher::{best_match, BarcodeMatch, MatchParams};
use crate::demux::output::{OutRecord, OutputLayout, SlotValues};
use crate::demux::writer::SampleSinks;
use crate::errors::{DemarkError, Result};
use indicatif::ProgressBar;
use log::{debug, info};
use needletail::parser::FastxReader;
use smallvec::SmallVec;
use std::io;

/// FASTQ quality offset.
const PHRED_OFFSET: u8 = b'!';

/// One record copied out of a reader, so that all parallel records of a
/// tuple can be held at once.
#[derive(Debug, Clone)]
pub struct OwnedRecord {
    pub name: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

/// Per-record matching outcome across all barcode slots.
#[derive(Debug)]
pub struct SampleMatch {
    /// Slot id to match result, ascending id order.
    pub matches: SmallVec<[(u32, BarcodeMatch); 2]>,
    /// Resolved sample index, `None` for unassigned.
    pub sample: Option<usize>,
    /// Human-readable diagnostic, one token per slot.
    pub note: String,
}

/// The demultiplexer: N read layouts over N parallel input streams, a
/// sample sheet, and one or more output layouts.
pub struct Demultiplexer {
    layouts: Vec<ReadLayout>,
    outputs: Vec<OutputLayout>,
    sheet: SampleSheet,
    params: MatchParams,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct DemuxReport {
    pub counters: DemuxCounters,
    /// Assigned record tuples per sample, sheet order.
    pub per_sample: Vec<u64>,
}

impl Demultiplexer {
    /// Wire the pieces together and cross-validate them: every barcode
    /// slot must have an expected set of the declared length, every output
    /// reference must resolve, and stream indices must be unique.
    pub fn new(
        layouts: Vec<ReadLayout>,
        outputs: Vec<OutputLayout>,
        sheet: SampleSheet,
        params: MatchParams,
    ) -> Result<Self> {
        let mut slot_ids: Vec<u32> = layouts.iter().flat_map(|l| l.barcode_ids()).collect();
        slot_ids.sort_unstable();
        slot_ids.dedup();

        for &id in &slot_ids {
            let set = sheet.set_for(id).ok_or_else(|| {
                DemarkError::InvalidBarcodeTable(format!(
                    "no BARCODE{} column for barcode slot {}",
                    id, id
                ))
            })?;
            for layout in &layouts {
                if let Some(len) = layout.barcode_len(id) {
                    if len != set.word_len() {
                        return Err(DemarkError::InvalidBarcodeTable(format!(
                            "slot {} is {} bases in layout '{}' but the table words are {} bases",
                            id,
                            len,
                            layout.text(),
                            set.word_len()
                        )));
                    }
                }
            }
        }
        for (id, _) in sheet.sets() {
            if !slot_ids.contains(id) {
                return Err(DemarkError::InvalidBarcodeTable(format!(
                    "table column BARCODE{} matches no barcode slot in any read layout",
                    id
                )));
            }
        }

        let mut streams: Vec<u32> = Vec::new();
        for output in &outputs {
            output.validate_against(&layouts)?;
            if streams.contains(&output.stream) {
                return Err(DemarkError::layout(
                    output.text(),
                    format!("duplicate output stream index {}", output.stream),
                ));
            }
            streams.push(output.stream);
        }

        Ok(Demultiplexer {
            layouts,
            outputs,
            sheet,
            params,
        })
    }

    pub fn layouts(&self) -> &[ReadLayout] {
        &self.layouts
    }

    pub fn outputs(&self) -> &[OutputLayout] {
        &self.outputs
    }

    pub fn sheet(&self) -> &SampleSheet {
        &self.sheet
    }

    /// Match every barcode slot of one tuple and resolve the sample.
    pub fn match_tuple(&self, values: &SlotValues) -> SampleMatch {
        let mut matches: SmallVec<[(u32, BarcodeMatch); 2]> = SmallVec::new();
        let mut note = String::new();
        let mut key: Vec<u8> = Vec::new();
        let mut all_matched = true;

        for (id, set) in self.sheet.sets() {
            // Redundant slots across layouts: first insertion won, any one
            // observation serves.
            let (bases, quals) = match values.barcode(*id) {
                Some(v) => v,
                None => {
                    all_matched = false;
                    continue;
                }
            };
            let phred: SmallVec<[u8; 16]> =
                quals.iter().map(|q| q.saturating_sub(PHRED_OFFSET)).collect();
            let m = best_match(bases, &phred, set, &self.params);
            if !note.is_empty() {
                note.push(' ');
            }
            match m.barcode {
                Some(idx) if m.matched => {
                    key.extend_from_slice(set.word(idx));
                    note.push_str(&format!(
                        "slot{}:{}(mm={},d2={})",
                        id,
                        String::from_utf8_lossy(set.word(idx)),
                        m.mismatches,
                        m.mismatches_to_second_best
                    ));
                }
                _ => {
                    all_matched = false;
                    note.push_str(&format!("slot{}:no_match(mm={})", id, m.mismatches));
                }
            }
            matches.push((*id, m));
        }

        let sample = if all_matched {
            self.sheet.resolve(&key)
        } else {
            None
        };
        SampleMatch {
            matches,
            sample,
            note,
        }
    }

    /// Drive the full run: pull aligned tuples, match, assemble, dispatch.
    ///
    /// Takes ownership of the sinks so they can be closed on both the
    /// success and the fatal-error path.
    pub fn run(
        &self,
        mut readers: Vec<Box<dyn FastxReader>>,
        sinks: SampleSinks,
        progress: Option<&ProgressBar>,
    ) -> Result<DemuxReport> {
        assert_eq!(
            readers.len(),
            self.layouts.len(),
            "one reader per read layout"
        );
        let mut sinks = sinks;
        match self.run_inner(&mut readers, &mut sinks, progress) {
            Ok(report) => {
                sinks.finish()?;
                Ok(report)
            }
            Err(e) => {
                // Close writers before surfacing the failure; partial
                // output stays on disk for the caller.
                let _ = sinks.finish();
                Err(e)
            }
        }
    }

    fn run_inner(
        &self,
        readers: &mut [Box<dyn FastxReader>],
        sinks: &mut SampleSinks,
        progress: Option<&ProgressBar>,
    ) -> Result<DemuxReport> {
        let mut counters = DemuxCounters::default();
        let mut per_sample = vec![0u64; self.sheet.len()];

        loop {
            let records = match pull_tuple(readers, counters.total)? {
                Some(records) => records,
                None => break,
            };
            counters.total += 1;
            if let Some(pb) = progress {
                pb.inc(1);
            }

            // Slot extraction over every stream; a short read routes the
            // whole tuple to unassigned.
            let mut values = SlotValues::default();
            let mut truncated = false;
            for (layout, record) in self.layouts.iter().zip(&records) {
                match layout.extract(&record.seq, &record.qual) {
                    Ok(ext) => {
                        for slot in &ext.barcodes {
                            values.insert_barcode(slot.id, slot.bases, slot.quals);
                        }
                        for slot in &ext.umis {
                            values.insert_umi(slot.id, slot.bases, slot.quals);
                        }
                        if let Some(slot) = ext.sample {
                            values.insert_sample(slot.id, slot.bases, slot.quals);
                        }
                    }
                    Err(DemarkError::TruncatedRead { .. }) => {
                        truncated = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if truncated {
                counters.truncated += 1;
                counters.unassigned += 1;
                self.route_unassigned(sinks, &records)?;
                continue;
            }

            let matched = self.match_tuple(&values);
            let sample_idx = match matched.sample {
                Some(idx) => idx,
                None => {
                    if matched.matches.iter().all(|(_, m)| m.matched) {
                        counters.unknown_combination += 1;
                    } else {
                        counters.no_match += 1;
                    }
                    counters.unassigned += 1;
                    debug!("unassigned: {}", matched.note);
                    self.route_unassigned(sinks, &records)?;
                    continue;
                }
            };
            counters.assigned += 1;
            per_sample[sample_idx] += 1;

            // The matched words become READBAR values, paired with the
            // observed slot's quality bytes.
            for (id, m) in &matched.matches {
                if let (Some(word_idx), Some((_, quals))) = (m.barcode, values.barcode(*id)) {
                    let set = self.sheet.set_for(*id).expect("validated in new()");
                    values.insert_readbar(*id, set.word(word_idx), quals);
                }
            }

            for (pos, output) in self.outputs.iter().enumerate() {
                // The output name derives from the input record feeding
                // this stream, falling back to the first stream.
                let source = (output.stream as usize - 1).min(records.len() - 1);
                let rec = output.assemble(&records[source].name, &values)?;
                sinks.write(sample_idx, pos, rec)?;
            }
        }

        info!(
            "demultiplexed {} tuples: {} assigned, {} unassigned ({} truncated)",
            counters.total, counters.assigned, counters.unassigned, counters.truncated
        );
        Ok(DemuxReport {
            counters,
            per_sample,
        })
    }

    fn route_unassigned(&self, sinks: &mut SampleSinks, records: &[OwnedRecord]) -> Result<()> {
        if !sinks.has_unassigned() {
            return Ok(());
        }
        for (idx, record) in records.iter().enumerate() {
            sinks.write_unassigned(
                idx,
                OutRecord {
                    name: record.name.clone(),
                    seq: record.seq.clone(),
                    qual: record.qual.clone(),
                },
            )?;
        }
        Ok(())
    }
}

/// Pull the next record from every reader. `None` when all streams are
/// cleanly exhausted; `StreamMisaligned` when only some are.
fn pull_tuple(
    readers: &mut [Box<dyn FastxReader>],
    tuple_index: u64,
) -> Result<Option<Vec<OwnedRecord>>> {
    let mut records: Vec<Option<OwnedRecord>> = Vec::with_capacity(readers.len());
    for reader in readers.iter_mut() {
        match reader.next() {
            None => records.push(None),
            Some(Err(e)) => {
                return Err(DemarkError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    e.to_string(),
                )));
            }
            Some(Ok(rec)) => {
                let qual = rec.qual().ok_or_else(|| {
                    DemarkError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "input is not FASTQ (no quality line)",
                    ))
                })?;
                records.push(Some(OwnedRecord {
                    name: rec.id().to_vec(),
                    seq: rec.seq().to_vec(),
                    qual: qual.to_vec(),
                }));
            }
        }
    }

    let exhausted = records.iter().filter(|r| r.is_none()).count();
    if exhausted == records.len() {
        return Ok(None);
    }
    if exhausted > 0 {
        return Err(DemarkError::StreamMisaligned(format!(
            "{} of {} streams ended at record {}",
            exhausted,
            records.len(),
            tuple_index
        )));
    }
    Ok(Some(records.into_iter().map(|r| r.unwrap()).collect()))
}
