use crate::demux::matcher::BarcodeSet;
use crate::errors::{DemarkError, Result};
use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Secondary delimiter inside one barcode cell: `AAA|CCC` declares
/// equivalent words for the same sample.
pub const EQUIVALENT_DELIMITER: char = '|';

/// One sample row of the table.
#[derive(Debug, Clone)]
pub struct SampleEntry {
    pub name: String,
    /// Explicit output file names from `OUT<n>` columns, keyed by stream
    /// index.
    pub outputs: Vec<(u32, String)>,
}

impl SampleEntry {
    /// Explicit output name for a stream index, when the table declares one.
    pub fn output_name(&self, stream: u32) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(n, _)| *n == stream)
            .map(|(_, name)| name.as_str())
    }
}

/// The validated expected-barcode table.
///
/// Tab-separated text; the first line is a header whose recognised columns
/// are `SAMPLE`, `BARCODE<n>` (n >= 1) and `OUT<n>` (n >= 1). One data row
/// per sample. A barcode cell may hold several equivalent words separated
/// by [`EQUIVALENT_DELIMITER`].
///
/// All validation failures in a file are collected and reported together.
#[derive(Debug)]
pub struct SampleSheet {
    samples: Vec<SampleEntry>,
    /// Expected set per barcode slot id, ascending id order.
    sets: Vec<(u32, BarcodeSet)>,
    /// Composite key (matched words concatenated in slot-id order) to
    /// sample index.
    lookup: FxHashMap<Vec<u8>, usize>,
}

#[derive(Debug, Clone, Copy)]
enum Column {
    Sample,
    Barcode(u32),
    Out(u32),
}

impl SampleSheet {
    pub fn from_path(path: &Path, enforced_len: Option<usize>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), enforced_len)
    }

    /// Parse and validate the table. `enforced_len`, when given, is a hard
    /// constraint on every barcode word length.
    pub fn from_reader(reader: impl BufRead, enforced_len: Option<usize>) -> Result<Self> {
        let mut lines = reader.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(DemarkError::InvalidBarcodeTable(
                    "empty barcode table".to_string(),
                ));
            }
        };

        let columns = parse_header(&header)?;
        let barcode_ids: Vec<u32> = columns
            .iter()
            .filter_map(|c| match c {
                Column::Barcode(n) => Some(*n),
                _ => None,
            })
            .collect();

        let mut errors: Vec<String> = Vec::new();
        let mut samples: Vec<SampleEntry> = Vec::new();
        // Per slot id: word -> owning sample index, for cross-sample
        // duplicate detection and set construction.
        let mut words_by_slot: FxHashMap<u32, FxHashMap<Vec<u8>, usize>> = FxHashMap::default();
        // Per sample: slot id -> equivalent words.
        let mut sample_words: Vec<FxHashMap<u32, Vec<Vec<u8>>>> = Vec::new();

        for (line_no, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < columns.len() - count_out_columns(&columns) {
                errors.push(format!(
                    "line {}: expected {} fields, found {}",
                    line_no + 2,
                    columns.len(),
                    fields.len()
                ));
                continue;
            }

            let mut name = String::new();
            let mut outputs: Vec<(u32, String)> = Vec::new();
            let mut words: FxHashMap<u32, Vec<Vec<u8>>> = FxHashMap::default();

            for (col, field) in columns.iter().zip(fields.iter()) {
                match col {
                    Column::Sample => name = field.trim().to_string(),
                    Column::Out(n) => {
                        if !field.trim().is_empty() {
                            outputs.push((*n, field.trim().to_string()));
                        }
                    }
                    Column::Barcode(n) => {
                        let cell: Vec<Vec<u8>> = field
                            .split(EQUIVALENT_DELIMITER)
                            .map(|w| w.trim().to_ascii_uppercase().into_bytes())
                            .collect();
                        words.insert(*n, cell);
                    }
                }
            }

            let sample_idx = samples.len();
            if name.is_empty() {
                errors.push(format!("line {}: empty sample name", line_no + 2));
            }
            if samples.iter().any(|s| s.name == name) {
                errors.push(format!("line {}: duplicate sample '{}'", line_no + 2, name));
            }

            for (&slot, cell) in &words {
                let owned = words_by_slot.entry(slot).or_default();
                for word in cell {
                    if let Err(e) = check_word(word, enforced_len) {
                        errors.push(format!("sample '{}': {}", name, e));
                    }
                    match owned.get(word).copied() {
                        Some(other) if other != sample_idx => {
                            errors.push(format!(
                                "barcode '{}' (slot {}) claimed by both '{}' and '{}'",
                                String::from_utf8_lossy(word),
                                slot,
                                samples[other].name,
                                name
                            ));
                        }
                        _ => {
                            owned.insert(word.clone(), sample_idx);
                        }
                    }
                }
            }

            samples.push(SampleEntry { name, outputs });
            sample_words.push(words);
        }

        if samples.is_empty() {
            errors.push("no sample rows".to_string());
        }

        // Per-slot expected sets; BarcodeSet enforces one length per slot.
        let mut sets: Vec<(u32, BarcodeSet)> = Vec::new();
        for &id in &barcode_ids {
            let words: Vec<Vec<u8>> = words_by_slot
                .get(&id)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            match BarcodeSet::new(words) {
                Ok(set) => sets.push((id, set)),
                Err(e) => errors.push(format!("slot {}: {}", id, e)),
            }
        }
        sets.sort_by_key(|(id, _)| *id);

        // Composite lookup: cross-product of equivalent words over slots in
        // ascending id order.
        let mut lookup: FxHashMap<Vec<u8>, usize> = FxHashMap::default();
        for (sample_idx, words) in sample_words.iter().enumerate() {
            let mut keys: Vec<Vec<u8>> = vec![Vec::new()];
            let mut complete = true;
            for (id, _) in &sets {
                match words.get(id) {
                    Some(cell) => {
                        keys = keys
                            .iter()
                            .flat_map(|prefix| {
                                cell.iter().map(move |w| {
                                    let mut key = prefix.clone();
                                    key.extend_from_slice(w);
                                    key
                                })
                            })
                            .collect();
                    }
                    None => {
                        errors.push(format!(
                            "sample '{}': missing barcode for slot {}",
                            samples[sample_idx].name, id
                        ));
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            for key in keys {
                if let Some(&other) = lookup.get(&key) {
                    if other != sample_idx {
                        errors.push(format!(
                            "barcode combination '{}' claimed by both '{}' and '{}'",
                            String::from_utf8_lossy(&key),
                            samples[other].name,
                            samples[sample_idx].name
                        ));
                    }
                    continue;
                }
                lookup.insert(key, sample_idx);
            }
        }

        if !errors.is_empty() {
            return Err(DemarkError::InvalidBarcodeTable(errors.join("\n")));
        }

        Ok(SampleSheet {
            samples,
            sets,
            lookup,
        })
    }

    /// Expected sets in ascending slot-id order.
    pub fn sets(&self) -> &[(u32, BarcodeSet)] {
        &self.sets
    }

    pub fn set_for(&self, id: u32) -> Option<&BarcodeSet> {
        self.sets
            .iter()
            .find(|(n, _)| *n == id)
            .map(|(_, set)| set)
    }

    /// Look a composite key up; `None` means unassigned.
    pub fn resolve(&self, key: &[u8]) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    pub fn sample(&self, idx: usize) -> &SampleEntry {
        &self.samples[idx]
    }

    pub fn samples(&self) -> &[SampleEntry] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Word-level validation, reported per sample so several violations can
/// surface in one pass.
fn check_word(word: &[u8], enforced_len: Option<usize>) -> std::result::Result<(), String> {
    if word.is_empty() {
        return Err("empty barcode word".to_string());
    }
    if let Some(&bad) = word.iter().find(|b| !b"ACGTN".contains(b)) {
        return Err(format!(
            "barcode '{}' contains illegal base '{}'",
            String::from_utf8_lossy(word),
            bad as char
        ));
    }
    if let Some(len) = enforced_len {
        if word.len() != len {
            return Err(format!(
                "barcode '{}' has length {}, enforced length is {}",
                String::from_utf8_lossy(word),
                word.len(),
                len
            ));
        }
    }
    Ok(())
}

fn count_out_columns(columns: &[Column]) -> usize {
    columns
        .iter()
        .filter(|c| matches!(c, Column::Out(_)))
        .count()
}

fn parse_header(header: &str) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    let mut have_sample = false;
    for field in header.split('\t') {
        let field = field.trim();
        let col = if field == "SAMPLE" {
            if have_sample {
                return Err(DemarkError::InvalidBarcodeTable(
                    "duplicate SAMPLE column".to_string(),
                ));
            }
            have_sample = true;
            Column::Sample
        } else if let Some(n) = field.strip_prefix("BARCODE") {
            Column::Barcode(parse_column_index(field, n)?)
        } else if let Some(n) = field.strip_prefix("OUT") {
            Column::Out(parse_column_index(field, n)?)
        } else {
            return Err(DemarkError::InvalidBarcodeTable(format!(
                "unrecognised column '{}'",
                field
            )));
        };
        if columns
            .iter()
            .any(|c| matches!((c, &col), (Column::Barcode(a), Column::Barcode(b)) if a == b)
                || matches!((c, &col), (Column::Out(a), Column::Out(b)) if a == b))
        {
            return Err(DemarkError::InvalidBarcodeTable(format!(
                "duplicate column '{}'",
                field
            )));
        }
        columns.push(col);
    }
    if !have_sample {
        return Err(DemarkError::InvalidBarcodeTable(
            "missing SAMPLE column".to_string(),
        ));
    }
    if !columns.iter().any(|c| matches!(c, Column::Barcode(_))) {
        return Err(DemarkError::InvalidBarcodeTable(
            "no BARCODE column".to_string(),
        ));
    }
    Ok(columns)
}

fn parse_column_index(field: &str, digits: &str) -> Result<u32> {
    // A bare BARCODE/OUT column is slot 1.
    if digits.is_empty() {
        return Ok(1);
    }
    let n: u32 = digits.parse().map_err(|_| {
        DemarkError::InvalidBarcodeTable(format!("bad column index in '{}'", field))
    })?;
    if n == 0 {
        return Err(DemarkError::InvalidBarcodeTable(format!(
            "column index must be positive in '{}'",
            field
        )));
    }
    Ok(n)
}
