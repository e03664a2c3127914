use crate::demux::layout::{ReadLayout, SlotKind};
use crate::errors::{DemarkError, Result};
use smallvec::SmallVec;

/// Where an output slot reference draws its bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// Raw observed bases of a barcode slot.
    Barcode(u32),
    Umi(u32),
    Sample(u32),
    /// The matched expected word for a barcode slot (canonicalised), paired
    /// with the observed slot's quality bytes.
    ReadBar(u32),
}

impl SlotSource {
    fn describe(&self) -> String {
        match self {
            SlotSource::Barcode(n) => format!("BARCODE{}", n),
            SlotSource::Umi(n) => format!("UMI{}", n),
            SlotSource::Sample(n) => format!("SAMPLE{}", n),
            SlotSource::ReadBar(n) => format!("READBAR{}", n),
        }
    }
}

/// One slot reference of an output layout.
#[derive(Debug, Clone, Copy)]
pub struct SlotRef {
    pub source: SlotSource,
    /// Append a fixed-width numeric rendering of the slot's qualities after
    /// its bases in the output name.
    pub qual_in_name: bool,
}

/// Declarative assembly of an output record.
///
/// Descriptor grammar: `[stream:]name-list:sequence-list`, each list a run
/// of references `<KIND[id][Q]>` with KIND one of `BARCODE`, `UMI`,
/// `SAMPLE`, `READBAR`. The optional `Q` suffix enables quality-in-name
/// for that reference. Either list may be empty.
///
/// Example: `1:<READBAR1><UMI1>:<SAMPLE1>` names output stream 1, puts the
/// matched barcode and the UMI into the read name and the payload into the
/// sequence.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    text: String,
    /// 1-based output stream index.
    pub stream: u32,
    name_refs: Vec<SlotRef>,
    seq_refs: Vec<SlotRef>,
    delimiter: u8,
}

/// Resolved slot bytes for one input tuple, shared by every output layout.
///
/// Redundant slots (equal ids across read layouts) insert first-wins.
#[derive(Debug, Default)]
pub struct SlotValues<'a> {
    barcodes: SmallVec<[(u32, (&'a [u8], &'a [u8])); 2]>,
    umis: SmallVec<[(u32, (&'a [u8], &'a [u8])); 2]>,
    samples: SmallVec<[(u32, (&'a [u8], &'a [u8])); 2]>,
    readbars: SmallVec<[(u32, (&'a [u8], &'a [u8])); 2]>,
}

impl<'a> SlotValues<'a> {
    pub fn insert_barcode(&mut self, id: u32, bases: &'a [u8], quals: &'a [u8]) {
        if !self.barcodes.iter().any(|(n, _)| *n == id) {
            self.barcodes.push((id, (bases, quals)));
        }
    }

    pub fn insert_umi(&mut self, id: u32, bases: &'a [u8], quals: &'a [u8]) {
        if !self.umis.iter().any(|(n, _)| *n == id) {
            self.umis.push((id, (bases, quals)));
        }
    }

    pub fn insert_sample(&mut self, id: u32, bases: &'a [u8], quals: &'a [u8]) {
        if !self.samples.iter().any(|(n, _)| *n == id) {
            self.samples.push((id, (bases, quals)));
        }
    }

    /// `bases` is the canonical matched word; `quals` the observed slot's
    /// qualities (equal length by construction).
    pub fn insert_readbar(&mut self, id: u32, bases: &'a [u8], quals: &'a [u8]) {
        if !self.readbars.iter().any(|(n, _)| *n == id) {
            self.readbars.push((id, (bases, quals)));
        }
    }

    /// Observed bases and qualities of a barcode slot.
    pub fn barcode(&self, id: u32) -> Option<(&'a [u8], &'a [u8])> {
        self.get(SlotSource::Barcode(id))
    }

    pub fn umi(&self, id: u32) -> Option<(&'a [u8], &'a [u8])> {
        self.get(SlotSource::Umi(id))
    }

    pub fn sample(&self, id: u32) -> Option<(&'a [u8], &'a [u8])> {
        self.get(SlotSource::Sample(id))
    }

    fn get(&self, source: SlotSource) -> Option<(&'a [u8], &'a [u8])> {
        let (list, id) = match source {
            SlotSource::Barcode(n) => (&self.barcodes, n),
            SlotSource::Umi(n) => (&self.umis, n),
            SlotSource::Sample(n) => (&self.samples, n),
            SlotSource::ReadBar(n) => (&self.readbars, n),
        };
        list.iter().find(|(n, _)| *n == id).map(|(_, v)| *v)
    }
}

/// An assembled output record, ready for a FASTQ writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutRecord {
    pub name: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl OutputLayout {
    /// Parse one descriptor. `default_stream` is used when no explicit
    /// stream index prefixes the descriptor.
    pub fn parse(text: &str, default_stream: u32, delimiter: u8) -> Result<Self> {
        let (stream, rest) = match text.find(':') {
            Some(pos) if !text[..pos].is_empty() && text[..pos].bytes().all(|b| b.is_ascii_digit()) => {
                let n: u32 = text[..pos]
                    .parse()
                    .map_err(|_| DemarkError::layout(text, "bad stream index"))?;
                if n == 0 {
                    return Err(DemarkError::layout(text, "stream index must be positive"));
                }
                (n, &text[pos + 1..])
            }
            _ => (default_stream, text),
        };

        let colon = rest
            .find(':')
            .ok_or_else(|| DemarkError::layout(text, "missing ':' between name and sequence lists"))?;
        let name_refs = parse_ref_list(text, &rest[..colon])?;
        let seq_refs = parse_ref_list(text, &rest[colon + 1..])?;
        if name_refs.is_empty() && seq_refs.is_empty() {
            return Err(DemarkError::layout(text, "both lists empty"));
        }

        Ok(OutputLayout {
            text: text.to_string(),
            stream,
            name_refs,
            seq_refs,
            delimiter,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn name_refs(&self) -> &[SlotRef] {
        &self.name_refs
    }

    pub fn seq_refs(&self) -> &[SlotRef] {
        &self.seq_refs
    }

    /// Check every reference resolves against the given read layouts.
    /// `READBAR` ids must name a barcode slot, since they resolve through
    /// the matcher.
    pub fn validate_against(&self, layouts: &[ReadLayout]) -> Result<()> {
        let have = |kind: SlotKind, id: u32| -> bool {
            layouts.iter().any(|l| {
                l.slots()
                    .iter()
                    .any(|s| s.kind == kind && s.id == id)
            })
        };
        for r in self.name_refs.iter().chain(&self.seq_refs) {
            let ok = match r.source {
                SlotSource::Barcode(n) | SlotSource::ReadBar(n) => have(SlotKind::Barcode, n),
                SlotSource::Umi(n) => have(SlotKind::Umi, n),
                SlotSource::Sample(n) => have(SlotKind::Sample, n),
            };
            if !ok {
                return Err(DemarkError::layout(
                    &self.text,
                    format!("reference <{}> names no slot of any read layout", r.source.describe()),
                ));
            }
        }
        Ok(())
    }

    /// Build the output record for one input tuple.
    ///
    /// The name is `original_name ⨁ delimiter-joined name-list`; sequence
    /// and quality concatenate the sequence-list slots in order.
    pub fn assemble(&self, original_name: &[u8], values: &SlotValues) -> Result<OutRecord> {
        let mut name = original_name.to_vec();
        for r in &self.name_refs {
            let (bases, quals) = self.resolve(r, values)?;
            name.push(self.delimiter);
            name.extend_from_slice(bases);
            if r.qual_in_name {
                push_qual_digits(&mut name, quals);
            }
        }

        let mut seq = Vec::new();
        let mut qual = Vec::new();
        for r in &self.seq_refs {
            let (bases, quals) = self.resolve(r, values)?;
            seq.extend_from_slice(bases);
            qual.extend_from_slice(quals);
        }

        Ok(OutRecord { name, seq, qual })
    }

    fn resolve<'a>(&self, r: &SlotRef, values: &SlotValues<'a>) -> Result<(&'a [u8], &'a [u8])> {
        values.get(r.source).ok_or_else(|| {
            DemarkError::layout(
                &self.text,
                format!("slot <{}> missing from this record", r.source.describe()),
            )
        })
    }
}

/// Two-digit, zero-padded decimal per Phred byte (offset-33 removed,
/// clamped to 99).
fn push_qual_digits(out: &mut Vec<u8>, quals: &[u8]) {
    for &q in quals {
        let phred = q.saturating_sub(b'!').min(99);
        out.push(b'0' + phred / 10);
        out.push(b'0' + phred % 10);
    }
}

fn parse_ref_list(layout: &str, text: &str) -> Result<Vec<SlotRef>> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            return Err(DemarkError::layout(
                layout,
                format!("unexpected character '{}'", bytes[i] as char),
            ));
        }
        let close = bytes[i..]
            .iter()
            .position(|&b| b == b'>')
            .ok_or_else(|| DemarkError::layout(layout, "unclosed '<'"))?;
        refs.push(parse_ref(layout, &text[i + 1..i + close])?);
        i += close + 1;
    }
    Ok(refs)
}

fn parse_ref(layout: &str, inner: &str) -> Result<SlotRef> {
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_uppercase() && bytes[i] != b'Q' {
        i += 1;
    }
    // 'Q' may terminate a kind name ("...Q") only after digits; kind names
    // themselves contain no 'Q'.
    let kind = &inner[..i];

    let id_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let id = if i > id_start {
        let id: u32 = inner[id_start..i]
            .parse()
            .map_err(|_| DemarkError::layout(layout, "slot id out of range"))?;
        if id == 0 {
            return Err(DemarkError::layout(layout, "slot id must be positive"));
        }
        id
    } else {
        1
    };

    let qual_in_name = match &inner[i..] {
        "" => false,
        "Q" => true,
        tail => {
            return Err(DemarkError::layout(
                layout,
                format!("trailing '{}' in reference '<{}>'", tail, inner),
            ));
        }
    };

    let source = match kind {
        "BARCODE" => SlotSource::Barcode(id),
        "UMI" => SlotSource::Umi(id),
        "SAMPLE" => SlotSource::Sample(id),
        "READBAR" => SlotSource::ReadBar(id),
        other => {
            return Err(DemarkError::layout(
                layout,
                format!("unknown reference kind '{}'", other),
            ));
        }
    };

    Ok(SlotRef {
        source,
        qual_in_name,
    })
}
