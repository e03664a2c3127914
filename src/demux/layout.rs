use crate::errors::{DemarkError, Result};
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;

/// What a run of read positions is used for.
///
/// Closed set on purpose: matching dispatches once per kind, no dynamic
/// dispatch anywhere in the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Sample-encoding bases, matched against a closed expected set.
    Barcode,
    /// Random molecular tag; extracted, never matched.
    Umi,
    /// Retained biological payload.
    Sample,
    /// Positions consumed and discarded (spacers).
    Anonymous,
}

impl SlotKind {
    pub fn token(&self) -> &'static str {
        match self {
            SlotKind::Barcode => "BARCODE",
            SlotKind::Umi => "UMI",
            SlotKind::Sample => "SAMPLE",
            SlotKind::Anonymous => "N",
        }
    }
}

/// Length specifier of one slot.
///
/// `ClipTail` and `ToEnd` are only legal on a terminal `SAMPLE` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLen {
    /// Exactly this many bases.
    Fixed(usize),
    /// All remaining bases except the last `n` (the `-n` form).
    ClipTail(usize),
    /// All remaining bases (the `x` form).
    ToEnd,
}

/// One slot of a read layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub kind: SlotKind,
    /// 1-based slot id; 0 for anonymous slots (no identity).
    pub id: u32,
    pub len: SlotLen,
}

impl Slot {
    fn is_variable(&self) -> bool {
        !matches!(self.len, SlotLen::Fixed(_))
    }
}

/// A parsed, immutable read layout.
///
/// The textual form is a concatenation of tokens: a literal run of `N`
/// (anonymous spacer) or an angle-bracketed descriptor `<KIND[id]:len>`
/// with KIND one of `BARCODE`, `UMI`, `SAMPLE`. The id defaults to 1.
/// `len` is a positive integer, `x` (consume to end of read) or a negative
/// integer (clip that many trailing bases); the latter two forms are only
/// permitted on a terminal `SAMPLE` slot.
///
/// Examples: `<BARCODE1:6><SAMPLE1:x>`, `NNNN<UMI1:8><SAMPLE1:-2>`.
#[derive(Debug, Clone)]
pub struct ReadLayout {
    text: String,
    slots: Vec<Slot>,
    /// Bases any read must have for extraction to succeed.
    min_len: usize,
    barcode_slots: SmallVec<[usize; 2]>,
    umi_slots: SmallVec<[usize; 2]>,
    sample_slot: Option<usize>,
}

/// One named slot cut out of a concrete read.
#[derive(Debug, Clone, Copy)]
pub struct ExtractedSlot<'a> {
    pub id: u32,
    pub bases: &'a [u8],
    /// Same byte range as `bases`, applied to the quality string.
    pub quals: &'a [u8],
}

/// All named slots of one read, in layout order per kind.
#[derive(Debug)]
pub struct ExtractedRead<'a> {
    pub barcodes: SmallVec<[ExtractedSlot<'a>; 2]>,
    pub umis: SmallVec<[ExtractedSlot<'a>; 2]>,
    pub sample: Option<ExtractedSlot<'a>>,
}

impl ReadLayout {
    /// Parse a layout descriptor. Fails with `InvalidLayout` on any grammar
    /// or placement violation.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(DemarkError::layout(text, "empty descriptor"));
        }
        let bytes = text.as_bytes();
        let mut slots: Vec<Slot> = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'N' => {
                    let start = i;
                    while i < bytes.len() && bytes[i] == b'N' {
                        i += 1;
                    }
                    slots.push(Slot {
                        kind: SlotKind::Anonymous,
                        id: 0,
                        len: SlotLen::Fixed(i - start),
                    });
                }
                b'<' => {
                    let close = bytes[i..]
                        .iter()
                        .position(|&b| b == b'>')
                        .ok_or_else(|| DemarkError::layout(text, "unclosed '<'"))?;
                    let inner = &text[i + 1..i + close];
                    slots.push(parse_descriptor(text, inner)?);
                    i += close + 1;
                }
                c => {
                    return Err(DemarkError::layout(
                        text,
                        format!("unexpected character '{}'", c as char),
                    ));
                }
            }
        }

        validate_slots(text, &slots)?;

        // Index the named slots and the fixed-length demand.
        let mut barcode_slots = SmallVec::new();
        let mut umi_slots = SmallVec::new();
        let mut sample_slot = None;
        let mut min_len = 0usize;
        for (idx, slot) in slots.iter().enumerate() {
            match slot.kind {
                SlotKind::Barcode => barcode_slots.push(idx),
                SlotKind::Umi => umi_slots.push(idx),
                SlotKind::Sample => sample_slot = Some(idx),
                SlotKind::Anonymous => {}
            }
            match slot.len {
                SlotLen::Fixed(n) => min_len += n,
                SlotLen::ClipTail(n) => min_len += n,
                SlotLen::ToEnd => {}
            }
        }

        Ok(ReadLayout {
            text: text.to_string(),
            slots,
            min_len,
            barcode_slots,
            umi_slots,
            sample_slot,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Minimum read length this layout can extract from.
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    pub fn has_barcode(&self) -> bool {
        !self.barcode_slots.is_empty()
    }

    pub fn has_umi(&self) -> bool {
        !self.umi_slots.is_empty()
    }

    pub fn has_sample(&self) -> bool {
        self.sample_slot.is_some()
    }

    /// Slot ids of the barcode slots, in layout order.
    pub fn barcode_ids(&self) -> SmallVec<[u32; 2]> {
        self.barcode_slots.iter().map(|&i| self.slots[i].id).collect()
    }

    /// Slot ids of the UMI slots, in layout order.
    pub fn umi_ids(&self) -> SmallVec<[u32; 2]> {
        self.umi_slots.iter().map(|&i| self.slots[i].id).collect()
    }

    /// Declared length of the barcode slot with this id, if present.
    pub fn barcode_len(&self, id: u32) -> Option<usize> {
        self.barcode_slots
            .iter()
            .find(|&&i| self.slots[i].id == id)
            .and_then(|&i| match self.slots[i].len {
                SlotLen::Fixed(n) => Some(n),
                _ => None,
            })
    }

    /// Byte range of every slot for a read of `read_len` bases, in slot
    /// order. `TruncatedRead` if the read cannot satisfy the fixed demand.
    pub fn slot_ranges(&self, read_len: usize) -> Result<SmallVec<[Range<usize>; 6]>> {
        if read_len < self.min_len {
            return Err(DemarkError::TruncatedRead {
                have: read_len,
                need: self.min_len,
            });
        }
        let mut ranges = SmallVec::with_capacity(self.slots.len());
        let mut offset = 0usize;
        for slot in &self.slots {
            let end = match slot.len {
                SlotLen::Fixed(n) => offset + n,
                SlotLen::ClipTail(n) => read_len - n,
                SlotLen::ToEnd => read_len,
            };
            ranges.push(offset..end);
            offset = end;
        }
        Ok(ranges)
    }

    /// Cut the named slots out of one read. `seq` and `qual` must have
    /// equal length (a FASTQ invariant the parser upholds).
    pub fn extract<'a>(&self, seq: &'a [u8], qual: &'a [u8]) -> Result<ExtractedRead<'a>> {
        debug_assert_eq!(seq.len(), qual.len());
        let ranges = self.slot_ranges(seq.len())?;

        let cut = |idx: usize| -> ExtractedSlot<'a> {
            let r = ranges[idx].clone();
            ExtractedSlot {
                id: self.slots[idx].id,
                bases: &seq[r.clone()],
                quals: &qual[r],
            }
        };

        Ok(ExtractedRead {
            barcodes: self.barcode_slots.iter().map(|&i| cut(i)).collect(),
            umis: self.umi_slots.iter().map(|&i| cut(i)).collect(),
            sample: self.sample_slot.map(cut),
        })
    }
}

impl fmt::Display for ReadLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parse the inside of one `<...>` descriptor.
fn parse_descriptor(layout: &str, inner: &str) -> Result<Slot> {
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_uppercase() {
        i += 1;
    }
    let kind = match &inner[..i] {
        "BARCODE" => SlotKind::Barcode,
        "UMI" => SlotKind::Umi,
        "SAMPLE" => SlotKind::Sample,
        other => {
            return Err(DemarkError::layout(
                layout,
                format!("unknown slot kind '{}'", other),
            ));
        }
    };

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

    if i >= bytes.len() || bytes[i] != b':' {
        return Err(DemarkError::layout(
            layout,
            format!("missing ':' in descriptor '<{}>'", inner),
        ));
    }
    i += 1;

    let len_text = &inner[i..];
    let len = match len_text {
        "" => return Err(DemarkError::layout(layout, "empty slot length")),
        "x" => SlotLen::ToEnd,
        t if t.starts_with('-') => {
            let n: usize = t[1..]
                .parse()
                .map_err(|_| DemarkError::layout(layout, format!("bad slot length '{}'", t)))?;
            if n == 0 {
                return Err(DemarkError::layout(layout, "slot length must be non-zero"));
            }
            SlotLen::ClipTail(n)
        }
        t => {
            let n: usize = t
                .parse()
                .map_err(|_| DemarkError::layout(layout, format!("bad slot length '{}'", t)))?;
            if n == 0 {
                return Err(DemarkError::layout(layout, "slot length must be positive"));
            }
            SlotLen::Fixed(n)
        }
    };

    Ok(Slot { kind, id, len })
}

/// Placement rules that need the whole slot list.
fn validate_slots(layout: &str, slots: &[Slot]) -> Result<()> {
    let last = slots.len() - 1;
    let mut seen: SmallVec<[(SlotKind, u32); 6]> = SmallVec::new();
    for (idx, slot) in slots.iter().enumerate() {
        if slot.is_variable() {
            if slot.kind != SlotKind::Sample {
                return Err(DemarkError::layout(
                    layout,
                    format!(
                        "variable length is only permitted on SAMPLE, not {}",
                        slot.kind.token()
                    ),
                ));
            }
            if idx != last {
                return Err(DemarkError::layout(
                    layout,
                    "variable-length slot must be the last slot",
                ));
            }
        }
        if slot.kind != SlotKind::Anonymous {
            if seen.contains(&(slot.kind, slot.id)) {
                return Err(DemarkError::layout(
                    layout,
                    format!("duplicate slot {}{}", slot.kind.token(), slot.id),
                ));
            }
            seen.push((slot.kind, slot.id));
        }
    }
    // Two SAMPLE slots would have tripped the duplicate check only for equal
    // ids; a second payload slot is a structural error regardless.
    if slots.iter().filter(|s| s.kind == SlotKind::Sample).count() > 1 {
        return Err(DemarkError::layout(layout, "more than one SAMPLE slot"));
    }
    Ok(())
}
