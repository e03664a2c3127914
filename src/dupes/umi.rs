use crate::demux::matcher::{mismatch_count, BarcodeSet};
use crate::dupes::read_end::ReadEnd;
use crate::errors::Result;
use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Thresholds of the UMI splitter.
#[derive(Debug, Clone, Copy)]
pub struct UmiParams {
    /// Mismatch budget when comparing two codes (sequence only, N-aware).
    pub mismatches: u32,
    /// Codes with more than this many `N`s are degenerate.
    pub max_n: u32,
}

/// A predefined set of expected UMI words, all of one length.
#[derive(Debug, Clone)]
pub struct ExpectedUmis {
    set: BarcodeSet,
}

impl ExpectedUmis {
    pub fn new(words: impl IntoIterator<Item = Vec<u8>>) -> Result<Self> {
        Ok(ExpectedUmis {
            set: BarcodeSet::new(words)?,
        })
    }

    /// One word per line; blank lines and `#` comments are skipped.
    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut words = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let word = line.trim();
            if word.is_empty() || word.starts_with('#') {
                continue;
            }
            words.push(word.as_bytes().to_vec());
        }
        Self::new(words)
    }

    pub fn word_len(&self) -> usize {
        self.set.word_len()
    }

    /// First expected word within the mismatch budget, in enumeration
    /// order (the set is sorted at construction).
    pub fn lookup(&self, code: &[u8], mismatches: u32) -> Option<&[u8]> {
        self.set
            .iter()
            .find(|word| umi_distance(code, word) <= mismatches)
    }
}

/// Identity of one sub-group of a positional group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubGroupKey {
    /// Records whose UMI is too degenerate to trust.
    Undefined,
    /// The seed code (open mode) or concatenated canonical words (closed
    /// mode).
    Code(Vec<u8>),
}

/// One UMI sub-group; members index into the positional group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGroup {
    pub key: SubGroupKey,
    pub members: Vec<usize>,
}

impl SubGroup {
    pub fn is_undefined(&self) -> bool {
        self.key == SubGroupKey::Undefined
    }
}

#[inline]
pub fn count_n(code: &[u8]) -> u32 {
    code.iter().filter(|&&b| b == b'N' || b == b'n').count() as u32
}

/// Sequence-only N-aware distance; length disagreement never matches.
fn umi_distance(a: &[u8], b: &[u8]) -> u32 {
    if a.len() != b.len() {
        return u32::MAX;
    }
    mismatch_count(a, b, None, 0)
}

/// Open-set splitting: no expected UMI list.
///
/// Distinct codes are visited by ascending `N` count, then descending
/// frequency (ties lexicographic, for determinism). Each code merges into
/// the first already-open sub-group one of whose aliases lies within the
/// mismatch budget, becoming an alias itself only when `N`-free; otherwise
/// it opens a new sub-group. Codes with more than `max_n` ambiguous bases
/// fall into the *undefined* sub-group.
///
/// Aliases stay `N`-free on purpose: `N` matches everything, so an
/// ambiguous alias would chain unrelated codes into one sub-group.
pub fn split_open(group: &[ReadEnd], params: &UmiParams) -> Vec<SubGroup> {
    // Distinct codes in first-seen order, with their record indices.
    let mut order: Vec<&[u8]> = Vec::new();
    let mut by_code: FxHashMap<&[u8], Vec<usize>> = FxHashMap::default();
    for (i, rec) in group.iter().enumerate() {
        let code: &[u8] = &rec.umi;
        match by_code.get_mut(code) {
            Some(members) => members.push(i),
            None => {
                order.push(code);
                by_code.insert(code, vec![i]);
            }
        }
    }

    let mut codes: Vec<(&[u8], u32, usize)> = order
        .iter()
        .map(|&c| (c, count_n(c), by_code[c].len()))
        .collect();
    codes.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)).then(a.0.cmp(b.0)));

    // All codes degenerate: the whole group is one undefined sub-group.
    if let Some(&(_, n, _)) = codes.first() {
        if n > params.max_n {
            return vec![SubGroup {
                key: SubGroupKey::Undefined,
                members: (0..group.len()).collect(),
            }];
        }
    }

    struct Open<'a> {
        key: Vec<u8>,
        aliases: Vec<&'a [u8]>,
        members: Vec<usize>,
    }

    let mut open: Vec<Open> = Vec::new();
    let mut undefined: Vec<usize> = Vec::new();

    for (code, n, _) in codes {
        let mine = by_code.remove(code).expect("every code has members");
        if n > params.max_n {
            undefined.extend(mine);
            continue;
        }
        let target = open.iter_mut().find(|grp| {
            grp.aliases
                .iter()
                .any(|alias| umi_distance(code, alias) <= params.mismatches)
        });
        match target {
            Some(grp) => {
                grp.members.extend(mine);
                if n == 0 {
                    grp.aliases.push(code);
                }
            }
            None => {
                open.push(Open {
                    key: code.to_vec(),
                    aliases: if n == 0 { vec![code] } else { Vec::new() },
                    members: mine,
                });
            }
        }
    }

    let mut out: Vec<SubGroup> = open
        .into_iter()
        .map(|grp| SubGroup {
            key: SubGroupKey::Code(grp.key),
            members: grp.members,
        })
        .collect();
    if !undefined.is_empty() {
        out.push(SubGroup {
            key: SubGroupKey::Undefined,
            members: undefined,
        });
    }
    out
}

/// Closed-set splitting against a predefined UMI list.
///
/// Each record's UMI is cut into fixed-width sub-codes; every sub-code
/// must resolve to an expected word within the mismatch budget (and carry
/// at most `max_n` ambiguous bases), else the record is *undefined*. The
/// sub-group key concatenates the canonical words in slot order.
pub fn split_closed(
    group: &[ReadEnd],
    expected: &ExpectedUmis,
    params: &UmiParams,
) -> Vec<SubGroup> {
    let mut order: Vec<Vec<u8>> = Vec::new();
    let mut by_key: FxHashMap<Vec<u8>, Vec<usize>> = FxHashMap::default();
    let mut undefined: Vec<usize> = Vec::new();

    for (i, rec) in group.iter().enumerate() {
        match canonical_key(&rec.umi, expected, params) {
            Some(key) => match by_key.get_mut(&key) {
                Some(members) => members.push(i),
                None => {
                    order.push(key.clone());
                    by_key.insert(key, vec![i]);
                }
            },
            None => undefined.push(i),
        }
    }

    let mut out: Vec<SubGroup> = order
        .into_iter()
        .map(|key| {
            let members = by_key.remove(&key).expect("every key has members");
            SubGroup {
                key: SubGroupKey::Code(key),
                members,
            }
        })
        .collect();
    if !undefined.is_empty() {
        out.push(SubGroup {
            key: SubGroupKey::Undefined,
            members: undefined,
        });
    }
    out
}

fn canonical_key(umi: &[u8], expected: &ExpectedUmis, params: &UmiParams) -> Option<Vec<u8>> {
    let width = expected.word_len();
    if umi.is_empty() || umi.len() % width != 0 {
        return None;
    }
    let mut key = Vec::with_capacity(umi.len());
    for chunk in umi.chunks(width) {
        if count_n(chunk) > params.max_n {
            return None;
        }
        let word = expected.lookup(chunk, params.mismatches)?;
        key.extend_from_slice(word);
    }
    Some(key)
}

/// Pick the duplicates of one positional group, given its sub-groups.
/// Returns indices into the group.
///
/// A sole undefined sub-group behaves like a real one (best score
/// survives); an undefined sub-group coexisting with real ones is flagged
/// wholesale, so degenerate UMIs cannot inflate unique counts.
pub fn select_duplicates(group: &[ReadEnd], subgroups: &[SubGroup]) -> Vec<usize> {
    let sole_undefined = subgroups.len() == 1 && subgroups[0].is_undefined();
    let mut flagged = Vec::new();
    for sub in subgroups {
        if sub.is_undefined() && !sole_undefined {
            flagged.extend(sub.members.iter().copied());
            continue;
        }
        if sub.members.len() < 2 {
            continue;
        }
        // Highest score survives; ties go to the first seen.
        let mut best = sub.members[0];
        for &m in &sub.members[1..] {
            if group[m].score > group[best].score {
                best = m;
            }
        }
        flagged.extend(sub.members.iter().copied().filter(|&m| m != best));
    }
    flagged
}
