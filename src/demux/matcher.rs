use crate::errors::{DemarkError, Result};

/// Bases permitted in expected words.
const CALLS: &[u8] = b"ACGTN";

#[inline(always)]
fn is_n(b: u8) -> bool {
    b == b'N' || b == b'n'
}

#[inline(always)]
fn upper(b: u8) -> u8 {
    b.to_ascii_uppercase()
}

/// A closed set of expected words, all of one length.
///
/// Words are canonicalised to uppercase and kept sorted lexicographically,
/// so that ties between equidistant words resolve deterministically by
/// enumeration order.
#[derive(Debug, Clone)]
pub struct BarcodeSet {
    words: Vec<Vec<u8>>,
    word_len: usize,
}

impl BarcodeSet {
    /// Build a set from raw words. Fails with `InvalidBarcodeTable` on an
    /// empty set, length disagreement, or a base outside {A,C,G,T,N}.
    pub fn new(words: impl IntoIterator<Item = Vec<u8>>) -> Result<Self> {
        let mut canon: Vec<Vec<u8>> = Vec::new();
        for word in words {
            let word: Vec<u8> = word.iter().map(|&b| upper(b)).collect();
            if let Some(&bad) = word.iter().find(|b| !CALLS.contains(b)) {
                return Err(DemarkError::InvalidBarcodeTable(format!(
                    "barcode '{}' contains illegal base '{}'",
                    String::from_utf8_lossy(&word),
                    bad as char
                )));
            }
            canon.push(word);
        }
        if canon.is_empty() {
            return Err(DemarkError::InvalidBarcodeTable(
                "empty expected-barcode set".to_string(),
            ));
        }
        let word_len = canon[0].len();
        if word_len == 0 {
            return Err(DemarkError::InvalidBarcodeTable(
                "empty barcode word".to_string(),
            ));
        }
        if let Some(odd) = canon.iter().find(|w| w.len() != word_len) {
            return Err(DemarkError::InvalidBarcodeTable(format!(
                "barcode '{}' has length {}, expected {}",
                String::from_utf8_lossy(odd),
                odd.len(),
                word_len
            )));
        }
        canon.sort_unstable();
        canon.dedup();
        Ok(BarcodeSet {
            words: canon,
            word_len,
        })
    }

    pub fn word(&self, idx: usize) -> &[u8] {
        &self.words[idx]
    }

    pub fn word_len(&self) -> usize {
        self.word_len
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.words.iter().map(|w| w.as_slice())
    }
}

/// Thresholds of the quality-aware matcher.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    /// Highest mismatch count still accepted.
    pub max_mismatches: u32,
    /// Required separation between best and second-best counts.
    pub min_delta: u32,
    /// Phred score below which a compared position counts as a mismatch.
    /// Zero disables the quality rule.
    pub min_quality: u8,
}

impl Default for MatchParams {
    fn default() -> Self {
        MatchParams {
            max_mismatches: 1,
            min_delta: 1,
            min_quality: 0,
        }
    }
}

/// Outcome of matching one observed slice against an expected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarcodeMatch {
    pub matched: bool,
    /// Index of the best word in the set, when matched.
    pub barcode: Option<usize>,
    /// Mismatch count of the best word.
    pub mismatches: u32,
    /// Mismatch count of the second-best word (`u32::MAX` for a
    /// single-word set).
    pub mismatches_to_second_best: u32,
}

impl BarcodeMatch {
    fn unmatched(best: u32, second: u32) -> Self {
        BarcodeMatch {
            matched: false,
            barcode: None,
            mismatches: best,
            mismatches_to_second_best: second,
        }
    }
}

/// Mismatches between an observed slice and one expected word.
///
/// A position is compared only when both sides carry a call (not `N`);
/// an ambiguous base on either side contributes zero. A compared position
/// is a mismatch when the bases differ case-insensitively, or when
/// `quals` is given and the observed Phred score falls below
/// `min_quality`.
pub fn mismatch_count(
    observed: &[u8],
    expected: &[u8],
    quals: Option<&[u8]>,
    min_quality: u8,
) -> u32 {
    debug_assert_eq!(observed.len(), expected.len());
    let mut mm = 0u32;
    for i in 0..observed.len() {
        let (b, e) = (observed[i], expected[i]);
        if is_n(b) || is_n(e) {
            continue;
        }
        if upper(b) != upper(e) {
            mm += 1;
        } else if min_quality > 0 {
            if let Some(q) = quals {
                if q[i] < min_quality {
                    mm += 1;
                }
            }
        }
    }
    mm
}

/// True when the observed slice equals the word with every position called.
fn is_exact(observed: &[u8], expected: &[u8]) -> bool {
    observed.len() == expected.len()
        && observed
            .iter()
            .zip(expected)
            .all(|(&b, &e)| !is_n(b) && !is_n(e) && upper(b) == upper(e))
}

/// Find the best expected word for an observed slice.
///
/// `quals` are Phred-scale integers (offset already removed), aligned with
/// `observed`. Acceptance requires `best <= max_mismatches` and
/// `second_best - best >= min_delta`; a byte-exact hit (all positions
/// called and equal) is accepted unconditionally.
///
/// O(|set| * word_len) per call.
pub fn best_match(
    observed: &[u8],
    quals: &[u8],
    set: &BarcodeSet,
    params: &MatchParams,
) -> BarcodeMatch {
    debug_assert_eq!(observed.len(), set.word_len());
    let mut best = u32::MAX;
    let mut second = u32::MAX;
    let mut best_idx = None;
    let mut exact_idx = None;

    for (idx, word) in set.iter().enumerate() {
        let mm = mismatch_count(observed, word, Some(quals), params.min_quality);
        if mm < best {
            second = best;
            best = mm;
            best_idx = Some(idx);
        } else if mm < second {
            second = mm;
        }
        if exact_idx.is_none() && is_exact(observed, word) {
            exact_idx = Some((idx, mm));
        }
    }

    // An exact sequence hit short-circuits the thresholds: a tie or a pile
    // of low-quality positions cannot reject it.
    if let Some((idx, mm)) = exact_idx {
        let second_best = if Some(idx) == best_idx { second } else { best };
        return BarcodeMatch {
            matched: true,
            barcode: Some(idx),
            mismatches: mm,
            mismatches_to_second_best: second_best,
        };
    }

    if best > params.max_mismatches {
        return BarcodeMatch::unmatched(best, second);
    }
    if second.saturating_sub(best) < params.min_delta {
        return BarcodeMatch::unmatched(best, second);
    }
    BarcodeMatch {
        matched: true,
        barcode: best_idx,
        mismatches: best,
        mismatches_to_second_best: second,
    }
}
