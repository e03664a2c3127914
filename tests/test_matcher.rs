#[cfg(test)]
mod matcher_tests {
    use demark::demux::matcher::*;

    fn set(words: &[&str]) -> BarcodeSet {
        BarcodeSet::new(words.iter().map(|w| w.as_bytes().to_vec())).unwrap()
    }

    fn params(max_mismatches: u32, min_delta: u32, min_quality: u8) -> MatchParams {
        MatchParams {
            max_mismatches,
            min_delta,
            min_quality,
        }
    }

    const HIGH_Q: &[u8] = &[40; 6];

    #[test]
    fn exact_word_is_accepted() {
        let set = set(&["AAATTT", "CCCGGG"]);
        let m = best_match(b"AAATTT", HIGH_Q, &set, &params(0, 1, 0));
        assert!(m.matched);
        assert_eq!(set.word(m.barcode.unwrap()), b"AAATTT");
        assert_eq!(m.mismatches, 0);
    }

    #[test]
    fn lowercase_observed_matches() {
        let set = set(&["AAATTT"]);
        let m = best_match(b"aaattt", HIGH_Q, &set, &params(0, 1, 0));
        assert!(m.matched);
    }

    #[test]
    fn over_budget_is_rejected() {
        let set = set(&["AAAAAA"]);
        let m = best_match(b"AATTAA", HIGH_Q, &set, &params(1, 0, 0));
        assert!(!m.matched);
        assert_eq!(m.mismatches, 2);
        assert!(m.barcode.is_none());
    }

    #[test]
    fn ambiguous_tie_is_rejected() {
        // One mismatch to either word: delta 0 < 1.
        let set = set(&["AAAAAA", "AAAAAT"]);
        let m = best_match(b"AAAAAC", HIGH_Q, &set, &params(1, 1, 0));
        assert!(!m.matched);
        assert_eq!(m.mismatches, 1);
        assert_eq!(m.mismatches_to_second_best, 1);
    }

    // The exact fast-path overrides a tie that would otherwise reject.
    #[test]
    fn exact_hit_overrides_delta() {
        let set = set(&["AAAAAA", "AAAAAT"]);
        let m = best_match(b"AAAAAA", HIGH_Q, &set, &params(0, 5, 0));
        assert!(m.matched);
        assert_eq!(set.word(m.barcode.unwrap()), b"AAAAAA");
    }

    // Monotonicity: accepted at threshold t stays accepted, with the same
    // word, for any t' >= the observed count.
    #[test]
    fn accept_is_monotone_in_threshold() {
        let set = set(&["AAAAAA", "CCCCCC"]);
        let tight = best_match(b"AAAATA", HIGH_Q, &set, &params(1, 1, 0));
        assert!(tight.matched);
        for t in tight.mismatches..=6 {
            let loose = best_match(b"AAAATA", HIGH_Q, &set, &params(t, 1, 0));
            assert!(loose.matched);
            assert_eq!(loose.barcode, tight.barcode);
        }
    }

    #[test]
    fn raising_delta_never_accepts_a_rejection() {
        let set = set(&["AAAAAA", "AAAAAT"]);
        for delta in 1..4 {
            let m = best_match(b"AAAAAC", HIGH_Q, &set, &params(1, delta, 0));
            assert!(!m.matched);
        }
    }

    // Accept/reject is invariant under simultaneous reversal of both
    // strings (and the qualities).
    #[test]
    fn decision_is_symmetric_under_reversal() {
        let set_fwd = set(&["AAGTCC", "TTGACA"]);
        let set_rev = set(&["CCTGAA", "ACAGTT"]);
        let quals = [40, 40, 2, 40, 40, 40];
        let mut quals_rev = quals;
        quals_rev.reverse();
        for (obs, p) in [
            (*b"AAGTCC", params(0, 1, 0)),
            (*b"AAGACC", params(1, 1, 0)),
            (*b"AAGTCC", params(0, 1, 20)),
        ] {
            let mut rev = obs;
            rev.reverse();
            let fwd = best_match(&obs, &quals, &set_fwd, &p);
            let bwd = best_match(&rev, &quals_rev, &set_rev, &p);
            assert_eq!(fwd.matched, bwd.matched);
            assert_eq!(fwd.mismatches, bwd.mismatches);
        }
    }

    // N on either side contributes zero mismatches.
    #[test]
    fn ambiguous_bases_are_free() {
        assert_eq!(mismatch_count(b"ANATTT", b"AAATTT", None, 0), 0);
        assert_eq!(mismatch_count(b"AAATTT", b"ANATTT", None, 0), 0);
        assert_eq!(mismatch_count(b"NNNNNN", b"AAATTT", None, 0), 0);
    }

    #[test]
    fn n_does_not_reorder_expected_words() {
        let set = set(&["ANATTT", "CCCGGG"]);
        let m = best_match(b"AAATTT", HIGH_Q, &set, &params(0, 1, 0));
        assert!(m.matched);
        assert_eq!(set.word(m.barcode.unwrap()), b"ANATTT");
    }

    #[test]
    fn low_quality_counts_as_mismatch() {
        let set = set(&["AAATTT"]);
        let quals = [40, 40, 5, 40, 40, 40];
        let strict = best_match(b"AAATTT", &quals, &set, &params(0, 1, 20));
        // Sequence-exact, so the fast-path still accepts it, but the count
        // reflects the low-quality position.
        assert!(strict.matched);
        assert_eq!(strict.mismatches, 1);

        // A non-exact observation is pushed over budget by quality.
        let m = best_match(b"CAATTT", &quals, &set, &params(1, 1, 20));
        assert!(!m.matched);
        assert_eq!(m.mismatches, 2);
    }

    #[test]
    fn zero_quality_threshold_ignores_quality() {
        let set = set(&["AAATTT"]);
        let quals = [2; 6];
        let m = best_match(b"AAATTT", &quals, &set, &params(0, 1, 0));
        assert!(m.matched);
        assert_eq!(m.mismatches, 0);
    }

    #[test]
    fn single_word_set_has_unbounded_second_best() {
        let set = set(&["AAATTT"]);
        let m = best_match(b"AAATTA", HIGH_Q, &set, &params(1, 3, 0));
        assert!(m.matched);
        assert_eq!(m.mismatches_to_second_best, u32::MAX);
    }

    #[test]
    fn set_rejects_bad_words() {
        assert!(BarcodeSet::new(vec![b"AAX".to_vec()]).is_err());
        assert!(BarcodeSet::new(vec![b"AAA".to_vec(), b"AAAA".to_vec()]).is_err());
        assert!(BarcodeSet::new(Vec::<Vec<u8>>::new()).is_err());
    }

    #[test]
    fn words_are_sorted_for_deterministic_ties() {
        let set = set(&["TTTTTT", "AAAAAA", "CCCCCC"]);
        assert_eq!(set.word(0), b"AAAAAA");
        assert_eq!(set.word(1), b"CCCCCC");
        assert_eq!(set.word(2), b"TTTTTT");
    }
}
