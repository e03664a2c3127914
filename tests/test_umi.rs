#[cfg(test)]
mod umi_tests {
    use demark::dupes::grouper::{GroupBy, PositionalGrouper};
    use demark::dupes::read_end::{Orientation, ReadEnd};
    use demark::dupes::umi::*;
    use smallvec::SmallVec;

    fn rec(umi: &[u8], score: u32, file_index: u64) -> ReadEnd {
        ReadEnd {
            library_id: 0,
            ref1: 1,
            coord1: 100,
            orient: Orientation::F,
            ref2: 0,
            coord2: 0,
            read_group: 0,
            score,
            file_index_1: file_index,
            file_index_2: 0,
            paired: false,
            umi: SmallVec::from_slice(umi),
        }
    }

    fn params(mismatches: u32, max_n: u32) -> UmiParams {
        UmiParams { mismatches, max_n }
    }

    fn members_of<'a>(subs: &'a [SubGroup], key: &SubGroupKey) -> &'a [usize] {
        &subs.iter().find(|s| s.key == *key).unwrap().members
    }

    /* ---------- open set ------------------------------------------- */

    #[test]
    fn identical_codes_form_one_sub_group() {
        let group = vec![rec(b"ACGT", 10, 0), rec(b"ACGT", 20, 1)];
        let subs = split_open(&group, &params(1, 1));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].key, SubGroupKey::Code(b"ACGT".to_vec()));
        assert_eq!(subs[0].members.len(), 2);
    }

    #[test]
    fn near_codes_merge_within_budget() {
        let group = vec![
            rec(b"AAAA", 10, 0),
            rec(b"AAAA", 10, 1),
            rec(b"AAAT", 10, 2),
            rec(b"CCCC", 10, 3),
        ];
        let subs = split_open(&group, &params(1, 1));
        assert_eq!(subs.len(), 2);
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"AAAA".to_vec())).len(),
            3
        );
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"CCCC".to_vec())).len(),
            1
        );
    }

    // Union of all sub-groups is the input group; sub-groups are disjoint.
    #[test]
    fn splitting_is_a_partition() {
        let group = vec![
            rec(b"AAAA", 10, 0),
            rec(b"AAAT", 10, 1),
            rec(b"CCCC", 10, 2),
            rec(b"NNNN", 10, 3),
            rec(b"ANNN", 10, 4),
            rec(b"CCGC", 10, 5),
            rec(b"AAAA", 10, 6),
        ];
        let subs = split_open(&group, &params(1, 1));
        let mut seen: Vec<usize> = subs.iter().flat_map(|s| s.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..group.len()).collect::<Vec<_>>());
    }

    #[test]
    fn degenerate_codes_go_undefined() {
        let group = vec![
            rec(b"AAAA", 10, 0),
            rec(b"NNNN", 10, 1),
            rec(b"NNNA", 10, 2),
        ];
        let subs = split_open(&group, &params(1, 1));
        let mut undefined = members_of(&subs, &SubGroupKey::Undefined).to_vec();
        undefined.sort_unstable();
        assert_eq!(undefined, vec![1, 2]);
    }

    // All codes past max_n: one undefined sub-group holding everything.
    #[test]
    fn fully_degenerate_group_is_one_undefined() {
        let group = vec![rec(b"NNNN", 5, 0), rec(b"NNNN", 9, 1), rec(b"NNNN", 7, 2)];
        let subs = split_open(&group, &params(1, 1));
        assert_eq!(subs.len(), 1);
        assert!(subs[0].is_undefined());
        assert_eq!(subs[0].members, vec![0, 1, 2]);
    }

    // An N-bearing code can merge but never becomes an alias, so it cannot
    // chain unrelated codes together.
    #[test]
    fn ambiguous_codes_do_not_become_aliases() {
        // ANAA merges into AAAA (distance 0 over called positions). TNAT
        // is distance 2 from AAAA; were ANAA an alias, TNAT would sit at
        // distance 1 from it and chain in.
        let group = vec![
            rec(b"AAAA", 10, 0),
            rec(b"AAAA", 10, 1),
            rec(b"ANAA", 10, 2),
            rec(b"TNAT", 10, 3),
        ];
        let subs = split_open(&group, &params(1, 1));
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"AAAA".to_vec())),
            &[0, 1, 2]
        );
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"TNAT".to_vec())),
            &[3]
        );
    }

    /* ---------- closed set ----------------------------------------- */

    fn closed_set() -> ExpectedUmis {
        ExpectedUmis::new(vec![b"AAAA".to_vec(), b"CCCC".to_vec()]).unwrap()
    }

    #[test]
    fn closed_set_canonicalises_and_collects_undefined() {
        // AAAN matches AAAA with zero called mismatches; NNNN is past
        // max_n and lands in undefined.
        let group = vec![
            rec(b"AAAA", 10, 0),
            rec(b"AAAN", 20, 1),
            rec(b"CCCC", 30, 2),
            rec(b"CCCC", 15, 3),
            rec(b"NNNN", 25, 4),
        ];
        let subs = split_closed(&group, &closed_set(), &params(1, 1));
        assert_eq!(subs.len(), 3);
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"AAAA".to_vec())),
            &[0, 1]
        );
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"CCCC".to_vec())),
            &[2, 3]
        );
        assert_eq!(members_of(&subs, &SubGroupKey::Undefined), &[4]);

        // Undefined coexists with real sub-groups: all of it is flagged;
        // each real sub-group keeps its best score.
        let flagged = select_duplicates(&group, &subs);
        let mut flagged = flagged;
        flagged.sort_unstable();
        assert_eq!(flagged, vec![0, 3, 4]);
    }

    #[test]
    fn closed_set_splits_multi_slot_umis() {
        // Two sub-codes per UMI; slot order distinguishes AAAA+CCCC from
        // CCCC+AAAA.
        let group = vec![
            rec(b"AAAACCCC", 10, 0),
            rec(b"CCCCAAAA", 10, 1),
            rec(b"AAATCCCC", 10, 2),
        ];
        let subs = split_closed(&group, &closed_set(), &params(1, 1));
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"AAAACCCC".to_vec())),
            &[0, 2]
        );
        assert_eq!(
            members_of(&subs, &SubGroupKey::Code(b"CCCCAAAA".to_vec())),
            &[1]
        );
    }

    #[test]
    fn closed_set_rejects_unmatched_and_odd_lengths() {
        let group = vec![rec(b"GGGG", 10, 0), rec(b"AAA", 10, 1), rec(b"", 10, 2)];
        let subs = split_closed(&group, &closed_set(), &params(1, 1));
        assert_eq!(subs.len(), 1);
        assert_eq!(members_of(&subs, &SubGroupKey::Undefined), &[0, 1, 2]);
    }

    /* ---------- duplicate selection -------------------------------- */

    // Positional duplicates without UMIs: best score survives.
    #[test]
    fn best_score_survives_without_umis() {
        let group = vec![rec(b"", 30, 0), rec(b"", 42, 1), rec(b"", 25, 2)];
        let subs = split_open(&group, &params(1, 1));
        let mut flagged = select_duplicates(&group, &subs);
        flagged.sort_unstable();
        assert_eq!(flagged, vec![0, 2]);
    }

    // A sole undefined sub-group behaves like a real one.
    #[test]
    fn sole_undefined_keeps_its_best() {
        let group = vec![rec(b"NNNN", 5, 0), rec(b"NNNN", 9, 1), rec(b"NNNN", 7, 2)];
        let subs = split_open(&group, &params(1, 1));
        let mut flagged = select_duplicates(&group, &subs);
        flagged.sort_unstable();
        assert_eq!(flagged, vec![0, 2]);
    }

    #[test]
    fn score_ties_break_first_seen() {
        let group = vec![rec(b"ACGT", 10, 0), rec(b"ACGT", 10, 1)];
        let subs = split_open(&group, &params(1, 1));
        assert_eq!(select_duplicates(&group, &subs), vec![1]);
    }

    #[test]
    fn singleton_sub_groups_are_not_flagged() {
        let group = vec![rec(b"AAAA", 10, 0), rec(b"CCCC", 10, 1)];
        let subs = split_open(&group, &params(0, 1));
        assert!(select_duplicates(&group, &subs).is_empty());
    }

    /* ---------- positional grouping -------------------------------- */

    fn at(ref1: i32, coord1: i64, file_index: u64) -> ReadEnd {
        let mut r = rec(b"ACGT", 10, file_index);
        r.ref1 = ref1;
        r.coord1 = coord1;
        r
    }

    #[test]
    fn grouper_emits_contiguous_position_runs() {
        let sorted = vec![
            at(1, 100, 0),
            at(1, 100, 1),
            at(1, 101, 2),
            at(2, 50, 3),
            at(2, 50, 4),
            at(2, 50, 5),
        ];
        let groups: Vec<Vec<ReadEnd>> =
            PositionalGrouper::new(sorted.into_iter().map(Ok), GroupBy::Fragments)
                .map(|g| g.unwrap())
                .collect();
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![2, 1, 3]);
    }

    #[test]
    fn pair_grouping_also_compares_the_second_end() {
        let mut a = at(1, 100, 0);
        let mut b = at(1, 100, 1);
        a.ref2 = 1;
        a.coord2 = 500;
        b.ref2 = 1;
        b.coord2 = 900;
        let sorted = vec![a, b];
        let pairs: Vec<Vec<ReadEnd>> =
            PositionalGrouper::new(sorted.clone().into_iter().map(Ok), GroupBy::Pairs)
                .map(|g| g.unwrap())
                .collect();
        assert_eq!(pairs.len(), 2);
        let frags: Vec<Vec<ReadEnd>> =
            PositionalGrouper::new(sorted.into_iter().map(Ok), GroupBy::Fragments)
                .map(|g| g.unwrap())
                .collect();
        assert_eq!(frags.len(), 1);
    }

    #[test]
    fn empty_stream_yields_no_groups() {
        let mut grouper = PositionalGrouper::new(std::iter::empty(), GroupBy::Fragments);
        assert!(grouper.next().is_none());
    }
}
