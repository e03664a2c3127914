#[cfg(test)]
mod markdup_utils_tests {
    use demark::dupes::markdup::{trim_name, LibraryTable};
    use demark::dupes::read_end::{resolve_slot, umi_from_name, Orientation};

    #[test]
    fn slot_resolution_handles_both_signs() {
        assert_eq!(resolve_slot(1, 4), Some(0));
        assert_eq!(resolve_slot(4, 4), Some(3));
        assert_eq!(resolve_slot(5, 4), None);
        assert_eq!(resolve_slot(-1, 4), Some(3));
        assert_eq!(resolve_slot(-4, 4), Some(0));
        assert_eq!(resolve_slot(-5, 4), None);
        assert_eq!(resolve_slot(0, 4), None);
    }

    #[test]
    fn umi_defaults_to_last_token() {
        let umi = umi_from_name(b"machine:1234:ACGT", b':', &[-1]).unwrap();
        assert_eq!(umi.as_slice(), b"ACGT");
    }

    #[test]
    fn umi_concatenates_slots_in_order() {
        let umi = umi_from_name(b"r1:AAAA:CCCC", b':', &[2, 3]).unwrap();
        assert_eq!(umi.as_slice(), b"AAAACCCC");
        let umi = umi_from_name(b"r1:AAAA:CCCC", b':', &[3, 2]).unwrap();
        assert_eq!(umi.as_slice(), b"CCCCAAAA");
    }

    #[test]
    fn out_of_range_umi_slot_is_none() {
        assert!(umi_from_name(b"r1:ACGT", b':', &[5]).is_none());
    }

    #[test]
    fn trim_removes_designated_tokens() {
        assert_eq!(trim_name(b"r1:AAAA:ACGT", b':', &[-1]), b"r1:AAAA");
        assert_eq!(trim_name(b"r1:AAAA:ACGT", b':', &[2, 3]), b"r1");
        assert_eq!(trim_name(b"r1:AAAA:ACGT", b':', &[1]), b"AAAA:ACGT");
    }

    // Negative indices re-resolve against each name's own token count.
    #[test]
    fn trim_follows_token_count() {
        assert_eq!(trim_name(b"a:b:c:d", b':', &[-1]), b"a:b:c");
        assert_eq!(trim_name(b"a:b", b':', &[-1]), b"a");
    }

    #[test]
    fn trim_ignores_out_of_range_slots() {
        assert_eq!(trim_name(b"a:b", b':', &[9]), b"a:b");
    }

    #[test]
    fn pair_orientation_follows_reference_order() {
        assert_eq!(Orientation::pair(false, false), Orientation::FF);
        assert_eq!(Orientation::pair(false, true), Orientation::FR);
        assert_eq!(Orientation::pair(true, false), Orientation::RF);
        assert_eq!(Orientation::pair(true, true), Orientation::RR);
        assert_eq!(Orientation::fragment(false), Orientation::F);
        assert_eq!(Orientation::fragment(true), Orientation::R);
    }

    #[test]
    fn library_table_maps_read_groups() {
        let text = "@HD\tVN:1.6\tSO:coordinate\n\
                    @RG\tID:rg1\tLB:libA\tSM:s1\n\
                    @RG\tID:rg2\tLB:libB\n\
                    @RG\tID:rg3\tLB:libA\n";
        let table = LibraryTable::from_header_text(text);
        assert_eq!(table.libraries(), &["unknown", "libA", "libB"]);

        let (rg1, lib1) = table.resolve(Some(b"rg1"));
        let (rg3, lib3) = table.resolve(Some(b"rg3"));
        assert_ne!(rg1, rg3);
        assert_eq!(lib1, lib3);
        let (_, lib2) = table.resolve(Some(b"rg2"));
        assert_ne!(lib1, lib2);

        // No read group, or an unlisted one: the fallback library.
        assert_eq!(table.resolve(None), (0, 0));
        assert_eq!(table.resolve(Some(b"nope")), (0, 0));
    }

    #[test]
    fn read_group_without_library_is_unknown() {
        let table = LibraryTable::from_header_text("@RG\tID:rg1\n");
        let (_, lib) = table.resolve(Some(b"rg1"));
        assert_eq!(table.libraries()[lib as usize], "unknown");
    }
}
