/// Per-run demultiplexing tallies.
///
/// `unassigned` is the sum of the three failure tallies below it.
#[derive(Debug, Default)]
pub struct DemuxCounters {
    pub total: u64,
    pub assigned: u64,
    pub unassigned: u64,
    pub truncated: u64,
    pub no_match: u64,
    pub unknown_combination: u64,
}

impl std::ops::AddAssign for DemuxCounters {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.assigned += other.assigned;
        self.unassigned += other.unassigned;
        self.truncated += other.truncated;
        self.no_match += other.no_match;
        self.unknown_combination += other.unknown_combination;
    }
}

/// Duplicate-marking tallies for one library.
#[derive(Debug, Default, Clone)]
pub struct LibraryMetrics {
    pub unmapped: u64,
    pub unpaired_examined: u64,
    pub paired_examined: u64,
    pub unpaired_duplicates: u64,
    pub paired_duplicates: u64,
    pub optical_duplicate_clusters: u64,
}

impl std::ops::AddAssign for LibraryMetrics {
    fn add_assign(&mut self, other: Self) {
        self.unmapped += other.unmapped;
        self.unpaired_examined += other.unpaired_examined;
        self.paired_examined += other.paired_examined;
        self.unpaired_duplicates += other.unpaired_duplicates;
        self.paired_duplicates += other.paired_duplicates;
        self.optical_duplicate_clusters += other.optical_duplicate_clusters;
    }
}
