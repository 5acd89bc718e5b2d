use std::ops::AddAssign;

/// Counters accumulated by one scan.
///
/// Row counts are in rows, byte counts in compressed bytes as reported by
/// the file metadata or actually fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStatistics {
    // --- Row group level ---
    pub read_row_groups: u64,
    pub filtered_row_groups: u64,
    pub filtered_group_rows: u64,
    pub filtered_bytes: u64,
    pub dict_filtered_row_groups: u64,

    // --- Page level ---
    pub page_index_reads: u64,
    pub filtered_page_rows: u64,

    // --- Dictionary rewrite ---
    pub rewritten_dict_predicates: u64,
    pub abandoned_dict_filters: u64,

    // --- Row level ---
    pub read_rows: u64,
    pub predicate_filtered_rows: u64,
    pub delete_filtered_rows: u64,
    pub lazy_read_filtered_rows: u64,
    pub emitted_rows: u64,
    pub emitted_batches: u64,

    // --- I/O ---
    pub read_calls: u64,
    pub read_bytes: u64,
}

impl AddAssign for ScanStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.read_row_groups += rhs.read_row_groups;
        self.filtered_row_groups += rhs.filtered_row_groups;
        self.filtered_group_rows += rhs.filtered_group_rows;
        self.filtered_bytes += rhs.filtered_bytes;
        self.dict_filtered_row_groups += rhs.dict_filtered_row_groups;
        self.page_index_reads += rhs.page_index_reads;
        self.filtered_page_rows += rhs.filtered_page_rows;
        self.rewritten_dict_predicates += rhs.rewritten_dict_predicates;
        self.abandoned_dict_filters += rhs.abandoned_dict_filters;
        self.read_rows += rhs.read_rows;
        self.predicate_filtered_rows += rhs.predicate_filtered_rows;
        self.delete_filtered_rows += rhs.delete_filtered_rows;
        self.lazy_read_filtered_rows += rhs.lazy_read_filtered_rows;
        self.emitted_rows += rhs.emitted_rows;
        self.emitted_batches += rhs.emitted_batches;
        self.read_calls += rhs.read_calls;
        self.read_bytes += rhs.read_bytes;
    }
}
