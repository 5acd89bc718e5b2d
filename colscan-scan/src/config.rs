/// Column names that carry the ACID row identity used by triple-keyed deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcidColumnNames {
    pub original_transaction: String,
    pub bucket: String,
    pub row_id: String,
}

impl Default for AcidColumnNames {
    fn default() -> Self {
        Self {
            original_transaction: "originalTransaction".to_string(),
            bucket: "bucket".to_string(),
            row_id: "rowId".to_string(),
        }
    }
}

impl AcidColumnNames {
    pub fn all(&self) -> [&str; 3] {
        [
            self.original_transaction.as_str(),
            self.bucket.as_str(),
            self.row_id.as_str(),
        ]
    }
}

/// Run-time configuration of a scan (no hidden constants).
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Rows per batch when `next_batch` is called with a capacity of zero.
    pub batch_size: usize,
    /// Read non-predicate columns only for rows that survive filtering.
    pub enable_lazy_materialization: bool,
    /// Use chunk statistics and page indexes to skip row groups and pages.
    pub enable_filter_by_min_max: bool,
    /// Read column/offset indexes of kept row groups.
    pub enable_page_index: bool,
    /// Evaluate string predicates against dictionary pages.
    pub enable_dictionary_filter: bool,
    /// Largest surviving code set that is still rewritten into a code predicate.
    pub max_dictionary_codes_to_rewrite: usize,
    /// Row groups smaller than this are fetched with a single read.
    pub tiny_row_group_bytes: u64,
    /// Upper bound on the size of one read request.
    pub once_max_read_bytes: u64,
    pub acid_columns: AcidColumnNames,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 4064,
            enable_lazy_materialization: true,
            enable_filter_by_min_max: true,
            enable_page_index: true,
            enable_dictionary_filter: true,
            // TODO: derive from dictionary size instead of a flat cap
            max_dictionary_codes_to_rewrite: 1024,
            tiny_row_group_bytes: 8 * 1024 * 1024,
            once_max_read_bytes: 8 * 1024 * 1024,
            acid_columns: AcidColumnNames::default(),
        }
    }
}
