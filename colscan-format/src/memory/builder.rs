use std::cmp::Ordering;

use bytes::Bytes;
use colscan_result::{Error, Result};

use super::{MAGIC, MemFile, StoredBody, StoredColumn};
use crate::chunk::PhysicalValues;
use crate::metadata::{
    ByteRange, ColumnChunkMeta, ColumnStatistics, FileMetadata, RowGroupDescriptor,
};
use crate::page_index::{BoundaryOrder, ColumnIndex, OffsetIndex, PageLocation};
use crate::schema::{FileSchema, NodeId};

/// Content of one column chunk handed to [`MemFileBuilder`].
#[derive(Clone, Debug)]
pub enum MemColumn {
    /// Plain values. `values` holds one entry per `true` in `validity`.
    Values {
        validity: Vec<bool>,
        values: PhysicalValues,
    },
    /// Dictionary-encoded values: one code per `true` in `validity`.
    Dictionary {
        validity: Vec<bool>,
        dictionary: PhysicalValues,
        codes: Vec<u32>,
    },
    /// List or map element counts, one per row.
    Lengths { validity: Vec<bool>, lengths: Vec<u32> },
    Struct { validity: Vec<bool> },
}

fn split_options<T>(values: impl IntoIterator<Item = Option<T>>) -> (Vec<bool>, Vec<T>) {
    let mut validity = Vec::new();
    let mut out = Vec::new();
    for value in values {
        validity.push(value.is_some());
        out.extend(value);
    }
    (validity, out)
}

impl MemColumn {
    pub fn boolean(values: impl IntoIterator<Item = Option<bool>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::Boolean(values),
        }
    }

    pub fn int32(values: impl IntoIterator<Item = Option<i32>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::Int32(values),
        }
    }

    pub fn int64(values: impl IntoIterator<Item = Option<i64>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::Int64(values),
        }
    }

    pub fn float64(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::Double(values),
        }
    }

    /// Plain-encoded byte arrays.
    pub fn bytes<'a>(values: impl IntoIterator<Item = Option<&'a [u8]>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::from_byte_slices(values),
        }
    }

    /// Plain-encoded strings.
    pub fn strings<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        Self::bytes(values.into_iter().map(|v| v.map(str::as_bytes)))
    }

    /// Dictionary-encoded strings; the dictionary is in first-seen order.
    pub fn dictionary_strings<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let (validity, values) = split_options(values);
        let mut distinct: Vec<&str> = Vec::new();
        let codes = values
            .iter()
            .map(|v| match distinct.iter().position(|d| d == v) {
                Some(code) => code as u32,
                None => {
                    distinct.push(v);
                    (distinct.len() - 1) as u32
                }
            })
            .collect();
        MemColumn::Dictionary {
            validity,
            dictionary: PhysicalValues::from_byte_slices(distinct.iter().map(|s| s.as_bytes())),
            codes,
        }
    }

    /// Fixed-width binary values (e.g. big-endian decimals).
    pub fn fixed(width: u32, values: impl IntoIterator<Item = Option<Vec<u8>>>) -> Self {
        let (validity, values) = split_options(values);
        MemColumn::Values {
            validity,
            values: PhysicalValues::FixedLenByteArray {
                width,
                data: values.concat(),
            },
        }
    }

    /// List or map element counts. `None` is a null row.
    pub fn lengths(values: impl IntoIterator<Item = Option<u32>>) -> Self {
        let mut validity = Vec::new();
        let mut lengths = Vec::new();
        for value in values {
            validity.push(value.is_some());
            lengths.push(value.unwrap_or(0));
        }
        MemColumn::Lengths { validity, lengths }
    }

    pub fn structs(validity: impl IntoIterator<Item = bool>) -> Self {
        MemColumn::Struct {
            validity: validity.into_iter().collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        match self {
            MemColumn::Values { validity, .. }
            | MemColumn::Dictionary { validity, .. }
            | MemColumn::Lengths { validity, .. }
            | MemColumn::Struct { validity } => validity.len(),
        }
    }

    fn validity(&self) -> &[bool] {
        match self {
            MemColumn::Values { validity, .. }
            | MemColumn::Dictionary { validity, .. }
            | MemColumn::Lengths { validity, .. }
            | MemColumn::Struct { validity } => validity,
        }
    }

    /// Underlying values and, per row, the index of the row's value in them.
    fn value_lookup(&self) -> Option<(&PhysicalValues, Vec<Option<usize>>)> {
        let mut next = 0usize;
        let mut positions = Vec::with_capacity(self.num_rows());
        let (values, codes) = match self {
            MemColumn::Values { values, .. } => (values, None),
            MemColumn::Dictionary {
                dictionary, codes, ..
            } => (dictionary, Some(codes)),
            _ => return None,
        };
        for valid in self.validity() {
            if *valid {
                let idx = match codes {
                    Some(codes) => *codes.get(next)? as usize,
                    None => next,
                };
                positions.push(Some(idx));
                next += 1;
            } else {
                positions.push(None);
            }
        }
        Some((values, positions))
    }
}

fn min_max(
    values: &PhysicalValues,
    indices: impl Iterator<Item = usize>,
) -> Option<Option<(usize, usize)>> {
    let mut best: Option<(usize, usize)> = None;
    for idx in indices {
        best = Some(match best {
            None => {
                // incomparable values (NaN, INT96) disable statistics
                values.compare(idx, idx)?;
                (idx, idx)
            }
            Some((lo, hi)) => {
                let lo = if values.compare(idx, lo)? == Ordering::Less { idx } else { lo };
                let hi = if values.compare(idx, hi)? == Ordering::Greater { idx } else { hi };
                (lo, hi)
            }
        });
    }
    Some(best)
}

/// Assembles an in-memory file row group by row group.
#[derive(Debug)]
pub struct MemFileBuilder {
    path: String,
    schema: FileSchema,
    created_by: Option<String>,
    page_rows: usize,
    write_statistics: bool,
    write_page_index: bool,
    row_groups: Vec<Vec<MemColumn>>,
    statistics_overrides: Vec<(usize, NodeId, Option<ColumnStatistics>)>,
}

impl MemFileBuilder {
    pub fn new(schema: FileSchema) -> Self {
        Self {
            path: "memory://file".to_string(),
            schema,
            created_by: Some("colscan-mem version 0.1.0".to_string()),
            page_rows: 1024,
            write_statistics: true,
            write_page_index: true,
            row_groups: Vec::new(),
            statistics_overrides: Vec::new(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn created_by(mut self, created_by: Option<&str>) -> Self {
        self.created_by = created_by.map(str::to_string);
        self
    }

    /// Rows per page for the page index of top-level leaf columns.
    pub fn page_rows(mut self, rows: usize) -> Self {
        self.page_rows = rows.max(1);
        self
    }

    pub fn without_statistics(mut self) -> Self {
        self.write_statistics = false;
        self
    }

    pub fn without_page_index(mut self) -> Self {
        self.write_page_index = false;
        self
    }

    /// Add a row group. `columns` has one entry per schema node, in node order.
    pub fn row_group(mut self, columns: Vec<MemColumn>) -> Self {
        self.row_groups.push(columns);
        self
    }

    /// Replace the computed statistics of one chunk.
    pub fn override_statistics(
        mut self,
        row_group: usize,
        node: NodeId,
        statistics: Option<ColumnStatistics>,
    ) -> Self {
        self.statistics_overrides.push((row_group, node, statistics));
        self
    }

    pub fn build(self) -> Result<MemFile> {
        let mut out: Vec<u8> = MAGIC.to_vec();
        let mut descriptors = Vec::with_capacity(self.row_groups.len());
        let mut first_row = 0u64;

        for (rg_idx, columns) in self.row_groups.iter().enumerate() {
            self.validate_row_group(rg_idx, columns)?;
            let num_rows = self
                .schema
                .roots()
                .first()
                .map_or(0, |root| columns[root.index()].num_rows()) as u64;

            let mut metas = Vec::with_capacity(columns.len());
            for (node_idx, column) in columns.iter().enumerate() {
                let node = NodeId(node_idx as u32);
                let is_root = self.schema.roots().contains(&node);
                let mut meta = self.write_chunk(&mut out, node, column)?;
                if let Some((_, _, stats)) = self
                    .statistics_overrides
                    .iter()
                    .rev()
                    .find(|(rg, n, _)| *rg == rg_idx && *n == node)
                {
                    meta.statistics = stats.clone();
                }
                if self.write_page_index && is_root {
                    self.write_page_index(&mut out, column, &mut meta);
                }
                metas.push(meta);
            }
            descriptors.push(RowGroupDescriptor {
                id: rg_idx as u32,
                first_row,
                num_rows,
                compressed_size: metas.iter().map(ColumnChunkMeta::compressed_size).sum(),
                columns: metas,
            });
            first_row += num_rows;
        }

        let metadata = FileMetadata {
            schema: self.schema,
            row_groups: descriptors,
            created_by: self.created_by,
        };
        let footer = bitcode::encode(&metadata);
        out.extend_from_slice(&footer);
        out.extend_from_slice(&(footer.len() as u64).to_le_bytes());
        out.extend_from_slice(MAGIC);
        Ok(MemFile::new(self.path, Bytes::from(out)))
    }

    fn validate_row_group(&self, rg_idx: usize, columns: &[MemColumn]) -> Result<()> {
        let nodes = self.schema.nodes();
        if columns.len() != nodes.len() {
            return Err(Error::InvalidArgumentError(format!(
                "row group {rg_idx} has {} columns, schema has {} nodes",
                columns.len(),
                nodes.len()
            )));
        }
        let mut expected: Vec<Option<usize>> = vec![None; nodes.len()];
        if let Some(first) = self.schema.roots().first() {
            let rows = columns[first.index()].num_rows();
            for root in self.schema.roots() {
                expected[root.index()] = Some(rows);
            }
        }
        for (idx, node) in nodes.iter().enumerate() {
            let rows = columns[idx].num_rows();
            if let Some(want) = expected[idx]
                && want != rows
            {
                return Err(Error::InvalidArgumentError(format!(
                    "row group {rg_idx}: column '{}' has {rows} rows, expected {want}",
                    node.name
                )));
            }
            let child_rows = match &columns[idx] {
                MemColumn::Lengths { lengths, .. } => lengths.iter().map(|l| *l as usize).sum(),
                _ => rows,
            };
            for child in &node.children {
                expected[child.index()] = Some(child_rows);
            }
            if let MemColumn::Values { validity, values } = &columns[idx] {
                let non_null = validity.iter().filter(|v| **v).count();
                if non_null != values.len() {
                    return Err(Error::InvalidArgumentError(format!(
                        "row group {rg_idx}: column '{}' has {non_null} non-null rows \
                         but {} values",
                        node.name,
                        values.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn write_chunk(
        &self,
        out: &mut Vec<u8>,
        node: NodeId,
        column: &MemColumn,
    ) -> Result<ColumnChunkMeta> {
        let num_rows = column.num_rows() as u64;
        let validity = column.validity();
        let stored_validity = validity.iter().any(|v| !*v).then(|| validity.to_vec());

        let mut dictionary_page = None;
        let body = match column {
            MemColumn::Values { values, .. } => StoredBody::Values(values.clone()),
            MemColumn::Dictionary {
                dictionary, codes, ..
            } => {
                let page = bitcode::encode(dictionary);
                dictionary_page = Some(append(out, &page));
                StoredBody::Codes(codes.clone())
            }
            MemColumn::Lengths { lengths, .. } => StoredBody::Lengths(lengths.clone()),
            MemColumn::Struct { .. } => StoredBody::Struct,
        };
        let stored = StoredColumn {
            num_rows,
            validity: stored_validity,
            body,
        };
        let data = append(out, &bitcode::encode(&stored));

        let statistics = if self.write_statistics {
            column.value_lookup().map(|(values, positions)| {
                let null_count = positions.iter().filter(|p| p.is_none()).count() as u64;
                let bounds = min_max(values, positions.iter().flatten().copied()).flatten();
                ColumnStatistics {
                    min_value: bounds.and_then(|(lo, _)| values.plain_encode(lo)),
                    max_value: bounds.and_then(|(_, hi)| values.plain_encode(hi)),
                    null_count: Some(null_count),
                    legacy_min_max: false,
                }
            })
        } else {
            None
        };

        Ok(ColumnChunkMeta {
            node,
            num_values: num_rows,
            data,
            dictionary_page,
            fully_dictionary_encoded: matches!(column, MemColumn::Dictionary { .. }),
            statistics,
            column_index: None,
            offset_index: None,
        })
    }

    fn write_page_index(&self, out: &mut Vec<u8>, column: &MemColumn, meta: &mut ColumnChunkMeta) {
        let Some((values, positions)) = column.value_lookup() else {
            return;
        };
        let mut column_index = ColumnIndex {
            null_pages: Vec::new(),
            min_values: Vec::new(),
            max_values: Vec::new(),
            null_counts: Some(Vec::new()),
            boundary_order: BoundaryOrder::Unordered,
        };
        let mut offset_index = OffsetIndex {
            page_locations: Vec::new(),
        };
        for (page, rows) in positions.chunks(self.page_rows).enumerate() {
            let nulls = rows.iter().filter(|p| p.is_none()).count() as u64;
            let Some(bounds) = min_max(values, rows.iter().flatten().copied()) else {
                // incomparable values: no page index for this chunk
                return;
            };
            column_index.null_pages.push(bounds.is_none());
            let (min, max) = bounds
                .and_then(|(lo, hi)| Some((values.plain_encode(lo)?, values.plain_encode(hi)?)))
                .unwrap_or_default();
            column_index.min_values.push(min);
            column_index.max_values.push(max);
            if let Some(counts) = column_index.null_counts.as_mut() {
                counts.push(nulls);
            }
            offset_index.page_locations.push(PageLocation {
                offset: meta.data.offset,
                compressed_page_size: 0,
                first_row_index: (page * self.page_rows) as u64,
            });
        }
        meta.column_index = Some(append(out, &bitcode::encode(&column_index)));
        meta.offset_index = Some(append(out, &bitcode::encode(&offset_index)));
    }
}

fn append(out: &mut Vec<u8>, bytes: &[u8]) -> ByteRange {
    let range = ByteRange::new(out.len() as u64, bytes.len() as u64);
    out.extend_from_slice(bytes);
    range
}
