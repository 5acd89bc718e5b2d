//! Raw column chunks to typed Arrow arrays.
//!
//! [`BatchMaterializer`] walks a [`ReadPlan`] and dispatches once per decoded
//! chunk on its [`RawColumn`] variant:
//!
//! - `Flat`: values stored inline; decoded by logical type.
//! - `Dictionary`: codes validated against the dictionary, selected, then
//!   expanded with `take`.
//! - `Repeated`: offsets rebuilt from element counts, child read recursively.
//! - `Struct`: children read over the same rows.
//!
//! Conversion to the requested type happens at the leaves, through the
//! converter attached to the plan.

pub(crate) mod binary;
pub(crate) mod decimal;
pub(crate) mod nested;
pub(crate) mod primitive;
pub(crate) mod temporal;

use std::ops::Range;

use arrow::array::{Array, ArrayRef, BooleanArray, Int32Array, UInt32Array, new_null_array};
use arrow::buffer::NullBuffer;
use arrow::compute::{filter, take};
use arrow::datatypes::DataType;
use arrow_buffer::BooleanBuffer;
use bytes::Bytes;
use colscan_format::{FileFormat, FileSchema, NodeId, PhysicalValues, RawColumn, RowGroupDescriptor};
use colscan_result::{Error, Result};

use crate::schema_resolver::ReadPlan;

/// Supplies chunk bytes and decoded dictionaries for one row group.
pub(crate) trait ChunkSource {
    /// Data-page bytes of a column chunk.
    fn data(&mut self, node: NodeId) -> Result<Bytes>;

    /// The chunk's dictionary decoded to `decoded`, cached per row group.
    fn dictionary(&mut self, node: NodeId, decoded: &DataType) -> Result<ArrayRef>;
}

/// Build an array of `decoded` from stored values.
pub(crate) fn values_to_array(
    values: &PhysicalValues,
    validity: Option<&NullBuffer>,
    num_rows: usize,
    decoded: &DataType,
    selection: Option<&BooleanBuffer>,
) -> Result<ArrayRef> {
    let array = match decoded {
        DataType::Utf8 | DataType::Binary | DataType::FixedSizeBinary(_) => {
            return binary::decode_bytes(values, validity, num_rows, decoded, selection);
        }
        DataType::Decimal128(precision, scale) => {
            decimal::decode_decimal(values, validity, num_rows, *precision, *scale)?
        }
        _ => primitive::decode_primitive(values, validity, num_rows, decoded)?,
    };
    apply_selection(array, selection)
}

pub(crate) fn apply_selection(
    array: ArrayRef,
    selection: Option<&BooleanBuffer>,
) -> Result<ArrayRef> {
    match selection {
        Some(selection) if selection.count_set_bits() != selection.len() => {
            let predicate = BooleanArray::new(selection.clone(), None);
            Ok(filter(array.as_ref(), &predicate)?)
        }
        _ => Ok(array),
    }
}

fn check_codes(codes: &[u32], dictionary_len: usize) -> Result<()> {
    match codes.iter().find(|c| **c as usize >= dictionary_len) {
        Some(code) => Err(Error::corrupt(format!(
            "dictionary code {code} out of range for a dictionary of {dictionary_len} values"
        ))),
        None => Ok(()),
    }
}

/// Dictionary codes of a window as an `Int32` column, nulls preserved.
pub(crate) fn code_array(
    codes: &[u32],
    validity: Option<&NullBuffer>,
    num_rows: usize,
    dictionary_len: usize,
) -> Result<Int32Array> {
    check_codes(codes, dictionary_len)?;
    let signed = codes
        .iter()
        .map(|c| i32::try_from(*c).map_err(|_| Error::corrupt("dictionary code exceeds i32")))
        .collect::<Result<Vec<_>>>()?;
    let full = primitive::spread(&signed, validity, num_rows)?;
    Ok(Int32Array::new(full.into(), validity.cloned()))
}

/// Replace codes by their dictionary values.
pub(crate) fn expand_codes(codes: &dyn Array, dictionary: &ArrayRef) -> Result<ArrayRef> {
    Ok(take(dictionary.as_ref(), codes, None)?)
}

fn expand_dictionary(
    codes: &[u32],
    validity: Option<&NullBuffer>,
    num_rows: usize,
    dictionary: &ArrayRef,
    selection: Option<&BooleanBuffer>,
) -> Result<ArrayRef> {
    check_codes(codes, dictionary.len())?;
    let full = primitive::spread(codes, validity, num_rows)?;
    let keys: ArrayRef = std::sync::Arc::new(UInt32Array::new(full.into(), validity.cloned()));
    let keys = apply_selection(keys, selection)?;
    expand_codes(keys.as_ref(), dictionary)
}

/// Decodes columns of one row group.
pub(crate) struct BatchMaterializer<'a> {
    schema: &'a FileSchema,
    format: &'a dyn FileFormat,
    row_group: &'a RowGroupDescriptor,
}

impl<'a> BatchMaterializer<'a> {
    pub(crate) fn new(
        schema: &'a FileSchema,
        format: &'a dyn FileFormat,
        row_group: &'a RowGroupDescriptor,
    ) -> Self {
        Self {
            schema,
            format,
            row_group,
        }
    }

    /// Read `rows` (relative to the row group) of a top-level column, keeping
    /// only rows set in `selection`.
    pub(crate) fn read_column(
        &self,
        column: &str,
        plan: &ReadPlan,
        rows: Range<u64>,
        selection: Option<&BooleanBuffer>,
        source: &mut dyn ChunkSource,
    ) -> Result<ArrayRef> {
        self.read_plan(column, plan, rows, selection, source)
    }

    /// Dictionary codes of a top-level column for `rows`.
    pub(crate) fn read_codes(
        &self,
        column: &str,
        node: NodeId,
        decoded: &DataType,
        rows: Range<u64>,
        source: &mut dyn ChunkSource,
    ) -> Result<Int32Array> {
        let raw = self.decode(node, rows, source)?;
        let num_rows = raw.num_rows();
        match raw {
            RawColumn::Dictionary { codes, validity } => {
                let dictionary = source.dictionary(node, decoded)?;
                code_array(&codes, validity.as_ref(), num_rows, dictionary.len())
            }
            _ => Err(Error::corrupt(format!(
                "column '{column}' is marked dictionary encoded but has plain pages"
            ))),
        }
    }

    fn decode(
        &self,
        node: NodeId,
        rows: Range<u64>,
        source: &mut dyn ChunkSource,
    ) -> Result<RawColumn> {
        let chunk = self.row_group.column(node).ok_or_else(|| {
            Error::corrupt(format!(
                "row group {} has no chunk for schema node {}",
                self.row_group.id, node.0
            ))
        })?;
        let data = source.data(node)?;
        let expected = rows.end - rows.start;
        let raw = self
            .format
            .decode_column(&data, chunk, self.schema.node(node), rows)?;
        if raw.num_rows() as u64 != expected {
            return Err(Error::corrupt(format!(
                "column '{}' decoded {} rows, expected {expected}",
                self.schema.node(node).name,
                raw.num_rows()
            )));
        }
        Ok(raw)
    }

    fn read_plan(
        &self,
        column: &str,
        plan: &ReadPlan,
        rows: Range<u64>,
        selection: Option<&BooleanBuffer>,
        source: &mut dyn ChunkSource,
    ) -> Result<ArrayRef> {
        match plan {
            ReadPlan::Leaf {
                node,
                decoded,
                converter,
                ..
            } => {
                let raw = self.decode(*node, rows, source)?;
                let num_rows = raw.num_rows();
                let array = match raw {
                    RawColumn::Flat { values, validity } => {
                        values_to_array(&values, validity.as_ref(), num_rows, decoded, selection)?
                    }
                    RawColumn::Dictionary { codes, validity } => {
                        let dictionary = source.dictionary(*node, decoded)?;
                        expand_dictionary(
                            &codes,
                            validity.as_ref(),
                            num_rows,
                            &dictionary,
                            selection,
                        )?
                    }
                    RawColumn::Repeated { .. } | RawColumn::Struct { .. } => {
                        return Err(Error::corrupt(format!(
                            "primitive column '{column}' decoded as a nested chunk"
                        )));
                    }
                };
                converter.convert(column, array)
            }
            ReadPlan::List {
                node,
                element,
                field,
            } => {
                let RawColumn::Repeated {
                    lengths,
                    validity,
                    child_rows,
                } = self.decode(*node, rows, source)?
                else {
                    return Err(Error::corrupt(format!("list '{column}' has no element counts")));
                };
                let child = self.read_plan(column, element, child_rows, None, source)?;
                let list = nested::list_array(column, field.clone(), &lengths, validity, child)?;
                apply_selection(list, selection)
            }
            ReadPlan::Map {
                node,
                key,
                value,
                entries,
                sorted,
            } => {
                let RawColumn::Repeated {
                    lengths,
                    validity,
                    child_rows,
                } = self.decode(*node, rows, source)?
                else {
                    return Err(Error::corrupt(format!("map '{column}' has no entry counts")));
                };
                let keys = self.read_plan(column, key, child_rows.clone(), None, source)?;
                let values = self.read_plan(column, value, child_rows, None, source)?;
                let map = nested::map_array(
                    column,
                    entries.clone(),
                    *sorted,
                    &lengths,
                    validity,
                    keys,
                    values,
                )?;
                apply_selection(map, selection)
            }
            ReadPlan::Struct { node, fields } => {
                let RawColumn::Struct { num_rows, validity } =
                    self.decode(*node, rows.clone(), source)?
                else {
                    return Err(Error::corrupt(format!("struct '{column}' decoded as a leaf")));
                };
                let mut children = Vec::with_capacity(fields.len());
                for (field, child) in fields {
                    children.push(match child {
                        Some(child) => self.read_plan(column, child, rows.clone(), None, source)?,
                        None => new_null_array(field.data_type(), num_rows),
                    });
                }
                let fields = fields.iter().map(|(field, _)| field.clone()).collect();
                let array = nested::struct_array(column, fields, children, validity, num_rows)?;
                apply_selection(array, selection)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{AsArray, StringArray};

    #[test]
    fn dictionary_expansion_selects_before_take() {
        let dictionary: ArrayRef = Arc::new(StringArray::from(vec!["a", "b", "c"]));
        let validity = NullBuffer::from(vec![true, true, false, true]);
        let selection = BooleanBuffer::from_iter([true, false, true, true]);
        let out = expand_dictionary(&[2, 0, 1], Some(&validity), 4, &dictionary, Some(&selection))
            .unwrap();
        let out = out.as_string::<i32>();
        assert_eq!(out.len(), 3);
        assert_eq!(out.value(0), "c");
        assert!(out.is_null(1));
        assert_eq!(out.value(2), "b");
    }

    #[test]
    fn out_of_range_codes_are_corrupt() {
        let dictionary: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let err = expand_dictionary(&[0, 1], None, 2, &dictionary, None).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
        assert!(code_array(&[3], None, 1, 2).is_err());
    }

    #[test]
    fn codes_keep_nulls() {
        let validity = NullBuffer::from(vec![false, true]);
        let codes = code_array(&[1], Some(&validity), 2, 2).unwrap();
        assert!(codes.is_null(0));
        assert_eq!(codes.value(1), 1);
    }
}
