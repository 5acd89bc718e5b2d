//! Offset reconstruction and assembly of list, map and struct arrays.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, ListArray, MapArray, StructArray};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{DataType, FieldRef, Fields};
use colscan_result::{Error, Result};

/// Prefix-sum per-row element counts into `i32` offsets.
pub(crate) fn offsets_from_lengths(lengths: &[u32]) -> Result<OffsetBuffer<i32>> {
    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut total = 0i32;
    offsets.push(total);
    for length in lengths {
        total = i32::try_from(*length)
            .ok()
            .and_then(|l| total.checked_add(l))
            .ok_or_else(|| Error::corrupt("nested element count overflows 32-bit offsets"))?;
        offsets.push(total);
    }
    Ok(OffsetBuffer::new(ScalarBuffer::from(offsets)))
}

fn check_child_len(column: &str, offsets: &OffsetBuffer<i32>, child: &dyn Array) -> Result<()> {
    let last = offsets.last().copied().unwrap_or_default() as usize;
    if last != child.len() {
        return Err(Error::corrupt(format!(
            "column '{column}' offsets end at {last} but the child has {} values",
            child.len()
        )));
    }
    Ok(())
}

/// Nulls in `child` must be covered by nulls of its parent when the field
/// is declared non-nullable.
fn check_required_child(
    column: &str,
    field: &FieldRef,
    child: &dyn Array,
    parent_nulls: Option<&NullBuffer>,
) -> Result<()> {
    if field.is_nullable() {
        return Ok(());
    }
    let Some(child_nulls) = child.logical_nulls() else {
        return Ok(());
    };
    let uncovered = child_nulls
        .iter()
        .enumerate()
        .any(|(idx, valid)| !valid && parent_nulls.is_none_or(|p| p.is_valid(idx)));
    if uncovered {
        return Err(Error::schema_mismatch(
            format!("{column}.{}", field.name()),
            "non-nullable field contains nulls",
        ));
    }
    Ok(())
}

pub(crate) fn list_array(
    column: &str,
    field: FieldRef,
    lengths: &[u32],
    validity: Option<NullBuffer>,
    child: ArrayRef,
) -> Result<ArrayRef> {
    let offsets = offsets_from_lengths(lengths)?;
    check_child_len(column, &offsets, child.as_ref())?;
    check_required_child(column, &field, child.as_ref(), None)?;
    Ok(Arc::new(ListArray::try_new(field, offsets, child, validity)?))
}

pub(crate) fn map_array(
    column: &str,
    entries: FieldRef,
    sorted: bool,
    lengths: &[u32],
    validity: Option<NullBuffer>,
    keys: ArrayRef,
    values: ArrayRef,
) -> Result<ArrayRef> {
    let DataType::Struct(fields) = entries.data_type() else {
        return Err(Error::Internal(format!("map '{column}' entries are not a struct")));
    };
    if keys.null_count() > 0 {
        return Err(Error::corrupt(format!("map '{column}' has null keys")));
    }
    if keys.len() != values.len() {
        return Err(Error::corrupt(format!(
            "map '{column}' has {} keys and {} values",
            keys.len(),
            values.len()
        )));
    }
    let offsets = offsets_from_lengths(lengths)?;
    check_child_len(column, &offsets, keys.as_ref())?;
    check_required_child(column, &fields[1], values.as_ref(), None)?;
    let entries_array = StructArray::try_new(fields.clone(), vec![keys, values], None)?;
    Ok(Arc::new(MapArray::try_new(
        entries,
        offsets,
        entries_array,
        validity,
        sorted,
    )?))
}

pub(crate) fn struct_array(
    column: &str,
    fields: Fields,
    children: Vec<ArrayRef>,
    validity: Option<NullBuffer>,
    num_rows: usize,
) -> Result<ArrayRef> {
    if fields.is_empty() {
        return Ok(Arc::new(StructArray::new_empty_fields(num_rows, validity)));
    }
    for (field, child) in fields.iter().zip(&children) {
        if child.len() != num_rows {
            return Err(Error::corrupt(format!(
                "struct '{column}' field '{}' has {} rows, expected {num_rows}",
                field.name(),
                child.len()
            )));
        }
        check_required_child(column, field, child.as_ref(), validity.as_ref())?;
    }
    Ok(Arc::new(StructArray::try_new(fields, children, validity)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int32Array, StringArray};
    use arrow::datatypes::{Field, Int32Type};

    #[test]
    fn offsets_are_prefix_sums() {
        let offsets = offsets_from_lengths(&[2, 0, 3]).unwrap();
        assert_eq!(&offsets[..], &[0, 2, 2, 5]);
        assert!(offsets_from_lengths(&[u32::MAX]).is_err());
        assert!(offsets_from_lengths(&[i32::MAX as u32, 1]).is_err());
    }

    #[test]
    fn list_length_must_match_child() {
        let field = Arc::new(Field::new("element", DataType::Int32, true));
        let child: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let list = list_array("l", field.clone(), &[1, 2], None, child.clone()).unwrap();
        let list = list.as_list::<i32>();
        let second = list.value(1);
        assert_eq!(second.as_primitive::<Int32Type>().values().to_vec(), vec![2, 3]);
        assert!(list_array("l", field, &[1, 1], None, child).is_err());
    }

    #[test]
    fn map_keys_must_be_present() {
        let fields = Fields::from(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("value", DataType::Int32, true),
        ]);
        let entries = Arc::new(Field::new("entries", DataType::Struct(fields), false));
        let keys: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        let values: ArrayRef = Arc::new(Int32Array::from(vec![1, 2]));
        let err = map_array("m", entries, false, &[2], None, keys, values).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }

    #[test]
    fn required_struct_field_nulls_need_parent_null() {
        let fields = Fields::from(vec![Field::new("x", DataType::Int32, false)]);
        let child: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), None]));
        let masked = NullBuffer::from(vec![true, false]);
        assert!(struct_array("s", fields.clone(), vec![child.clone()], Some(masked), 2).is_ok());
        let err = struct_array("s", fields, vec![child], None, 2).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }
}
