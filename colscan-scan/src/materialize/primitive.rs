use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, PrimitiveArray};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{
    ArrowPrimitiveType, ArrowTimestampType, DataType, Date32Type, Float32Type, Float64Type,
    Int8Type, Int16Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt8Type, UInt16Type,
    UInt32Type, UInt64Type,
};
use arrow_buffer::BooleanBuffer;
use colscan_format::PhysicalValues;
use colscan_result::{Error, Result};

use super::temporal::int96_to_nanos;

/// Place compact non-null values at their row positions.
///
/// Null slots get `T::default()`; the validity map masks them.
pub(crate) fn spread<T: Copy + Default>(
    compact: &[T],
    validity: Option<&NullBuffer>,
    num_rows: usize,
) -> Result<Vec<T>> {
    let Some(validity) = validity else {
        if compact.len() != num_rows {
            return Err(Error::corrupt(format!(
                "expected {num_rows} values, decoded {}",
                compact.len()
            )));
        }
        return Ok(compact.to_vec());
    };
    let expected = num_rows - validity.null_count();
    if validity.len() != num_rows || compact.len() != expected {
        return Err(Error::corrupt(format!(
            "expected {expected} non-null values, decoded {}",
            compact.len()
        )));
    }
    let mut out = vec![T::default(); num_rows];
    for (slot, value) in validity.valid_indices().zip(compact) {
        out[slot] = *value;
    }
    Ok(out)
}

fn typed<T: ArrowPrimitiveType, S: Copy>(
    compact: &[S],
    validity: Option<&NullBuffer>,
    num_rows: usize,
    map: impl Fn(S) -> Option<T::Native>,
) -> Result<PrimitiveArray<T>> {
    let mapped = compact
        .iter()
        .map(|v| map(*v).ok_or_else(|| Error::corrupt("value out of range for its logical type")))
        .collect::<Result<Vec<_>>>()?;
    let full = spread(&mapped, validity, num_rows)?;
    Ok(PrimitiveArray::<T>::new(full.into(), validity.cloned()))
}

fn timestamps<T: ArrowTimestampType>(
    compact: &[i64],
    validity: Option<&NullBuffer>,
    num_rows: usize,
    tz: &Option<Arc<str>>,
) -> Result<ArrayRef> {
    let array = typed::<T, i64>(compact, validity, num_rows, Some)?;
    Ok(Arc::new(array.with_timezone_opt(tz.clone())))
}

/// Decode fixed-width values into an array of `decoded`.
pub(crate) fn decode_primitive(
    values: &PhysicalValues,
    validity: Option<&NullBuffer>,
    num_rows: usize,
    decoded: &DataType,
) -> Result<ArrayRef> {
    let array: ArrayRef = match (values, decoded) {
        (PhysicalValues::Boolean(v), DataType::Boolean) => {
            let full = spread(v, validity, num_rows)?;
            Arc::new(BooleanArray::new(
                BooleanBuffer::from_iter(full),
                validity.cloned(),
            ))
        }
        (PhysicalValues::Int32(v), DataType::Int32) => {
            Arc::new(typed::<Int32Type, _>(v, validity, num_rows, Some)?)
        }
        (PhysicalValues::Int32(v), DataType::Int8) => {
            Arc::new(typed::<Int8Type, _>(v, validity, num_rows, |x| i8::try_from(x).ok())?)
        }
        (PhysicalValues::Int32(v), DataType::Int16) => {
            Arc::new(typed::<Int16Type, _>(v, validity, num_rows, |x| i16::try_from(x).ok())?)
        }
        (PhysicalValues::Int32(v), DataType::UInt8) => Arc::new(typed::<UInt8Type, _>(
            v,
            validity,
            num_rows,
            |x| u8::try_from(x as u32).ok(),
        )?),
        (PhysicalValues::Int32(v), DataType::UInt16) => Arc::new(typed::<UInt16Type, _>(
            v,
            validity,
            num_rows,
            |x| u16::try_from(x as u32).ok(),
        )?),
        (PhysicalValues::Int32(v), DataType::UInt32) => {
            Arc::new(typed::<UInt32Type, _>(v, validity, num_rows, |x| Some(x as u32))?)
        }
        (PhysicalValues::Int32(v), DataType::Date32) => {
            Arc::new(typed::<Date32Type, _>(v, validity, num_rows, Some)?)
        }
        (PhysicalValues::Int64(v), DataType::Int64) => {
            Arc::new(typed::<Int64Type, _>(v, validity, num_rows, Some)?)
        }
        (PhysicalValues::Int64(v), DataType::UInt64) => {
            Arc::new(typed::<UInt64Type, _>(v, validity, num_rows, |x| Some(x as u64))?)
        }
        (PhysicalValues::Int64(v), DataType::Timestamp(unit, tz)) => match unit {
            TimeUnit::Second => timestamps::<TimestampSecondType>(v, validity, num_rows, tz)?,
            TimeUnit::Millisecond => {
                timestamps::<TimestampMillisecondType>(v, validity, num_rows, tz)?
            }
            TimeUnit::Microsecond => {
                timestamps::<TimestampMicrosecondType>(v, validity, num_rows, tz)?
            }
            TimeUnit::Nanosecond => {
                timestamps::<TimestampNanosecondType>(v, validity, num_rows, tz)?
            }
        },
        (PhysicalValues::Int96(v), DataType::Timestamp(TimeUnit::Nanosecond, tz)) => {
            let array = typed::<TimestampNanosecondType, _>(v, validity, num_rows, int96_to_nanos)?;
            Arc::new(array.with_timezone_opt(tz.clone()))
        }
        (PhysicalValues::Float(v), DataType::Float32) => {
            Arc::new(typed::<Float32Type, _>(v, validity, num_rows, Some)?)
        }
        (PhysicalValues::Double(v), DataType::Float64) => {
            Arc::new(typed::<Float64Type, _>(v, validity, num_rows, Some)?)
        }
        (_, other) => {
            return Err(Error::Internal(format!(
                "no primitive decoder for {other} from the stored values"
            )));
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};

    #[test]
    fn spreads_compact_values_over_nulls() {
        let validity = NullBuffer::from(vec![true, false, true, false]);
        assert_eq!(spread(&[7, 9], Some(&validity), 4).unwrap(), vec![7, 0, 9, 0]);
        assert!(spread(&[7], Some(&validity), 4).is_err());
        assert!(spread(&[1, 2, 3], None, 2).is_err());
    }

    #[test]
    fn unsigned_values_are_reinterpreted() {
        let values = PhysicalValues::Int32(vec![-1, 5]);
        let array = decode_primitive(&values, None, 2, &DataType::UInt32).unwrap();
        let array = array.as_primitive::<UInt32Type>();
        assert_eq!(array.value(0), u32::MAX);
        assert_eq!(array.value(1), 5);
    }

    #[test]
    fn small_ints_out_of_range_are_corrupt() {
        let values = PhysicalValues::Int32(vec![300]);
        let err = decode_primitive(&values, None, 1, &DataType::Int8).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }

    #[test]
    fn int96_decodes_to_nanoseconds() {
        let values = PhysicalValues::Int96(vec![[5, 0, 2_440_588]]);
        let validity = NullBuffer::from(vec![false, true]);
        let array = decode_primitive(
            &values,
            Some(&validity),
            2,
            &DataType::Timestamp(TimeUnit::Nanosecond, None),
        )
        .unwrap();
        let array = array.as_primitive::<TimestampNanosecondType>();
        assert!(array.is_null(0));
        assert_eq!(array.value(1), 5);
    }
}
