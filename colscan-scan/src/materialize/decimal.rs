use std::sync::Arc;

use arrow::array::{ArrayRef, Decimal128Array};
use arrow::buffer::NullBuffer;
use colscan_expr::decimal::i128_from_be_bytes;
use colscan_format::PhysicalValues;
use colscan_result::{Error, Result};

use super::primitive::spread;

/// Decode unscaled decimal values at the file's precision and scale.
///
/// Rescaling to the requested scale happens afterwards in the column's
/// converter, with one step computed per column.
pub(crate) fn decode_decimal(
    values: &PhysicalValues,
    validity: Option<&NullBuffer>,
    num_rows: usize,
    precision: u8,
    scale: i8,
) -> Result<ArrayRef> {
    let unscaled: Vec<i128> = match values {
        PhysicalValues::Int32(v) => v.iter().map(|x| *x as i128).collect(),
        PhysicalValues::Int64(v) => v.iter().map(|x| *x as i128).collect(),
        PhysicalValues::ByteArray { .. } | PhysicalValues::FixedLenByteArray { .. } => (0..values
            .len())
            .map(|idx| {
                let bytes = values
                    .bytes(idx)
                    .ok_or_else(|| Error::corrupt("decimal value out of bounds"))?;
                i128_from_be_bytes(bytes).map_err(Error::corrupt)
            })
            .collect::<Result<_>>()?,
        _ => {
            return Err(Error::corrupt("decimal stored in an unsupported physical type"));
        }
    };
    let full = spread(&unscaled, validity, num_rows)?;
    let array = Decimal128Array::new(full.into(), validity.cloned())
        .with_precision_and_scale(precision, scale)?;
    Ok(Arc::new(array))
}
