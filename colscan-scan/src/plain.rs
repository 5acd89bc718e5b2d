//! Statistics values in plain encoding, decoded into [`Literal`]s.

use colscan_expr::{DecimalValue, Literal, decimal::i128_from_be_bytes};
use colscan_format::{ColumnStatistics, LogicalType, PhysicalType, SchemaNode, TimestampUnit};

/// Order in which a writer computed min/max for a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SortOrder {
    Signed,
    Unsigned,
    /// No defined order; min/max are meaningful only when equal.
    Undefined,
}

pub(crate) fn sort_order(node: &SchemaNode) -> SortOrder {
    match node.logical_type {
        LogicalType::String | LogicalType::Enum | LogicalType::Json => SortOrder::Unsigned,
        LogicalType::Integer { signed: false, .. } => SortOrder::Unsigned,
        LogicalType::Decimal { .. }
        | LogicalType::List
        | LogicalType::Map
        | LogicalType::Unknown => SortOrder::Undefined,
        _ => match node.physical_type {
            PhysicalType::Int96 => SortOrder::Undefined,
            PhysicalType::ByteArray | PhysicalType::FixedLenByteArray(_) => SortOrder::Unsigned,
            _ => SortOrder::Signed,
        },
    }
}

/// Which side of a range a value bounds. Unit conversions round outward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StatBound {
    Min,
    Max,
}

/// Decode one plain-encoded statistics value of `node`.
///
/// `None` when the value is malformed, NaN, or of a type without a usable
/// order (INT96).
pub(crate) fn decode_plain(bytes: &[u8], node: &SchemaNode, bound: StatBound) -> Option<Literal> {
    match node.physical_type {
        PhysicalType::Boolean => bytes.first().map(|b| Literal::Boolean(*b != 0)),
        PhysicalType::Int32 => {
            let v = i32::from_le_bytes(bytes.try_into().ok()?);
            Some(match node.logical_type {
                LogicalType::Date => Literal::Date32(v),
                LogicalType::Decimal { scale, .. } => {
                    Literal::Decimal(DecimalValue::new(v as i128, scale).ok()?)
                }
                LogicalType::Integer { signed: false, .. } => Literal::Integer(v as u32 as i128),
                _ => Literal::Integer(v as i128),
            })
        }
        PhysicalType::Int64 => {
            let v = i64::from_le_bytes(bytes.try_into().ok()?);
            Some(match node.logical_type {
                LogicalType::Timestamp { unit, .. } => {
                    Literal::Timestamp(to_micros(v, unit, bound)?)
                }
                LogicalType::Decimal { scale, .. } => {
                    Literal::Decimal(DecimalValue::new(v as i128, scale).ok()?)
                }
                LogicalType::Integer { signed: false, .. } => Literal::Integer(v as u64 as i128),
                _ => Literal::Integer(v as i128),
            })
        }
        PhysicalType::Int96 => None,
        PhysicalType::Float => {
            let v = f32::from_le_bytes(bytes.try_into().ok()?);
            (!v.is_nan()).then_some(Literal::Float(v as f64))
        }
        PhysicalType::Double => {
            let v = f64::from_le_bytes(bytes.try_into().ok()?);
            (!v.is_nan()).then_some(Literal::Float(v))
        }
        PhysicalType::ByteArray | PhysicalType::FixedLenByteArray(_) => match node.logical_type {
            LogicalType::Decimal { scale, .. } => {
                let unscaled = i128_from_be_bytes(bytes).ok()?;
                Some(Literal::Decimal(DecimalValue::new(unscaled, scale).ok()?))
            }
            _ if node.is_string() => match std::str::from_utf8(bytes) {
                Ok(s) => Some(Literal::String(s.to_string())),
                Err(_) => Some(Literal::Binary(bytes.to_vec())),
            },
            _ => Some(Literal::Binary(bytes.to_vec())),
        },
        PhysicalType::Group => None,
    }
}

fn to_micros(v: i64, unit: TimestampUnit, bound: StatBound) -> Option<i64> {
    match unit {
        TimestampUnit::Millis => v.checked_mul(1_000),
        TimestampUnit::Micros => Some(v),
        TimestampUnit::Nanos => Some(match bound {
            StatBound::Min => v.div_euclid(1_000),
            StatBound::Max => {
                let floor = v.div_euclid(1_000);
                if v.rem_euclid(1_000) == 0 { floor } else { floor + 1 }
            }
        }),
    }
}

/// Min/max of a chunk or page, if its sort order allows using them.
pub(crate) fn usable_min_max(
    node: &SchemaNode,
    min: &[u8],
    max: &[u8],
    legacy: bool,
    trust_binary: bool,
) -> Option<(Literal, Literal)> {
    if node.physical_type.is_binary() && !trust_binary {
        return None;
    }
    let order = sort_order(node);
    let degenerate = min == max;
    if order == SortOrder::Undefined && !degenerate {
        return None;
    }
    if legacy && order != SortOrder::Signed && !degenerate {
        return None;
    }
    Some((
        decode_plain(min, node, StatBound::Min)?,
        decode_plain(max, node, StatBound::Max)?,
    ))
}

/// Chunk-level min/max, honoring the legacy-field flag.
pub(crate) fn statistics_min_max(
    node: &SchemaNode,
    stats: &ColumnStatistics,
    trust_binary: bool,
) -> Option<(Literal, Literal)> {
    let (Some(min), Some(max)) = (&stats.min_value, &stats.max_value) else {
        return None;
    };
    usable_min_max(node, min, max, stats.legacy_min_max, trust_binary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(physical_type: PhysicalType, logical_type: LogicalType) -> SchemaNode {
        SchemaNode {
            name: "c".to_string(),
            physical_type,
            logical_type,
            nullable: true,
            children: Vec::new(),
        }
    }

    #[test]
    fn decodes_little_endian_numbers() {
        let int = node(PhysicalType::Int32, LogicalType::None);
        assert_eq!(
            decode_plain(&(-7i32).to_le_bytes(), &int, StatBound::Min),
            Some(Literal::Integer(-7))
        );
        let unsigned = node(
            PhysicalType::Int32,
            LogicalType::Integer {
                bit_width: 32,
                signed: false,
            },
        );
        assert_eq!(
            decode_plain(&(-1i32).to_le_bytes(), &unsigned, StatBound::Max),
            Some(Literal::Integer(u32::MAX as i128))
        );
        let double = node(PhysicalType::Double, LogicalType::None);
        assert_eq!(decode_plain(&f64::NAN.to_le_bytes(), &double, StatBound::Min), None);
        assert_eq!(decode_plain(&[1, 2], &int, StatBound::Min), None);
    }

    #[test]
    fn nanosecond_timestamps_round_outward() {
        let ts = node(
            PhysicalType::Int64,
            LogicalType::Timestamp { unit: TimestampUnit::Nanos, utc: false },
        );
        let bytes = 1_500i64.to_le_bytes();
        assert_eq!(decode_plain(&bytes, &ts, StatBound::Min), Some(Literal::Timestamp(1)));
        assert_eq!(decode_plain(&bytes, &ts, StatBound::Max), Some(Literal::Timestamp(2)));
        let neg = (-1_500i64).to_le_bytes();
        assert_eq!(decode_plain(&neg, &ts, StatBound::Min), Some(Literal::Timestamp(-2)));
    }

    #[test]
    fn fixed_width_decimals_are_big_endian() {
        let dec = node(
            PhysicalType::FixedLenByteArray(4),
            LogicalType::Decimal { precision: 9, scale: 2 },
        );
        let lit = decode_plain(&(-12_345i32).to_be_bytes(), &dec, StatBound::Min).unwrap();
        assert_eq!(lit, Literal::Decimal(DecimalValue::new(-12_345, 2).unwrap()));
    }

    #[test]
    fn sort_order_gates_min_max() {
        let dec = node(PhysicalType::Int32, LogicalType::Decimal { precision: 9, scale: 2 });
        let one = 1i32.to_le_bytes();
        let two = 2i32.to_le_bytes();
        assert!(usable_min_max(&dec, &one, &two, false, true).is_none());
        assert!(usable_min_max(&dec, &one, &one, false, true).is_some());

        let text = node(PhysicalType::ByteArray, LogicalType::String);
        assert!(usable_min_max(&text, b"a", b"z", false, true).is_some());
        assert!(usable_min_max(&text, b"a", b"z", true, true).is_none());
        assert!(usable_min_max(&text, b"a", b"z", false, false).is_none());

        let int = node(PhysicalType::Int64, LogicalType::None);
        let (lo, hi) = (5i64.to_le_bytes(), 9i64.to_le_bytes());
        assert!(usable_min_max(&int, &lo, &hi, true, false).is_some());
    }
}
