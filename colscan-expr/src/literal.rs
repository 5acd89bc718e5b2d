//! Untyped literal values carried by conjuncts and statistics.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
    Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, LargeBinaryArray,
    LargeStringArray, StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array, new_null_array,
};
use arrow::datatypes::{DataType, TimeUnit};
use colscan_result::{Error, Result};

use crate::decimal::{DecimalError, DecimalValue, fits_precision};

pub const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A literal value that has not been coerced into a column's native type.
///
/// Timestamps are carried as microseconds since the Unix epoch and dates as
/// days since the epoch, independent of the unit of the column they are
/// compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i128),
    Float(f64),
    Decimal(DecimalValue),
    String(String),
    Binary(Vec<u8>),
    Date32(i32),
    Timestamp(i64),
}

macro_rules! impl_from_for_literal {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for Literal {
                fn from(v: $t) -> Self {
                    Literal::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_literal!(Integer, i8, i16, i32, i64, i128, u8, u16, u32, u64);
impl_from_for_literal!(Float, f32, f64);
impl_from_for_literal!(Boolean, bool);

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}

impl From<DecimalValue> for Literal {
    fn from(v: DecimalValue) -> Self {
        Literal::Decimal(v)
    }
}

/// Bracket a numeric literal for an integer column of native type `$native`.
macro_rules! integral {
    ($literal:expr, $data_type:expr, $native:ty, $array:ty) => {{
        let (floor, ceil) = $literal.int_bracket($data_type)?;
        bracketed(floor, ceil, |v| <$native>::try_from(v).is_ok(), |v| {
            let v = <$native>::try_from(v)
                .map_err(|_| Error::Internal(format!("{v} does not fit {}", $data_type)))?;
            Ok(Arc::new(<$array>::from(vec![v])) as ArrayRef)
        })
    }};
}

impl Literal {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Boolean(_) => "boolean",
            Literal::Integer(_) => "integer",
            Literal::Float(_) => "float",
            Literal::Decimal(_) => "decimal",
            Literal::String(_) => "string",
            Literal::Binary(_) => "binary",
            Literal::Date32(_) => "date",
            Literal::Timestamp(_) => "timestamp",
        }
    }

    /// Compare two literals in a shared domain.
    ///
    /// Returns `None` when the literals are not comparable (different
    /// families, nulls, NaN).
    pub fn compare(&self, other: &Literal) -> Option<Ordering> {
        use Literal::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Decimal(a), Integer(b)) => DecimalValue::new(*b, 0).ok().map(|b| a.cmp(&b)),
            (Integer(a), Decimal(b)) => DecimalValue::new(*a, 0).ok().map(|a| a.cmp(b)),
            (Decimal(a), Float(b)) => a.to_f64().partial_cmp(b),
            (Float(a), Decimal(b)) => a.partial_cmp(&b.to_f64()),
            (String(a), String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            (String(a), Binary(b)) => Some(a.as_bytes().cmp(b.as_slice())),
            (Binary(a), String(b)) => Some(a.as_slice().cmp(b.as_bytes())),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Date32(a), Date32(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Date32(a), Timestamp(b)) => Some((*a as i64 * MICROS_PER_DAY).cmp(b)),
            (Timestamp(a), Date32(b)) => Some(a.cmp(&(*b as i64 * MICROS_PER_DAY))),
            _ => None,
        }
    }

    /// Build a single-element array of `data_type` holding this literal.
    ///
    /// Fails unless the value is exactly representable in `data_type`.
    pub fn to_array(&self, data_type: &DataType) -> Result<ArrayRef> {
        match self.to_native(data_type)? {
            NativeLiteral::Exact(array) => Ok(array),
            NativeLiteral::Between { .. } => {
                Err(self.cast_error(data_type, "value is not exactly representable"))
            }
            NativeLiteral::Below | NativeLiteral::Above => {
                Err(self.cast_error(data_type, "value out of range"))
            }
        }
    }

    /// Place this literal in the native domain of `data_type`.
    ///
    /// Integer, decimal, date and timestamp columns bracket values that
    /// fall between two native values instead of rounding them, so
    /// comparisons can pick the bound that keeps their meaning.
    pub fn to_native(&self, data_type: &DataType) -> Result<NativeLiteral> {
        if self.is_null() {
            return Ok(NativeLiteral::Exact(new_null_array(data_type, 1)));
        }
        let exact = |array: ArrayRef| -> Result<NativeLiteral> { Ok(NativeLiteral::Exact(array)) };
        match data_type {
            DataType::Boolean => {
                exact(Arc::new(BooleanArray::from(vec![self.as_bool(data_type)?])))
            }
            DataType::Int8 => integral!(self, data_type, i8, Int8Array),
            DataType::Int16 => integral!(self, data_type, i16, Int16Array),
            DataType::Int32 => integral!(self, data_type, i32, Int32Array),
            DataType::Int64 => integral!(self, data_type, i64, Int64Array),
            DataType::UInt8 => integral!(self, data_type, u8, UInt8Array),
            DataType::UInt16 => integral!(self, data_type, u16, UInt16Array),
            DataType::UInt32 => integral!(self, data_type, u32, UInt32Array),
            DataType::UInt64 => integral!(self, data_type, u64, UInt64Array),
            DataType::Float32 => {
                exact(Arc::new(Float32Array::from(vec![self.as_f64(data_type)? as f32])))
            }
            DataType::Float64 => {
                exact(Arc::new(Float64Array::from(vec![self.as_f64(data_type)?])))
            }
            DataType::Utf8 => exact(Arc::new(StringArray::from(vec![self.as_str(data_type)?]))),
            DataType::LargeUtf8 => {
                exact(Arc::new(LargeStringArray::from(vec![self.as_str(data_type)?])))
            }
            DataType::Binary => {
                exact(Arc::new(BinaryArray::from(vec![self.as_bytes(data_type)?])))
            }
            DataType::LargeBinary => {
                exact(Arc::new(LargeBinaryArray::from(vec![self.as_bytes(data_type)?])))
            }
            DataType::Date32 => {
                let (floor, ceil) = self.day_bracket(data_type)?;
                bracketed(floor, ceil, |v| i32::try_from(v).is_ok(), |v| {
                    Ok(Arc::new(Date32Array::from(vec![v as i32])) as ArrayRef)
                })
            }
            DataType::Timestamp(unit, tz) => {
                let micros = i128::from(self.as_micros(data_type)?);
                let (floor, ceil) = match unit {
                    TimeUnit::Second => floor_ceil(micros, 1_000_000),
                    TimeUnit::Millisecond => floor_ceil(micros, 1_000),
                    TimeUnit::Microsecond => (micros, micros),
                    TimeUnit::Nanosecond => (micros * 1_000, micros * 1_000),
                };
                bracketed(floor, ceil, |v| i64::try_from(v).is_ok(), |v| {
                    Ok(timestamp_scalar(v as i64, *unit, tz.clone()))
                })
            }
            DataType::Decimal128(precision, scale) => {
                let decimal = self.as_decimal(data_type)?;
                let (floor, ceil) = match decimal.bracket(*scale) {
                    Ok(bounds) => bounds,
                    Err(DecimalError::Overflow) => {
                        return Ok(NativeLiteral::outside(decimal.raw_value()));
                    }
                    Err(e) => return Err(self.cast_error(data_type, &e.to_string())),
                };
                bracketed(floor, ceil, |v| fits_precision(v, *precision), |v| {
                    let array = Decimal128Array::from(vec![v])
                        .with_precision_and_scale(*precision, *scale)?;
                    Ok(Arc::new(array) as ArrayRef)
                })
            }
            other => Err(Error::InvalidArgumentError(format!(
                "cannot compare {} literal with column of type {other}",
                self.type_name()
            ))),
        }
    }

    fn cast_error(&self, data_type: &DataType, detail: &str) -> Error {
        Error::InvalidArgumentError(format!(
            "cannot coerce {} literal to {data_type}: {detail}",
            self.type_name()
        ))
    }

    fn as_bool(&self, data_type: &DataType) -> Result<bool> {
        match self {
            Literal::Boolean(b) => Ok(*b),
            Literal::Integer(i) => Ok(*i != 0),
            _ => Err(self.cast_error(data_type, "expected boolean")),
        }
    }

    /// Integers at or below and at or above this number.
    fn int_bracket(&self, data_type: &DataType) -> Result<(i128, i128)> {
        match self {
            Literal::Integer(i) => Ok((*i, *i)),
            Literal::Float(f) if f.is_nan() => Err(self.cast_error(data_type, "NaN")),
            // saturating casts push infinities out of every native range
            Literal::Float(f) => Ok((f.floor() as i128, f.ceil() as i128)),
            Literal::Decimal(d) => match d.bracket(0) {
                Ok(bounds) => Ok(bounds),
                Err(DecimalError::Overflow) => {
                    let edge = if d.raw_value() < 0 { i128::MIN } else { i128::MAX };
                    Ok((edge, edge))
                }
                Err(e) => Err(self.cast_error(data_type, &e.to_string())),
            },
            _ => Err(self.cast_error(data_type, "expected integer")),
        }
    }

    fn as_f64(&self, data_type: &DataType) -> Result<f64> {
        match self {
            Literal::Integer(i) => Ok(*i as f64),
            Literal::Float(f) => Ok(*f),
            Literal::Decimal(d) => Ok(d.to_f64()),
            _ => Err(self.cast_error(data_type, "expected number")),
        }
    }

    fn as_str(&self, data_type: &DataType) -> Result<&str> {
        match self {
            Literal::String(s) => Ok(s.as_str()),
            _ => Err(self.cast_error(data_type, "expected string")),
        }
    }

    fn as_bytes(&self, data_type: &DataType) -> Result<&[u8]> {
        match self {
            Literal::String(s) => Ok(s.as_bytes()),
            Literal::Binary(b) => Ok(b.as_slice()),
            _ => Err(self.cast_error(data_type, "expected bytes")),
        }
    }

    fn day_bracket(&self, data_type: &DataType) -> Result<(i128, i128)> {
        match self {
            Literal::Date32(d) => Ok((i128::from(*d), i128::from(*d))),
            Literal::Timestamp(t) => Ok(floor_ceil(i128::from(*t), i128::from(MICROS_PER_DAY))),
            _ => Err(self.cast_error(data_type, "expected date")),
        }
    }

    fn as_micros(&self, data_type: &DataType) -> Result<i64> {
        match self {
            Literal::Timestamp(t) => Ok(*t),
            Literal::Date32(d) => Ok(*d as i64 * MICROS_PER_DAY),
            _ => Err(self.cast_error(data_type, "expected timestamp")),
        }
    }

    fn as_decimal(&self, data_type: &DataType) -> Result<DecimalValue> {
        match self {
            Literal::Decimal(d) => Ok(*d),
            Literal::Integer(i) => DecimalValue::new(*i, 0)
                .map_err(|e| self.cast_error(data_type, &e.to_string())),
            _ => Err(self.cast_error(data_type, "expected decimal")),
        }
    }
}

/// A literal placed in a column's native domain.
#[derive(Debug, Clone)]
pub enum NativeLiteral {
    /// Single-element array holding the exact value.
    Exact(ArrayRef),
    /// The value lies strictly between two adjacent native values.
    Between { floor: ArrayRef, ceil: ArrayRef },
    /// Smaller than every value of the native type.
    Below,
    /// Larger than every value of the native type.
    Above,
}

impl NativeLiteral {
    fn outside(sign_of: i128) -> Self {
        if sign_of < 0 {
            NativeLiteral::Below
        } else {
            NativeLiteral::Above
        }
    }
}

fn timestamp_scalar(value: i64, unit: TimeUnit, tz: Option<Arc<str>>) -> ArrayRef {
    match unit {
        TimeUnit::Second => Arc::new(TimestampSecondArray::from(vec![value]).with_timezone_opt(tz)),
        TimeUnit::Millisecond => {
            Arc::new(TimestampMillisecondArray::from(vec![value]).with_timezone_opt(tz))
        }
        TimeUnit::Microsecond => {
            Arc::new(TimestampMicrosecondArray::from(vec![value]).with_timezone_opt(tz))
        }
        TimeUnit::Nanosecond => {
            Arc::new(TimestampNanosecondArray::from(vec![value]).with_timezone_opt(tz))
        }
    }
}

/// `value / divisor` rounded down and up.
fn floor_ceil(value: i128, divisor: i128) -> (i128, i128) {
    let floor = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        (floor, floor)
    } else {
        (floor, floor + 1)
    }
}

/// Classify a bracket against the range accepted by `fits`; `build` is only
/// called with values that fit.
fn bracketed(
    floor: i128,
    ceil: i128,
    fits: impl Fn(i128) -> bool,
    build: impl Fn(i128) -> Result<ArrayRef>,
) -> Result<NativeLiteral> {
    if !fits(floor) {
        return Ok(NativeLiteral::outside(floor));
    }
    if !fits(ceil) {
        return Ok(NativeLiteral::outside(ceil));
    }
    if floor == ceil {
        Ok(NativeLiteral::Exact(build(floor)?))
    } else {
        Ok(NativeLiteral::Between {
            floor: build(floor)?,
            ceil: build(ceil)?,
        })
    }
}
