//! Decimal helpers shared by value-range derivation and chunk decoding.
//!
//! Values follow Arrow's `Decimal128` semantics: an `i128` unscaled integer
//! plus a scale. Rescaling between scales is expressed as a [`RescaleStep`]
//! so decoders can compute the factor once per column chunk and apply it to
//! every value without re-deriving it.

use std::cmp::Ordering;
use std::fmt;

use arrow::datatypes::DECIMAL128_MAX_PRECISION;
use arrow_buffer::i256;

/// Maximum precision supported by `DecimalValue` (aligns with Arrow's Decimal128).
pub const MAX_DECIMAL_PRECISION: u8 = DECIMAL128_MAX_PRECISION;
const POW10_BASE: i256 = i256::from_i128(10);

/// Errors that can occur while manipulating decimal values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    /// Requested scale falls outside the supported range.
    ScaleOutOfRange { scale: i8 },
    /// Result exceeded the requested precision.
    PrecisionOverflow { value: i128, precision: u8 },
    /// Arithmetic overflowed the Decimal128 range.
    Overflow,
    /// Big-endian input wider than 16 bytes that is not a sign extension.
    TooWide { width: usize },
}

impl fmt::Display for DecimalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecimalError::ScaleOutOfRange { scale } => {
                write!(f, "decimal scale {scale} outside supported range")
            }
            DecimalError::PrecisionOverflow { value, precision } => {
                write!(f, "decimal value {value} does not fit precision {precision}")
            }
            DecimalError::Overflow => write!(f, "decimal arithmetic overflow"),
            DecimalError::TooWide { width } => {
                write!(f, "{width}-byte decimal does not fit in 128 bits")
            }
        }
    }
}

impl std::error::Error for DecimalError {}

/// A Decimal128 value with its scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DecimalValue {
    value: i128,
    scale: i8,
}

impl DecimalValue {
    /// Create a decimal from its raw parts.
    pub fn new(value: i128, scale: i8) -> Result<Self, DecimalError> {
        if !scale_within_bounds(scale as i16) {
            return Err(DecimalError::ScaleOutOfRange { scale });
        }
        Ok(Self { value, scale })
    }

    /// Return the scaled integer backing this decimal.
    #[inline]
    pub fn raw_value(self) -> i128 {
        self.value
    }

    /// Return the scale (number of fractional digits).
    #[inline]
    pub fn scale(self) -> i8 {
        self.scale
    }

    /// Convert the decimal into an `f64` (lossy for high precision inputs).
    pub fn to_f64(self) -> f64 {
        (self.value as f64) / 10_f64.powi(self.scale as i32)
    }

    /// Rescale to `scale`, rounding half away from zero when digits are dropped.
    pub fn rescale(self, scale: i8) -> Result<Self, DecimalError> {
        let step = RescaleStep::new(self.scale, scale)?;
        let value = step.apply(self.value).ok_or(DecimalError::Overflow)?;
        Self::new(value, scale)
    }

    /// Unscaled values at `scale` just below and just above this decimal.
    ///
    /// Both are equal when the value is exactly representable at `scale`.
    pub fn bracket(self, scale: i8) -> Result<(i128, i128), DecimalError> {
        match RescaleStep::new(self.scale, scale)? {
            RescaleStep::Identity => Ok((self.value, self.value)),
            RescaleStep::Multiply(factor) => {
                let value = self.value.checked_mul(factor).ok_or(DecimalError::Overflow)?;
                Ok((value, value))
            }
            RescaleStep::Divide(factor) => {
                let floor = self.value.div_euclid(factor);
                let ceil = if self.value.rem_euclid(factor) == 0 { floor } else { floor + 1 };
                Ok((floor, ceil))
            }
        }
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale <= 0 {
            return write!(f, "{}", self.value);
        }
        let negative = self.value < 0;
        let digits = self.value.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let sign = if negative { "-" } else { "" };
        if digits.len() <= scale {
            write!(f, "{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
        } else {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int_part}.{frac_part}")
        }
    }
}

impl PartialOrd for DecimalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecimalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.scale == other.scale {
            return self.value.cmp(&other.value);
        }
        let target = self.scale.max(other.scale);
        let l = i256::from_i128(self.value)
            .wrapping_mul(POW10_BASE.wrapping_pow((target - self.scale) as u32));
        let r = i256::from_i128(other.value)
            .wrapping_mul(POW10_BASE.wrapping_pow((target - other.scale) as u32));
        l.cmp(&r)
    }
}

/// Scale adjustment computed once per column chunk.
///
/// `Divide` rounds half away from zero, so reading a value written at scale
/// `S` with requested scale `S' < S` yields `round(v, S')`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RescaleStep {
    Identity,
    Multiply(i128),
    Divide(i128),
}

impl RescaleStep {
    pub fn new(from_scale: i8, to_scale: i8) -> Result<Self, DecimalError> {
        let diff = to_scale as i16 - from_scale as i16;
        if diff == 0 {
            return Ok(RescaleStep::Identity);
        }
        let factor = pow10(diff.unsigned_abs() as u32).ok_or(DecimalError::ScaleOutOfRange {
            scale: to_scale,
        })?;
        Ok(if diff > 0 {
            RescaleStep::Multiply(factor)
        } else {
            RescaleStep::Divide(factor)
        })
    }

    /// Apply the step to an unscaled value. `None` on overflow.
    #[inline]
    pub fn apply(self, value: i128) -> Option<i128> {
        match self {
            RescaleStep::Identity => Some(value),
            RescaleStep::Multiply(factor) => value.checked_mul(factor),
            RescaleStep::Divide(factor) => {
                let quotient = value / factor;
                let remainder = value % factor;
                // |remainder| * 2 >= factor rounds away from zero
                if remainder.unsigned_abs() * 2 >= factor.unsigned_abs() {
                    Some(quotient + value.signum())
                } else {
                    Some(quotient)
                }
            }
        }
    }
}

/// `10^exp` as `i128`, `None` when it overflows.
pub fn pow10(exp: u32) -> Option<i128> {
    10_i128.checked_pow(exp)
}

/// Whether `value` has at most `precision` decimal digits.
pub fn fits_precision(value: i128, precision: u8) -> bool {
    match pow10(precision as u32) {
        Some(limit) => value.unsigned_abs() < limit.unsigned_abs(),
        None => true,
    }
}

/// Decode a big-endian two's complement integer of up to 16 bytes.
///
/// Wider inputs are accepted when the extra leading bytes are pure sign
/// extension.
pub fn i128_from_be_bytes(bytes: &[u8]) -> Result<i128, DecimalError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let negative = bytes[0] & 0x80 != 0;
    let (prefix, tail) = if bytes.len() > 16 {
        bytes.split_at(bytes.len() - 16)
    } else {
        (&[][..], bytes)
    };
    let fill = if negative { 0xFF } else { 0x00 };
    if prefix.iter().any(|b| *b != fill) {
        return Err(DecimalError::TooWide { width: bytes.len() });
    }
    let mut buf = [fill; 16];
    buf[16 - tail.len()..].copy_from_slice(tail);
    Ok(i128::from_be_bytes(buf))
}

fn scale_within_bounds(scale: i16) -> bool {
    let max = MAX_DECIMAL_PRECISION as i16;
    (-max..=max).contains(&scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let step = RescaleStep::new(3, 1).unwrap();
        assert_eq!(step, RescaleStep::Divide(100));
        assert_eq!(step.apply(12_345), Some(123));
        assert_eq!(step.apply(12_350), Some(124));
        assert_eq!(step.apply(-12_350), Some(-124));
        assert_eq!(step.apply(-12_349), Some(-123));
    }

    #[test]
    fn rescale_up_multiplies() {
        let step = RescaleStep::new(2, 4).unwrap();
        assert_eq!(step.apply(-150), Some(-15_000));
        assert_eq!(RescaleStep::new(4, 4).unwrap(), RescaleStep::Identity);
        assert_eq!(RescaleStep::Multiply(10).apply(i128::MAX), None);
    }

    #[test]
    fn bracket_floors_and_ceils() {
        let d = DecimalValue::new(25, 1).unwrap();
        assert_eq!(d.bracket(0).unwrap(), (2, 3));
        assert_eq!(DecimalValue::new(-25, 1).unwrap().bracket(0).unwrap(), (-3, -2));
        assert_eq!(DecimalValue::new(30, 1).unwrap().bracket(0).unwrap(), (3, 3));
        assert_eq!(d.bracket(3).unwrap(), (2_500, 2_500));
        assert_eq!(
            DecimalValue::new(i128::MAX, 0).unwrap().bracket(1),
            Err(DecimalError::Overflow)
        );
    }

    #[test]
    fn compare_across_scales() {
        let a = DecimalValue::new(150, 2).unwrap();
        let b = DecimalValue::new(15, 1).unwrap();
        let c = DecimalValue::new(151, 2).unwrap();
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(c > b);
    }

    #[test]
    fn display_pads_fraction() {
        assert_eq!(DecimalValue::new(-5, 3).unwrap().to_string(), "-0.005");
        assert_eq!(DecimalValue::new(12345, 2).unwrap().to_string(), "123.45");
    }

    #[test]
    fn big_endian_decoding_sign_extends() {
        assert_eq!(i128_from_be_bytes(&[0xFF, 0x38]).unwrap(), -200);
        assert_eq!(i128_from_be_bytes(&[0x01, 0x00]).unwrap(), 256);
        let mut wide = vec![0xFF; 18];
        wide[17] = 0xFE;
        assert_eq!(i128_from_be_bytes(&wide).unwrap(), -2);
        let mut bad = vec![0x00; 18];
        bad[0] = 0x01;
        assert!(i128_from_be_bytes(&bad).is_err());
    }

    #[test]
    fn precision_limits() {
        assert!(fits_precision(99_999, 5));
        assert!(!fits_precision(100_000, 5));
        assert!(fits_precision(-99_999, 5));
    }
}
