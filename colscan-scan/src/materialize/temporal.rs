//! Date and timestamp decoding.
//!
//! Civil-date lookups for 1900-01-01 through 2099-12-31 come from a table
//! built on first use; anything outside that range goes through `time`.

use std::sync::LazyLock;

use arrow::array::{Array, Date32Array, StringBuilder};
use time::Date;

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i64 = 2_440_588;
const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Days since the epoch of 1900-01-01.
const LUT_FIRST_DAY: i32 = -25_567;
/// Days since the epoch of 2100-01-01 (exclusive end).
const LUT_END_DAY: i32 = 47_482;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CivilDate {
    pub(crate) year: i32,
    pub(crate) month: u8,
    pub(crate) day: u8,
}

static DATE_LUT: LazyLock<Vec<CivilDate>> = LazyLock::new(|| {
    let mut out = Vec::with_capacity((LUT_END_DAY - LUT_FIRST_DAY) as usize);
    let mut current = CivilDate {
        year: 1900,
        month: 1,
        day: 1,
    };
    for _ in LUT_FIRST_DAY..LUT_END_DAY {
        out.push(current);
        current = next_day(current);
    }
    out
});

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn next_day(date: CivilDate) -> CivilDate {
    if date.day < days_in_month(date.year, date.month) {
        CivilDate {
            day: date.day + 1,
            ..date
        }
    } else if date.month < 12 {
        CivilDate {
            month: date.month + 1,
            day: 1,
            ..date
        }
    } else {
        CivilDate {
            year: date.year + 1,
            month: 1,
            day: 1,
        }
    }
}

/// Civil date of `days` since the Unix epoch.
pub(crate) fn civil_from_days(days: i32) -> Option<CivilDate> {
    if (LUT_FIRST_DAY..LUT_END_DAY).contains(&days) {
        return DATE_LUT.get((days - LUT_FIRST_DAY) as usize).copied();
    }
    let julian = i32::try_from(days as i64 + UNIX_EPOCH_JULIAN_DAY).ok()?;
    let date = Date::from_julian_day(julian).ok()?;
    Some(CivilDate {
        year: date.year(),
        month: u8::from(date.month()),
        day: date.day(),
    })
}

/// Render a `Date32` array as `YYYY-MM-DD` strings.
pub(crate) fn date32_to_strings(array: &Date32Array) -> StringBuilder {
    let mut builder = StringBuilder::with_capacity(array.len(), array.len() * 10);
    for idx in 0..array.len() {
        if array.is_null(idx) {
            builder.append_null();
            continue;
        }
        match civil_from_days(array.value(idx)) {
            Some(d) => builder.append_value(format!("{:04}-{:02}-{:02}", d.year, d.month, d.day)),
            None => builder.append_null(),
        }
    }
    builder
}

/// Nanoseconds since the epoch for a legacy 12-byte timestamp.
///
/// Words 0 and 1 hold nanoseconds of day (little-endian), word 2 the Julian day.
pub(crate) fn int96_to_nanos(words: [u32; 3]) -> Option<i64> {
    let nanos_of_day = ((words[1] as u64) << 32 | words[0] as u64) as i64;
    let days = words[2] as i64 - UNIX_EPOCH_JULIAN_DAY;
    days.checked_mul(NANOS_PER_DAY)?.checked_add(nanos_of_day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_table_matches_slow_path() {
        for days in [LUT_FIRST_DAY, -1, 0, 11_016, 19_782, LUT_END_DAY - 1] {
            let fast = civil_from_days(days).unwrap();
            let julian = (days as i64 + UNIX_EPOCH_JULIAN_DAY) as i32;
            let slow = Date::from_julian_day(julian).unwrap();
            assert_eq!(fast.year, slow.year());
            assert_eq!(fast.month, u8::from(slow.month()));
            assert_eq!(fast.day, slow.day());
        }
    }

    #[test]
    fn outside_table_uses_slow_path() {
        let d = civil_from_days(-719_162).unwrap();
        assert_eq!((d.year, d.month, d.day), (1, 1, 1));
        let d = civil_from_days(LUT_END_DAY).unwrap();
        assert_eq!((d.year, d.month, d.day), (2100, 1, 1));
    }

    #[test]
    fn formats_dates() {
        let array = Date32Array::from(vec![Some(0), None, Some(19_782)]);
        let strings = date32_to_strings(&array).finish();
        assert_eq!(strings.value(0), "1970-01-01");
        assert!(strings.is_null(1));
        assert_eq!(strings.value(2), "2024-02-29");
    }

    #[test]
    fn int96_epoch() {
        assert_eq!(int96_to_nanos([0, 0, 2_440_588]), Some(0));
        assert_eq!(int96_to_nanos([1_000, 0, 2_440_589]), Some(NANOS_PER_DAY + 1_000));
    }
}
