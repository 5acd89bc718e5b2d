use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryBuilder, FixedSizeBinaryBuilder, StringBuilder};
use arrow::buffer::NullBuffer;
use arrow::datatypes::DataType;
use arrow_buffer::BooleanBuffer;
use colscan_format::PhysicalValues;
use colscan_result::{Error, Result};

/// Sink for one flavor of byte values.
trait ByteSink {
    fn push(&mut self, value: &[u8]) -> Result<()>;
    fn push_null(&mut self);
    fn finish(self: Box<Self>) -> ArrayRef;
}

struct Utf8Sink(StringBuilder);

impl ByteSink for Utf8Sink {
    fn push(&mut self, value: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(value)
            .map_err(|e| Error::corrupt(format!("invalid UTF-8 in string column: {e}")))?;
        self.0.append_value(text);
        Ok(())
    }

    fn push_null(&mut self) {
        self.0.append_null();
    }

    fn finish(mut self: Box<Self>) -> ArrayRef {
        Arc::new(self.0.finish())
    }
}

struct BinarySink(BinaryBuilder);

impl ByteSink for BinarySink {
    fn push(&mut self, value: &[u8]) -> Result<()> {
        self.0.append_value(value);
        Ok(())
    }

    fn push_null(&mut self) {
        self.0.append_null();
    }

    fn finish(mut self: Box<Self>) -> ArrayRef {
        Arc::new(self.0.finish())
    }
}

struct FixedSink(FixedSizeBinaryBuilder);

impl ByteSink for FixedSink {
    fn push(&mut self, value: &[u8]) -> Result<()> {
        self.0.append_value(value)?;
        Ok(())
    }

    fn push_null(&mut self) {
        self.0.append_null();
    }

    fn finish(mut self: Box<Self>) -> ArrayRef {
        Arc::new(self.0.finish())
    }
}

/// Decode byte-array values into `Utf8`, `Binary` or `FixedSizeBinary`.
///
/// With a selection only the selected rows are materialized, so strings
/// of filtered rows are never copied or validated.
pub(crate) fn decode_bytes(
    values: &PhysicalValues,
    validity: Option<&NullBuffer>,
    num_rows: usize,
    decoded: &DataType,
    selection: Option<&BooleanBuffer>,
) -> Result<ArrayRef> {
    if !matches!(
        values,
        PhysicalValues::ByteArray { .. } | PhysicalValues::FixedLenByteArray { .. }
    ) {
        return Err(Error::Internal(format!("no byte decoder for {decoded} from numeric values")));
    }
    if validity.is_some_and(|v| v.len() != num_rows)
        || selection.is_some_and(|s| s.len() != num_rows)
    {
        return Err(Error::Internal("byte column window length mismatch".to_string()));
    }
    let out_rows = selection.map_or(num_rows, BooleanBuffer::count_set_bits);
    let mut sink: Box<dyn ByteSink> = match decoded {
        DataType::Utf8 => Box::new(Utf8Sink(StringBuilder::with_capacity(out_rows, 0))),
        DataType::Binary => Box::new(BinarySink(BinaryBuilder::with_capacity(out_rows, 0))),
        DataType::FixedSizeBinary(width) => Box::new(FixedSink(
            FixedSizeBinaryBuilder::with_capacity(out_rows, *width),
        )),
        other => {
            return Err(Error::Internal(format!("no byte decoder for {other}")));
        }
    };

    let mut next = 0usize;
    for row in 0..num_rows {
        let selected = selection.is_none_or(|s| s.value(row));
        if validity.is_some_and(|v| v.is_null(row)) {
            if selected {
                sink.push_null();
            }
            continue;
        }
        let value = values.bytes(next).ok_or_else(|| {
            Error::corrupt(format!("byte column has fewer values than its {num_rows} rows"))
        })?;
        next += 1;
        if selected {
            sink.push(value)?;
        }
    }
    if next != values.len() {
        return Err(Error::corrupt(format!(
            "byte column has {} values for {next} non-null rows",
            values.len()
        )));
    }
    Ok(sink.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};

    #[test]
    fn selection_skips_unselected_rows() {
        let values = PhysicalValues::from_byte_slices([&b"a"[..], b"bb", b"ccc"]);
        let validity = NullBuffer::from(vec![true, false, true, true]);
        let selection = BooleanBuffer::from_iter([false, true, true, false]);
        let array =
            decode_bytes(&values, Some(&validity), 4, &DataType::Utf8, Some(&selection)).unwrap();
        let strings = array.as_string::<i32>();
        assert_eq!(strings.len(), 2);
        assert!(strings.is_null(0));
        assert_eq!(strings.value(1), "bb");
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let values = PhysicalValues::from_byte_slices([&[0xFF, 0xFE][..]]);
        let err = decode_bytes(&values, None, 1, &DataType::Utf8, None).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
        let binary = decode_bytes(&values, None, 1, &DataType::Binary, None).unwrap();
        assert_eq!(binary.as_binary::<i32>().value(0), &[0xFF, 0xFE]);
    }

    #[test]
    fn value_count_must_match_validity() {
        let values = PhysicalValues::from_byte_slices([&b"a"[..], b"b"]);
        assert!(decode_bytes(&values, None, 1, &DataType::Binary, None).is_err());
        assert!(decode_bytes(&values, None, 3, &DataType::Binary, None).is_err());
    }
}
