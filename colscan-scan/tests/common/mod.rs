#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Int64Type};
use colscan_format::memory::{InstrumentedReader, MemFile, MemFormat};
use colscan_format::ByteRangeReader;
use colscan_result::Result;
use colscan_scan::{ScanConfig, ScanDriver, ScanRequest, ScanStatistics};

/// Config with small-group coalescing off, so reads map one to one onto
/// the chunks the scan touches.
pub fn uncoalesced_config() -> ScanConfig {
    ScanConfig {
        tiny_row_group_bytes: 0,
        ..ScanConfig::default()
    }
}

pub fn driver(file: MemFile, config: ScanConfig) -> ScanDriver {
    ScanDriver::new(Arc::new(file), Arc::new(MemFormat), config)
}

pub fn instrumented_driver(
    file: MemFile,
    config: ScanConfig,
) -> (ScanDriver, Arc<InstrumentedReader<MemFile>>) {
    let reader = Arc::new(InstrumentedReader::new(file));
    let shared: Arc<dyn ByteRangeReader> = Arc::clone(&reader) as Arc<dyn ByteRangeReader>;
    (ScanDriver::new(shared, Arc::new(MemFormat), config), reader)
}

/// Drain `driver` with `capacity`-row calls and return every batch.
pub fn drain(driver: &mut ScanDriver, capacity: usize) -> Result<Vec<RecordBatch>> {
    let mut out = Vec::new();
    loop {
        let next = driver.next_batch(capacity)?;
        if next.eof {
            return Ok(out);
        }
        out.push(next.batch);
    }
}

/// Run `request` to completion, returning one concatenated batch.
pub fn scan(
    file: MemFile,
    config: ScanConfig,
    request: ScanRequest,
) -> Result<(RecordBatch, ScanStatistics)> {
    let mut driver = driver(file, config);
    driver.init(request)?;
    let schema = driver.output_schema();
    let batches = drain(&mut driver, 0)?;
    let batch = concat_batches(&schema, &batches)?;
    Ok((batch, driver.statistics()))
}

pub fn int64_values(batch: &RecordBatch, column: &str) -> Vec<Option<i64>> {
    let array = batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {column}"));
    assert_eq!(array.data_type(), &DataType::Int64);
    array.as_primitive::<Int64Type>().iter().collect()
}

pub fn string_values(batch: &RecordBatch, column: &str) -> Vec<Option<String>> {
    let array = batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {column}"));
    array
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect()
}
