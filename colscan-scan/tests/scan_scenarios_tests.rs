mod common;

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Schema};
use arrow_buffer::BooleanBuffer;
use colscan_expr::{Expr, Literal, Operator};
use colscan_format::memory::{MemColumn, MemFileBuilder, MemFormat};
use colscan_format::{FileFormat, FileSchema, LogicalType, PhysicalType};
use colscan_scan::{
    AcidColumnNames, DeleteRowFilter, DeleteRowSet, RequestedColumn, ScanConfig, ScanRequest,
};
use colscan_test_utils::init_tracing_for_tests;
use std::sync::Arc;

use common::{
    drain, instrumented_driver, int64_values, scan, string_values, uncoalesced_config,
};

fn int64_schema(names: &[&str]) -> FileSchema {
    let mut b = FileSchema::builder();
    for name in names {
        let id = b.leaf(name, PhysicalType::Int64, LogicalType::None, true);
        b.root(id);
    }
    b.build().unwrap()
}

#[test]
fn statistics_outside_the_predicate_skip_the_row_group() {
    init_tracing_for_tests();
    let file = MemFileBuilder::new(int64_schema(&["x"]))
        .row_group(vec![MemColumn::int64((10..=20).map(Some))])
        .build()
        .unwrap();
    let (mut driver, reader) = instrumented_driver(file, uncoalesced_config());
    driver
        .init(
            ScanRequest::new(vec![RequestedColumn::new("x", DataType::Int64, true)])
                .with_conjuncts(vec![Expr::pred(
                    "x".to_string(),
                    Operator::GreaterThan(Literal::Integer(25)),
                )]),
        )
        .unwrap();
    let footer_reads = reader.snapshot().read_calls;

    let batches = drain(&mut driver, 0).unwrap();
    assert!(batches.is_empty());

    let stats = driver.statistics();
    assert_eq!(stats.filtered_row_groups, 1);
    assert_eq!(stats.filtered_group_rows, 11);
    assert_eq!(stats.read_row_groups, 0);
    assert_eq!(stats.emitted_rows, 0);
    assert_eq!(stats.page_index_reads, 0);
    assert_eq!(stats.dict_filtered_row_groups, 0);
    assert_eq!(stats.read_calls, 0);
    assert_eq!(reader.snapshot().read_calls, footer_reads);
}

#[test]
fn lazy_column_is_read_for_surviving_rows_only() {
    init_tracing_for_tests();
    let file = MemFileBuilder::new(int64_schema(&["a", "b", "c"]))
        .row_group(vec![
            MemColumn::int64((0..1000).map(Some)),
            MemColumn::int64((0..1000).map(|v| Some(v * 2))),
            MemColumn::int64((0..1000).map(|v| Some(v + 7))),
        ])
        .build()
        .unwrap();
    let (mut driver, _) = instrumented_driver(file, uncoalesced_config());
    driver
        .init(
            ScanRequest::new(vec![
                RequestedColumn::new("a", DataType::Int64, true),
                RequestedColumn::new("b", DataType::Int64, true),
                RequestedColumn::new("c", DataType::Int64, true),
            ])
            .with_conjuncts(vec![
                Expr::pred("a".to_string(), Operator::LessThan(Literal::Integer(500))),
                Expr::pred(
                    "b".to_string(),
                    Operator::GreaterThanOrEquals(Literal::Integer(0)),
                ),
            ]),
        )
        .unwrap();

    let next = driver.next_batch(1000).unwrap();
    assert!(!next.eof);
    assert_eq!(next.batch.num_rows(), 500);
    assert_eq!(
        int64_values(&next.batch, "c"),
        (0..500).map(|v| Some(v + 7)).collect::<Vec<_>>()
    );
    assert!(driver.next_batch(1000).unwrap().eof);

    let stats = driver.statistics();
    assert_eq!(stats.read_rows, 1000);
    assert_eq!(stats.predicate_filtered_rows, 500);
    assert_eq!(stats.lazy_read_filtered_rows, 500);
    assert_eq!(stats.emitted_rows, 500);
    assert_eq!(stats.emitted_batches, 1);
}

fn dictionary_file(values: &[&str]) -> colscan_format::memory::MemFile {
    let mut b = FileSchema::builder();
    let s = b.leaf("s", PhysicalType::ByteArray, LogicalType::String, true);
    let x = b.leaf("x", PhysicalType::Int64, LogicalType::None, true);
    b.root(s).root(x);
    let rows = values.len() as i64;
    MemFileBuilder::new(b.build().unwrap())
        .row_group(vec![
            MemColumn::dictionary_strings(values.iter().map(|v| Some(*v))),
            MemColumn::int64((0..rows).map(Some)),
        ])
        .build()
        .unwrap()
}

fn string_request(value: &str) -> ScanRequest {
    ScanRequest::new(vec![
        RequestedColumn::new("s", DataType::Utf8, true),
        RequestedColumn::new("x", DataType::Int64, true),
    ])
    .with_conjuncts(vec![Expr::pred(
        "s".to_string(),
        Operator::Equals(Literal::from(value)),
    )])
}

#[test]
fn dictionary_rewrite_answers_string_equality() {
    init_tracing_for_tests();
    let file = dictionary_file(&["a", "b", "c", "b", "a", "c", "b"]);
    let (batch, stats) = scan(file, uncoalesced_config(), string_request("b")).unwrap();
    assert_eq!(stats.rewritten_dict_predicates, 1);
    assert_eq!(stats.abandoned_dict_filters, 0);
    assert_eq!(int64_values(&batch, "x"), vec![Some(1), Some(3), Some(6)]);
    assert_eq!(
        string_values(&batch, "s"),
        vec![Some("b".to_string()); 3]
    );
}

#[test]
fn absent_dictionary_value_filters_the_chunk_without_decoding_rows() {
    init_tracing_for_tests();
    let file = dictionary_file(&["a", "c", "a", "c"]);
    let metadata = MemFormat.parse_metadata(&file).unwrap();
    let data_ranges: Vec<_> = metadata.row_groups[0]
        .columns
        .iter()
        .map(|c| c.data)
        .collect();

    let (mut driver, reader) = instrumented_driver(file, uncoalesced_config());
    driver.init(string_request("b")).unwrap();
    assert!(drain(&mut driver, 0).unwrap().is_empty());

    let stats = driver.statistics();
    assert_eq!(stats.filtered_row_groups, 0);
    assert_eq!(stats.dict_filtered_row_groups, 1);
    assert_eq!(stats.read_rows, 0);
    for range in data_ranges {
        assert!(!reader.touched(range), "data chunk {range:?} was read");
    }
    let dictionary_page = metadata.row_groups[0].columns[0]
        .dictionary_page
        .expect("dictionary page");
    assert!(reader.touched(dictionary_page));
}

#[test]
fn position_deletes_clear_exactly_their_rows() {
    let filter = DeleteRowFilter::new(DeleteRowSet::positions([9, 5]), AcidColumnNames::default());
    let batch = RecordBatch::new_empty(Arc::new(Schema::empty()));
    let (out, cleared) = filter
        .apply(BooleanBuffer::new_set(10), 0..10, &batch)
        .unwrap();
    assert_eq!(cleared, 2);
    let kept: Vec<usize> = out.set_indices().collect();
    assert_eq!(kept, vec![0, 1, 2, 3, 4, 6, 7, 8]);
}

#[test]
fn position_deletes_apply_to_absolute_rows_across_row_groups() {
    init_tracing_for_tests();
    let file = MemFileBuilder::new(int64_schema(&["x"]))
        .row_group(vec![MemColumn::int64((0..10).map(Some))])
        .row_group(vec![MemColumn::int64((10..20).map(Some))])
        .build()
        .unwrap();
    let (batch, stats) = scan(
        file,
        ScanConfig::default(),
        ScanRequest::new(vec![RequestedColumn::new("x", DataType::Int64, true)])
            .with_delete_rows(DeleteRowSet::positions([5, 9, 12])),
    )
    .unwrap();
    let expected: Vec<Option<i64>> = (0..20)
        .filter(|v| ![5, 9, 12].contains(v))
        .map(Some)
        .collect();
    assert_eq!(int64_values(&batch, "x"), expected);
    assert_eq!(stats.delete_filtered_rows, 3);
}

#[test]
fn page_index_narrows_reads_inside_a_kept_group() {
    init_tracing_for_tests();
    let file = MemFileBuilder::new(int64_schema(&["x", "y"]))
        .page_rows(100)
        .row_group(vec![
            MemColumn::int64((0..1000).map(Some)),
            MemColumn::int64((0..1000).map(|v| Some(-v))),
        ])
        .build()
        .unwrap();
    let (batch, stats) = scan(
        file,
        uncoalesced_config(),
        ScanRequest::new(vec![
            RequestedColumn::new("x", DataType::Int64, true),
            RequestedColumn::new("y", DataType::Int64, true),
        ])
        .with_conjuncts(vec![Expr::pred(
            "x".to_string(),
            Operator::Range {
                lower: std::ops::Bound::Included(Literal::Integer(250)),
                upper: std::ops::Bound::Excluded(Literal::Integer(260)),
            },
        )]),
    )
    .unwrap();
    assert_eq!(
        int64_values(&batch, "x"),
        (250..260).map(Some).collect::<Vec<_>>()
    );
    assert_eq!(
        int64_values(&batch, "y"),
        (250..260).map(|v| Some(-v)).collect::<Vec<_>>()
    );
    assert_eq!(stats.page_index_reads, 1);
    assert_eq!(stats.filtered_page_rows, 900);
    assert_eq!(stats.read_rows, 100);
}
