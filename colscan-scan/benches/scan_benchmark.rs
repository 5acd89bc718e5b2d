//! Scan throughput over a 1M-row in-memory file, with and without the
//! pruning and lazy-read optimizations.

#![forbid(unsafe_code)]

use std::hint::black_box;
use std::sync::Arc;

use arrow::datatypes::DataType;
use colscan_expr::{Expr, Literal, Operator};
use colscan_format::memory::{MemColumn, MemFile, MemFileBuilder, MemFormat};
use colscan_format::{FileSchema, LogicalType, PhysicalType};
use colscan_scan::{RequestedColumn, ScanConfig, ScanDriver, ScanRequest};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};

const N_ROWS: usize = 1_000_000;
const ROWS_PER_GROUP: usize = 64 * 1024;
const SEED: u64 = 0xC0FF_EEF0_0DD1_5EA5;
const REGIONS: [&str; 8] = [
    "africa", "americas", "antarctica", "asia", "europe", "middle-east", "oceania", "polar",
];

fn seed_file() -> MemFile {
    let mut b = FileSchema::builder();
    let id = b.leaf("id", PhysicalType::Int64, LogicalType::None, false);
    let amount = b.leaf("amount", PhysicalType::Int64, LogicalType::None, true);
    let region = b.leaf("region", PhysicalType::ByteArray, LogicalType::String, true);
    b.root(id).root(amount).root(region);

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut builder = MemFileBuilder::new(b.build().unwrap()).page_rows(4096);
    let mut start = 0usize;
    while start < N_ROWS {
        let end = (start + ROWS_PER_GROUP).min(N_ROWS);
        let amounts: Vec<Option<i64>> = (start..end)
            .map(|_| Some(rng.random_range(0..10_000)))
            .collect();
        let regions: Vec<Option<&str>> = (start..end)
            .map(|_| Some(REGIONS[rng.random_range(0..REGIONS.len())]))
            .collect();
        builder = builder.row_group(vec![
            MemColumn::int64((start as i64..end as i64).map(Some)),
            MemColumn::int64(amounts),
            MemColumn::dictionary_strings(regions),
        ]);
        start = end;
    }
    builder.build().unwrap()
}

fn request(conjuncts: Vec<colscan_expr::Conjunct>) -> ScanRequest {
    ScanRequest::new(vec![
        RequestedColumn::new("id", DataType::Int64, false),
        RequestedColumn::new("amount", DataType::Int64, true),
        RequestedColumn::new("region", DataType::Utf8, true),
    ])
    .with_conjuncts(conjuncts)
}

fn run(file: &Arc<MemFile>, config: &ScanConfig, request: ScanRequest) -> usize {
    let mut driver = ScanDriver::new(Arc::clone(file) as _, Arc::new(MemFormat), config.clone());
    driver.init(request).unwrap();
    driver.into_batches().map(|b| b.unwrap().num_rows()).sum()
}

fn bench_scan(c: &mut Criterion) {
    let file = Arc::new(seed_file());
    let optimized = ScanConfig::default();
    let plain = ScanConfig {
        enable_lazy_materialization: false,
        enable_filter_by_min_max: false,
        enable_page_index: false,
        enable_dictionary_filter: false,
        ..ScanConfig::default()
    };

    let mut g = c.benchmark_group("scan_1M");
    g.sample_size(10);
    g.throughput(Throughput::Elements(N_ROWS as u64));

    g.bench_function("full_scan", |b| {
        b.iter(|| black_box(run(&file, &optimized, request(Vec::new()))))
    });

    let narrow_range = || {
        vec![Expr::pred(
            "id".to_string(),
            Operator::Range {
                lower: std::ops::Bound::Included(Literal::Integer(500_000)),
                upper: std::ops::Bound::Excluded(Literal::Integer(510_000)),
            },
        )]
    };
    g.bench_function("id_range/pruned", |b| {
        b.iter(|| black_box(run(&file, &optimized, request(narrow_range()))))
    });
    g.bench_function("id_range/plain", |b| {
        b.iter(|| black_box(run(&file, &plain, request(narrow_range()))))
    });

    let region_eq = || {
        vec![Expr::pred(
            "region".to_string(),
            Operator::Equals(Literal::from("oceania")),
        )]
    };
    g.bench_function("region_eq/dictionary", |b| {
        b.iter(|| black_box(run(&file, &optimized, request(region_eq()))))
    });
    g.bench_function("region_eq/plain", |b| {
        b.iter(|| black_box(run(&file, &plain, request(region_eq()))))
    });
    g.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
