//! Criterion benchmarks for the report pipeline: CDF construction, batch
//! segmentation and log parsing over synthetic in-memory data.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kafkamark::batching::{BatchSegmenter, TrailingBatch};
use kafkamark::cdf::build_cdf;
use kafkamark::log_parser::LogReader;
use kafkamark::report::collect_latencies;
use std::io::Cursor;

/// Deterministic pseudo-random latencies in microseconds.
fn latencies(count: usize) -> Vec<f64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 100_000) as f64 / 10.0
        })
        .collect()
}

/// Bursts of eight closely spaced events separated by long pauses.
fn bursty_timestamps(count: usize) -> Vec<u64> {
    (0..count as u64)
        .map(|i| (i / 8) * 10_000 + (i % 8) * 25)
        .collect()
}

fn bench_build_cdf(c: &mut Criterion) {
    let mut group = c.benchmark_group("cdf");

    for count in [1_000, 100_000] {
        let samples = latencies(count);
        group.bench_with_input(BenchmarkId::new("build_cdf", count), &samples, |b, input| {
            b.iter(|| {
                let table = build_cdf(black_box(input)).expect("samples are non-empty");
                black_box(table);
            });
        });
    }

    group.finish();
}

fn bench_segmenter(c: &mut Criterion) {
    let timestamps = bursty_timestamps(100_000);

    c.bench_function("batching/segment_100k", |b| {
        b.iter(|| {
            let mut segmenter = BatchSegmenter::new();
            let batches = segmenter.segment(black_box(&timestamps).iter().copied());
            black_box((batches, segmenter.finish(TrailingBatch::Emit)));
        })
    });
}

fn bench_parse_log(c: &mut Criterion) {
    let mut log = String::from("0|CPS|2400000000\n");
    for (i, timestamp) in bursty_timestamps(10_000).into_iter().enumerate() {
        log.push_str(&format!("{}|CONSUME|msg-{}|{}\n", timestamp, i, 1_000 + i % 500));
    }

    c.bench_function("log_parser/collect_latencies_10k", |b| {
        b.iter(|| {
            let reader = LogReader::new(Cursor::new(black_box(log.as_bytes())));
            let parsed = collect_latencies(reader).expect("log should parse");
            black_box(parsed);
        })
    });
}

criterion_group!(benches, bench_build_cdf, bench_segmenter, bench_parse_log);
criterion_main!(benches);
