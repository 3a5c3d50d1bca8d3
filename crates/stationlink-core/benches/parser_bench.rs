//! Criterion benchmarks for frame building and streaming parsing.
//!
//! Run with:
//! ```bash
//! cargo bench --package stationlink-core --bench parser_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stationlink_core::{
    build_frame, DeviceMessage, FrameParser, Message, MessageType, Metric, MetricKind,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn metrics_response(sequence: u8) -> Message {
    let metrics = MetricKind::KNOWN
        .iter()
        .enumerate()
        .map(|(i, &kind)| Metric::new(kind, i as f32 * 1.5))
        .collect();
    DeviceMessage::MetricsResponse(metrics)
        .into_message(sequence)
        .expect("fixture must encode")
}

/// A stream of 100 frames alternating between pings and metric responses.
fn mixed_stream() -> Vec<u8> {
    (0..100u8)
        .flat_map(|seq| {
            let msg = if seq % 2 == 0 {
                Message::empty(MessageType::Ping, seq)
            } else {
                metrics_response(seq)
            };
            build_frame(&msg).expect("fixture must frame")
        })
        .collect()
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_build(c: &mut Criterion) {
    let ping = Message::empty(MessageType::Ping, 1);
    let metrics = metrics_response(2);

    let mut group = c.benchmark_group("build_frame");
    group.bench_function("Ping", |b| b.iter(|| build_frame(black_box(&ping)).unwrap()));
    group.bench_function("MetricsResponse", |b| {
        b.iter(|| build_frame(black_box(&metrics)).unwrap())
    });
    group.finish();
}

/// Parses the same stream delivered in chunks of different sizes.
fn bench_feed_chunked(c: &mut Criterion) {
    let stream = mixed_stream();
    let mut group = c.benchmark_group("parser_feed");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    for chunk in [1usize, 16, 256, 4_096] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &stream, |b, stream| {
            b.iter(|| {
                let mut parser = FrameParser::new();
                let mut count = 0;
                for piece in stream.chunks(chunk) {
                    count += parser.feed(black_box(piece)).len();
                }
                count
            })
        });
    }
    group.finish();
}

fn bench_resync_through_noise(c: &mut Criterion) {
    let mut stream: Vec<u8> = (0..4_096u32).map(|i| (i % 0xA9) as u8).collect();
    stream.extend(mixed_stream());

    let mut group = c.benchmark_group("parser_resync");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("noise_then_frames", |b| {
        b.iter(|| FrameParser::new().feed(black_box(&stream)).len())
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_feed_chunked, bench_resync_through_noise);
criterion_main!(benches);
