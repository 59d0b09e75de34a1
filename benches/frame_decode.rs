//! Inbound frame decoding benchmarks.
//!
//! Measures `ServerFrame::decode` for the frame shapes a session loop sees:
//! keep-alives, persistent responses carrying hub calls, and results.
//!
//! Run with: cargo bench --bench frame_decode
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use signalr_client::protocol::{HubFrame, ServerFrame};

// ============================================================================
// Fixtures
// ============================================================================

const MESSAGE_COUNTS: &[usize] = &[1, 10, 100];

fn persistent_frame(messages: usize) -> String {
    let calls: Vec<String> = (0..messages)
        .map(|i| {
            format!(
                r#"{{"H":"chatHub","M":"chatMessage","A":[{{"text":"message {i}","user":"bench"}},{i}]}}"#
            )
        })
        .collect();
    format!(r#"{{"C":"d-1,{messages}|A,0","M":[{}]}}"#, calls.join(","))
}

// ============================================================================
// Benchmark: Frame Decode
// ============================================================================

fn bench_keep_alive(c: &mut Criterion) {
    c.bench_function("decode/keep_alive", |b| {
        b.iter(|| ServerFrame::decode(black_box("{}")));
    });
}

fn bench_result(c: &mut Criterion) {
    let frame = r#"{"I":"42","R":{"ok":true,"items":[1,2,3]}}"#;
    c.bench_function("decode/result", |b| {
        b.iter(|| ServerFrame::decode(black_box(frame)));
    });
}

fn bench_persistent(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/persistent");

    for &count in MESSAGE_COUNTS {
        let frame = persistent_frame(count);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &frame, |b, frame| {
            b.iter(|| {
                let Ok(ServerFrame::Persistent(response)) = ServerFrame::decode(black_box(frame))
                else {
                    return 0;
                };
                response
                    .messages
                    .iter()
                    .filter(|raw| matches!(HubFrame::decode(raw), Ok(HubFrame::Call(_))))
                    .count()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_keep_alive, bench_result, bench_persistent);
criterion_main!(benches);
