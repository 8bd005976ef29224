//! Criterion benchmarks for the playback hot path.
//!
//! A 60 Hz render loop calls [`PlaybackEngine::tick`] every frame and the
//! state channel inserts into the delay buffer at telemetry rate, so both
//! must stay well under a millisecond.
//!
//! Run with:
//! ```bash
//! cargo bench --package rover-core --bench playback_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rover_core::domain::delay_buffer::{BufferedEntry, DelayBuffer};
use rover_core::{PlaybackConfig, PlaybackEngine, Pose, StateSnapshot, Velocity};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn snapshot(seq: u32, sent_at_ms: f64) -> StateSnapshot {
    StateSnapshot::new(
        seq,
        Some(sent_at_ms),
        Pose {
            x: f64::from(seq) * 0.1,
            y: 0.0,
            heading: 0.2,
        },
        Velocity {
            linear: 1.0,
            angular: 0.05,
        },
    )
}

/// Engine holding `n` samples spaced 10 ms apart, ending at local time `10 * n`.
fn engine_with_samples(n: u32) -> PlaybackEngine {
    let config = PlaybackConfig {
        history_ms: f64::from(n) * 10.0 + 1000.0,
        ..PlaybackConfig::default()
    };
    let mut engine = PlaybackEngine::new(config);
    for seq in 0..n {
        let t = f64::from(seq) * 10.0;
        engine.ingest_state(snapshot(seq, t), t);
    }
    engine
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Out-of-order insert into a buffer that already holds `n` entries.
fn bench_buffer_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_buffer_insert");

    for &n in &[16u32, 128, 512] {
        let mut base = DelayBuffer::new(1e9);
        for seq in 0..n {
            base.insert(
                BufferedEntry {
                    local_time_ms: f64::from(seq) * 10.0,
                    snapshot: snapshot(seq, 0.0),
                },
                0.0,
            );
        }

        group.bench_with_input(BenchmarkId::new("entries", n), &n, |b, &n| {
            b.iter_batched(
                || base.clone(),
                |mut buffer| {
                    buffer.insert(
                        black_box(BufferedEntry {
                            local_time_ms: f64::from(n) * 5.0 + 1.0,
                            snapshot: snapshot(n, 0.0),
                        }),
                        0.0,
                    )
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// One render tick landing between two samples.
fn bench_tick_interpolate(c: &mut Criterion) {
    let engine = engine_with_samples(200);
    c.bench_function("tick_interpolate", |b| {
        b.iter_batched(
            || engine.clone(),
            |mut engine| engine.tick(black_box(1_085.0), true),
            criterion::BatchSize::SmallInput,
        )
    });
}

/// One render tick past the newest sample.
fn bench_tick_extrapolate(c: &mut Criterion) {
    let engine = engine_with_samples(200);
    c.bench_function("tick_extrapolate", |b| {
        b.iter_batched(
            || engine.clone(),
            |mut engine| engine.tick(black_box(2_100.0), true),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_buffer_insert,
    bench_tick_interpolate,
    bench_tick_extrapolate
);
criterion_main!(benches);
