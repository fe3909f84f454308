// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Audio hot-path benchmarks.
//
// Run with:
//   cargo bench --bench codec
//
// Groups:
//   encode_response  panel: fixed-point pair -> channel response bytes
//   deinterleave     device: channel response -> two float buffers
//
// Each group runs at three block sizes: 64, 512 and the 8192-frame maximum.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tracker_bridge::wire::{self, ChannelResponse, MAX_BUFFER_FRAMES};
use tracker_bridge::AudioBufferPool;

const BLOCKS: &[(&str, usize)] = &[
    ("frames_64", 64),
    ("frames_512", 512),
    ("frames_8192", MAX_BUFFER_FRAMES),
];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_response");

    for &(label, frames) in BLOCKS {
        let mut pool = AudioBufferPool::new(frames);
        if let Some(pair) = pool.pair_mut(0) {
            pair.iter_mut().enumerate().for_each(|(i, s)| *s = i as i32 * 977);
        }
        group.throughput(Throughput::Bytes(wire::channel_response_size(frames) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &frames, |b, &n| {
            b.iter(|| black_box(pool.encode_response(0, n).map(<[u8]>::len)));
        });
    }

    group.finish();
}

fn bench_deinterleave(c: &mut Criterion) {
    let mut group = c.benchmark_group("deinterleave");

    for &(label, frames) in BLOCKS {
        let samples: Vec<i32> = (0..frames as i32 * 2).map(|i| i * 1031).collect();
        let mut bytes = vec![0u8; wire::channel_response_size(frames)];
        let len = wire::encode_channel_response(0, &samples, &mut bytes);
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &frames, |b, &n| {
            b.iter(|| {
                if let Some(resp) = ChannelResponse::decode(black_box(&bytes[..len])) {
                    resp.deinterleave(n, &mut left, &mut right);
                }
                black_box(left[n - 1] + right[n - 1])
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_deinterleave);
criterion_main!(benches);
