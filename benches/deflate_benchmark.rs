//! Throughput benchmarks for the streaming zlib encoder.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use zflate::{deflate_zlib, Mode};

fn make_pattern(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let pattern = b"The quick brown fox jumps over the lazy dog. ";
    while out.len() < len {
        out.extend_from_slice(pattern);
    }
    out.truncate(len);
    out
}

fn make_random(len: usize, mut seed: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        out.push((seed >> 16) as u8);
    }
    out.truncate(len);
    out
}

fn bench_deflate_zlib(c: &mut Criterion) {
    let compressible = make_pattern(1 << 20);
    let random = make_random(1 << 20, 0x1234_5678);

    let mut group = c.benchmark_group("deflate_zlib");
    group.throughput(Throughput::Bytes(compressible.len() as u64));

    for &(name, data) in &[("compressible", &compressible), ("random", &random)] {
        for &mode in &[Mode::Stored, Mode::Fixed, Mode::Dynamic] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), name),
                data,
                |b, input| {
                    b.iter(|| black_box(deflate_zlib(black_box(input), 15, mode).unwrap()));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_deflate_zlib);
criterion_main!(benches);
