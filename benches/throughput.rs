//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use reflector_core::core::bits::BitModel;
use reflector_core::core::reflector::FrameAssembler;
use reflector_core::{AccessorRegistry, FieldDecl};
use std::hint::black_box;

fn registry() -> AccessorRegistry {
    let send: Vec<FieldDecl> = (0..16).map(|i| FieldDecl::new(&format!("s{}", i), i * 8 + 7, i * 8)).collect();
    AccessorRegistry::new(&send, &[]).unwrap()
}

fn field_benchmark(c: &mut Criterion) {
    let registry = registry();
    let mut model = BitModel::new(128);

    let mut group = c.benchmark_group("fields");
    group.throughput(Throughput::Elements(registry.len() as u64));

    group.bench_function("insert", |b| {
        b.iter(|| {
            for (i, acc) in registry.iter().enumerate() {
                acc.write(&mut model, black_box(i as u64 * 17));
            }
        })
    });

    group.bench_function("extract", |b| {
        b.iter(|| {
            let sum: u64 = registry.iter().map(|acc| acc.read(black_box(&model))).sum();
            black_box(sum)
        })
    });

    group.bench_function("range_get", |b| {
        b.iter(|| black_box(model.get(black_box(70), black_box(9)).unwrap()))
    });

    group.finish();
}

fn framing_benchmark(c: &mut Criterion) {
    let mut packet = BitModel::new(128);
    packet.set(63, 0, 0x0123_4567_89AB_CDEF).unwrap();
    let stream: Vec<u8> = packet.as_bytes().iter().copied().cycle().take(packet.byte_len() * 256).collect();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("reassemble", |b| {
        let mut model = BitModel::new(128);
        let mut assembler = FrameAssembler::new(model.byte_len());
        b.iter(|| {
            for &byte in black_box(&stream) {
                if assembler.push(byte) {
                    assembler.swap_into(&mut model);
                }
            }
        })
    });

    group.finish();
}

criterion_group!(benches, field_benchmark, framing_benchmark);
criterion_main!(benches);
