//! Buffer Pool Performance Benchmark
//!
//! Measures lease/release and metadata access on the coded-frame pool.
//!
//! **Goal:** Pool operations should not show up in a per-frame profile
//! **Target:** <2µs per lease/release

use avpipe_player::buffer::{BufferKind, BufferPool, MetadataType, OwnerTag, SequenceNumber};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_pool_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    group.bench_function("lease_release", |b| {
        let pool = BufferPool::new(BufferKind::CodedFrame, "bench", 64, 0, 0);

        b.iter(|| {
            let buffer = pool.get_buffer(OwnerTag::Collator, black_box(4096));
            black_box(&buffer);
        });
    });

    group.bench_function("lease_with_payload_4k", |b| {
        let pool = BufferPool::new(BufferKind::CodedFrame, "bench", 64, 1024 * 1024, 64 * 1024);
        let payload = vec![0x5au8; 4096];

        b.iter(|| {
            if let Ok(buffer) = pool.get_buffer(OwnerTag::Collator, payload.len()) {
                buffer.set_payload(black_box(&payload)).ok();
                black_box(buffer.payload_len());
            }
        });
    });

    group.bench_function("share_and_transfer", |b| {
        let pool = BufferPool::new(BufferKind::DecodeFrame, "bench", 16, 0, 0);

        b.iter(|| {
            if let Ok(mut buffer) = pool.get_buffer(OwnerTag::Codec, 0) {
                let shared = buffer.share(OwnerTag::Manifestor);
                buffer.transfer_ownership(OwnerTag::Attachment);
                black_box(shared.reference_count());
            }
        });
    });

    group.bench_function("sequence_number_update", |b| {
        let pool = BufferPool::new(BufferKind::CodedFrame, "bench", 4, 0, 0);
        pool.attach_metadata(MetadataType::SequenceNumber);
        let buffer = pool.get_buffer(OwnerTag::Collator, 0).ok();

        b.iter(|| {
            if let Some(buffer) = &buffer {
                buffer.set_sequence_number(SequenceNumber::marker(black_box(7)));
                black_box(buffer.update_sequence_number(|s| s.value += 1));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool_operations);
criterion_main!(benches);
