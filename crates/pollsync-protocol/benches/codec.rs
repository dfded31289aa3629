//! Codec benchmarks for pollsync-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pollsync_protocol::{codec, Packet};

const VOTE_ADDED: &str = r#"42["vote_added",{"pollId":"p1","vote":{"id":"v1","sessionId":"s1","optionId":"b","pollId":"p1"},"updatedCounts":{"a":3,"b":7,"c":1}}]"#;

fn bench_decode_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(VOTE_ADDED.len() as u64));
    group.bench_function("vote_added", |b| {
        b.iter(|| codec::decode(black_box(VOTE_ADDED)))
    });
    group.finish();
}

fn bench_encode_join(c: &mut Criterion) {
    let packet = Packet::join("6d1f0f8e-5c7a-4b8e-9d0b-3f7c2a1e4b5d");

    c.bench_function("encode_join_poll", |b| {
        b.iter(|| codec::encode(black_box(&packet)))
    });
}

criterion_group!(benches, bench_decode_event, bench_encode_join);
criterion_main!(benches);
