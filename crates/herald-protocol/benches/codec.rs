//! Codec benchmarks for herald-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use herald_protocol::{codec, ServerFrame};
use serde_json::{json, Value};

fn bench_codec(c: &mut Criterion) {
    let members: Vec<Value> = (0..50)
        .map(|i| json!({"user_id": i, "user_info": {"name": format!("user-{i}")}}))
        .collect();
    let frame = ServerFrame::presence_subscribed("presence-lobby", Value::from(members));

    c.bench_function("encode_text_members_50", |b| {
        b.iter(|| codec::encode_text(black_box(&frame)))
    });

    c.bench_function("encode_binary_members_50", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });

    let encoded = codec::encode(&frame).unwrap();
    c.bench_function("decode_binary_members_50", |b| {
        b.iter(|| codec::decode::<ServerFrame>(black_box(&encoded)))
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
