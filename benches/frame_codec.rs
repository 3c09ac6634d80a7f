//! Frame codec encode/decode throughput.

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use rsocket::{Frame, FrameCodec, Payload, ProtocolVersion, StreamId};

fn payload_frame(size: usize) -> Frame {
    Frame::Payload {
        stream_id: StreamId(1),
        next: true,
        complete: false,
        follows: false,
        payload: Payload::new(Bytes::from(vec![0x5A; size])),
    }
}

fn bench_codec(c: &mut Criterion) {
    let codec = FrameCodec::new(ProtocolVersion::V1_0).expect("codec");
    for size in [64usize, 1024, 16 * 1024] {
        let frame = payload_frame(size);
        let encoded = codec.encode(&frame);

        c.bench_function(&format!("encode_payload_{size}"), |b| {
            b.iter(|| codec.encode(std::hint::black_box(&frame)));
        });
        c.bench_function(&format!("decode_payload_{size}"), |b| {
            b.iter(|| {
                codec
                    .decode(std::hint::black_box(encoded.clone()))
                    .expect("decode")
            });
        });
    }
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
