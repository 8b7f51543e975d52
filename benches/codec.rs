use std::collections::HashMap;

use bytes::Bytes;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dbuslink::protocol::{Endianness, MAX_ARRAY_LENGTH, Variant, codec};
use dbuslink::{Message, ObjectPath, Signature, Value};

fn byte_payload(len: usize) -> Vec<Value> {
    vec![Value::from(vec![0u8; len])]
}

fn property_map(entries: usize) -> Vec<Value> {
    let map: HashMap<String, Variant> = (0..entries)
        .map(|i| (format!("Property{i}"), Variant::new(i as u32)))
        .collect();
    vec![map.into()]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let ay = Signature::new("ay").unwrap();

    for (label, len) in [("64b", 64usize), ("1kb", 1024), ("64kb", 64 * 1024)] {
        let body = byte_payload(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("encode_ay_{label}"), |b| {
            b.iter(|| black_box(codec::encode(&body, &ay, Endianness::Little).unwrap()));
        });
    }

    let props = property_map(32);
    let sig = Signature::new("a{sv}").unwrap();
    group.bench_function("encode_a{sv}_32", |b| {
        b.iter(|| black_box(codec::encode(&props, &sig, Endianness::Little).unwrap()));
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let ay = Signature::new("ay").unwrap();

    for (label, len) in [("64b", 64usize), ("1kb", 1024), ("64kb", 64 * 1024)] {
        let encoded = codec::encode(&byte_payload(len), &ay, Endianness::Little).unwrap();
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("decode_ay_{label}"), |b| {
            b.iter(|| black_box(codec::decode(&encoded, &ay, Endianness::Little, MAX_ARRAY_LENGTH).unwrap()));
        });
    }

    let sig = Signature::new("a{sv}").unwrap();
    let encoded = codec::encode(&property_map(32), &sig, Endianness::Big).unwrap();
    group.bench_function("decode_a{sv}_32_big_endian", |b| {
        b.iter(|| black_box(codec::decode(&encoded, &sig, Endianness::Big, MAX_ARRAY_LENGTH).unwrap()));
    });

    group.finish();
}

fn bench_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("message");

    let mut call = Message::method_call(ObjectPath::new("/org/example/Test").unwrap(), "echo")
        .destination("org.example.Service")
        .interface("org.example.Test")
        .body(("hello world".to_owned(), 42u32))
        .build()
        .unwrap();
    call.set_serial(1);
    let frame = Bytes::from(call.encode().unwrap());
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("encode_method_call", |b| {
        b.iter(|| black_box(call.encode().unwrap()));
    });
    group.bench_function("decode_method_call", |b| {
        b.iter(|| {
            let message = Message::decode(frame.clone(), MAX_ARRAY_LENGTH).unwrap();
            black_box(message.body().unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_message);
criterion_main!(benches);
