use criterion::{black_box, criterion_group, criterion_main, Criterion};

use taskforge::gpu::{pack_argument_bytes, ArgValue};

fn small_schema() -> Vec<(&'static str, ArgValue)> {
    vec![
        ("scale", ArgValue::Float(1.5)),
        ("count", ArgValue::Uint(4096)),
        ("offset", ArgValue::Vec3([0.1, 0.2, 0.3])),
    ]
}

fn large_schema() -> Vec<(&'static str, ArgValue)> {
    vec![
        ("view", ArgValue::Mat4([0.5; 16])),
        ("normal", ArgValue::Mat3([0.25; 9])),
        ("origin", ArgValue::Vec4([1.0, 2.0, 3.0, 4.0])),
        ("direction", ArgValue::Vec3([0.0, 1.0, 0.0])),
        ("uv", ArgValue::Vec2([0.5, 0.5])),
        ("steps", ArgValue::Int(64)),
        ("epsilon", ArgValue::Float(1e-6)),
        ("flags", ArgValue::Uint(0b1011)),
    ]
}

fn bench_pack(c: &mut Criterion) {
    let small = small_schema();
    let large = large_schema();

    c.bench_function("pack_args_small", |b| {
        b.iter(|| pack_argument_bytes(black_box(&small)).unwrap())
    });

    c.bench_function("pack_args_large", |b| {
        b.iter(|| pack_argument_bytes(black_box(&large)).unwrap())
    });
}

criterion_group!(benches, bench_pack);
criterion_main!(benches);
