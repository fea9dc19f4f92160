use criterion::{black_box, criterion_group, criterion_main, Criterion};
use opaqueid_rs::{Codec, Config};

fn codec() -> Codec {
    let config = Config::with_key(b"an example very very secret key!").unwrap();
    Codec::new(&config).unwrap()
}

fn bench_obfuscate(c: &mut Criterion) {
    let codec = codec();
    c.bench_function("obfuscate", |b| {
        b.iter(|| codec.obfuscate(black_box(12345)).unwrap())
    });
}

fn bench_deobfuscate(c: &mut Criterion) {
    let codec = codec();
    let token = codec.obfuscate(12345).unwrap();
    c.bench_function("deobfuscate", |b| {
        b.iter(|| codec.deobfuscate(black_box(&token)))
    });
}

criterion_group!(benches, bench_obfuscate, bench_deobfuscate);
criterion_main!(benches);
