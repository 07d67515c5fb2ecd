//! Offload path vs direct software codecs

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use warp_accel::software::{self, DEFAULT_LEVEL};
use warp_accel::{
    AccelConfig, CompressDir, CryptKey, CryptMode, CryptRequest, EncryptDir, HwOffload, Offload,
    StubDevice,
};

const SIZES: [usize; 4] = [4096, 16384, 65536, 131072];

fn offload() -> HwOffload {
    let offload = HwOffload::new(Arc::new(StubDevice::new()), &AccelConfig::default());
    offload.init();
    offload
}

fn bench_compress(c: &mut Criterion) {
    let hw = offload();
    let mut group = c.benchmark_group("compress");
    for size in SIZES {
        // Compressible, not trivially so
        let data: Vec<u8> = (0..size).map(|i| ((i * 17 + 31) % 61) as u8).collect();
        let mut out = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("offload", size), &data, |b, data| {
            b.iter(|| hw.compress(CompressDir::Compress, black_box(data), &mut out).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("software", size), &data, |b, data| {
            b.iter(|| software::compress(black_box(data), &mut out, DEFAULT_LEVEL).unwrap())
        });
    }
    group.finish();
}

fn bench_encrypt(c: &mut Criterion) {
    let hw = offload();
    let key = CryptKey::generate(CryptMode::Aes256Gcm);
    let iv = [0u8; 12];

    let mut group = c.benchmark_group("encrypt");
    for size in SIZES {
        let data = vec![0u8; size];
        let mut out = vec![0u8; size];
        let mut digest = [0u8; 16];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("offload", size), &data, |b, data| {
            b.iter(|| {
                let mut req = CryptRequest::new(&key, &iv, black_box(data), &mut out, &mut digest);
                hw.crypt(EncryptDir::Encrypt, &mut req).unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("software", size), &data, |b, data| {
            b.iter(|| {
                let mut req = CryptRequest::new(&key, &iv, black_box(data), &mut out, &mut digest);
                req.run_in_software(EncryptDir::Encrypt).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_encrypt);
criterion_main!(benches);
