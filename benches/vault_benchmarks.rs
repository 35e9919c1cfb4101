use content_vault::storage::{digest_file, ContentDigest, SweepOptions};
use content_vault::Vault;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::path::Path;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn write_tree(dir: &Path, files: usize, distinct: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..files {
        let content = format!("{:08}", i % distinct).repeat(512);
        std::fs::write(dir.join(format!("file_{:04}.dat", i)), content).unwrap();
    }
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");

    for size in [4 * 1024usize, 1024 * 1024, 16 * 1024 * 1024] {
        let content = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", size), &content, |b, content| {
            b.iter(|| ContentDigest::of_bytes(black_box(content)))
        });
    }

    let rt = Runtime::new().unwrap();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blob.bin");
    std::fs::write(&path, vec![0x5Au8; 8 * 1024 * 1024]).unwrap();
    group.throughput(Throughput::Bytes(8 * 1024 * 1024));
    group.bench_function("file_8mb", |b| {
        b.iter(|| rt.block_on(digest_file(black_box(&path))).unwrap())
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sweep");
    group.sample_size(10);

    for concurrency in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("200_files_20_distinct", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter_batched(
                    || {
                        let temp_dir = TempDir::new().unwrap();
                        write_tree(&temp_dir.path().join("tree"), 200, 20);
                        temp_dir
                    },
                    |temp_dir| {
                        rt.block_on(async {
                            let base = Vault::open_in_memory(temp_dir.path().join("storage"))
                                .await
                                .unwrap();
                            let vault = Vault::with_parts(
                                base.content_store().clone(),
                                base.ledger().clone(),
                                SweepOptions {
                                    max_concurrent_files: concurrency,
                                    walk_buffer: 64,
                                },
                            );
                            vault.sweep(&temp_dir.path().join("tree")).await.unwrap()
                        })
                    },
                    criterion::BatchSize::PerIteration,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_digest, bench_sweep);
criterion_main!(benches);
