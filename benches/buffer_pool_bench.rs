use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use rookdb::storage::buffer::BufferPoolManager;

// Create a temporary db for benchmarking
fn create_bench_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path, 2).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [16usize, 64, 256].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_access", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size);

            let mut page_ids = Vec::new();
            for i in 0..size {
                let (page_id, page) = buffer_pool.new_page().unwrap();
                {
                    let mut page_guard = page.write();
                    page_guard.data[0] = (i % 256) as u8;
                }
                buffer_pool.unpin_page(page_id, true);
                page_ids.push(page_id);
            }

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let page_guard = page.read();
                        assert_eq!(page_guard.page_id, page_id);
                    }
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random_access", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size);

            // Twice as many pages as frames, to keep the replacer busy.
            let mut page_ids = Vec::new();
            for _ in 0..size * 2 {
                let (page_id, _) = buffer_pool.new_page().unwrap();
                buffer_pool.unpin_page(page_id, true);
                page_ids.push(page_id);
            }

            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                for _ in 0..size {
                    let page_id = *page_ids.choose(&mut rng).unwrap();
                    let _page = buffer_pool.fetch_page(page_id).unwrap();
                    buffer_pool.unpin_page(page_id, false);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
