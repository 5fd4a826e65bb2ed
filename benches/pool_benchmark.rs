use blocking_objectpool::demo::{ExpensiveResource, FactoryCounters, ResourceFactory};
use blocking_objectpool::{ObjectPool, PoolConfiguration};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CREATION_COST: Duration = Duration::from_micros(200);

fn resource_pool(min: usize, max: usize) -> ObjectPool<ExpensiveResource> {
    let factory = ResourceFactory::new(FactoryCounters::new(), CREATION_COST);
    let config = PoolConfiguration::new()
        .with_min_size(min)
        .with_max_size(max)
        .with_timeout_ms(1000);
    ObjectPool::new(factory, config).unwrap()
}

fn bench_borrow_return(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");

    let pool = resource_pool(10, 20);
    group.bench_function("pooled", |b| {
        b.iter(|| {
            let obj = pool.borrow_object().unwrap();
            black_box(obj.id());
            pool.return_object(obj).unwrap();
        })
    });
    pool.close().unwrap();

    group.bench_function("direct", |b| {
        b.iter(|| black_box(ExpensiveResource::new(0, CREATION_COST).id()))
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let pool = Arc::new(resource_pool(4, 4));

    c.bench_function("contended_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..25 {
                            let obj = pool.get_object().unwrap();
                            black_box(obj.id());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });

    pool.close().unwrap();
}

criterion_group!(benches, bench_borrow_return, bench_contended);
criterion_main!(benches);
