// Blocking object pool demo
// Times borrow/work/return cycles through a pool against building a fresh
// resource every time.
//
// Set RUST_LOG=blocking_objectpool=debug to watch the pool at work.

use blocking_objectpool::demo::{ExpensiveResource, FactoryCounters, ResourceFactory};
use blocking_objectpool::{ObjectPool, PoolConfiguration, PoolResult};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const OPERATIONS: usize = 200;
const MIN_SIZE: usize = 10;
const MAX_SIZE: usize = 20;
const CREATION_COST: Duration = Duration::from_millis(5);
const WORK: Duration = Duration::from_millis(5);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Blocking object pool ===");
    println!("{} operations, creation cost {:?}, work {:?}", OPERATIONS, CREATION_COST, WORK);
    println!();

    let counters = FactoryCounters::new();
    match with_pool(&counters) {
        Ok(elapsed) => println!("Time with pool:    {:?}", elapsed),
        Err(err) => {
            eprintln!("Pool benchmark failed: {}", err);
            std::process::exit(1);
        }
    }
    println!("Time without pool: {:?}", without_pool());

    println!();
    println!("Objects created:   {}", counters.created());
    println!("Objects destroyed: {}", counters.destroyed());
    println!("Validations:       {}", counters.validated());
}

fn with_pool(counters: &std::sync::Arc<FactoryCounters>) -> PoolResult<Duration> {
    let factory = ResourceFactory::new(counters.clone(), CREATION_COST);
    let config = PoolConfiguration::new()
        .with_min_size(MIN_SIZE)
        .with_max_size(MAX_SIZE)
        .with_timeout_ms(1000);
    let pool = ObjectPool::new(factory, config)?;

    let start = Instant::now();
    for _ in 0..OPERATIONS {
        let obj = pool.borrow_object()?;
        thread::sleep(WORK);
        pool.return_object(obj)?;
    }
    pool.close()?;
    Ok(start.elapsed())
}

fn without_pool() -> Duration {
    let start = Instant::now();
    for id in 0..OPERATIONS {
        let _obj = ExpensiveResource::new(id, CREATION_COST);
        thread::sleep(WORK);
    }
    start.elapsed()
}
