//! Basic usage examples for ObjectPool

use blocking_objectpool::demo::{FactoryCounters, ResourceFactory};
use blocking_objectpool::{CancellationToken, FnFactory, ObjectPool, PoolConfiguration, PoolError};
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== Blocking object pool - Basic Examples ===\n");

    // Example 1: Borrow and return
    borrow_and_return();

    // Example 2: Guards and invalidation
    guards();

    // Example 3: Timeouts and cancellation
    exhausted_pool();

    // Example 4: Closing
    closing();
}

fn borrow_and_return() {
    println!("1. Borrow and Return:");
    let counters = FactoryCounters::new();
    let factory = ResourceFactory::new(counters.clone(), Duration::from_millis(2));
    let config = PoolConfiguration::new().with_min_size(2).with_max_size(3);
    let pool = ObjectPool::new(factory, config).unwrap();

    println!("   Preloaded: {} idle", pool.idle_count());

    let objects: Vec<_> = (0..3).map(|_| pool.borrow_object().unwrap()).collect();
    println!("   Borrowed 3, created so far: {}", counters.created());

    pool.return_objects(objects).unwrap();
    println!("   After return - Idle: {}\n", pool.idle_count());
    pool.close().unwrap();
}

fn guards() {
    println!("2. Guards and Invalidation:");
    let pool = ObjectPool::new(
        FnFactory::new(|| 42).with_destroy(|x| println!("   Destroying {}", x)),
        PoolConfiguration::new().with_min_size(1).with_max_size(1),
    )
    .unwrap();

    {
        let obj = pool.get_object().unwrap();
        println!("   Got object: {}", *obj);
        // Object automatically returned when dropped
    }
    println!("   Idle after drop: {}", pool.idle_count());

    pool.get_object().unwrap().invalidate();
    pool.close().unwrap();
    println!("   Live after invalidate: {}\n", pool.live_count());
}

fn exhausted_pool() {
    println!("3. Timeouts and Cancellation:");
    let pool = ObjectPool::new(
        FnFactory::new(|| "only one"),
        PoolConfiguration::new().with_min_size(1).with_max_size(1).with_timeout_ms(50),
    )
    .unwrap();

    let held = pool.borrow_object().unwrap();
    match pool.borrow_object() {
        Err(PoolError::BorrowTimeout(timeout)) => println!("   Timed out after {:?}", timeout),
        other => println!("   Unexpected: {:?}", other),
    }

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            token.cancel();
        })
    };
    match pool.borrow_object_cancellable(&token) {
        Err(err) => println!("   Cancelled: {}", err),
        Ok(_) => println!("   Unexpectedly got an object"),
    }
    canceller.join().unwrap();

    pool.return_object(held).unwrap();
    println!("   After return: {:?}\n", pool.borrow_object());
}

fn closing() {
    println!("4. Closing:");
    let pool = ObjectPool::new(
        FnFactory::new(|| 0u8),
        PoolConfiguration::new().with_min_size(4).with_max_size(4),
    )
    .unwrap();

    pool.close().unwrap();
    println!("   Closed: {}", pool.is_closed());
    match pool.borrow_object() {
        Err(err) => println!("   Borrow after close: {}", err),
        Ok(_) => println!("   Unexpectedly got an object"),
    }
}
