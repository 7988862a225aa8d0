use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use memoizer::{Expiration, Memoizer};
use memoizer_test::{self as test, Counter};

const CALLERS: usize = 16;

#[test]
fn test_concurrent_calls_are_coalesced() {
    test::setup();

    let memoizer = Memoizer::new(Expiration::Never, None);
    let executions = Counter::new();
    let counted = executions.clone();
    let slow_square = memoizer.memoize(move |x: u64| {
        counted.incr();
        thread::sleep(Duration::from_millis(100));
        x * x
    });

    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let slow_square = Arc::clone(&slow_square);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                slow_square(12)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 144);
    }
    assert_eq!(executions.get(), 1);
}

#[test]
fn test_concurrent_failures_are_replayed() {
    test::setup();

    let memoizer = Memoizer::new(Expiration::Never, None);
    let executions = Counter::new();
    let counted = executions.clone();
    let failing = memoizer.memoize(move |code: u32| -> String {
        counted.incr();
        thread::sleep(Duration::from_millis(100));
        std::panic::panic_any(code)
    });

    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let failing = Arc::clone(&failing);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                test::expect_panic::<u32, _>(|| failing(42))
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }
    assert_eq!(test::expect_panic::<u32, _>(|| failing(42)), 42);
    assert_eq!(executions.get(), 1);
}

#[test]
fn test_distinct_arguments_run_in_parallel() {
    test::setup();

    let memoizer = Memoizer::new(Expiration::Never, None);
    let executions = Counter::new();
    let counted = executions.clone();
    let slow_identity = memoizer.memoize(move |x: usize| {
        counted.incr();
        thread::sleep(Duration::from_millis(200));
        x
    });

    let barrier = Arc::new(Barrier::new(CALLERS));
    let start = Instant::now();
    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let slow_identity = Arc::clone(&slow_identity);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                slow_identity(i)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i);
    }

    // sequential execution would take at least 3.2s
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(executions.get(), CALLERS);
}

#[test]
fn test_waiter_does_not_block_other_keys() {
    test::setup();

    let memoizer = Memoizer::new(Expiration::Never, None);
    let (release, gate) = std::sync::mpsc::channel::<()>();
    let gate = std::sync::Mutex::new(gate);
    let blocking = memoizer.memoize(move |key: &'static str| {
        if key == "blocked" {
            gate.lock().unwrap().recv().ok();
        }
        key.len()
    });

    let blocked = {
        let blocking = Arc::clone(&blocking);
        thread::spawn(move || blocking("blocked"))
    };
    let waiter = {
        let blocking = Arc::clone(&blocking);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            blocking("blocked")
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert_eq!(blocking("free"), 4);

    release.send(()).unwrap();
    assert_eq!(blocked.join().unwrap(), 7);
    assert_eq!(waiter.join().unwrap(), 7);
}
