use std::sync::{Arc, OnceLock};
use std::time::Duration;

use memoizer::{ArgumentKind, MemoizeError, Memoizer};
use memoizer_test::{self as test, Counter};

fn memoizer() -> Memoizer {
    Memoizer::new(Duration::from_secs(90), Some(Duration::from_secs(600)))
}

#[test]
fn test_repeated_calls_execute_once() {
    test::setup();

    let memoizer = memoizer();
    let executions = Counter::new();
    let counted = executions.clone();
    let describe = memoizer.memoize(move |name: String, age: u8| {
        counted.incr();
        format!("{name} is {age}")
    });

    let first = describe("Ann".into(), 31);
    let second = describe("Ann".into(), 31);

    assert_eq!(first, "Ann is 31");
    assert_eq!(first, second);
    assert_eq!(executions.get(), 1);

    assert_eq!(describe("Ann".into(), 32), "Ann is 32");
    assert_eq!(executions.get(), 2);
}

#[test]
fn test_panics_are_replayed() {
    test::setup();

    let memoizer = memoizer();
    let count = Counter::new();
    let counted = count.clone();
    let f = memoizer.memoize(move |_i: i64| {
        let count = counted.incr();
        if count % 2 == 1 {
            std::panic::panic_any(count);
        }
    });

    assert_eq!(test::expect_panic::<usize, _>(|| f(1)), 1);
    assert_eq!(test::expect_panic::<usize, _>(|| f(1)), 1);
    assert_eq!(count.get(), 1);

    f(2);
    f(2);
    assert_eq!(count.get(), 2);

    assert_eq!(test::expect_panic::<usize, _>(|| f(1)), 1);
    assert_eq!(test::expect_panic::<usize, _>(|| f(100)), 3);
    assert_eq!(count.get(), 3);
}

#[test]
fn test_string_panics_are_replayed() {
    test::setup();

    let memoizer = memoizer();
    let executions = Counter::new();
    let counted = executions.clone();
    let parse = memoizer.memoize(move |input: String| -> u32 {
        counted.incr();
        match input.parse() {
            Ok(value) => value,
            Err(_) => panic!("not a number: {input}"),
        }
    });

    assert_eq!(parse("12".into()), 12);
    for _ in 0..3 {
        let message = test::expect_panic::<String, _>(|| parse("twelve".into()));
        assert_eq!(message, "not a number: twelve");
    }
    assert_eq!(executions.get(), 2);
}

#[test]
fn test_unsupported_arguments() {
    test::setup();

    let memoizer = memoizer();
    let executions = Counter::new();
    let counted = executions.clone();
    let total = memoizer.wrap(move |(values,): (Vec<u32>,)| {
        counted.incr();
        values.iter().sum::<u32>()
    });

    assert_eq!(
        total.try_call((vec![1, 2],)),
        Err(MemoizeError::UnsupportedArgumentKind(ArgumentKind::Sequence))
    );

    let err = test::expect_panic::<MemoizeError, _>(|| total.call((vec![1, 2],)));
    assert_eq!(err.to_string(), "unsupported argument kind: dynamic sequence");

    let counted = executions.clone();
    let lookup = memoizer.memoize(move |table: std::collections::HashMap<String, u32>| {
        counted.incr();
        table.len()
    });
    let err = test::expect_panic::<MemoizeError, _>(|| lookup(Default::default()));
    assert_eq!(err, MemoizeError::UnsupportedArgumentKind(ArgumentKind::Map));

    assert_eq!(executions.get(), 0);
    assert_eq!(memoizer.storage().item_count(), 0);
}

#[test]
fn test_functions_do_not_share_results() {
    test::setup();

    let memoizer = memoizer();
    let double = memoizer.memoize(|x: u64| x * 2);
    let square = memoizer.memoize(|x: u64| x * x);

    assert_eq!(double(7), 14);
    assert_eq!(square(7), 49);
    assert_eq!(double(7), 14);
    assert_eq!(memoizer.storage().item_count(), 2);
}

#[test]
fn test_flush_recomputes() {
    test::setup();

    let memoizer = memoizer();
    let executions = Counter::new();
    let counted = executions.clone();
    let next = memoizer.memoize(move |step: u32| step + counted.incr() as u32);

    assert_eq!(next(10), 11);
    assert_eq!(next(10), 11);

    memoizer.storage().flush();
    assert_eq!(memoizer.storage().item_count(), 0);

    assert_eq!(next(10), 12);
    assert_eq!(executions.get(), 2);
}

type Fib = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

#[test]
fn test_recursive_fibonacci() {
    test::setup();

    let memoizer = memoizer();
    let executions = Counter::new();
    let fib: Arc<OnceLock<Fib>> = Arc::default();

    let counted = executions.clone();
    let this = Arc::clone(&fib);
    let memoized = memoizer.memoize(move |n: u64| {
        counted.incr();
        let fib = this.get().expect("fib is initialized");
        match n {
            0 => 0,
            1 => 1,
            n => fib(n - 1) + fib(n - 2),
        }
    });
    assert!(fib.set(memoized).is_ok());
    let fib = fib.get().unwrap();

    assert_eq!(fib(90), 2_880_067_194_370_816_120);
    assert_eq!(executions.get(), 91);

    assert_eq!(fib(50), 12_586_269_025);
    assert_eq!(fib(91), 4_660_046_610_375_530_309);
    assert_eq!(executions.get(), 92);
}
