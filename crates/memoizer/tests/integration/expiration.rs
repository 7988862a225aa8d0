use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use memoizer::{Expiration, Memoizer, MemoizerConfig};
use memoizer_test::{self as test, Counter};

#[test]
fn test_failure_is_retried_after_expiry() {
    test::setup();

    let memoizer = Memoizer::new(Duration::from_millis(100), None);
    let executions = Counter::new();
    let counted = executions.clone();
    let flaky = memoizer.memoize(move |name: String| {
        if counted.incr() == 1 {
            panic!("{name} is not ready yet");
        }
        format!("{name} is ready")
    });

    let message = test::expect_panic::<String, _>(|| flaky("db".into()));
    assert_eq!(message, "db is not ready yet");
    let message = test::expect_panic::<String, _>(|| flaky("db".into()));
    assert_eq!(message, "db is not ready yet");
    assert_eq!(executions.get(), 1);

    thread::sleep(Duration::from_millis(150));

    assert_eq!(flaky("db".into()), "db is ready");
    assert_eq!(flaky("db".into()), "db is ready");
    assert_eq!(executions.get(), 2);
}

#[test]
fn test_results_never_expire() {
    test::setup();

    let memoizer = Memoizer::new(Expiration::Never, Some(Duration::from_millis(10)));
    let executions = Counter::new();
    let counted = executions.clone();
    let double = memoizer.memoize(move |x: i32| {
        counted.incr();
        x * 2
    });

    assert_eq!(double(21), 42);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(double(21), 42);

    assert_eq!(executions.get(), 1);
    assert_eq!(memoizer.storage().item_count(), 1);
}

#[test]
fn test_janitor_releases_expired_results() {
    test::setup();

    let memoizer = Memoizer::new(Duration::from_millis(50), Some(Duration::from_millis(10)));
    let load = memoizer.memoize(|name: String| Arc::new(name.repeat(1024)));

    let loaded = Arc::downgrade(&load("blob".into()));
    assert!(loaded.upgrade().is_some());

    let start = Instant::now();
    while loaded.upgrade().is_some() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "expired result is still held"
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_from_config() {
    test::setup();

    let config = MemoizerConfig {
        default_expiration: Some(Duration::from_secs(5)),
        cleanup_interval: None,
    };
    let memoizer = Memoizer::from_config(&config);
    assert_eq!(
        memoizer.storage().default_expiration(),
        Expiration::After(Duration::from_secs(5))
    );

    let memoizer = Memoizer::from_config(&MemoizerConfig {
        default_expiration: None,
        ..MemoizerConfig::default()
    });
    assert_eq!(memoizer.storage().default_expiration(), Expiration::Never);
}
