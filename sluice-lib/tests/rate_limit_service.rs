use sluice_lib::rate_limit::{
    ContextSource, RateLimitKey, RateLimitResult, RateLimiterService, RateWindowCounter, TimeUnit,
};
use sluice_lib::SluiceError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, sleep};
use std::time::Duration;

fn key(operation: &str, limit: u32, context: &str) -> RateLimitKey {
    RateLimitKey::builder(operation).limit(limit).time_unit(TimeUnit::Seconds).context(context).build()
}

fn hash_of(key: &RateLimitKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[test]
fn test_limit_per_identity() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(100)?;
    let key = key("DemoService::compute", 3, "10.0.0.1");

    for i in 0..3 {
        assert!(service.check(&key), "call {i} should be admitted");
    }
    assert!(!service.check(&key), "fourth call should be denied");

    sleep(Duration::from_millis(1_100));
    assert!(service.check(&key), "call after the window should be admitted");
    Ok(())
}

#[test]
fn test_identities_are_independent() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(100)?;
    let a = key("DemoService::compute", 1, "10.0.0.1");
    let b = key("DemoService::compute", 1, "10.0.0.2");

    assert!(service.check(&a));
    assert!(!service.check(&a));
    assert!(service.check(&b));
    assert_eq!(service.tracked_keys(), 2);
    Ok(())
}

#[test]
fn test_key_equality_and_hash() {
    let a = key("DemoService::compute", 5, "10.0.0.1");
    let b = key("DemoService::compute", 5, "10.0.0.1");
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));

    let other_context = key("DemoService::compute", 5, "10.0.0.2");
    let other_limit = key("DemoService::compute", 6, "10.0.0.1");
    let other_operation = key("DemoService::other", 5, "10.0.0.1");
    let other_source = RateLimitKey::builder("DemoService::compute")
        .limit(5)
        .source(ContextSource::Header { name: "x-api-key".into() })
        .context("10.0.0.1")
        .build();
    let other_unit = RateLimitKey::builder("DemoService::compute")
        .limit(5)
        .time_unit(TimeUnit::Minutes)
        .context("10.0.0.1")
        .build();

    for other in [other_context, other_limit, other_operation, other_source, other_unit] {
        assert_ne!(a, other);
    }
}

#[test]
fn test_missing_context_is_a_shared_bucket() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(100)?;
    let first = RateLimitKey::builder("DemoService::compute").limit(2).build();
    let second = RateLimitKey::builder("DemoService::compute").limit(2).maybe_context(None).build();
    assert_eq!(first, second);

    assert!(service.check(&first));
    assert!(service.check(&second));
    assert!(!service.check(&first));
    Ok(())
}

#[test]
fn test_check_detailed_reports_budget() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(100)?;
    let key = key("DemoService::compute", 2, "tenant-a");

    assert_eq!(service.check_detailed(&key), RateLimitResult::Allowed { limit: 2, remaining: 1 });
    assert_eq!(service.check_detailed(&key), RateLimitResult::Allowed { limit: 2, remaining: 0 });

    let limited = service.check_detailed(&key);
    assert!(limited.is_limited());
    assert_eq!(limited.limit(), 2);
    assert_eq!(limited.remaining(), 0);
    let reset_after = limited.reset_after().ok_or("limited result without reset")?;
    assert!(reset_after <= Duration::from_secs(1));
    Ok(())
}

#[test]
fn test_fails_open_when_counter_cannot_be_created() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let service = RateLimiterService::builder()
        .capacity(100)
        .loader(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::OutOfMemory, "no memory for counter").into())
        })
        .build()?;
    let key = key("DemoService::compute", 1, "10.0.0.1");

    for _ in 0..5 {
        assert!(service.check(&key), "loader failure must admit the call");
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    assert_eq!(service.tracked_keys(), 0);
    Ok(())
}

#[test]
fn test_fails_open_when_loader_panics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::builder()
        .loader(|key| {
            if key.context() == Some("bad") {
                panic!("counter factory bug");
            }
            Ok(RateWindowCounter::new(key.window_millis(), key.limit()))
        })
        .build()?;

    let bad = key("DemoService::compute", 1, "bad");
    assert!(service.check(&bad));
    assert!(service.check(&bad));

    let good = key("DemoService::compute", 1, "good");
    assert!(service.check(&good));
    assert!(!service.check(&good));
    Ok(())
}

#[test]
fn test_zero_capacity_is_rejected() {
    assert!(matches!(RateLimiterService::new(0), Err(SluiceError::Config(_))));
    assert!(matches!(
        RateLimiterService::builder().capacity(0).expire_idle(Duration::from_secs(60)).build(),
        Err(SluiceError::Config(_))
    ));
}

#[test]
fn test_eviction_resets_identity_window() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(2)?;
    let a = key("DemoService::compute", 1, "a");
    let b = key("DemoService::compute", 1, "b");
    let c = key("DemoService::compute", 1, "c");

    assert!(service.check(&a));
    assert!(!service.check(&a));

    assert!(service.check(&b));
    assert!(service.check(&c));
    assert_eq!(service.tracked_keys(), 2);

    // a was evicted as the least recently used identity, so it starts over
    assert!(service.check(&a));
    assert_eq!(service.cache_stats().evictions, 2);
    Ok(())
}

#[test]
fn test_reset_forgets_counter() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::new(100)?;
    let a = key("DemoService::compute", 1, "a");
    let b = key("DemoService::compute", 1, "b");

    assert!(service.check(&a));
    assert!(service.check(&b));
    assert!(!service.check(&a));

    service.reset(&a);
    assert!(service.check(&a));
    assert!(!service.check(&b));

    service.reset_all();
    assert_eq!(service.tracked_keys(), 0);
    assert!(service.check(&b));
    Ok(())
}

#[test]
fn test_idle_identities_expire() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = RateLimiterService::builder()
        .capacity(100)
        .expire_idle(Duration::from_millis(50))
        .build()?;
    let a = RateLimitKey::builder("DemoService::compute")
        .limit(1)
        .time_unit(TimeUnit::Hours)
        .context("a")
        .build();

    assert!(service.check(&a));
    assert!(!service.check(&a));

    sleep(Duration::from_millis(100));
    assert!(service.check(&a));
    Ok(())
}

#[test]
fn test_concurrent_first_calls_share_one_counter() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = Arc::new(RateLimiterService::new(1_000)?);
    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(16));
    let key = RateLimitKey::builder("DemoService::compute")
        .limit(10)
        .time_unit(TimeUnit::Minutes)
        .context("10.0.0.1")
        .build();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            let admitted = Arc::clone(&admitted);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    if service.check(&key) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| "check thread panicked")?;
    }
    assert_eq!(admitted.load(Ordering::SeqCst), 10);
    assert_eq!(service.tracked_keys(), 1);
    Ok(())
}
