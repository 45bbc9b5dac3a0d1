use sluice_lib::guard::{CallGuard, Throttled};
use sluice_lib::rate_limit::{ContextSource, PolicyRegistry, RateLimiterService, ThrottlingPolicy, TimeUnit};
use sluice_lib::SluiceError;
use std::collections::HashMap;
use std::sync::Arc;

struct Request {
    peer: String,
    headers: HashMap<String, String>,
}

impl Request {
    fn new(peer: &str) -> Self {
        Self { peer: peer.to_string(), headers: HashMap::new() }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

fn service() -> Result<Arc<RateLimiterService>, SluiceError> {
    Ok(Arc::new(RateLimiterService::new(1_000)?))
}

#[test]
fn test_call_runs_only_when_admitted() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let policy = Arc::new(ThrottlingPolicy::new("OrderService::place", 2, TimeUnit::Minutes));
    let guard = Throttled::new(service()?, policy, |req: &Request| Some(req.peer.clone()));
    let req = Request::new("10.0.0.1");

    let mut runs = 0;
    assert_eq!(guard.call(&req, || { runs += 1; runs })?, 1);
    assert_eq!(guard.call(&req, || { runs += 1; runs })?, 2);

    match guard.call(&req, || runs += 1) {
        Err(SluiceError::TooManyRequests { operation }) => assert_eq!(operation, "OrderService::place"),
        other => panic!("expected TooManyRequests, got {other:?}"),
    }
    assert_eq!(runs, 2);
    Ok(())
}

#[test]
fn test_header_source_separates_tenants() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let policy = Arc::new(
        ThrottlingPolicy::new("OrderService::list", 1, TimeUnit::Minutes)
            .with_source(ContextSource::Header { name: "x-api-key".into() }),
    );
    let guard = Throttled::new(service()?, policy, |req: &Request| req.headers.get("x-api-key").cloned());

    let tenant_a = Request::new("10.0.0.1").with_header("x-api-key", "tenant-a");
    let tenant_b = Request::new("10.0.0.1").with_header("x-api-key", "tenant-b");
    let anonymous = Request::new("10.0.0.2");

    assert!(guard.admit(&tenant_a));
    assert!(!guard.admit(&tenant_a));
    assert!(guard.admit(&tenant_b));

    // requests without the header share one bucket
    assert!(guard.admit(&anonymous));
    assert!(!guard.admit(&Request::new("10.0.0.3")));
    Ok(())
}

#[test]
fn test_guards_on_shared_service_do_not_share_counters() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = service()?;
    let registry = PolicyRegistry::new([
        ThrottlingPolicy::new("Catalog::search", 1, TimeUnit::Minutes),
        ThrottlingPolicy::new("Catalog::details", 1, TimeUnit::Minutes),
    ])?;
    let peer = |req: &Request| Some(req.peer.clone());

    let search = Throttled::new(Arc::clone(&service), registry.get("Catalog::search").ok_or("missing policy")?, peer);
    let details = Throttled::new(Arc::clone(&service), registry.get("Catalog::details").ok_or("missing policy")?, peer);
    let req = Request::new("10.0.0.1");

    assert!(search.admit(&req));
    assert!(details.admit(&req));
    assert!(!search.admit(&req));
    assert!(!details.admit(&req));
    assert_eq!(service.tracked_keys(), 2);
    Ok(())
}

#[test]
fn test_guard_as_trait_object() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let policy = Arc::new(ThrottlingPolicy::new("Report::export", 1, TimeUnit::Hours));
    let guard: Box<dyn CallGuard<str>> =
        Box::new(Throttled::new(service()?, policy, |user: &str| Some(user.to_string())));

    assert!(guard.admit("alice"));
    assert!(guard.admit("bob"));
    assert!(!guard.admit("alice"));
    Ok(())
}

#[test]
fn test_check_reports_remaining() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let policy = Arc::new(ThrottlingPolicy::new("Report::export", 3, TimeUnit::Hours));
    let guard = Throttled::new(service()?, policy, |user: &str| Some(user.to_string()));

    assert_eq!(guard.check("alice").remaining(), 2);
    assert_eq!(guard.check("alice").remaining(), 1);
    assert_eq!(guard.policy().limit, 3);
    Ok(())
}

#[test]
fn test_registry_rejects_duplicate_operations() {
    let result = PolicyRegistry::new([
        ThrottlingPolicy::new("Catalog::search", 1, TimeUnit::Seconds),
        ThrottlingPolicy::new("Catalog::search", 5, TimeUnit::Minutes),
    ]);
    assert!(matches!(result, Err(SluiceError::Config(_))));
}

#[test]
fn test_registry_lookup() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = PolicyRegistry::new([ThrottlingPolicy::new("Catalog::search", 4, TimeUnit::Seconds)])?;
    assert_eq!(registry.len(), 1);
    assert!(registry.get("Catalog::details").is_none());

    let policy = registry.get("Catalog::search").ok_or("missing policy")?;
    let key = policy.key_for(Some("10.0.0.1".into()));
    assert_eq!(key.operation(), "Catalog::search");
    assert_eq!(key.limit(), 4);
    assert_eq!(key.context(), Some("10.0.0.1"));
    assert_eq!(registry.operations().collect::<Vec<_>>(), vec!["Catalog::search"]);
    Ok(())
}
