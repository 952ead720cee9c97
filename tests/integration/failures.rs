//! How each error class surfaces through a unit of work

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_flush_failure_rolls_back_database_work() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    create_product(&flow, &manager, 1, "lamp").unwrap();
    scope.complete();
    rt.store.fail_next_run();

    let err = scope.dispose().unwrap_err();
    assert!(matches!(err, Error::Search { .. }));
    assert!(!err.is_fatal());
    assert_eq!(rt.product_row(1), None);
    assert!(rt.indexed_products().is_empty());
    assert_eq!(flow.depth(), 0);

    // The flow is usable again afterwards
    create_product(&flow, &manager, 1, "lamp").unwrap();
    assert!(rt.product_row(1).is_some());
}

#[test]
fn test_database_commit_failure_surfaces_after_flush() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    create_product(&flow, &manager, 1, "lamp").unwrap();
    scope.complete();
    rt.source.fail_next_commit();

    let err = scope.dispose().unwrap_err();
    assert!(matches!(err, Error::Database { .. }));
    assert_eq!(rt.product_row(1), None);
    // The flush ran before the commit was attempted
    assert_eq!(rt.store.runs().len(), 1);
}

#[test]
fn test_out_of_order_dispose_is_fatal() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let outer = flow.begin_new_transaction(None);
    save_product(&outer, 1, "lamp").unwrap();
    let inner = flow.begin_new_transaction(None);
    outer.complete();
    let err = outer.dispose().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::ScopeOrderViolation { .. }));
    assert_eq!(rt.product_row(1), None);
    inner.dispose().unwrap();
    assert_eq!(flow.depth(), 0);

    // The flow keeps working after the violation
    create_product(&flow, &manager, 2, "desk").unwrap();
    assert!(rt.product_row(2).is_some());
    assert_eq!(rt.indexed_products(), vec![EntityKey::Int(2)]);
}

#[test]
fn test_missing_indexing_provider_is_fatal() {
    let source = MemoryDataSource::new("main");
    let tandem = Tandem::builder()
        .data_source(Arc::new(source))
        .build()
        .unwrap();
    let flow = tandem.flow();

    let err = tandem.index_manager(&flow).index("Product", 1).unwrap_err();
    assert!(matches!(err, Error::NoProvider { kind: "indexing" }));
    assert!(err.is_fatal());
    assert_eq!(flow.depth(), 0);
}

#[test]
fn test_unknown_data_source() {
    let rt = TestRuntime::new();
    let (flow, _manager) = rt.flow();
    let scope = flow.ensure_scope();
    let err = with_connection::<MemoryConnection, _>(&scope, "archive", |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::UnknownDataSource { ref name } if name == "archive"));
    scope.dispose().unwrap();
}

#[test]
fn test_configured_timeout_rolls_back_slow_transaction() {
    let rt = TestRuntime::with_config(TandemConfig {
        default_timeout_ms: 5,
        ..TandemConfig::default()
    });
    let (flow, manager) = rt.flow();

    let scope = flow.begin_new_transaction(None);
    create_product(&flow, &manager, 1, "lamp").unwrap();
    std::thread::sleep(Duration::from_millis(30));
    scope.complete();

    let err = scope.dispose().unwrap_err();
    assert!(matches!(err, Error::TransactionTimeout { timeout_ms: 5, .. }));
    assert_eq!(rt.product_row(1), None);
}
