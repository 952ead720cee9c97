//! Documented registry and scope behaviors, end to end

use crate::common::*;

#[test]
fn test_delete_after_index_resolves_to_delete() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    create_product(&flow, &manager, 1, "lamp").unwrap();
    create_product(&flow, &manager, 2, "desk").unwrap();
    remove_product(&flow, &manager, 1).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    let runs = rt.store.runs();
    assert_eq!(runs.len(), 1);
    // A single remaining key goes through the single-document `index` call
    assert_eq!(
        runs[0].operations,
        vec![product_op("delete", &[1]), product_op("index", &[2])]
    );
    assert_eq!(rt.indexed_products(), vec![EntityKey::Int(2)]);
    assert_eq!(rt.product_row(1), None);
    assert!(rt.product_row(2).is_some());
}

#[test]
fn test_index_after_delete_stays_deleted() {
    let rt = TestRuntime::new();
    rt.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    manager.delete("Product", 1).unwrap();
    assert!(!manager.index("Product", 1).unwrap());
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(rt.applied(), vec![product_op("delete", &[1])]);
}

#[test]
fn test_repository_calls_share_one_unit_of_work() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    for (key, name) in [(1, "lamp"), (2, "desk"), (3, "chair")] {
        create_product(&flow, &manager, key, name).unwrap();
    }
    // Nothing is visible before the outer scope commits
    assert_eq!(rt.product_row(1), None);
    assert!(rt.store.runs().is_empty());

    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(rt.applied(), vec![product_op("index_many", &[1, 2, 3])]);
    assert_eq!(rt.source.stats().commits, 1);
    assert_eq!(rt.source.stats().opened, 1);
    let stats = flow.stats();
    assert_eq!(stats.begun, 1);
    assert_eq!(stats.committed, 1);
}

#[test]
fn test_inner_scope_completion_defers_to_owner() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let outer = flow.ensure_scope();
    let inner = flow.ensure_scope();
    save_product(&inner, 1, "lamp").unwrap();
    manager.index("Product", 1).unwrap();
    inner.complete();
    inner.dispose().unwrap();

    assert!(rt.store.runs().is_empty());
    assert_eq!(rt.source.stats().commits, 0);
    assert_eq!(flow.depth(), 1);

    outer.complete();
    outer.dispose().unwrap();
    assert_eq!(rt.applied(), vec![product_op("index", &[1])]);
    assert!(rt.product_row(1).is_some());
}

#[test]
fn test_uncompleted_outer_scope_discards_everything() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let outer = flow.ensure_scope();
    create_product(&flow, &manager, 1, "lamp").unwrap();
    outer.dispose().unwrap();

    assert_eq!(rt.product_row(1), None);
    assert!(rt.store.runs().is_empty());
    assert_eq!(flow.stats().rolled_back, 1);
}

#[test]
fn test_full_reindex_wins_over_individual_registrations() {
    let rt = TestRuntime::new();
    rt.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    rt.source.seed("Product", 2, r#"{"name":"desk"}"#);
    let (flow, manager) = rt.flow();

    let scope = flow.ensure_scope();
    manager.index("Product", 1).unwrap();
    manager.reindex_all("Product").unwrap();
    manager.delete("Product", 2).unwrap();
    create_product(&flow, &manager, 3, "chair").unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(rt.applied(), vec![product_op("index_many", &[1, 2, 3])]);
}

#[test]
fn test_suppressed_scope_has_no_transaction() {
    let rt = TestRuntime::new();
    let (flow, _manager) = rt.flow();

    let outer = flow.ensure_scope();
    let suppressed = flow.begin_suppressed();
    let err = save_product(&suppressed, 1, "lamp").unwrap_err();
    assert!(err.is_no_active_transaction());
    assert!(!err.is_fatal());
    suppressed.dispose().unwrap();

    // The outer scope is unaffected
    save_product(&outer, 1, "lamp").unwrap();
    outer.complete();
    outer.dispose().unwrap();
    assert!(rt.product_row(1).is_some());
}

#[test]
fn test_independent_transaction_commits_despite_outer_rollback() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    let outer = flow.ensure_scope();
    create_product(&flow, &manager, 1, "lamp").unwrap();
    {
        let audit = flow.begin_new_transaction(None);
        create_product(&flow, &manager, 2, "audit").unwrap();
        audit.complete();
        audit.dispose().unwrap();
    }
    outer.dispose().unwrap();

    assert_eq!(rt.product_row(1), None);
    assert!(rt.product_row(2).is_some());
    assert_eq!(rt.indexed_products(), vec![EntityKey::Int(2)]);
}

#[test]
fn test_search_sees_committed_documents() {
    let rt = TestRuntime::new();
    let (flow, manager) = rt.flow();

    create_product(&flow, &manager, 1, "Brass Desk Lamp").unwrap();
    create_product(&flow, &manager, 2, "Oak Desk").unwrap();

    let products = EntityType::new("Product");
    assert_eq!(rt.store.search(&products, "desk"), vec![EntityKey::Int(1), EntityKey::Int(2)]);
    assert_eq!(rt.store.search(&products, "lamp"), vec![EntityKey::Int(1)]);
}
