//! Independent flows sharing one runtime

use crate::common::*;
use std::sync::Barrier;

#[test]
fn test_parallel_flows_do_not_share_stacks() {
    let rt = TestRuntime::new();
    let threads = 8;
    let per_thread = 5;
    let barrier = Barrier::new(threads);

    std::thread::scope(|s| {
        for t in 0..threads {
            let rt = &rt;
            let barrier = &barrier;
            s.spawn(move || {
                let (flow, manager) = rt.flow();
                let scope = flow.ensure_scope();
                barrier.wait();

                for i in 0..per_thread {
                    let key = (t * 100 + i) as i64;
                    create_product(&flow, &manager, key, "item").unwrap();
                }
                assert_eq!(flow.depth(), 1);

                scope.complete();
                scope.dispose().unwrap();
                assert_eq!(flow.stats().committed, 1);
            });
        }
    });

    assert_eq!(rt.indexed_products().len(), threads * per_thread);
    assert_eq!(rt.source.rows("Product").len(), threads * per_thread);
    assert_eq!(rt.source.stats().commits, threads as u64);
    assert_eq!(rt.store.runs().len(), threads);
}

#[test]
fn test_failing_flow_does_not_affect_others() {
    let rt = TestRuntime::new();
    let (good, good_manager) = rt.flow();
    let (bad, bad_manager) = rt.flow();

    let good_scope = good.ensure_scope();
    let bad_scope = bad.ensure_scope();
    create_product(&good, &good_manager, 1, "lamp").unwrap();
    create_product(&bad, &bad_manager, 2, "desk").unwrap();

    // Dispose order across flows is free: each flow has its own stack
    bad_scope.dispose().unwrap();
    good_scope.complete();
    good_scope.dispose().unwrap();

    assert!(rt.product_row(1).is_some());
    assert_eq!(rt.product_row(2), None);
    assert_eq!(rt.indexed_products(), vec![EntityKey::Int(1)]);
}
