//! Integration Tests
//!
//! End-to-end units of work through the public `tandem` API, organized by:
//! - Scenarios: the documented registry and scope behaviors
//! - Failures: how each error class surfaces
//! - Flows: independent flows sharing one runtime across threads

#[path = "../common/mod.rs"]
mod common;

mod failures;
mod flows;
mod scenarios;
