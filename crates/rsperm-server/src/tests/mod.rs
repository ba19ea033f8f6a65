//! Test support and service-level tests.
//!
//! - Failure-injecting store mock
//! - Authorization service behaviour (grants, groups, delegation, reload)
