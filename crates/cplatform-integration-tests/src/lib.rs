//! cplatform Integration Tests
//!
//! End-to-end convergence scenarios for the cplatform engine, run against a
//! recording in-memory gateway. It is NOT published to crates.io.
//!
//! # Test Categories
//!
//! - **topic_lifecycle**: Create, read, update ordering and delete of topics
//! - **topic_convergence**: Timeouts, cancellation and gateway failures during waits
//! - **role_bindings**: Binding lifecycle, drift and replacement for all binding kinds
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p cplatform-integration-tests
//!
//! # Run specific test suite
//! cargo test -p cplatform-integration-tests --test topic_lifecycle
//!
//! # Run with logging
//! RUST_LOG=debug cargo test -p cplatform-integration-tests -- --nocapture
//! ```
//!
//! Time is paused in every scenario, so convergence waits complete instantly.

pub mod fixtures;
pub mod helpers;
pub mod mocks;

pub use fixtures::*;
pub use helpers::*;
