//! Shared test utilities for llmgate integration tests.
//!
//! This module provides:
//! - `FakeBackend`, an axum server imitating the inference backend
//! - `TestHarness` for isolated test execution with temp directories

pub mod fake_backend;
pub mod harness;

pub use fake_backend::FakeBackend;
pub use harness::TestHarness;
