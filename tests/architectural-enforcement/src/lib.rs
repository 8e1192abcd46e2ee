//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on `engine/core` and `engine/cli`:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! These tests are designed to catch violations early in the development cycle.
