pub mod config;
pub mod yaml_include;

/// Common utilities shared across the feedback fraud scoring workspace
///
/// This crate provides shared functionality used by the `scoring` engine and
/// the `feedback` deployment crate, including:
///
/// - Configuration loading
/// - YAML include merging for build-time config composition
/// - Shared test utilities and fixtures

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{generate_identity_hash, generate_unique_id, utc};
