//! Integration tests for `src/identifiers.rs`.

#[path = "identifiers/normalize_test.rs"]
mod normalize_test;
