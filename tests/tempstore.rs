//! Integration tests for `src/tempstore.rs`.

#[path = "tempstore/store_test.rs"]
mod store_test;
