//! Integration tests for `src/config/`.

#[path = "config/env_test.rs"]
mod env_test;
#[path = "config/schema_test.rs"]
mod schema_test;
