//! Integration tests for `src/session/`.

#[path = "session/keys_test.rs"]
mod keys_test;
#[path = "session/manager_test.rs"]
mod manager_test;
