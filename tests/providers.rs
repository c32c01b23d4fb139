//! Integration tests for `src/providers/`.

#[path = "providers/backoff_test.rs"]
mod backoff_test;
#[path = "providers/capabilities_test.rs"]
mod capabilities_test;
#[path = "providers/kinds_test.rs"]
mod kinds_test;
