//! Integration tests for `src/template.rs`.

#[path = "template/expand_test.rs"]
mod expand_test;
