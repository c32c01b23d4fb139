//! Integration tests for `src/engine/`.

#[path = "engine/agent_test.rs"]
mod agent_test;
#[path = "engine/parser_test.rs"]
mod parser_test;
#[path = "engine/whitelist_test.rs"]
mod whitelist_test;
