//! Agentic coding-assistant orchestrator.
//!
//! A conversation turn is classified into one of four routes (chat, context
//! collection, planning, direct coding). Plans and file changes pass through
//! human approval before anything touches the workspace. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, invariants, phase
//!   transitions, file-operation semantics). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, model process, prompts,
//!   checkpoints). Isolated to enable test doubles.
//!
//! Orchestration modules ([`agents`], [`engine`], [`events`]) compose the two.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
