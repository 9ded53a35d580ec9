//! I/O adapters: filesystem, model process, prompts and persistence.

pub mod checkpoint;
pub mod codex;
pub mod config;
pub mod files;
pub mod init;
pub mod process;
pub mod prompt;
pub mod task_log;
