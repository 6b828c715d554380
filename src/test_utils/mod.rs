//! Shared fixtures for unit tests: record and metric group builders plus an
//! in-memory console.
mod common;
mod fake_console;

pub use common::*;
pub use fake_console::*;
