//! Core of a Prometheus exporter for a remotely managed mainframe estate.
//!
//! The exporter keeps a cache of console resources (CPCs, partitions,
//! adapters and their children) that is kept current by change notifications
//! and a background poll. Scrapes render metric records from one consistent
//! snapshot of that cache plus metric service values fetched per scrape.
//!
//! Entry point is [`ExporterBuilder`]; the console itself is reached through
//! the [`ConsoleClient`] trait.

mod cache;
mod collector;
mod config;
mod console;
pub mod constants;
mod dependency;
mod errors;
mod exporter;
pub mod metrics;
mod notification;
mod resource;
mod scheduler;
pub mod utils;

pub use cache::*;
pub use collector::*;
pub use self::config::*;
pub use console::*;
pub use dependency::*;
pub use errors::*;
pub use exporter::*;
pub use notification::*;
pub use resource::*;
pub use scheduler::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
