//! Works out which resource classes must be cached for the enabled metric
//! groups. Pure function of configuration; no console calls.

mod resolver;
pub use resolver::*;
