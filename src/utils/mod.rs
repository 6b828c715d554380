pub(crate) mod async_task;
pub mod observability;

pub use observability::*;
