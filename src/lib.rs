//! Batched, rate-limited bulk operations against Microsoft Entra ID
//!
//! The [`engine`] module is independent of Graph: it runs any
//! [`engine::ItemOperation`] over a list of [`engine::WorkItem`]s in fixed-size
//! batches with bounded concurrency, retries throttled calls, and reports
//! every item's outcome. [`cmd`] wires it to the CLI commands.

pub mod cmd;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod input;
pub mod report;

pub use error::{BulkError, Result};
