//! Hourly aggregation and model evaluation.
//!
//! The aggregator turns cleaned pings into the per-line, per-hour table
//! handed to trainers; the evaluator scores trained models against held-out
//! cleaned routes.

pub mod aggregate;
pub mod evaluate;
pub mod types;
pub mod utility;
