//! Pub/Sub → BigQuery bridge for transaction events.
//!
//! Each delivered message is acknowledged, decoded into a
//! [`decode::TransactionRecord`] and written as one row into
//! `my_dataset_1.pubsubtobigquery`. Failures are logged, never retried.

pub mod bigquery;
pub mod config;
pub mod decode;
pub mod error;
pub mod handler;
pub mod sink;
pub mod subscription;
pub mod telemetry;

#[cfg(test)]
mod testing;
