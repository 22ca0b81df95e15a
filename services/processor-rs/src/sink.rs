//! Row sink: the warehouse seam and the single-row insert adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::decode::TransactionRecord;
use crate::error::TransportError;

pub const DATASET_NAME: &str = "my_dataset_1";
pub const TABLE_NAME: &str = "pubsubtobigquery";

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn of(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_owned(),
            table: table.to_owned(),
        }
    }

    /// The destination every transaction row is written to.
    pub fn transactions() -> Self {
        Self::of(DATASET_NAME, TABLE_NAME)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// A batch of rows addressed to one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RowInsertRequest {
    pub table: TableId,
    pub rows: Vec<Row>,
}

impl RowInsertRequest {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            rows: Vec::new(),
        }
    }

    pub fn add_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }
}

/// A single structured reason attached to a rejected row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "reason", default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}: {}", self.code, location, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Success,
    /// Errors keyed by the index of the row within the submitted batch.
    RowErrors(BTreeMap<usize, Vec<ErrorDetail>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub index: usize,
    pub errors: Vec<ErrorDetail>,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "row {}:", self.index)?;
        for error in &self.errors {
            write!(f, " [{}]", error)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{} row(s) rejected by the warehouse", .0.len())]
    RowsRejected(Vec<RowError>),
    #[error("insert failed before any row was accepted: {0}")]
    TransportFailure(#[from] TransportError),
}

/// Anything that accepts batched row inserts and reports per-row failures.
///
/// Implementations are shared by every in-flight message, so they must be
/// safe to call concurrently.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    async fn insert_all(
        &self,
        request: &RowInsertRequest,
    ) -> Result<InsertOutcome, TransportError>;

    /// Whether `table` currently accepts requests. Used by health probes only.
    async fn table_reachable(&self, table: &TableId) -> bool;
}

#[async_trait]
impl<W: Warehouse + ?Sized> Warehouse for Arc<W> {
    async fn insert_all(
        &self,
        request: &RowInsertRequest,
    ) -> Result<InsertOutcome, TransportError> {
        (**self).insert_all(request).await
    }

    async fn table_reachable(&self, table: &TableId) -> bool {
        (**self).table_reachable(table).await
    }
}

/// Writes one transaction at a time into the fixed destination table.
pub struct RowSinkAdapter<W> {
    warehouse: W,
    table: TableId,
}

impl<W: Warehouse> RowSinkAdapter<W> {
    pub fn new(warehouse: W) -> Self {
        Self {
            warehouse,
            table: TableId::transactions(),
        }
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    pub async fn insert_row(&self, record: &TransactionRecord) -> Result<(), SinkError> {
        let request = RowInsertRequest::new(self.table.clone()).add_row(record.to_row());

        match self.warehouse.insert_all(&request).await? {
            InsertOutcome::Success => Ok(()),
            InsertOutcome::RowErrors(errors) if errors.is_empty() => Ok(()),
            InsertOutcome::RowErrors(errors) => Err(SinkError::RowsRejected(
                errors
                    .into_iter()
                    .map(|(index, errors)| RowError { index, errors })
                    .collect(),
            )),
        }
    }
}
