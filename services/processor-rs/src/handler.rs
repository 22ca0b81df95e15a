use thiserror::Error;
use tracing::{error, info, warn};

use crate::decode::{decode, DecodeError};
use crate::error::TransportError;
use crate::sink::{RowError, RowSinkAdapter, SinkError, Warehouse};
use crate::subscription::{AckHandle, IncomingEvent};

/// Where a message ended up. Every variant is terminal: the message has
/// already been acknowledged and will not be redelivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Inserted,
    Malformed(DecodeError),
    InsertFailed(Vec<RowError>),
}

#[derive(Error, Debug)]
pub enum HandleError {
    #[error("warehouse insert failed: {0}")]
    Transport(#[from] TransportError),
}

/// Acknowledge, decode, insert. One call per delivered message.
pub struct MessageHandler<W> {
    sink: RowSinkAdapter<W>,
}

impl<W: Warehouse> MessageHandler<W> {
    pub fn new(warehouse: W) -> Self {
        Self {
            sink: RowSinkAdapter::new(warehouse),
        }
    }

    /// Handle one message.
    ///
    /// The message is acknowledged before its payload is looked at, so
    /// undecodable or rejected messages are dropped rather than redelivered.
    /// Row rejections are logged and returned as [`Outcome::InsertFailed`];
    /// only a transport failure is returned as an error.
    pub async fn handle<A: AckHandle>(
        &self,
        event: IncomingEvent<A>,
    ) -> Result<Outcome, HandleError> {
        let IncomingEvent {
            raw_payload,
            ack_handle,
        } = event;
        info!(payload = %raw_payload, "message arrived");

        if let Err(e) = ack_handle.acknowledge().await {
            warn!(error = %e, "failed to acknowledge message, it may be redelivered");
        }

        let record = match decode(&raw_payload) {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "dropping undecodable message");
                return Ok(Outcome::Malformed(e));
            }
        };

        match self.sink.insert_row(&record).await {
            Ok(()) => {
                info!(table = %self.sink.table(), step = record.step, "row inserted");
                Ok(Outcome::Inserted)
            }
            Err(SinkError::RowsRejected(rows)) => {
                for row in &rows {
                    for detail in &row.errors {
                        error!(
                            table = %self.sink.table(),
                            row = row.index,
                            code = %detail.code,
                            location = detail.location.as_deref().unwrap_or(""),
                            detail = %detail.message,
                            "row rejected"
                        );
                    }
                }
                Ok(Outcome::InsertFailed(rows))
            }
            Err(SinkError::TransportFailure(e)) => {
                error!(table = %self.sink.table(), error = %e, "insert transport failure");
                Err(HandleError::Transport(e))
            }
        }
    }
}
