//! In-process fakes for the warehouse and acknowledgement seams, plus a
//! tracing layer that keeps emitted events for assertions.

use std::collections::BTreeMap;
use std::fmt;
use std::future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

use crate::error::TransportError;
use crate::sink::{ErrorDetail, InsertOutcome, RowInsertRequest, TableId, Warehouse};
use crate::subscription::{AckError, AckHandle};

/// Ordered record of side effects shared between fakes.
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<&'static str> {
    journal.lock().unwrap().clone()
}

pub fn payment_payload() -> String {
    r#"{"step":1,"type":"PAYMENT","amount":9839.64,"nameOrig":"C1231006815","oldbalanceOrg":170136.0,"newbalanceOrig":160296.36,"nameDest":"M1979787155","oldbalanceDest":0.0,"newbalanceDest":0.0,"isFraud":0,"isFlaggedFraud":0}"#
        .to_string()
}

enum Behaviour {
    Succeed,
    Reject(BTreeMap<usize, Vec<ErrorDetail>>),
    Unreachable,
    Stall,
}

pub struct RecordingWarehouse {
    behaviour: Behaviour,
    requests: Mutex<Vec<RowInsertRequest>>,
    journal: Journal,
}

impl RecordingWarehouse {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            requests: Mutex::new(Vec::new()),
            journal: journal(),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(Behaviour::Succeed)
    }

    pub fn rejecting(index: usize, errors: Vec<ErrorDetail>) -> Self {
        Self::with(Behaviour::Reject(BTreeMap::from([(index, errors)])))
    }

    pub fn unreachable() -> Self {
        Self::with(Behaviour::Unreachable)
    }

    /// Records the request, then never answers.
    pub fn stalling() -> Self {
        Self::with(Behaviour::Stall)
    }

    pub fn journaling(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn requests(&self) -> Vec<RowInsertRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn insert_all(
        &self,
        request: &RowInsertRequest,
    ) -> Result<InsertOutcome, TransportError> {
        self.journal.lock().unwrap().push("insert");
        self.requests.lock().unwrap().push(request.clone());
        match &self.behaviour {
            Behaviour::Succeed => Ok(InsertOutcome::Success),
            Behaviour::Reject(errors) => Ok(InsertOutcome::RowErrors(errors.clone())),
            Behaviour::Unreachable => Err(TransportError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            }),
            Behaviour::Stall => future::pending().await,
        }
    }

    async fn table_reachable(&self, _table: &TableId) -> bool {
        !matches!(self.behaviour, Behaviour::Unreachable)
    }
}

/// Ack handle that writes "ack" to a journal, optionally failing afterwards.
pub struct JournalAck {
    journal: Journal,
    fail: bool,
}

impl JournalAck {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: false,
        }
    }

    pub fn failing(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: true,
        }
    }
}

#[async_trait]
impl AckHandle for JournalAck {
    async fn acknowledge(self) -> Result<(), AckError> {
        self.journal.lock().unwrap().push("ack");
        if self.fail {
            Err(AckError::Closed)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: BTreeMap<&'static str, String>,
}

struct FieldRecorder<'a>(&'a mut BTreeMap<&'static str, String>);

impl Visit for FieldRecorder<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name(), format!("{:?}", value));
    }
}

/// Layer that stores every event seen while its guard is alive.
#[derive(Clone, Default)]
pub struct EventCapture(Arc<Mutex<Vec<CapturedEvent>>>);

impl EventCapture {
    /// Route this thread's events into the capture until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.fields.get("message").map(String::as_str) == Some(message))
            .cloned()
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldRecorder(&mut fields));
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}
