
use async_trait::async_trait;
use axum::{
    extract::{State, Json},
    routing::{get, post},
    Router, http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::oneshot;
use tower::{limit::ConcurrencyLimitLayer, ServiceBuilder};
use tracing::{info, error, warn};

use txbridge_processor::bigquery::BigQueryClient;
use txbridge_processor::config::Config;
use txbridge_processor::error::BridgeError;
use txbridge_processor::handler::MessageHandler;
use txbridge_processor::sink::{TableId, Warehouse};
use txbridge_processor::subscription::{message_text, AckError, AckHandle, IncomingEvent, PubsubMessage};
use txbridge_processor::telemetry;

/// Body Pub/Sub POSTs to a push endpoint.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PubsubMessage,
    #[serde(default)]
    subscription: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct HealthResponse {
    ok: bool,
    table: String,
    subscription: String,
}

struct AppState<W> {
    handler: Arc<MessageHandler<W>>,
    warehouse: W,
    subscription: String,
}

type SharedState<W> = Arc<AppState<W>>;

/// Acknowledging a push delivery means answering the HTTP request.
struct PushAck(oneshot::Sender<()>);

#[async_trait]
impl AckHandle for PushAck {
    async fn acknowledge(self) -> Result<(), AckError> {
        self.0.send(()).map_err(|_| AckError::Closed)
    }
}

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    telemetry::init();

    let config = Config::load()?;

    let warehouse = BigQueryClient::new(&config)?;
    let state = Arc::new(AppState {
        handler: Arc::new(MessageHandler::new(warehouse.clone())),
        warehouse,
        subscription: format!("projects/{}/subscriptions/{}", config.project_id, config.subscription),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("API running → http://{}/health", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app<W: Warehouse>(state: SharedState<W>) -> Router {
    Router::new()
        .route("/push", post(push_handler::<W>))
        .route("/health", get(health_handler::<W>))
        .layer(ServiceBuilder::new()
            .layer(ConcurrencyLimitLayer::new(32))
        )
        .with_state(state)
}

/// Responds 204 as soon as the handler acknowledges, before the payload is
/// decoded or inserted. Handling carries on in its own task.
async fn push_handler<W: Warehouse>(
    State(state): State<SharedState<W>>,
    Json(envelope): Json<PushEnvelope>,
) -> StatusCode {
    let PushEnvelope { message, subscription } = envelope;
    let payload = message_text(&message.data);
    let message_id = message.message_id;
    let (ack_tx, ack_rx) = oneshot::channel();

    let handler = state.handler.clone();
    tokio::spawn(async move {
        let event = IncomingEvent::new(payload, PushAck(ack_tx));
        if let Err(e) = handler.handle(event).await {
            error!(message_id = %message_id, subscription = %subscription, error = %e, "message handling failed");
        }
    });

    ack_status(ack_rx).await
}

/// 204 once the ack handle fires. The handler acknowledges before anything
/// else, so the handle only goes away unacknowledged if its task panicked.
async fn ack_status(ack_rx: oneshot::Receiver<()>) -> StatusCode {
    match ack_rx.await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => {
            warn!("handler finished without acknowledging, asking for redelivery");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn health_handler<W: Warehouse>(
    State(state): State<SharedState<W>>,
) -> (StatusCode, Json<HealthResponse>) {
    let table = TableId::transactions();
    let ok = state.warehouse.table_reachable(&table).await;
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(HealthResponse {
        ok,
        table: table.to_string(),
        subscription: state.subscription.clone(),
    }))
}
