use std::sync::Arc;

use tracing::{error, info};

use txbridge_processor::bigquery::BigQueryClient;
use txbridge_processor::config::Config;
use txbridge_processor::error::BridgeError;
use txbridge_processor::handler::MessageHandler;
use txbridge_processor::subscription::{PubSubClient, Subscriber};
use txbridge_processor::telemetry;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    telemetry::init();

    let config = Config::load()?;

    let warehouse = BigQueryClient::new(&config)?;
    let handler = Arc::new(MessageHandler::new(warehouse));
    let pubsub = PubSubClient::new(&config)?;
    let subscriber = Subscriber::new(pubsub, &config);

    info!(project = %config.project_id, subscription = %config.subscription, "processor up");

    tokio::select! {
        result = subscriber.run(handler) => {
            if let Err(e) = &result {
                error!(error = %e, "subscriber stopped");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
