//! Pub/Sub delivery: the acknowledgement seam, the REST pull client and the
//! pull loop that feeds the message handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{BridgeError, TransportError};
use crate::handler::MessageHandler;
use crate::sink::Warehouse;

#[derive(Error, Debug)]
pub enum AckError {
    #[error("acknowledge request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("delivery channel closed before acknowledgement")]
    Closed,
}

/// Single-use receipt confirmation for one delivered message.
///
/// Taking `self` by value means a handle can be acknowledged at most once.
#[async_trait]
pub trait AckHandle: Send + 'static {
    async fn acknowledge(self) -> Result<(), AckError>;
}

/// One delivered message: the undecoded body plus its ack handle.
pub struct IncomingEvent<A> {
    pub raw_payload: String,
    pub ack_handle: A,
}

impl<A: AckHandle> IncomingEvent<A> {
    pub fn new(raw_payload: impl Into<String>, ack_handle: A) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            ack_handle,
        }
    }
}

/// Turn the base64 `data` of a Pub/Sub message into payload text.
///
/// Data that is not valid base64 is passed through untouched, so it still
/// reaches the handler (and is acknowledged) before failing to decode.
pub fn message_text(data: &str) -> String {
    match STANDARD.decode(data) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "message data is not base64, passing it through as-is");
            data.to_owned()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

/// Minimal client for the Pub/Sub v1 REST surface of one subscription.
#[derive(Clone)]
pub struct PubSubClient {
    http: Client,
    endpoint: String,
    subscription_path: String,
    access_token: Option<String>,
}

impl PubSubClient {
    pub fn new(config: &Config) -> Result<Self, BridgeError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            endpoint: config.pubsub_endpoint.trim_end_matches('/').to_string(),
            subscription_path: format!(
                "projects/{}/subscriptions/{}",
                config.project_id, config.subscription
            ),
            access_token: config.access_token.clone(),
        })
    }

    pub fn subscription_path(&self) -> &str {
        &self.subscription_path
    }

    fn post(&self, verb: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}:{}", self.endpoint, self.subscription_path, verb);
        let request = self.http.post(url);
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, TransportError> {
        let response = self
            .post("pull")
            .json(&PullRequest { max_messages })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let pulled: PullResponse = response.json().await?;
        Ok(pulled.received_messages)
    }

    pub async fn acknowledge(&self, ack_ids: &[String]) -> Result<(), TransportError> {
        let response = self
            .post("acknowledge")
            .json(&AcknowledgeRequest { ack_ids })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Ack handle for a pulled message.
pub struct PullAck {
    client: PubSubClient,
    ack_id: String,
}

impl PullAck {
    pub fn new(client: PubSubClient, ack_id: String) -> Self {
        Self { client, ack_id }
    }
}

#[async_trait]
impl AckHandle for PullAck {
    async fn acknowledge(self) -> Result<(), AckError> {
        let PullAck { client, ack_id } = self;
        client.acknowledge(&[ack_id]).await?;
        Ok(())
    }
}

impl ReceivedMessage {
    pub fn into_event(self, client: PubSubClient) -> IncomingEvent<PullAck> {
        IncomingEvent::new(
            message_text(&self.message.data),
            PullAck::new(client, self.ack_id),
        )
    }
}

/// Pulls messages and dispatches each to its own handler task.
pub struct Subscriber {
    client: PubSubClient,
    max_messages: u32,
    poll_interval: Duration,
    in_flight: Arc<Semaphore>,
}

impl Subscriber {
    pub fn new(client: PubSubClient, config: &Config) -> Self {
        Self {
            client,
            max_messages: config.max_messages.max(1),
            poll_interval: config.poll_interval(),
            in_flight: Arc::new(Semaphore::new(config.max_concurrent_messages.max(1))),
        }
    }

    /// Runs until the process stops. Only returns if dispatch becomes impossible.
    ///
    /// Handler slots are reserved before each pull and the pull asks for no
    /// more messages than there are slots, so every delivered message starts
    /// its handler (and with it, its acknowledgement) straight away.
    pub async fn run<W: Warehouse>(
        &self,
        handler: Arc<MessageHandler<W>>,
    ) -> Result<(), BridgeError> {
        info!(subscription = %self.client.subscription_path(), "pulling messages");
        loop {
            let mut permits = self.reserve().await?;
            let messages = match self.client.pull(permits.len() as u32).await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, "pull failed");
                    drop(permits);
                    sleep(self.poll_interval).await;
                    continue;
                }
            };
            if messages.is_empty() {
                drop(permits);
                sleep(self.poll_interval).await;
                continue;
            }
            debug!(count = messages.len(), "pulled messages");

            for message in messages {
                // Only reached if the server sends more than was asked for.
                let permit = match permits.pop() {
                    Some(permit) => permit,
                    None => self.acquire().await?,
                };
                let message_id = message.message.message_id.clone();
                let event = message.into_event(self.client.clone());
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(event).await {
                        error!(message_id = %message_id, error = %e, "message handling failed");
                    }
                    drop(permit);
                });
            }
        }
    }

    /// Wait for one free slot, then take up to `max_messages` without waiting.
    async fn reserve(&self) -> Result<Vec<OwnedSemaphorePermit>, BridgeError> {
        let mut permits = vec![self.acquire().await?];
        while permits.len() < self.max_messages as usize {
            match self.in_flight.clone().try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        Ok(permits)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, BridgeError> {
        self.in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::DispatchClosed)
    }
}
