//! BigQuery `tabledata.insertAll` over REST.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::error::{BridgeError, TransportError};
use crate::sink::{ErrorDetail, InsertOutcome, Row, RowInsertRequest, TableId, Warehouse};

#[derive(Serialize)]
struct InsertAllBody<'a> {
    kind: &'static str,
    rows: Vec<RowJson<'a>>,
}

// No insertId: every delivery becomes its own row.
#[derive(Serialize)]
struct RowJson<'a> {
    json: &'a Row,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Debug, Deserialize)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

/// Shared, immutable handle to the warehouse. Clone freely.
#[derive(Clone)]
pub struct BigQueryClient {
    http: Client,
    endpoint: String,
    project_id: String,
    access_token: Option<String>,
}

impl BigQueryClient {
    pub fn new(config: &Config) -> Result<Self, BridgeError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            endpoint: config.bigquery_endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn table_url(&self, table: &TableId) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.endpoint, self.project_id, table.dataset, table.table
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn insert_all(
        &self,
        request: &RowInsertRequest,
    ) -> Result<InsertOutcome, TransportError> {
        let url = format!("{}/insertAll", self.table_url(&request.table));
        let body = InsertAllBody {
            kind: "bigquery#tableDataInsertAllRequest",
            rows: request.rows.iter().map(|json| RowJson { json }).collect(),
        };

        let response = self.authorized(self.http.post(url)).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: InsertAllResponse = response.json().await?;
        if parsed.insert_errors.is_empty() {
            return Ok(InsertOutcome::Success);
        }

        let mut by_row: BTreeMap<usize, Vec<ErrorDetail>> = BTreeMap::new();
        for entry in parsed.insert_errors {
            by_row.entry(entry.index).or_default().extend(entry.errors);
        }
        Ok(InsertOutcome::RowErrors(by_row))
    }

    /// True when the table metadata can be fetched.
    async fn table_reachable(&self, table: &TableId) -> bool {
        match self.authorized(self.http.get(self.table_url(table))).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(table = %table, status = %response.status(), "table lookup failed");
                false
            }
            Err(e) => {
                warn!(table = %table, error = %e, "table lookup failed");
                false
            }
        }
    }
}
