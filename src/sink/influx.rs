use super::{Measurement, Point, StoreError, TimeSeriesStore, ENTITY_TAG};
use crate::sample::EntityId;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;

const EPOCH_RFC3339: &str = "1970-01-01T00:00:00Z";

/// InfluxDB v2 HTTP client. The underlying connection pool is shared by clones.
#[derive(Clone)]
pub struct InfluxStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct DeletePredicate {
    start: String,
    stop: String,
    predicate: String,
}

impl InfluxStore {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: url.trim().trim_end_matches('/').to_string(),
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Token {token}")),
            None => request,
        }
    }
}

async fn check(response: Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

impl TimeSeriesStore for InfluxStore {
    async fn write(&self, bucket: &str, org: &str, point: &Point) -> Result<(), StoreError> {
        let request = self
            .client
            .post(format!("{}/api/v2/write", self.base_url))
            .query(&[("org", org), ("bucket", bucket), ("precision", "ns")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(point.to_line_protocol());
        let response = self.authorize(request).send().await?;
        check(response).await
    }

    async fn delete_series(
        &self,
        bucket: &str,
        org: &str,
        measurement: Measurement,
        entity_id: EntityId,
    ) -> Result<(), StoreError> {
        let payload = DeletePredicate {
            start: EPOCH_RFC3339.to_string(),
            stop: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            predicate: format!(
                "_measurement=\"{}\" AND {ENTITY_TAG}=\"{entity_id}\"",
                measurement.as_str()
            ),
        };
        let request = self
            .client
            .post(format!("{}/api/v2/delete", self.base_url))
            .query(&[("org", org), ("bucket", bucket)])
            .json(&payload);
        let response = self.authorize(request).send().await?;
        check(response).await
    }
}
