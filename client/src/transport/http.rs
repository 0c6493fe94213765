//! HTTP transport over reqwest.

use std::sync::Mutex;

use async_trait::async_trait;
use stockline_engine::{BatchResponse, PendingBatch, ProductSnapshot};
use uuid::Uuid;

use super::{
    BatchRequest, CatalogQuery, CatalogResponse, ErrorBody, InvalidationSender, PushFeed,
    TransportAdapter, TransportError,
};
use crate::config::Config;

/// Production transport: REST endpoints plus an optional push feed.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    ws_url: Option<String>,
    /// Prefix of idempotency keys, unique per process
    session: Uuid,
    feed: Mutex<Option<PushFeed>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            ws_url: config.ws_url.clone(),
            session: Uuid::new_v4(),
            feed: Mutex::new(None),
        })
    }

    fn idempotency_key(&self, batch: &PendingBatch) -> String {
        format!("{}-{}", self.session, batch.batch_id)
    }

    /// Turn a non-success response into an error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
            error: if text.is_empty() {
                status.to_string()
            } else {
                text
            },
            ..ErrorBody::default()
        });
        Err(TransportError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl TransportAdapter for HttpTransport {
    async fn fetch_catalog(
        &self,
        query: &CatalogQuery,
    ) -> Result<Vec<ProductSnapshot>, TransportError> {
        let response = self
            .client
            .get(format!("{}/products", self.api_url))
            .query(&query.params())
            .send()
            .await?;
        let body: CatalogResponse = Self::check(response).await?.json().await?;

        tracing::debug!(products = body.products.len(), "Fetched catalog");
        Ok(body.products)
    }

    async fn send_mutation_batch(
        &self,
        batch: &PendingBatch,
    ) -> Result<BatchResponse, TransportError> {
        let request = BatchRequest {
            idempotency_key: self.idempotency_key(batch),
            batch: batch.clone(),
        };
        let response = self
            .client
            .post(format!("{}/cart/batch", self.api_url))
            .json(&request)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn subscribe_invalidation(
        &self,
        handler: InvalidationSender,
    ) -> Result<(), TransportError> {
        let Some(ws_url) = &self.ws_url else {
            tracing::info!("No push feed configured, relying on manual refresh");
            return Ok(());
        };

        let mut feed = self
            .feed
            .lock()
            .map_err(|_| TransportError::Push("feed lock poisoned".to_string()))?;
        if let Some(previous) = feed.replace(PushFeed::spawn(ws_url.clone(), handler)) {
            previous.stop();
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Ok(mut feed) = self.feed.lock() {
            if let Some(feed) = feed.take() {
                feed.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_per_batch() {
        let transport = HttpTransport::new(&Config::new("http://localhost:9")).unwrap();
        let batch = PendingBatch {
            batch_id: 4,
            removals: Vec::new(),
            deltas: Vec::new(),
        };
        let key = transport.idempotency_key(&batch);
        assert_eq!(key, transport.idempotency_key(&batch));
        assert!(key.ends_with("-4"));
    }
}
