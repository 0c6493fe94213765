//! The boundary between the storefront and the marketplace server.
//!
//! The controller talks to the server only through [`TransportAdapter`], so
//! tests can swap in a scripted transport and the engine never sees a
//! socket. [`HttpTransport`] is the production adapter: reqwest for catalog
//! pulls and cart batches, a tokio-tungstenite feed for invalidations.

mod http;
mod protocol;
mod push;

pub use http::HttpTransport;
pub use protocol::*;
pub use push::PushFeed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockline_engine::{
    BatchResponse, PendingBatch, ProductId, ProductSnapshot, ProductStatus, SyncError, Version,
};
use tokio::sync::mpsc;

/// Sender half handed to [`TransportAdapter::subscribe_invalidation`].
pub type InvalidationSender = mpsc::UnboundedSender<InvalidationEvent>;

/// Which slice of the catalog to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery {
    pub status: Option<ProductStatus>,
    pub seller_id: Option<String>,
}

impl CatalogQuery {
    /// Query string pairs for the products endpoint.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(status) = self.status {
            let status = match status {
                ProductStatus::Pending => "pending",
                ProductStatus::Approved => "approved",
                ProductStatus::Rejected => "rejected",
                ProductStatus::Withdrawn => "withdrawn",
            };
            params.push(("status", status.to_string()));
        }
        if let Some(seller_id) = &self.seller_id {
            params.push(("sellerId", seller_id.clone()));
        }
        params
    }
}

/// What happened to a product on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidationKind {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    /// The feed reconnected and may have missed events
    Resync,
}

/// A server signal that cached product state is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    /// Absent for [`InvalidationKind::Resync`]
    pub product_id: Option<ProductId>,
}

impl InvalidationEvent {
    pub fn new(kind: InvalidationKind, product_id: impl Into<ProductId>) -> Self {
        Self {
            kind,
            product_id: Some(product_id.into()),
        }
    }

    pub fn resync() -> Self {
        Self {
            kind: InvalidationKind::Resync,
            product_id: None,
        }
    }
}

/// Network operations the controller depends on.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Pull the catalog slice described by `query`.
    async fn fetch_catalog(&self, query: &CatalogQuery)
        -> Result<Vec<ProductSnapshot>, TransportError>;

    /// Send one coalesced batch of cart writes.
    async fn send_mutation_batch(&self, batch: &PendingBatch)
        -> Result<BatchResponse, TransportError>;

    /// Start delivering invalidation events to `handler`.
    ///
    /// Returns once the subscription is set up; events arrive until the
    /// receiver is dropped.
    async fn subscribe_invalidation(&self, handler: InvalidationSender)
        -> Result<(), TransportError>;
}

/// Transport failures, before classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("version conflict: {message}")]
    Conflict {
        product_id: Option<ProductId>,
        server_version: Option<Version>,
        message: String,
    },

    #[error("rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("push feed error: {0}")]
    Push(String),
}

impl TransportError {
    /// Map a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: ErrorBody) -> Self {
        let message = body.details.unwrap_or(body.error);
        match status {
            409 => TransportError::Conflict {
                product_id: body.product_id,
                server_version: body.current_version,
                message,
            },
            400..=499 => TransportError::Rejected { status, message },
            _ => TransportError::Server { status, message },
        }
    }

    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_)
                | TransportError::Timeout
                | TransportError::Server { .. }
                | TransportError::Decode(_)
                | TransportError::Push(_)
        )
    }

    /// Classify into the engine's failure taxonomy.
    ///
    /// `held_version` looks up the locally held version of a product, used
    /// to describe a conflict.
    pub fn to_sync_error(&self, held_version: impl Fn(&str) -> Option<Version>) -> SyncError {
        match self {
            TransportError::Rejected { message, .. } => {
                SyncError::ValidationRejected(message.clone())
            }
            TransportError::Conflict {
                product_id,
                server_version,
                ..
            } => {
                let product_id = product_id.clone().unwrap_or_default();
                let held = held_version(&product_id).unwrap_or_default();
                SyncError::StaleVersionConflict {
                    received: server_version.unwrap_or(held),
                    product_id,
                    held,
                }
            }
            other => SyncError::TransientTransport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_decode() {
            TransportError::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            TransportError::from_status(
                status.as_u16(),
                ErrorBody {
                    error: error.to_string(),
                    ..ErrorBody::default()
                },
            )
        } else {
            TransportError::Connect(error.to_string())
        }
    }
}
