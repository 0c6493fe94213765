//! Wire formats for the marketplace API.
//!
//! HTTP bodies use camelCase field names. Push feed messages are JSON,
//! tagged by `type`, with snake_case names.

use serde::{Deserialize, Serialize};
use stockline_engine::{PendingBatch, ProductId, ProductSnapshot, ProductStatus, Version};

use super::{InvalidationEvent, InvalidationKind};

/// Body of `GET {api}/products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub products: Vec<ProductSnapshot>,
}

/// Body of `POST {api}/cart/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Stable across retries of the same batch
    pub idempotency_key: String,
    #[serde(flatten)]
    pub batch: PendingBatch,
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Set on version conflicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
}

/// Messages sent from the server on the push feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A product was listed.
    ProductCreated { product_id: ProductId },

    /// A product's details, price or stock changed.
    ProductUpdated { product_id: ProductId },

    /// A product was deleted.
    ProductDeleted { product_id: ProductId },

    /// A product was approved, rejected or withdrawn.
    ProductStatusChanged {
        product_id: ProductId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ProductStatus>,
    },

    /// Keep-alive ping.
    Ping,

    /// Error message.
    Error { message: String },
}

impl PushMessage {
    /// The invalidation this message signals, if any.
    pub fn invalidation(&self) -> Option<InvalidationEvent> {
        let (kind, product_id) = match self {
            PushMessage::ProductCreated { product_id } => (InvalidationKind::Created, product_id),
            PushMessage::ProductUpdated { product_id } => (InvalidationKind::Updated, product_id),
            PushMessage::ProductDeleted { product_id } => (InvalidationKind::Deleted, product_id),
            PushMessage::ProductStatusChanged { product_id, .. } => {
                (InvalidationKind::StatusChanged, product_id)
            }
            PushMessage::Ping | PushMessage::Error { .. } => return None,
        };
        Some(InvalidationEvent::new(kind, product_id.clone()))
    }
}

/// Messages sent from the client on the push feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Response to ping.
    Pong,
}
