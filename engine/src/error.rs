//! Error types for the Stockline engine.
//!
//! Two families live here. [`Error`] covers local operations that the engine
//! refuses to perform (an intent for a missing cart line, an increment on a
//! sold-out product). [`SyncError`] is the taxonomy of ways a write can fail
//! to reach or be accepted by the server; it drives the retry and rollback
//! decisions in [`Reconciler`](crate::Reconciler).

use crate::{BatchId, ProductId, Version};
use thiserror::Error;

/// Errors from local engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("no cart line for product: {0}")]
    CartLineNotFound(ProductId),

    #[error("out of stock: {0}")]
    OutOfStock(ProductId),

    #[error("product not available for purchase: {0}")]
    ProductUnavailable(ProductId),

    #[error("unknown batch: {0}")]
    UnknownBatch(BatchId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a batch (or one product inside it) failed to be confirmed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network failure or 5xx. Retried once before rolling back.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// The server refused the write (insufficient stock, product withdrawn).
    #[error("rejected by server: {0}")]
    ValidationRejected(String),

    /// A confirmation carried an older version than the one held locally.
    #[error("stale version for {product_id}: held {held}, received {received}")]
    StaleVersionConflict {
        product_id: ProductId,
        held: Version,
        received: Version,
    },

    /// The product is no longer in the store.
    #[error("product vanished: {0}")]
    ProductVanished(ProductId),
}

impl SyncError {
    /// Whether the failed request is worth sending again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientTransport(_))
    }

    /// Whether the optimistic change must be reversed.
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            SyncError::TransientTransport(_) | SyncError::ValidationRejected(_)
        )
    }
}
