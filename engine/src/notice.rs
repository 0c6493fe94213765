//! User-facing notices.
//!
//! Outcomes and errors carry enough detail for logs. Notices are what the
//! person at the keyboard sees: which product, what happened, in plain words.

use crate::{Error, Outcome, ProductId, SyncError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the user about one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub product_id: Option<ProductId>,
    pub message: String,
}

impl Notice {
    pub fn new(
        level: NoticeLevel,
        product_id: Option<ProductId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            product_id,
            message: message.into(),
        }
    }

    /// The notice for an outcome, if the user needs to hear about it.
    ///
    /// Confirmations, stale confirmations and inconsistencies are silent.
    /// A vanished product is only reported when it cost the user something.
    pub fn from_outcome(outcome: &Outcome) -> Option<Notice> {
        match outcome {
            Outcome::RolledBack {
                product_id,
                name,
                error,
            } => {
                let label = name.as_deref().unwrap_or(product_id);
                let message = match error {
                    SyncError::ValidationRejected(reason) => {
                        format!("Could not update {label}: {reason}. Your change was undone.")
                    }
                    SyncError::TransientTransport(_) => format!(
                        "Could not reach the marketplace. Your change to {label} was undone."
                    ),
                    SyncError::StaleVersionConflict { .. } | SyncError::ProductVanished(_) => {
                        format!("Your change to {label} was undone.")
                    }
                };
                Some(Notice::new(
                    NoticeLevel::Error,
                    Some(product_id.clone()),
                    message,
                ))
            }
            Outcome::Vanished {
                product_id,
                name,
                had_cart_line,
                dropped_intents,
            } if *had_cart_line || *dropped_intents > 0 => {
                let label = name.as_deref().unwrap_or("A product");
                Some(Notice::new(
                    NoticeLevel::Warning,
                    Some(product_id.clone()),
                    format!("{label} is no longer available and was removed from your cart."),
                ))
            }
            _ => None,
        }
    }

    /// The notice for a refused intent. Internal errors have none.
    pub fn from_error(error: &Error, name: Option<&str>) -> Option<Notice> {
        let (level, product_id, message) = match error {
            Error::ProductNotFound(id) => (
                NoticeLevel::Warning,
                id,
                "This product is no longer available.".to_string(),
            ),
            Error::OutOfStock(id) => (
                NoticeLevel::Warning,
                id,
                format!("{} is out of stock.", name.unwrap_or(id)),
            ),
            Error::ProductUnavailable(id) => (
                NoticeLevel::Warning,
                id,
                format!("{} cannot be purchased right now.", name.unwrap_or(id)),
            ),
            Error::CartLineNotFound(id) => (
                NoticeLevel::Info,
                id,
                format!("{} is not in your cart.", name.unwrap_or(id)),
            ),
            Error::UnknownBatch(_) => return None,
        };
        Some(Notice::new(level, Some(product_id.clone()), message))
    }
}
