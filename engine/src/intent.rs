//! User intents.
//!
//! A UI action never mutates state directly. It produces an [`Intent`], an
//! immutable record of what the user asked for, which the reconciler applies
//! optimistically and the mutation queue later coalesces into a batch.

use crate::{CartLineId, ProductId, Timestamp};
use serde::{Deserialize, Serialize};

/// What the user asked to do with a cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Add one unit, creating the line if needed
    Increment,
    /// Take one unit away
    Decrement,
    /// Drop the whole line
    Remove,
}

/// An immutable user-requested mutation, not yet sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    kind: IntentKind,
    product_id: ProductId,
    cart_line_id: CartLineId,
    issued_at: Timestamp,
}

impl Intent {
    pub fn new(
        kind: IntentKind,
        product_id: impl Into<ProductId>,
        cart_line_id: impl Into<CartLineId>,
        issued_at: Timestamp,
    ) -> Self {
        Self {
            kind,
            product_id: product_id.into(),
            cart_line_id: cart_line_id.into(),
            issued_at,
        }
    }

    pub fn increment(
        product_id: impl Into<ProductId>,
        cart_line_id: impl Into<CartLineId>,
        issued_at: Timestamp,
    ) -> Self {
        Self::new(IntentKind::Increment, product_id, cart_line_id, issued_at)
    }

    pub fn decrement(
        product_id: impl Into<ProductId>,
        cart_line_id: impl Into<CartLineId>,
        issued_at: Timestamp,
    ) -> Self {
        Self::new(IntentKind::Decrement, product_id, cart_line_id, issued_at)
    }

    pub fn remove(
        product_id: impl Into<ProductId>,
        cart_line_id: impl Into<CartLineId>,
        issued_at: Timestamp,
    ) -> Self {
        Self::new(IntentKind::Remove, product_id, cart_line_id, issued_at)
    }

    pub fn kind(&self) -> IntentKind {
        self.kind
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn cart_line_id(&self) -> &CartLineId {
        &self.cart_line_id
    }

    pub fn issued_at(&self) -> Timestamp {
        self.issued_at
    }

    /// A new removal intent for the same line, issued at the same instant.
    ///
    /// Used when a decrement would take a line to zero.
    pub fn as_removal(&self) -> Intent {
        Intent::remove(
            self.product_id.clone(),
            self.cart_line_id.clone(),
            self.issued_at,
        )
    }

    /// Change in cart quantity requested by a unit intent.
    ///
    /// Removals return 0; their effect depends on the line's quantity.
    pub fn unit_delta(&self) -> i64 {
        match self.kind {
            IntentKind::Increment => 1,
            IntentKind::Decrement => -1,
            IntentKind::Remove => 0,
        }
    }
}
