//! Product snapshots held by the entity store.

use crate::{Price, ProductId, Version};
use serde::{Deserialize, Serialize};

/// Moderation status of a product listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    /// Submitted by a seller, awaiting admin review
    Pending,
    /// Visible to buyers
    #[default]
    Approved,
    /// Refused by an admin
    Rejected,
    /// Pulled from sale by its seller
    Withdrawn,
}

/// A point-in-time view of one product.
///
/// `stock` is the last value the server confirmed. `reserved_by_local_cart`
/// is the local overlay of units claimed by writes the server has not yet
/// confirmed; it is never sent to or read from the wire. A pending line
/// removal releases units, so the overlay can be negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    /// Unique identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Catalog category
    #[serde(default)]
    pub category: String,
    /// Owning seller
    #[serde(default)]
    pub seller_id: String,
    /// Moderation status
    #[serde(default)]
    pub status: ProductStatus,
    /// Unit price in minor currency units
    pub price: Price,
    /// Server-confirmed stock
    pub stock: u64,
    /// Units sold so far
    #[serde(default)]
    pub sold: u64,
    /// Server version, only ever increases
    pub version: Version,
    /// Local-only optimistic reservation
    #[serde(skip)]
    pub reserved_by_local_cart: i64,
}

impl ProductSnapshot {
    /// Create an approved product with no local reservation.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Price,
        stock: u64,
        version: Version,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            seller_id: String::new(),
            status: ProductStatus::Approved,
            price,
            stock,
            sold: 0,
            version,
            reserved_by_local_cart: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_seller(mut self, seller_id: impl Into<String>) -> Self {
        self.seller_id = seller_id.into();
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_sold(mut self, sold: u64) -> Self {
        self.sold = sold;
        self
    }

    /// Stock as rendered to the user: confirmed stock minus the local
    /// reservation, floored at zero.
    pub fn available(&self) -> u64 {
        let available = self.stock as i128 - self.reserved_by_local_cart as i128;
        available.clamp(0, u64::MAX as i128) as u64
    }

    /// True when local reservations exceed what the server has in stock.
    pub fn is_oversubscribed(&self) -> bool {
        (self.stock as i128) < self.reserved_by_local_cart as i128
    }

    /// Whether buyers may add this product to a cart.
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Approved
    }
}
