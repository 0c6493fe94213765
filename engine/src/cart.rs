//! The local cart line table.

use crate::{CartLineId, Price, ProductId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One product in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Line identifier
    pub id: CartLineId,
    /// Product this line refers to (weak reference)
    pub product_id: ProductId,
    /// Units in the cart, always at least 1
    pub quantity: u32,
    /// Unit price copied when the line was created
    pub unit_price_snapshot: Price,
    /// When the line was created
    pub added_at: Timestamp,
}

impl CartLine {
    pub fn new(
        id: impl Into<CartLineId>,
        product_id: impl Into<ProductId>,
        quantity: u32,
        unit_price_snapshot: Price,
        added_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            product_id: product_id.into(),
            quantity,
            unit_price_snapshot,
            added_at,
        }
    }

    /// Price snapshot times quantity.
    pub fn total(&self) -> Price {
        self.unit_price_snapshot.saturating_mul(self.quantity as Price)
    }
}

/// Cart lines keyed by product. A product has at most one line.
///
/// BTreeMap keeps iteration order deterministic for the projections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTable {
    lines: BTreeMap<ProductId, CartLine>,
}

impl CartTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: &str) -> Option<&CartLine> {
        self.lines.get(product_id)
    }

    /// Quantity in the cart for a product, 0 if there is no line.
    pub fn quantity(&self, product_id: &str) -> u32 {
        self.lines.get(product_id).map_or(0, |line| line.quantity)
    }

    pub fn lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.values()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of quantities across all lines.
    pub fn total_units(&self) -> u64 {
        self.lines.values().map(|line| line.quantity as u64).sum()
    }

    /// Add units to a product's line, creating it with the given id and price
    /// snapshot if absent. An existing line keeps its own id and price.
    ///
    /// Returns the new quantity.
    pub fn add_units(
        &mut self,
        product_id: &str,
        line_id: &str,
        unit_price: Price,
        count: u32,
        at: Timestamp,
    ) -> u32 {
        let line = self
            .lines
            .entry(product_id.to_string())
            .or_insert_with(|| CartLine::new(line_id, product_id, 0, unit_price, at));
        line.quantity = line.quantity.saturating_add(count);
        line.quantity
    }

    /// Take units from a product's line. A line reaching zero is removed.
    ///
    /// Returns the remaining quantity, or `None` if there was no line.
    pub fn remove_units(&mut self, product_id: &str, count: u32) -> Option<u32> {
        let line = self.lines.get_mut(product_id)?;
        line.quantity = line.quantity.saturating_sub(count);
        let remaining = line.quantity;
        if remaining == 0 {
            self.lines.remove(product_id);
        }
        Some(remaining)
    }

    /// Drop a product's line entirely.
    pub fn remove_line(&mut self, product_id: &str) -> Option<CartLine> {
        self.lines.remove(product_id)
    }

    /// Put a previously removed line back.
    ///
    /// If the product has a line again (the user re-added it), the restored
    /// units are added to it instead. Zero-quantity restores are ignored.
    pub fn restore_line(&mut self, line: CartLine) {
        if line.quantity == 0 {
            return;
        }
        match self.lines.get_mut(&line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            }
            None => {
                self.lines.insert(line.product_id.clone(), line);
            }
        }
    }
}
