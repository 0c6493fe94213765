//! EntityStore - the canonical in-memory product table.
//!
//! Every view (catalog, best sellers, cart) reads products from here, so an
//! optimistic reservation applied once is visible everywhere at the same
//! time. Only the [`Reconciler`](crate::Reconciler) writes to it.
//!
//! The store tracks a refresh epoch. Each full refresh bumps the epoch and
//! stamps every product whose baseline it replaced. A batch remembers the
//! epoch it was sent under; when it is confirmed, the store can tell whether
//! the confirmed stock baseline predates the write (fold the delta in) or was
//! fetched after it (the server value already includes the write).

use crate::{error::Result, Error, ProductId, ProductSnapshot, Version};
use std::collections::{HashMap, HashSet};

/// Outcome of retiring a confirmed overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmResult {
    /// Version accepted (or none was supplied)
    Applied { version: Version },
    /// The confirmation carried an older version than the one held; the
    /// version was discarded and displayed stock left unchanged.
    Stale { held: Version, received: Version },
}

/// Summary of a full replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    /// Products that were present before and are absent from the refresh
    pub removed: Vec<ProductId>,
    /// Products whose refreshed snapshot was older than the held one
    pub stale: Vec<ProductId>,
    /// Products seen for the first time
    pub added: Vec<ProductId>,
}

#[derive(Debug, Clone)]
struct Entry {
    snapshot: ProductSnapshot,
    baseline_epoch: u64,
}

/// The single shared product table.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    products: HashMap<ProductId, Entry>,
    epoch: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current refresh epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Epoch at which a product's stock baseline was last fetched.
    pub fn baseline_epoch(&self, id: &str) -> Option<u64> {
        self.products.get(id).map(|entry| entry.baseline_epoch)
    }

    pub fn get(&self, id: &str) -> Option<&ProductSnapshot> {
        self.products.get(id).map(|entry| &entry.snapshot)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.products.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// All products, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ProductSnapshot> {
        self.products.values().map(|entry| &entry.snapshot)
    }

    /// Insert or update a single product from the server.
    ///
    /// Keeps the local reservation of an existing entry. Returns `false`
    /// (and changes nothing) if the incoming version is older than the held one.
    pub fn upsert(&mut self, mut snapshot: ProductSnapshot) -> bool {
        let epoch = self.epoch;
        match self.products.get_mut(&snapshot.id) {
            Some(entry) if snapshot.version < entry.snapshot.version => false,
            Some(entry) => {
                snapshot.reserved_by_local_cart = entry.snapshot.reserved_by_local_cart;
                entry.snapshot = snapshot;
                entry.baseline_epoch = epoch;
                true
            }
            None => {
                snapshot.reserved_by_local_cart = 0;
                self.products.insert(
                    snapshot.id.clone(),
                    Entry {
                        snapshot,
                        baseline_epoch: epoch,
                    },
                );
                true
            }
        }
    }

    /// Reserve `delta` units of a product for the local cart (negative
    /// releases them) and return the updated snapshot.
    ///
    /// Displayed stock moves by `-delta`; confirmed stock is untouched.
    pub fn apply_delta(&mut self, id: &str, delta: i64) -> Result<ProductSnapshot> {
        let entry = self
            .products
            .get_mut(id)
            .ok_or_else(|| Error::ProductNotFound(id.to_string()))?;
        entry.snapshot.reserved_by_local_cart =
            entry.snapshot.reserved_by_local_cart.saturating_add(delta);
        Ok(entry.snapshot.clone())
    }

    /// Retire the overlay of a confirmed write of `delta` units.
    ///
    /// When `baseline_refreshed` is false the confirmed stock predates the
    /// write, so the delta is folded into it and displayed stock does not
    /// move. When true, a refresh already delivered a stock value that
    /// includes the write, and only the overlay is dropped.
    pub fn confirm(
        &mut self,
        id: &str,
        delta: i64,
        version: Option<Version>,
        baseline_refreshed: bool,
    ) -> Result<ConfirmResult> {
        let entry = self
            .products
            .get_mut(id)
            .ok_or_else(|| Error::ProductNotFound(id.to_string()))?;
        let snapshot = &mut entry.snapshot;

        snapshot.reserved_by_local_cart = snapshot.reserved_by_local_cart.saturating_sub(delta);
        if !baseline_refreshed {
            let stock = snapshot.stock as i128 - delta as i128;
            snapshot.stock = stock.clamp(0, u64::MAX as i128) as u64;
        }

        match version {
            Some(received) if received < snapshot.version => Ok(ConfirmResult::Stale {
                held: snapshot.version,
                received,
            }),
            Some(received) => {
                snapshot.version = received;
                Ok(ConfirmResult::Applied { version: received })
            }
            None => Ok(ConfirmResult::Applied {
                version: snapshot.version,
            }),
        }
    }

    /// Atomically swap in a freshly fetched product set.
    ///
    /// The local overlay is not taken from the server: it is re-derived from
    /// `reservations`, the engine's record of writes still pending, so an
    /// optimistic reservation survives the refresh. Held products newer than
    /// their refreshed copy are kept as they are.
    pub fn replace_all(
        &mut self,
        snapshots: Vec<ProductSnapshot>,
        reservations: &HashMap<ProductId, i64>,
    ) -> ReplaceReport {
        self.epoch += 1;
        let epoch = self.epoch;
        let mut report = ReplaceReport::default();
        let mut next: HashMap<ProductId, Entry> = HashMap::with_capacity(snapshots.len());

        for mut snapshot in snapshots {
            let reserved = reservations.get(&snapshot.id).copied().unwrap_or(0);
            match self.products.get(&snapshot.id) {
                Some(held) if snapshot.version < held.snapshot.version => {
                    report.stale.push(snapshot.id.clone());
                    let mut kept = held.clone();
                    kept.snapshot.reserved_by_local_cart = reserved;
                    next.insert(snapshot.id, kept);
                }
                held => {
                    if held.is_none() {
                        report.added.push(snapshot.id.clone());
                    }
                    snapshot.reserved_by_local_cart = reserved;
                    next.insert(
                        snapshot.id.clone(),
                        Entry {
                            snapshot,
                            baseline_epoch: epoch,
                        },
                    );
                }
            }
        }

        let kept: HashSet<&ProductId> = next.keys().collect();
        report.removed = self
            .products
            .keys()
            .filter(|id| !kept.contains(id))
            .cloned()
            .collect();
        report.removed.sort();
        report.stale.sort();
        report.added.sort();

        self.products = next;
        report
    }

    /// Remove a product (explicit deletion).
    pub fn remove(&mut self, id: &str) -> Option<ProductSnapshot> {
        self.products.remove(id).map(|entry| entry.snapshot)
    }
}
