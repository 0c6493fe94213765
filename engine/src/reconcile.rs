//! Reconciliation: optimistic apply, flush, confirm or roll back.
//!
//! The [`Reconciler`] is the only writer of the entity store and the cart.
//! It runs a small state machine per product:
//!
//! ```text
//! Idle -> OptimisticallyApplied -> Flushing -> Confirmed | RolledBack
//!              ^                        |
//!              +---- new intent --------+
//! ```
//!
//! # Rules
//!
//! 1. An intent is applied to the store and cart synchronously, before any
//!    network call exists for it.
//! 2. A product has at most one batch in flight. Intents arriving meanwhile
//!    wait in the queue for the next batch.
//! 3. Server answers are applied as deltas and version bumps, never as
//!    absolute stock values, so a late confirmation cannot overwrite newer
//!    optimistic state.
//! 4. A refresh replaces the product table but keeps the overlay of every
//!    write still queued or in flight. Those writes resolve later against the
//!    refreshed state.
//!
//! Like the rest of the engine this is pure: the caller supplies time and
//! performs the actual transport calls.

use crate::{
    error::Result, projector, BatchId, CartLine, CartLineId, CartTable, CatalogFilter,
    ConfirmResult, EntityStore, Error, Intent, IntentKind, MutationQueue, PendingBatch, ProductId,
    ProductSnapshot, SyncError, Timestamp, Version, ViewSet,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Where a product is in its write lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    /// Nothing pending
    Idle,
    /// Applied locally, waiting for the debounce timer
    OptimisticallyApplied,
    /// Batch on the wire
    Flushing,
    /// Last batch confirmed by the server
    Confirmed,
    /// Last batch reversed
    RolledBack,
}

/// Server answer to a mutation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Whether the batch was processed at all
    pub accepted: bool,
    /// New server versions of the products that were written
    #[serde(default)]
    pub new_versions: BTreeMap<ProductId, Version>,
    /// Products whose part of the batch was refused
    #[serde(default)]
    pub rejected_ids: Vec<ProductId>,
    /// Human-readable reason for a refusal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchResponse {
    /// Everything accepted with the given versions.
    pub fn accepted(new_versions: impl IntoIterator<Item = (ProductId, Version)>) -> Self {
        Self {
            accepted: true,
            new_versions: new_versions.into_iter().collect(),
            rejected_ids: Vec::new(),
            message: None,
        }
    }

    /// Whole batch refused.
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            new_versions: BTreeMap::new(),
            rejected_ids: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_rejected(mut self, product_id: impl Into<ProductId>) -> Self {
        self.rejected_ids.push(product_id.into());
        self
    }
}

/// Something that happened while resolving a batch or a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server confirmed the product's writes.
    Confirmed {
        product_id: ProductId,
        version: Version,
    },
    /// The optimistic change was reversed.
    RolledBack {
        product_id: ProductId,
        name: Option<String>,
        error: SyncError,
    },
    /// A confirmation older than the held version was ignored.
    StaleConfirmation {
        product_id: ProductId,
        held: Version,
        received: Version,
    },
    /// Local state could not follow a server answer exactly.
    Inconsistency {
        product_id: ProductId,
        cart_line_id: Option<CartLineId>,
        detail: String,
    },
    /// The product left the store.
    Vanished {
        product_id: ProductId,
        name: Option<String>,
        had_cart_line: bool,
        dropped_intents: usize,
    },
}

impl Outcome {
    pub fn product_id(&self) -> &ProductId {
        match self {
            Outcome::Confirmed { product_id, .. }
            | Outcome::RolledBack { product_id, .. }
            | Outcome::StaleConfirmation { product_id, .. }
            | Outcome::Inconsistency { product_id, .. }
            | Outcome::Vanished { product_id, .. } => product_id,
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    batch: PendingBatch,
    /// Store epoch when the batch was sent
    sent_epoch: u64,
    /// Lines removed by this batch, kept for rollback
    tombstones: Vec<CartLine>,
}

/// Owner of the store, the cart, the queue and all in-flight batches.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: EntityStore,
    cart: CartTable,
    queue: MutationQueue,
    in_flight: BTreeMap<BatchId, InFlight>,
    /// Lines removed optimistically whose removal has not been flushed yet
    tombstones: Vec<CartLine>,
    settled: HashMap<ProductId, SyncPhase>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DEBOUNCE_MS)
    }
}

impl Reconciler {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            store: EntityStore::new(),
            cart: CartTable::new(),
            queue: MutationQueue::new(debounce_ms),
            in_flight: BTreeMap::new(),
            tombstones: Vec::new(),
            settled: HashMap::new(),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn cart(&self) -> &CartTable {
        &self.cart
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// When the debounce timer fires, if armed.
    pub fn deadline(&self) -> Option<Timestamp> {
        self.queue.deadline()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Products that currently have a batch on the wire.
    pub fn in_flight_products(&self) -> HashSet<ProductId> {
        self.in_flight
            .values()
            .flat_map(|flight| flight.batch.product_ids())
            .collect()
    }

    /// True while any write is queued or in flight.
    pub fn has_pending_writes(&self) -> bool {
        !self.queue.is_empty() || !self.in_flight.is_empty()
    }

    pub fn phase(&self, product_id: &str) -> SyncPhase {
        if self.queue.has_pending(product_id) {
            SyncPhase::OptimisticallyApplied
        } else if self
            .in_flight
            .values()
            .any(|flight| flight.batch.contains(product_id))
        {
            SyncPhase::Flushing
        } else {
            self.settled
                .get(product_id)
                .copied()
                .unwrap_or(SyncPhase::Idle)
        }
    }

    /// Units reserved per product by writes not yet confirmed, queued and
    /// in flight together. Products with nothing pending are omitted.
    pub fn pending_reservations(&self) -> BTreeMap<ProductId, i64> {
        let mut pending = self.queue.net_deltas();
        for flight in self.in_flight.values() {
            for id in flight.batch.product_ids() {
                let delta = flight.batch.stock_delta(&id);
                *pending.entry(id).or_insert(0) += delta;
            }
        }
        pending.retain(|_, units| *units != 0);
        pending
    }

    /// Project every view from the current state.
    pub fn views(&self, filter: &CatalogFilter, best_seller_limit: usize) -> ViewSet {
        projector::project(
            &self.store,
            &self.cart,
            &self.pending_reservations(),
            filter,
            best_seller_limit,
        )
    }

    /// Apply an intent optimistically and queue it.
    ///
    /// A decrement on a line of quantity 1 becomes a removal of that line.
    /// If the product is gone from the store, its pending intents and cart
    /// line are dropped and [`Error::ProductNotFound`] is returned.
    pub fn dispatch(&mut self, intent: Intent, now: Timestamp) -> Result<ProductSnapshot> {
        let product_id = intent.product_id().clone();
        let Some(product) = self.store.get(&product_id) else {
            self.vanish(&product_id, None);
            return Err(Error::ProductNotFound(product_id));
        };
        let price = product.price;
        let purchasable = product.is_purchasable();
        let available = product.available();
        let before = self.cart.quantity(&product_id);

        let snapshot = match intent.kind() {
            IntentKind::Increment => {
                if !purchasable {
                    return Err(Error::ProductUnavailable(product_id));
                }
                if available == 0 {
                    return Err(Error::OutOfStock(product_id));
                }
                let snapshot = self.store.apply_delta(&product_id, 1)?;
                self.cart.add_units(
                    &product_id,
                    intent.cart_line_id(),
                    price,
                    1,
                    intent.issued_at(),
                );
                self.queue.enqueue(intent, before, now);
                snapshot
            }
            IntentKind::Decrement => match before {
                0 => return Err(Error::CartLineNotFound(product_id)),
                1 => self.remove_line(intent.as_removal(), now)?,
                _ => {
                    let snapshot = self.store.apply_delta(&product_id, -1)?;
                    self.cart.remove_units(&product_id, 1);
                    self.queue.enqueue(intent, before, now);
                    snapshot
                }
            },
            IntentKind::Remove => self.remove_line(intent, now)?,
        };

        self.settled.remove(&product_id);
        Ok(snapshot)
    }

    fn remove_line(&mut self, intent: Intent, now: Timestamp) -> Result<ProductSnapshot> {
        let product_id = intent.product_id().clone();
        let line = self
            .cart
            .get(&product_id)
            .cloned()
            .ok_or_else(|| Error::CartLineNotFound(product_id.clone()))?;

        let snapshot = self
            .store
            .apply_delta(&product_id, -(line.quantity as i64))?;
        self.cart.remove_line(&product_id);

        // The removal must name the line that actually exists.
        let intent = if *intent.cart_line_id() == line.id {
            intent
        } else {
            Intent::remove(product_id, line.id.clone(), intent.issued_at())
        };
        self.queue.enqueue(intent, line.quantity, now);
        self.tombstones.push(line);
        Ok(snapshot)
    }

    /// Flush if the debounce timer has elapsed.
    pub fn flush_due(&mut self, now: Timestamp) -> Option<PendingBatch> {
        if self.queue.is_due(now) {
            self.flush()
        } else {
            None
        }
    }

    /// Coalesce the queue into a batch and mark it in flight.
    ///
    /// Products that already have a batch in flight are held back. Returns
    /// `None` when there is nothing to send.
    pub fn flush(&mut self) -> Option<PendingBatch> {
        let busy = self.in_flight_products();
        let flushed: BTreeSet<ProductId> = self
            .queue
            .pending_products()
            .into_iter()
            .filter(|id| !busy.contains(id))
            .collect();
        let batch = self.queue.flush(&busy);

        let (taken, held): (Vec<CartLine>, Vec<CartLine>) = std::mem::take(&mut self.tombstones)
            .into_iter()
            .partition(|line| flushed.contains(&line.product_id));
        self.tombstones = held;

        let batch = batch?;
        let tombstones = taken
            .into_iter()
            .filter(|line| batch.removals.iter().any(|r| r.cart_line_id == line.id))
            .collect();
        self.in_flight.insert(
            batch.batch_id,
            InFlight {
                batch: batch.clone(),
                sent_epoch: self.store.epoch(),
                tombstones,
            },
        );
        Some(batch)
    }

    /// Resolve an in-flight batch.
    ///
    /// An accepted response confirms every product except those listed as
    /// rejected, which roll back. A refused response or a transport failure
    /// that calls for it rolls the whole batch back. Retrying transient
    /// failures is the caller's job; pass the error here only once retries
    /// are exhausted.
    pub fn complete_batch(
        &mut self,
        batch_id: BatchId,
        result: std::result::Result<BatchResponse, SyncError>,
        now: Timestamp,
    ) -> Result<Vec<Outcome>> {
        let flight = self
            .in_flight
            .remove(&batch_id)
            .ok_or(Error::UnknownBatch(batch_id))?;
        let products = flight.batch.product_ids();
        let mut outcomes = Vec::new();

        match result {
            Ok(response) if response.accepted => {
                let reason = response
                    .message
                    .clone()
                    .unwrap_or_else(|| "the marketplace refused this change".to_string());
                for id in &products {
                    if response.rejected_ids.contains(id) {
                        let error = SyncError::ValidationRejected(reason.clone());
                        self.roll_back(&flight, id, error, &mut outcomes);
                    } else {
                        let version = response.new_versions.get(id).copied();
                        self.confirm(&flight, id, version, &mut outcomes);
                    }
                }
            }
            Ok(response) => {
                let reason = response
                    .message
                    .unwrap_or_else(|| "the marketplace refused this change".to_string());
                for id in &products {
                    let error = SyncError::ValidationRejected(reason.clone());
                    self.roll_back(&flight, id, error, &mut outcomes);
                }
            }
            Err(error) if error.requires_rollback() => {
                for id in &products {
                    self.roll_back(&flight, id, error.clone(), &mut outcomes);
                }
            }
            // Nothing to undo; the next refresh settles the numbers.
            Err(_) => {
                for id in &products {
                    self.confirm(&flight, id, None, &mut outcomes);
                }
            }
        }

        self.queue.rearm(now);
        Ok(outcomes)
    }

    fn confirm(
        &mut self,
        flight: &InFlight,
        product_id: &ProductId,
        version: Option<Version>,
        outcomes: &mut Vec<Outcome>,
    ) {
        self.settled.insert(product_id.clone(), SyncPhase::Confirmed);
        let Some(baseline) = self.store.baseline_epoch(product_id) else {
            outcomes.push(Outcome::Inconsistency {
                product_id: product_id.clone(),
                cart_line_id: None,
                detail: "confirmation for a product no longer in the store".to_string(),
            });
            return;
        };

        let delta = flight.batch.stock_delta(product_id);
        let refreshed = baseline > flight.sent_epoch;
        match self.store.confirm(product_id, delta, version, refreshed) {
            Ok(ConfirmResult::Applied { version }) => outcomes.push(Outcome::Confirmed {
                product_id: product_id.clone(),
                version,
            }),
            Ok(ConfirmResult::Stale { held, received }) => {
                outcomes.push(Outcome::StaleConfirmation {
                    product_id: product_id.clone(),
                    held,
                    received,
                })
            }
            Err(error) => outcomes.push(Outcome::Inconsistency {
                product_id: product_id.clone(),
                cart_line_id: None,
                detail: error.to_string(),
            }),
        }
    }

    fn roll_back(
        &mut self,
        flight: &InFlight,
        product_id: &ProductId,
        error: SyncError,
        outcomes: &mut Vec<Outcome>,
    ) {
        self.settled.insert(product_id.clone(), SyncPhase::RolledBack);
        let name = self.store.get(product_id).map(|p| p.name.clone());
        let delta = flight.batch.stock_delta(product_id);
        let net = flight.batch.net_delta(product_id);

        // Intents queued since the send assumed the server would hold `net`
        // more units; their reservation shrinks or grows to match.
        let queued = self.queue.net_delta(product_id);
        let rebase = self.queue.rebase(product_id, -net);
        let requeued = self.queue.net_delta(product_id) - queued;

        if self.store.apply_delta(product_id, requeued - delta).is_err() {
            // Vanished while in flight; its line is already gone.
            outcomes.push(Outcome::Inconsistency {
                product_id: product_id.clone(),
                cart_line_id: None,
                detail: "rollback for a product no longer in the store".to_string(),
            });
            outcomes.push(Outcome::RolledBack {
                product_id: product_id.clone(),
                name,
                error,
            });
            return;
        }

        if rebase.removed != 0 {
            for line in self
                .tombstones
                .iter_mut()
                .filter(|line| line.product_id == *product_id)
            {
                line.quantity = (line.quantity as i64 + rebase.removed).max(0) as u32;
            }
            outcomes.push(Outcome::Inconsistency {
                product_id: product_id.clone(),
                cart_line_id: None,
                detail: "rollback targets a line the user already removed".to_string(),
            });
        }

        let line_id = self.cart.get(product_id).map(|line| line.id.clone());
        let units = rebase.on_line.unsigned_abs() as u32;
        if rebase.on_line < 0 {
            let have = self.cart.quantity(product_id);
            if have < units {
                outcomes.push(Outcome::Inconsistency {
                    product_id: product_id.clone(),
                    cart_line_id: line_id.clone(),
                    detail: format!("rollback of {units} units found {have} in the cart"),
                });
            }
            self.cart.remove_units(product_id, units);
        } else if rebase.on_line > 0 {
            if line_id.is_some() {
                self.cart.add_units(product_id, "", 0, units, 0);
            } else {
                outcomes.push(Outcome::Inconsistency {
                    product_id: product_id.clone(),
                    cart_line_id: None,
                    detail: "rollback targets a line the user already removed".to_string(),
                });
            }
        }

        for removal in flight.batch.removals_for(product_id) {
            match flight
                .tombstones
                .iter()
                .find(|line| line.id == removal.cart_line_id)
            {
                Some(line) => {
                    let mut restored = line.clone();
                    restored.quantity = removal.quantity;
                    self.cart.restore_line(restored);
                }
                None => outcomes.push(Outcome::Inconsistency {
                    product_id: product_id.clone(),
                    cart_line_id: Some(removal.cart_line_id.clone()),
                    detail: "no record of the removed line to restore".to_string(),
                }),
            }
        }

        outcomes.push(Outcome::RolledBack {
            product_id: product_id.clone(),
            name,
            error,
        });
    }

    /// Replace the product table with a full refresh.
    ///
    /// Overlays of queued and in-flight writes are carried over. Products
    /// absent from the refresh vanish: their queued intents and cart lines
    /// are dropped.
    pub fn apply_refresh(&mut self, snapshots: Vec<ProductSnapshot>) -> Vec<Outcome> {
        let names: HashMap<ProductId, String> = self
            .store
            .iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect();
        let reservations: HashMap<ProductId, i64> =
            self.pending_reservations().into_iter().collect();

        let report = self.store.replace_all(snapshots, &reservations);
        report
            .removed
            .iter()
            .map(|id| self.vanish(id, names.get(id).cloned()))
            .collect()
    }

    /// Remove a product on an explicit deletion event.
    pub fn remove_product(&mut self, product_id: &str) -> Option<Outcome> {
        let removed = self.store.remove(product_id)?;
        Some(self.vanish(product_id, Some(removed.name)))
    }

    fn vanish(&mut self, product_id: &str, name: Option<String>) -> Outcome {
        let dropped_intents = self.queue.drop_product(product_id);
        self.tombstones.retain(|line| line.product_id != product_id);
        let had_cart_line = self.cart.remove_line(product_id).is_some();
        self.settled.remove(product_id);
        Outcome::Vanished {
            product_id: product_id.to_string(),
            name,
            had_cart_line,
            dropped_intents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp(stock: u64, version: Version) -> ProductSnapshot {
        ProductSnapshot::new("lamp", "Lamp", 1500, stock, version)
    }

    fn seeded(stock: u64) -> Reconciler {
        let mut reconciler = Reconciler::new(500);
        reconciler.apply_refresh(vec![lamp(stock, 1)]);
        reconciler
    }

    fn inc(at: Timestamp) -> Intent {
        Intent::increment("lamp", "line-lamp", at)
    }

    fn dec(at: Timestamp) -> Intent {
        Intent::decrement("lamp", "line-lamp", at)
    }

    fn available(reconciler: &Reconciler) -> u64 {
        reconciler.store().get("lamp").unwrap().available()
    }

    fn overlay_matches_pending(reconciler: &Reconciler) -> bool {
        let pending = reconciler.pending_reservations();
        reconciler
            .store()
            .iter()
            .all(|p| p.reserved_by_local_cart == pending.get(&p.id).copied().unwrap_or(0))
    }

    #[test]
    fn dispatch_applies_before_any_flush() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();

        assert_eq!(available(&reconciler), 9);
        assert_eq!(reconciler.cart().quantity("lamp"), 1);
        assert_eq!(reconciler.phase("lamp"), SyncPhase::OptimisticallyApplied);
        assert_eq!(reconciler.in_flight_count(), 0);
        assert!(reconciler.flush_due(499).is_none());
    }

    #[test]
    fn happy_path_confirms_and_keeps_stock() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.dispatch(inc(100), 100).unwrap();
        assert_eq!(available(&reconciler), 8);

        let batch = reconciler.flush_due(600).unwrap();
        assert_eq!(batch.net_delta("lamp"), 2);
        assert_eq!(reconciler.phase("lamp"), SyncPhase::Flushing);

        let response = BatchResponse::accepted([("lamp".to_string(), 5)]);
        let outcomes = reconciler
            .complete_batch(batch.batch_id, Ok(response), 700)
            .unwrap();
        assert_eq!(
            outcomes,
            vec![Outcome::Confirmed {
                product_id: "lamp".into(),
                version: 5
            }]
        );

        let product = reconciler.store().get("lamp").unwrap();
        assert_eq!(product.available(), 8);
        assert_eq!(product.stock, 8);
        assert_eq!(product.reserved_by_local_cart, 0);
        assert_eq!(product.version, 5);
        assert_eq!(reconciler.phase("lamp"), SyncPhase::Confirmed);
        assert!(reconciler.pending_reservations().is_empty());
    }

    #[test]
    fn rejected_product_reverts_to_prior_quantity() {
        let mut reconciler = seeded(10);
        for at in 0..3 {
            reconciler.dispatch(inc(at), at).unwrap();
        }
        let first = reconciler.flush().unwrap();
        reconciler
            .complete_batch(first.batch_id, Ok(BatchResponse::accepted([])), 0)
            .unwrap();
        assert_eq!(reconciler.cart().quantity("lamp"), 3);

        reconciler.dispatch(inc(10), 10).unwrap();
        assert_eq!(reconciler.cart().quantity("lamp"), 4);
        let second = reconciler.flush().unwrap();
        let response = BatchResponse::accepted([]).with_rejected("lamp");
        let outcomes = reconciler
            .complete_batch(second.batch_id, Ok(response), 20)
            .unwrap();

        assert!(matches!(
            outcomes.as_slice(),
            [Outcome::RolledBack {
                error: SyncError::ValidationRejected(_),
                ..
            }]
        ));
        assert_eq!(reconciler.cart().quantity("lamp"), 3);
        assert_eq!(available(&reconciler), 7);
        assert_eq!(reconciler.phase("lamp"), SyncPhase::RolledBack);
    }

    #[test]
    fn decrement_at_one_removes_and_rejection_restores() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();
        reconciler
            .complete_batch(batch.batch_id, Ok(BatchResponse::accepted([])), 0)
            .unwrap();
        assert_eq!(available(&reconciler), 9);

        reconciler.dispatch(dec(5), 5).unwrap();
        assert!(reconciler.cart().get("lamp").is_none());
        assert_eq!(available(&reconciler), 10);

        let batch = reconciler.flush().unwrap();
        assert_eq!(batch.removals.len(), 1);
        assert_eq!(batch.removals[0].quantity, 1);

        let outcomes = reconciler
            .complete_batch(
                batch.batch_id,
                Ok(BatchResponse::refused("order already placed")),
                10,
            )
            .unwrap();
        assert_eq!(
            outcomes,
            vec![Outcome::RolledBack {
                product_id: "lamp".into(),
                name: Some("Lamp".into()),
                error: SyncError::ValidationRejected("order already placed".into()),
            }]
        );
        let line = reconciler.cart().get("lamp").unwrap();
        assert_eq!(line.quantity, 1);
        assert_eq!(line.id, "line-lamp");
        assert_eq!(line.unit_price_snapshot, 1500);
        assert_eq!(available(&reconciler), 9);
    }

    #[test]
    fn decrement_without_line_is_rejected() {
        let mut reconciler = seeded(10);
        assert_eq!(
            reconciler.dispatch(dec(0), 0),
            Err(Error::CartLineNotFound("lamp".into()))
        );
        assert!(reconciler.queue().is_empty());
    }

    #[test]
    fn increment_admission_checks() {
        let mut reconciler = seeded(1);
        reconciler.dispatch(inc(0), 0).unwrap();
        assert_eq!(
            reconciler.dispatch(inc(1), 1),
            Err(Error::OutOfStock("lamp".into()))
        );

        let mut reconciler = Reconciler::new(500);
        reconciler.apply_refresh(vec![
            lamp(5, 1).with_status(crate::ProductStatus::Withdrawn)
        ]);
        assert_eq!(
            reconciler.dispatch(inc(0), 0),
            Err(Error::ProductUnavailable("lamp".into()))
        );
    }

    #[test]
    fn intents_during_flight_go_to_next_batch() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let first = reconciler.flush().unwrap();

        reconciler.dispatch(inc(10), 10).unwrap();
        assert_eq!(reconciler.phase("lamp"), SyncPhase::OptimisticallyApplied);
        assert!(reconciler.flush_due(600).is_none());
        assert_eq!(reconciler.deadline(), None);
        assert_eq!(available(&reconciler), 8);

        reconciler
            .complete_batch(first.batch_id, Ok(BatchResponse::accepted([])), 700)
            .unwrap();
        assert_eq!(reconciler.deadline(), Some(700));

        let second = reconciler.flush_due(700).unwrap();
        assert_eq!(second.net_delta("lamp"), 1);
        assert!(second.batch_id > first.batch_id);
        assert!(overlay_matches_pending(&reconciler));
    }

    #[test]
    fn late_failure_of_old_batch_preserves_newer_intent() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let first = reconciler.flush().unwrap();
        reconciler.dispatch(inc(1), 1).unwrap();

        reconciler
            .complete_batch(
                first.batch_id,
                Err(SyncError::TransientTransport("reset".into())),
                2,
            )
            .unwrap();

        assert_eq!(reconciler.cart().quantity("lamp"), 1);
        assert_eq!(available(&reconciler), 9);
        assert_eq!(reconciler.phase("lamp"), SyncPhase::OptimisticallyApplied);
        assert!(overlay_matches_pending(&reconciler));
    }

    #[test]
    fn stale_confirmation_never_changes_displayed_stock() {
        let mut reconciler = Reconciler::new(500);
        reconciler.apply_refresh(vec![lamp(10, 9)]);
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();

        let outcomes = reconciler
            .complete_batch(
                batch.batch_id,
                Ok(BatchResponse::accepted([("lamp".to_string(), 4)])),
                1,
            )
            .unwrap();
        assert_eq!(
            outcomes,
            vec![Outcome::StaleConfirmation {
                product_id: "lamp".into(),
                held: 9,
                received: 4
            }]
        );
        assert_eq!(available(&reconciler), 9);
        assert_eq!(reconciler.store().get("lamp").unwrap().version, 9);
        assert_eq!(reconciler.cart().quantity("lamp"), 1);
    }

    #[test]
    fn refresh_during_flight_then_success() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.dispatch(inc(1), 1).unwrap();
        let batch = reconciler.flush().unwrap();

        // The refreshed stock already reflects the write.
        reconciler.apply_refresh(vec![lamp(8, 2)]);
        assert_eq!(available(&reconciler), 6);

        reconciler
            .complete_batch(
                batch.batch_id,
                Ok(BatchResponse::accepted([("lamp".to_string(), 3)])),
                2,
            )
            .unwrap();
        assert_eq!(available(&reconciler), 8);
        assert_eq!(reconciler.store().get("lamp").unwrap().reserved_by_local_cart, 0);
    }

    #[test]
    fn refresh_keeps_queued_overlay() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.apply_refresh(vec![lamp(7, 2)]);
        assert_eq!(available(&reconciler), 6);
        assert!(overlay_matches_pending(&reconciler));
    }

    #[test]
    fn refresh_absence_vanishes_product() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();

        let outcomes = reconciler.apply_refresh(Vec::new());
        assert_eq!(
            outcomes,
            vec![Outcome::Vanished {
                product_id: "lamp".into(),
                name: Some("Lamp".into()),
                had_cart_line: true,
                dropped_intents: 1,
            }]
        );
        assert!(reconciler.cart().is_empty());
        assert!(reconciler.queue().is_empty());
        assert!(reconciler.flush().is_none());
    }

    #[test]
    fn dispatch_for_vanished_product_cleans_up() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.remove_product("lamp").unwrap();
        assert!(reconciler.cart().is_empty());

        assert_eq!(
            reconciler.dispatch(inc(1), 1),
            Err(Error::ProductNotFound("lamp".into()))
        );
        assert!(reconciler.queue().is_empty());
    }

    #[test]
    fn rollback_of_vanished_product_is_reported() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();
        reconciler.remove_product("lamp").unwrap();

        let outcomes = reconciler
            .complete_batch(batch.batch_id, Ok(BatchResponse::refused("gone")), 1)
            .unwrap();
        assert!(matches!(outcomes[0], Outcome::Inconsistency { .. }));
        assert!(matches!(outcomes[1], Outcome::RolledBack { .. }));
    }

    #[test]
    fn rollback_after_user_removed_line_is_logged() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();
        reconciler
            .dispatch(Intent::remove("lamp", "line-lamp", 1), 1)
            .unwrap();

        let outcomes = reconciler
            .complete_batch(
                batch.batch_id,
                Err(SyncError::TransientTransport("timeout".into())),
                2,
            )
            .unwrap();
        assert!(matches!(outcomes[0], Outcome::Inconsistency { .. }));
        assert!(reconciler.cart().get("lamp").is_none());
        assert!(overlay_matches_pending(&reconciler));
        assert_eq!(available(&reconciler), 10);
        assert!(reconciler.pending_reservations().is_empty());

        // The removal has nothing left to release, so nothing is sent and
        // nothing can come back.
        assert!(reconciler.flush().is_none());
        assert!(reconciler.cart().get("lamp").is_none());
        assert_eq!(available(&reconciler), 10);
    }

    #[test]
    fn refused_removal_after_rollback_keeps_line_gone() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.dispatch(inc(0), 0).unwrap();
        let first = reconciler.flush().unwrap();
        reconciler
            .complete_batch(first.batch_id, Ok(BatchResponse::accepted([])), 1)
            .unwrap();

        // One more unit goes out, then the user drops the line.
        reconciler.dispatch(inc(2), 2).unwrap();
        let second = reconciler.flush().unwrap();
        reconciler
            .dispatch(Intent::remove("lamp", "line-lamp", 3), 3)
            .unwrap();
        reconciler
            .complete_batch(second.batch_id, Ok(BatchResponse::refused("limit 2")), 4)
            .unwrap();
        assert_eq!(available(&reconciler), 10);
        assert!(reconciler.cart().get("lamp").is_none());

        // The removal releases only the two units the server holds.
        let third = reconciler.flush().unwrap();
        assert_eq!(third.removals[0].quantity, 2);
        reconciler
            .complete_batch(third.batch_id, Ok(BatchResponse::refused("order placed")), 5)
            .unwrap();
        assert_eq!(reconciler.cart().quantity("lamp"), 2);
        assert_eq!(available(&reconciler), 8);
        assert!(overlay_matches_pending(&reconciler));
    }

    #[test]
    fn rollback_drops_decrement_of_rejected_units() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();
        reconciler.dispatch(dec(1), 1).unwrap();
        assert_eq!(reconciler.cart().quantity("lamp"), 1);

        let outcomes = reconciler
            .complete_batch(batch.batch_id, Ok(BatchResponse::refused("sold out")), 2)
            .unwrap();
        assert!(matches!(outcomes[0], Outcome::RolledBack { .. }));
        assert_eq!(available(&reconciler), 10);
        assert!(reconciler.cart().get("lamp").is_none());
        assert!(reconciler.pending_reservations().is_empty());
        assert!(reconciler.flush().is_none());
    }

    #[test]
    fn rollback_keeps_units_added_after_the_send() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let batch = reconciler.flush().unwrap();
        reconciler.dispatch(inc(1), 1).unwrap();

        reconciler
            .complete_batch(batch.batch_id, Ok(BatchResponse::refused("sold out")), 2)
            .unwrap();
        assert_eq!(reconciler.cart().quantity("lamp"), 1);
        assert_eq!(available(&reconciler), 9);
        assert_eq!(reconciler.flush().unwrap().net_delta("lamp"), 1);
    }

    #[test]
    fn unknown_batch() {
        let mut reconciler = seeded(1);
        assert_eq!(
            reconciler.complete_batch(99, Ok(BatchResponse::accepted([])), 0),
            Err(Error::UnknownBatch(99))
        );
    }

    #[test]
    fn views_reflect_optimistic_state() {
        let mut reconciler = seeded(10);
        reconciler.dispatch(inc(0), 0).unwrap();
        let views = reconciler.views(&CatalogFilter::new(), 8);

        assert_eq!(views.catalog.cards[0].available_stock, 9);
        assert_eq!(views.best_sellers[0].available_stock, 9);
        assert_eq!(views.cart.total_units, 1);
        assert_eq!(views.badges.pending.number, 1);
        assert!(views.badges.cart.show);
    }
}
