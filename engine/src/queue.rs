//! MutationQueue - debounced, coalescing write buffer.
//!
//! Intents accumulate here until a shared quiet period elapses. Any new
//! intent, for any product, pushes the deadline back, so a burst of clicks
//! becomes a single round trip.
//!
//! # Coalescing
//!
//! Per product, in enqueue order:
//!
//! 1. Increments and decrements sum into a net delta.
//! 2. A removal cancels every delta queued before it for that product and is
//!    itself never merged. It releases the units the server knows about: the
//!    line quantity at removal minus the deltas it cancelled.
//! 3. Net deltas of zero and removals of zero units are dropped.
//!
//! The queue does not read a clock. Callers pass `now` in milliseconds and
//! poll [`MutationQueue::is_due`].

use crate::{BatchId, CartLineId, Intent, IntentKind, ProductId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Quiet period before queued intents are flushed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Coalesced quantity change for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDelta {
    pub product_id: ProductId,
    pub net_delta: i64,
}

/// A cart line removal, releasing `quantity` units back to stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRemoval {
    pub product_id: ProductId,
    pub cart_line_id: CartLineId,
    pub quantity: u32,
}

/// A flushed, coalesced set of writes. The server applies removals first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBatch {
    pub batch_id: BatchId,
    pub removals: Vec<LineRemoval>,
    pub deltas: Vec<ProductDelta>,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.deltas.is_empty()
    }

    /// Distinct products touched by this batch.
    pub fn product_ids(&self) -> BTreeSet<ProductId> {
        self.removals
            .iter()
            .map(|r| r.product_id.clone())
            .chain(self.deltas.iter().map(|d| d.product_id.clone()))
            .collect()
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.removals.iter().any(|r| r.product_id == product_id)
            || self.deltas.iter().any(|d| d.product_id == product_id)
    }

    /// Net cart delta for a product, excluding removals.
    pub fn net_delta(&self, product_id: &str) -> i64 {
        self.deltas
            .iter()
            .filter(|d| d.product_id == product_id)
            .map(|d| d.net_delta)
            .sum()
    }

    /// Removals for a product, in order.
    pub fn removals_for<'a>(
        &'a self,
        product_id: &'a str,
    ) -> impl Iterator<Item = &'a LineRemoval> {
        self.removals
            .iter()
            .filter(move |r| r.product_id == product_id)
    }

    /// Units this batch reserves for a product (negative releases).
    pub fn stock_delta(&self, product_id: &str) -> i64 {
        let released: i64 = self
            .removals_for(product_id)
            .map(|r| r.quantity as i64)
            .sum();
        self.net_delta(product_id) - released
    }
}

/// Where a [`MutationQueue::rebase`] shift ended up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rebase {
    /// Units still to apply to the cart line itself
    pub on_line: i64,
    /// Units absorbed by a queued removal of the line
    pub removed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedIntent {
    intent: Intent,
    /// Cart quantity of the line just before this intent applied
    line_quantity: u32,
}

#[derive(Debug, Default)]
struct Coalesced {
    removals: Vec<LineRemoval>,
    net_delta: i64,
}

fn coalesce<'a>(entries: impl Iterator<Item = &'a QueuedIntent>) -> BTreeMap<ProductId, Coalesced> {
    let mut by_product: BTreeMap<ProductId, Coalesced> = BTreeMap::new();
    for entry in entries {
        let slot = by_product
            .entry(entry.intent.product_id().clone())
            .or_default();
        match entry.intent.kind() {
            IntentKind::Increment | IntentKind::Decrement => {
                slot.net_delta += entry.intent.unit_delta();
            }
            IntentKind::Remove => {
                let cancelled = slot.net_delta;
                slot.net_delta = 0;
                let known = (entry.line_quantity as i64 - cancelled).max(0) as u32;
                if known > 0 {
                    slot.removals.push(LineRemoval {
                        product_id: entry.intent.product_id().clone(),
                        cart_line_id: entry.intent.cart_line_id().clone(),
                        quantity: known,
                    });
                }
            }
        }
    }
    by_product
}

/// Debounced buffer of intents awaiting flush.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    debounce_ms: u64,
    entries: Vec<QueuedIntent>,
    deadline: Option<Timestamp>,
    next_batch_id: BatchId,
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

impl MutationQueue {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            entries: Vec::new(),
            deadline: None,
            next_batch_id: 1,
        }
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the shared timer fires, if armed.
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Append an intent and restart the shared timer.
    ///
    /// `line_quantity` is the cart quantity of the intent's line just
    /// before the intent was applied; removals use it to work out how many
    /// units they release.
    pub fn enqueue(&mut self, intent: Intent, line_quantity: u32, now: Timestamp) {
        self.entries.push(QueuedIntent {
            intent,
            line_quantity,
        });
        self.deadline = Some(now.saturating_add(self.debounce_ms));
    }

    /// Re-arm the timer for intents that were held back during a flush.
    pub fn rearm(&mut self, now: Timestamp) {
        if !self.entries.is_empty() && self.deadline.is_none() {
            self.deadline = Some(now);
        }
    }

    /// Disarm the timer without discarding anything.
    pub fn cancel_timer(&mut self) {
        self.deadline = None;
    }

    /// Products with queued intents.
    pub fn pending_products(&self) -> BTreeSet<ProductId> {
        self.entries
            .iter()
            .map(|e| e.intent.product_id().clone())
            .collect()
    }

    pub fn has_pending(&self, product_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.intent.product_id() == product_id)
    }

    /// Units the queued intents reserve for a product (negative releases).
    pub fn net_delta(&self, product_id: &str) -> i64 {
        let coalesced = coalesce(
            self.entries
                .iter()
                .filter(|e| e.intent.product_id() == product_id),
        );
        coalesced
            .values()
            .map(|c| c.net_delta - c.removals.iter().map(|r| r.quantity as i64).sum::<i64>())
            .sum()
    }

    /// Reserved units per product across the whole queue.
    pub fn net_deltas(&self) -> BTreeMap<ProductId, i64> {
        coalesce(self.entries.iter())
            .into_iter()
            .map(|(id, c)| {
                let released: i64 = c.removals.iter().map(|r| r.quantity as i64).sum();
                (id, c.net_delta - released)
            })
            .collect()
    }

    /// Discard queued intents for a product. Returns how many were dropped.
    pub fn drop_product(&mut self, product_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.intent.product_id() != product_id);
        if self.entries.is_empty() {
            self.deadline = None;
        }
        before - self.entries.len()
    }

    /// Correct a product's queued intents after its in-flight batch was
    /// rolled back.
    ///
    /// `shift` is how many more units (negative: fewer) the server holds on
    /// the line than the queued intents assumed when they were recorded.
    /// Missing units are taken first by queued decrements, which are dropped
    /// since they have nothing left to release, and then by a queued
    /// removal, which releases that much less. A removal ends the walk:
    /// intents after it belong to a new line.
    pub fn rebase(&mut self, product_id: &str, shift: i64) -> Rebase {
        let mut remaining = shift;
        let mut removed = 0;
        self.entries.retain_mut(|entry| {
            if remaining == 0 || entry.intent.product_id() != product_id {
                return true;
            }
            entry.line_quantity = (entry.line_quantity as i64 + remaining).max(0) as u32;
            match entry.intent.kind() {
                IntentKind::Decrement if remaining < 0 => {
                    remaining += 1;
                    false
                }
                IntentKind::Remove => {
                    removed = remaining;
                    remaining = 0;
                    true
                }
                IntentKind::Increment | IntentKind::Decrement => true,
            }
        });
        if self.entries.is_empty() {
            self.deadline = None;
        }
        Rebase {
            on_line: remaining,
            removed,
        }
    }

    /// Coalesce queued intents into a batch.
    ///
    /// Intents for products in `in_flight` stay queued for the next batch;
    /// everything else is removed from the queue. The timer is disarmed
    /// either way. Returns `None` when nothing worth sending remains.
    pub fn flush(&mut self, in_flight: &HashSet<ProductId>) -> Option<PendingBatch> {
        self.deadline = None;
        let (held, ready): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| in_flight.contains(e.intent.product_id()));
        self.entries = held;

        let mut removals = Vec::new();
        let mut deltas = Vec::new();
        for (product_id, coalesced) in coalesce(ready.iter()) {
            removals.extend(coalesced.removals);
            if coalesced.net_delta != 0 {
                deltas.push(ProductDelta {
                    product_id,
                    net_delta: coalesced.net_delta,
                });
            }
        }

        let batch = PendingBatch {
            batch_id: self.next_batch_id,
            removals,
            deltas,
        };
        if batch.is_empty() {
            return None;
        }
        self.next_batch_id += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(product: &str) -> Intent {
        Intent::increment(product, format!("line-{product}"), 0)
    }

    fn dec(product: &str) -> Intent {
        Intent::decrement(product, format!("line-{product}"), 0)
    }

    fn rm(product: &str) -> Intent {
        Intent::remove(product, format!("line-{product}"), 0)
    }

    #[test]
    fn coalesces_into_one_net_delta() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 0, 0);
        queue.enqueue(inc("a"), 1, 10);
        queue.enqueue(dec("a"), 2, 20);

        let batch = queue.flush(&HashSet::new()).unwrap();
        assert_eq!(
            batch.deltas,
            vec![ProductDelta {
                product_id: "a".into(),
                net_delta: 1
            }]
        );
        assert!(batch.removals.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn three_increments_and_a_decrement_net_two() {
        let mut queue = MutationQueue::new(500);
        for q in 0..3 {
            queue.enqueue(inc("a"), q, 0);
        }
        queue.enqueue(dec("a"), 3, 0);
        assert_eq!(queue.net_delta("a"), 2);
        assert_eq!(queue.flush(&HashSet::new()).unwrap().net_delta("a"), 2);
    }

    #[test]
    fn any_intent_resets_the_shared_timer() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 0, 1000);
        assert_eq!(queue.deadline(), Some(1500));
        assert!(!queue.is_due(1499));

        queue.enqueue(inc("b"), 0, 1400);
        assert_eq!(queue.deadline(), Some(1900));
        assert!(!queue.is_due(1500));
        assert!(queue.is_due(1900));
    }

    #[test]
    fn removal_cancels_prior_deltas() {
        let mut queue = MutationQueue::new(500);
        // Server knows 3 units; the user adds one more, then removes the line.
        queue.enqueue(inc("a"), 3, 0);
        queue.enqueue(rm("a"), 4, 0);

        assert_eq!(queue.net_delta("a"), -3);
        let batch = queue.flush(&HashSet::new()).unwrap();
        assert!(batch.deltas.is_empty());
        assert_eq!(
            batch.removals,
            vec![LineRemoval {
                product_id: "a".into(),
                cart_line_id: "line-a".into(),
                quantity: 3
            }]
        );
        assert_eq!(batch.stock_delta("a"), -3);
    }

    #[test]
    fn deltas_after_removal_start_fresh() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(rm("a"), 2, 0);
        queue.enqueue(inc("a"), 0, 0);
        queue.enqueue(inc("a"), 1, 0);

        let batch = queue.flush(&HashSet::new()).unwrap();
        assert_eq!(batch.removals.len(), 1);
        assert_eq!(batch.removals[0].quantity, 2);
        assert_eq!(batch.net_delta("a"), 2);
        assert_eq!(batch.stock_delta("a"), 0);
    }

    #[test]
    fn add_then_remove_of_unsent_line_sends_nothing() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 0, 0);
        queue.enqueue(rm("a"), 1, 0);
        assert_eq!(queue.net_delta("a"), 0);
        assert!(queue.flush(&HashSet::new()).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_net_delta_is_dropped() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 1, 0);
        queue.enqueue(dec("a"), 2, 0);
        queue.enqueue(inc("b"), 0, 0);

        let batch = queue.flush(&HashSet::new()).unwrap();
        assert_eq!(batch.product_ids().len(), 1);
        assert!(batch.contains("b"));
        assert!(!batch.contains("a"));
    }

    #[test]
    fn in_flight_products_are_held_for_next_batch() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 1, 0);
        queue.enqueue(inc("b"), 0, 0);

        let in_flight: HashSet<ProductId> = ["a".to_string()].into_iter().collect();
        let batch = queue.flush(&in_flight).unwrap();
        assert_eq!(batch.product_ids().into_iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.has_pending("a"));
        assert_eq!(queue.deadline(), None);

        queue.rearm(800);
        assert!(queue.is_due(800));
        let next = queue.flush(&HashSet::new()).unwrap();
        assert_eq!(next.net_delta("a"), 1);
        assert!(next.batch_id > batch.batch_id);
    }

    #[test]
    fn drop_product_discards_only_that_product() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 0, 0);
        queue.enqueue(inc("b"), 0, 0);
        queue.enqueue(inc("a"), 1, 0);

        assert_eq!(queue.drop_product("a"), 2);
        assert_eq!(queue.pending_products().len(), 1);
        assert!(queue.deadline().is_some());

        assert_eq!(queue.drop_product("b"), 1);
        assert_eq!(queue.deadline(), None);
    }

    #[test]
    fn batch_serialization_is_camel_case() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 0, 0);
        let batch = queue.flush(&HashSet::new()).unwrap();
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("\"batchId\":1"));
        assert!(json.contains("\"netDelta\":1"));
    }

    #[test]
    fn rebase_shrinks_removal_of_rejected_units() {
        let mut queue = MutationQueue::new(500);
        // Two units were in flight when the user removed the line.
        queue.enqueue(rm("a"), 2, 0);
        assert_eq!(queue.net_delta("a"), -2);

        let rebase = queue.rebase("a", -2);
        assert_eq!(
            rebase,
            Rebase {
                on_line: 0,
                removed: -2
            }
        );
        assert_eq!(queue.net_delta("a"), 0);
        assert!(queue.flush(&HashSet::new()).is_none());
    }

    #[test]
    fn rebase_drops_decrements_first() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(dec("a"), 3, 0);
        queue.enqueue(inc("b"), 0, 0);
        queue.enqueue(dec("a"), 2, 0);

        let rebase = queue.rebase("a", -1);
        assert_eq!(
            rebase,
            Rebase {
                on_line: 0,
                removed: 0
            }
        );
        assert_eq!(queue.net_delta("a"), -1);
        assert_eq!(queue.net_delta("b"), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn rebase_stops_at_removal() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(inc("a"), 1, 0);
        queue.enqueue(rm("a"), 2, 0);
        queue.enqueue(inc("a"), 0, 0);

        // The removal still cancels the queued increment before it.
        let rebase = queue.rebase("a", -1);
        assert_eq!(
            rebase,
            Rebase {
                on_line: 0,
                removed: -1
            }
        );
        let batch = queue.flush(&HashSet::new()).unwrap();
        assert!(batch.removals.is_empty());
        assert_eq!(batch.net_delta("a"), 1);
    }

    #[test]
    fn rebase_grows_removal_when_server_holds_more() {
        let mut queue = MutationQueue::new(500);
        queue.enqueue(rm("a"), 2, 0);
        let rebase = queue.rebase("a", 1);
        assert_eq!(
            rebase,
            Rebase {
                on_line: 0,
                removed: 1
            }
        );
        assert_eq!(queue.net_delta("a"), -3);
    }

    #[test]
    fn rebase_without_queued_intents_lands_on_line() {
        let mut queue = MutationQueue::new(500);
        assert_eq!(
            queue.rebase("a", -2),
            Rebase {
                on_line: -2,
                removed: 0
            }
        );
        assert!(queue.deadline().is_none());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_kind() -> impl Strategy<Value = IntentKind> {
            prop_oneof![
                3 => Just(IntentKind::Increment),
                2 => Just(IntentKind::Decrement),
                1 => Just(IntentKind::Remove),
            ]
        }

        proptest! {
            #[test]
            fn prop_batch_reserves_what_the_queue_reserved(
                kinds in proptest::collection::vec(arb_kind(), 1..40),
                start in 0u32..5,
            ) {
                // Simulate a cart line the way the reconciler drives the queue.
                let mut queue = MutationQueue::new(500);
                let mut quantity = start;
                let mut reserved: i64 = 0;
                for kind in kinds {
                    let intent = Intent::new(kind, "a", "line-a", 0);
                    match kind {
                        IntentKind::Increment => {
                            queue.enqueue(intent, quantity, 0);
                            quantity += 1;
                            reserved += 1;
                        }
                        IntentKind::Decrement if quantity > 1 => {
                            queue.enqueue(intent, quantity, 0);
                            quantity -= 1;
                            reserved -= 1;
                        }
                        _ if quantity > 0 => {
                            queue.enqueue(intent.as_removal(), quantity, 0);
                            reserved -= quantity as i64;
                            quantity = 0;
                        }
                        _ => {}
                    }
                }

                prop_assert_eq!(queue.net_delta("a"), reserved);
                let batch_delta = queue
                    .flush(&HashSet::new())
                    .map_or(0, |batch| batch.stock_delta("a"));
                prop_assert_eq!(batch_delta, reserved);
            }

            #[test]
            fn prop_flush_is_order_independent_across_products(
                a in 1usize..10,
                b in 1usize..10,
            ) {
                let mut interleaved = MutationQueue::new(500);
                let mut grouped = MutationQueue::new(500);
                for i in 0..a.max(b) {
                    if i < a { interleaved.enqueue(inc("a"), i as u32, 0); }
                    if i < b { interleaved.enqueue(inc("b"), i as u32, 0); }
                }
                for i in 0..a { grouped.enqueue(inc("a"), i as u32, 0); }
                for i in 0..b { grouped.enqueue(inc("b"), i as u32, 0); }

                prop_assert_eq!(
                    interleaved.flush(&HashSet::new()),
                    grouped.flush(&HashSet::new())
                );
            }
        }
    }
}
