//! # Stockline Engine
//!
//! The client-side consistency core of a marketplace storefront.
//!
//! A buyer clicking "+" on a product card expects the card, the cart drawer
//! and the header badge to agree immediately, even though the server has not
//! answered yet. This crate keeps one product table, applies every cart
//! change to it optimistically, batches the writes, and later confirms or
//! reverses them against what the server says.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network or a clock; callers
//!   pass `now` in milliseconds and carry batches to the server themselves
//! - **Single writer**: only the [`Reconciler`] mutates the store and cart
//! - **Derived views**: catalog, best sellers, cart and badges are pure
//!   functions of the store and cart, so they cannot disagree
//!
//! ## Core Concepts
//!
//! ### Products
//!
//! A [`ProductSnapshot`] holds server-confirmed stock plus a signed
//! `reserved_by_local_cart` overlay. Displayed stock is
//! [`ProductSnapshot::available`]: confirmed stock minus the overlay, floored
//! at zero.
//!
//! ### Intents
//!
//! User actions are expressed as [`Intent`]s:
//! - [`IntentKind::Increment`] - one more unit
//! - [`IntentKind::Decrement`] - one fewer unit (at quantity 1 this removes the line)
//! - [`IntentKind::Remove`] - drop the whole line
//!
//! ### Batching
//!
//! The [`MutationQueue`] debounces intents (500 ms by default) and coalesces
//! them per product into a [`PendingBatch`]. A product never has two batches
//! in flight.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] resolves each batch with a [`BatchResponse`] or a
//! [`SyncError`], producing [`Outcome`]s. Rejected writes are rolled back
//! exactly; confirmations older than the held version are ignored.
//!
//! ## Quick Start
//!
//! ```rust
//! use stockline_engine::{BatchResponse, CatalogFilter, Intent, ProductSnapshot, Reconciler};
//!
//! // 1. Load the catalog
//! let mut reconciler = Reconciler::new(500);
//! reconciler.apply_refresh(vec![ProductSnapshot::new("lamp", "Desk Lamp", 2500, 10, 1)]);
//!
//! // 2. Dispatch an intent; every view sees it at once
//! reconciler.dispatch(Intent::increment("lamp", "line-1", 0), 0).unwrap();
//! let views = reconciler.views(&CatalogFilter::new(), 8);
//! assert_eq!(views.catalog.cards[0].available_stock, 9);
//! assert_eq!(views.cart.total_units, 1);
//!
//! // 3. After the quiet period, flush and send the batch
//! let batch = reconciler.flush_due(500).unwrap();
//! assert_eq!(batch.net_delta("lamp"), 1);
//!
//! // 4. Resolve it with the server's answer
//! let response = BatchResponse::accepted([("lamp".to_string(), 2)]);
//! reconciler.complete_batch(batch.batch_id, Ok(response), 600).unwrap();
//! assert_eq!(reconciler.store().get("lamp").unwrap().available(), 9);
//! ```

pub mod cart;
pub mod error;
pub mod intent;
pub mod notice;
pub mod product;
pub mod projector;
pub mod queue;
pub mod reconcile;
pub mod store;

// Re-export main types at crate root
pub use cart::{CartLine, CartTable};
pub use error::{Error, SyncError};
pub use intent::{Intent, IntentKind};
pub use notice::{Notice, NoticeLevel};
pub use product::{ProductSnapshot, ProductStatus};
pub use projector::{
    BadgeCounter, Badges, CartLineView, CartView, CatalogFilter, CatalogPage, LineState,
    ProductCard, Sort, SortDirection, SortKey, View, ViewKind, ViewSet, DEFAULT_BEST_SELLERS,
    DEFAULT_PAGE_SIZE,
};
pub use queue::{
    LineRemoval, MutationQueue, PendingBatch, ProductDelta, Rebase, DEFAULT_DEBOUNCE_MS,
};
pub use reconcile::{BatchResponse, Outcome, Reconciler, SyncPhase};
pub use store::{ConfirmResult, EntityStore, ReplaceReport};

/// Type aliases for clarity
pub type ProductId = String;
pub type CartLineId = String;
pub type BatchId = u64;
pub type Version = u64;
pub type Timestamp = u64;
/// Prices are integer minor units (cents).
pub type Price = u64;
