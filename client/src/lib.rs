//! Stockline Client - async storefront runtime around the Stockline engine.
//!
//! The engine is pure and clock-free. This crate gives it a home: a single
//! tokio task that owns the [`Reconciler`](stockline_engine::Reconciler),
//! fires the debounce timer, sends batches through a [`TransportAdapter`],
//! retries transient failures once, listens for invalidations, and
//! publishes views and notices to the UI.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stockline_client::{Config, HttpTransport, Marketplace};
//!
//! # async fn demo() -> stockline_client::Result<()> {
//! let config = Config::new("http://localhost:3000/api");
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let marketplace = Marketplace::start(transport, &config);
//!
//! marketplace.add_to_cart("p-1")?;
//! let mut views = marketplace.subscribe();
//! views.changed().await.ok();
//! println!("{} units in cart", views.borrow().cart.total_units);
//!
//! marketplace.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod transport;

pub use config::{Config, ConfigError, Role};
pub use controller::Marketplace;
pub use error::{ClientError, Result};
pub use transport::{
    CatalogQuery, HttpTransport, InvalidationEvent, InvalidationKind, InvalidationSender,
    TransportAdapter, TransportError,
};
