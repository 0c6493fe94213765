//! The reconciliation controller task.
//!
//! [`Marketplace`] is a cheap handle to a single tokio task that owns the
//! engine's [`Reconciler`]. Every mutation of the store and cart happens on
//! that task, one message at a time:
//!
//! - commands from the UI (intents, filter changes, refresh, shutdown)
//! - completions of batch sends and catalog fetches spawned by the task
//! - invalidation events from the transport
//! - the debounce deadline
//!
//! After each message the views are re-projected and published on a
//! `watch` channel if they changed. Notices go out on a `broadcast` channel.

use std::sync::Arc;
use std::time::Duration;

use stockline_engine::{
    BatchId, BatchResponse, CatalogFilter, Intent, Notice, Outcome, PendingBatch, ProductId,
    ProductSnapshot, Reconciler, SyncError, Timestamp, View, ViewKind, ViewSet,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::transport::{
    CatalogQuery, InvalidationEvent, InvalidationKind, TransportAdapter, TransportError,
};

/// Capacity of the notice channel. Slow listeners miss old notices.
const NOTICE_CAPACITY: usize = 64;

enum Command {
    Dispatch(Intent),
    SetFilter(CatalogFilter),
    Refresh,
    Shutdown,
}

enum Event {
    BatchDone {
        batch_id: BatchId,
        result: std::result::Result<BatchResponse, TransportError>,
    },
    RefreshDone {
        result: std::result::Result<Vec<ProductSnapshot>, TransportError>,
    },
}

/// Handle to a running storefront controller.
pub struct Marketplace {
    commands: mpsc::UnboundedSender<Command>,
    views: watch::Receiver<ViewSet>,
    notices: broadcast::Sender<Notice>,
    task: JoinHandle<()>,
}

impl Marketplace {
    /// Spawn the controller task, load the catalog and subscribe to
    /// invalidations.
    pub fn start(transport: Arc<dyn TransportAdapter>, config: &Config) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (views_tx, views_rx) = watch::channel(ViewSet::default());
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let filter = CatalogFilter::new().page_size(config.page_size);
        let controller = Controller::new(transport, config, filter, views_tx, notices_tx.clone());
        let task = tokio::spawn(controller.run(commands_rx));

        Self {
            commands: commands_tx,
            views: views_rx,
            notices: notices_tx,
            task,
        }
    }

    /// Apply an intent. Returns immediately; the effect shows up in the
    /// views as soon as the controller task handles it.
    pub fn dispatch_intent(&self, intent: Intent) -> Result<()> {
        self.send(Command::Dispatch(intent))
    }

    /// Add one unit of a product to the cart.
    pub fn add_to_cart(&self, product_id: impl Into<ProductId>) -> Result<()> {
        let product_id = product_id.into();
        let line_id = self.line_id(&product_id);
        self.dispatch_intent(Intent::increment(product_id, line_id, wall_clock()))
    }

    /// Take one unit of a product out of the cart.
    pub fn decrement(&self, product_id: impl Into<ProductId>) -> Result<()> {
        let product_id = product_id.into();
        let line_id = self.line_id(&product_id);
        self.dispatch_intent(Intent::decrement(product_id, line_id, wall_clock()))
    }

    /// Drop a product's line from the cart.
    pub fn remove_from_cart(&self, product_id: impl Into<ProductId>) -> Result<()> {
        let product_id = product_id.into();
        let line_id = self.line_id(&product_id);
        self.dispatch_intent(Intent::remove(product_id, line_id, wall_clock()))
    }

    /// Id of the product's current cart line, or a fresh one.
    fn line_id(&self, product_id: &str) -> String {
        self.views
            .borrow()
            .cart
            .lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.line_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// The last committed version of one view.
    pub fn get_view(&self, kind: ViewKind) -> View {
        self.views.borrow().get(kind)
    }

    /// All views as last committed.
    pub fn views(&self) -> ViewSet {
        self.views.borrow().clone()
    }

    /// Receiver notified on every committed view change.
    pub fn subscribe(&self) -> watch::Receiver<ViewSet> {
        self.views.clone()
    }

    /// Receiver of user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn set_catalog_filter(&self, filter: CatalogFilter) -> Result<()> {
        self.send(Command::SetFilter(filter))
    }

    /// Re-pull the catalog.
    pub fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh)
    }

    /// Stop accepting intents, send whatever is queued and wait for every
    /// batch in flight to resolve.
    pub async fn shutdown(self) -> Result<()> {
        // The task may already be gone; joining tells us how it ended.
        let _ = self.commands.send(Command::Shutdown);
        self.task.await.map_err(|_| ClientError::Stopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}

/// Wall-clock milliseconds, used to date cart lines.
fn wall_clock() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    /// Another refresh was requested while one was running
    again: bool,
}

struct Controller {
    reconciler: Reconciler,
    transport: Arc<dyn TransportAdapter>,
    catalog_query: CatalogQuery,
    retry_backoff: Duration,
    best_sellers: usize,
    filter: CatalogFilter,
    views: watch::Sender<ViewSet>,
    notices: broadcast::Sender<Notice>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    refresh: RefreshState,
    /// Origin of the engine's millisecond clock
    started: Instant,
    stopping: bool,
}

impl Controller {
    fn new(
        transport: Arc<dyn TransportAdapter>,
        config: &Config,
        filter: CatalogFilter,
        views: watch::Sender<ViewSet>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            reconciler: Reconciler::new(config.debounce_ms),
            transport,
            catalog_query: config.role.catalog_query(),
            retry_backoff: config.retry_backoff(),
            best_sellers: config.best_sellers,
            filter,
            views,
            notices,
            events_tx,
            events_rx,
            refresh: RefreshState::default(),
            started: Instant::now(),
            stopping: false,
        }
    }

    fn now(&self) -> Timestamp {
        self.started.elapsed().as_millis() as Timestamp
    }

    fn deadline(&self) -> Option<Instant> {
        self.reconciler
            .deadline()
            .map(|ms| self.started + Duration::from_millis(ms))
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (invalidations_tx, mut invalidations) = mpsc::unbounded_channel();
        if let Err(e) = self.transport.subscribe_invalidation(invalidations_tx).await {
            tracing::error!("Failed to subscribe to invalidations: {}", e);
        }
        self.request_refresh();
        self.publish();

        tracing::info!("Marketplace controller started");

        loop {
            let deadline = self.deadline();
            let timer = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispatch(intent)) => self.dispatch(intent),
                    Some(Command::SetFilter(filter)) => {
                        self.filter = filter;
                        self.publish();
                    }
                    Some(Command::Refresh) => self.request_refresh(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                Some(event) = invalidations.recv() => self.invalidate(event),
                _ = timer, if deadline.is_some() => self.flush(),
            }
        }

        self.drain().await;
        tracing::info!("Marketplace controller stopped");
    }

    /// Flush what is queued and wait for every batch in flight.
    async fn drain(&mut self) {
        self.stopping = true;
        self.flush();

        while self.reconciler.in_flight_count() > 0 {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event);
            self.flush();
        }

        if self.reconciler.has_pending_writes() {
            tracing::warn!(
                queued = self.reconciler.queue().len(),
                "Stopped with unsent cart writes"
            );
        }
    }

    fn dispatch(&mut self, intent: Intent) {
        if self.stopping {
            return;
        }
        let product_id = intent.product_id().clone();
        let kind = intent.kind();
        let name = self
            .reconciler
            .store()
            .get(&product_id)
            .map(|p| p.name.clone());

        match self.reconciler.dispatch(intent, self.now()) {
            Ok(snapshot) => {
                tracing::debug!(
                    product_id = %product_id,
                    kind = ?kind,
                    available = snapshot.available(),
                    "Intent applied"
                );
            }
            Err(e) => {
                tracing::debug!(product_id = %product_id, kind = ?kind, "Intent refused: {}", e);
                if let Some(notice) = Notice::from_error(&e, name.as_deref()) {
                    self.notify(notice);
                }
            }
        }
        self.publish();
    }

    fn flush(&mut self) {
        let Some(batch) = self.reconciler.flush() else {
            return;
        };
        tracing::debug!(
            batch_id = batch.batch_id,
            removals = batch.removals.len(),
            deltas = batch.deltas.len(),
            "Flushing batch"
        );
        self.send_batch(batch);
    }

    /// Send a batch on its own task, retrying a transient failure once.
    fn send_batch(&self, batch: PendingBatch) {
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let backoff = self.retry_backoff;

        tokio::spawn(async move {
            let mut result = transport.send_mutation_batch(&batch).await;
            if let Err(e) = &result {
                if e.is_retryable() {
                    tracing::warn!(batch_id = batch.batch_id, "Batch failed, retrying: {}", e);
                    tokio::time::sleep(backoff).await;
                    result = transport.send_mutation_batch(&batch).await;
                }
            }
            let _ = events.send(Event::BatchDone {
                batch_id: batch.batch_id,
                result,
            });
        });
    }

    fn request_refresh(&mut self) {
        if self.refresh.in_flight {
            self.refresh.again = true;
            return;
        }
        self.refresh.in_flight = true;

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let query = self.catalog_query.clone();
        tokio::spawn(async move {
            let result = transport.fetch_catalog(&query).await;
            let _ = events.send(Event::RefreshDone { result });
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::BatchDone { batch_id, result } => self.complete_batch(batch_id, result),
            Event::RefreshDone { result } => self.complete_refresh(result),
        }
        self.publish();
    }

    fn complete_batch(
        &mut self,
        batch_id: BatchId,
        result: std::result::Result<BatchResponse, TransportError>,
    ) {
        let result = result.map_err(|e| {
            let store = self.reconciler.store();
            e.to_sync_error(|id| store.get(id).map(|p| p.version))
        });
        let conflict = matches!(result, Err(SyncError::StaleVersionConflict { .. }));

        match self.reconciler.complete_batch(batch_id, result, self.now()) {
            Ok(outcomes) => {
                let stale = outcomes
                    .iter()
                    .any(|o| matches!(o, Outcome::StaleConfirmation { .. }));
                tracing::debug!(batch_id, outcomes = outcomes.len(), "Batch resolved");
                self.report(&outcomes);
                if conflict || stale {
                    self.request_refresh();
                }
            }
            Err(e) => tracing::warn!(batch_id, "Ignoring completion: {}", e),
        }
    }

    fn report(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            match outcome {
                Outcome::Confirmed {
                    product_id,
                    version,
                } => {
                    tracing::debug!(product_id = %product_id, version, "Write confirmed");
                }
                Outcome::RolledBack {
                    product_id, error, ..
                } => {
                    tracing::warn!(product_id = %product_id, "Write rolled back: {}", error);
                }
                Outcome::StaleConfirmation {
                    product_id,
                    held,
                    received,
                } => {
                    tracing::debug!(
                        product_id = %product_id,
                        held,
                        received,
                        "Discarded stale confirmation"
                    );
                }
                Outcome::Inconsistency {
                    product_id,
                    cart_line_id,
                    detail,
                } => {
                    tracing::warn!(
                        product_id = %product_id,
                        cart_line_id = ?cart_line_id,
                        "Inconsistency: {}",
                        detail
                    );
                }
                Outcome::Vanished {
                    product_id,
                    dropped_intents,
                    ..
                } => {
                    tracing::info!(product_id = %product_id, dropped_intents, "Product vanished");
                }
            }
            if let Some(notice) = Notice::from_outcome(outcome) {
                self.notify(notice);
            }
        }
    }

    fn complete_refresh(
        &mut self,
        result: std::result::Result<Vec<ProductSnapshot>, TransportError>,
    ) {
        self.refresh.in_flight = false;

        match result {
            Ok(products) => {
                let count = products.len();
                let outcomes = self.reconciler.apply_refresh(products);
                tracing::debug!(products = count, vanished = outcomes.len(), "Catalog refreshed");
                self.report(&outcomes);
            }
            Err(e) => tracing::error!("Catalog refresh failed: {}", e),
        }

        if std::mem::take(&mut self.refresh.again) && !self.stopping {
            self.request_refresh();
        }
    }

    fn invalidate(&mut self, event: InvalidationEvent) {
        tracing::debug!(kind = ?event.kind, product_id = ?event.product_id, "Invalidation");
        if event.kind == InvalidationKind::Deleted {
            if let Some(product_id) = &event.product_id {
                if let Some(outcome) = self.reconciler.remove_product(product_id) {
                    self.report(std::slice::from_ref(&outcome));
                    self.publish();
                }
            }
        }
        self.request_refresh();
    }

    fn publish(&self) {
        let next = self.reconciler.views(&self.filter, self.best_sellers);
        self.views.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn notify(&self, notice: Notice) {
        tracing::debug!(level = ?notice.level, "{}", notice.message);
        // No listeners is fine.
        let _ = self.notices.send(notice);
    }
}
