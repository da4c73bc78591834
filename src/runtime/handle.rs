use std::{collections::BTreeSet, sync::Arc};

use thiserror::Error;
use tokio::{
    sync::{
        Mutex, broadcast,
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    core::{
        discounts::DiscountState,
        store::{CartStore, CartTotals, CheckoutSnapshot, StoreError},
    },
    item::{CartLine, CatalogItem},
    op::Slice,
    persist::{self, KvStore, SliceWrite},
    types::{Generation, ProductId, Quantity},
};

use super::{config::RuntimeConfig, events::CartEvent};

/// Errors returned by [`CartHandle`] calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store rejected the input.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The writer task has stopped.
    #[error("cart runtime is not running")]
    ChannelClosed,
}

/// Cloneable reference to a running cart. Pass it to whatever needs the cart.
#[derive(Debug, Clone)]
pub struct CartHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<CartEvent>,
}

type StoreFn = Box<dyn FnOnce(&mut CartStore) + Send>;

enum Command {
    Run(StoreFn),
    Flush { resp: oneshot::Sender<()> },
    Shutdown { resp: oneshot::Sender<()> },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Run(_) => f.write_str("Run"),
            Command::Flush { .. } => f.write_str("Flush"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

enum PersistMsg {
    Write(SliceWrite),
    Flush { resp: oneshot::Sender<()> },
}

/// Spawns the writer task that owns `store`. Must be called inside a tokio runtime.
///
/// With `kv` set, every change is written through a background worker;
/// without it the cart lives in memory only.
pub fn spawn_cart(store: CartStore, kv: Option<Box<dyn KvStore>>, config: RuntimeConfig) -> CartHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound);
    let (events_tx, _) = broadcast::channel::<CartEvent>(config.event_capacity);

    let persist_tx = kv.map(|kv| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        spawn_persistence_worker(kv, persist_rx, events_tx.clone());
        persist_tx
    });

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut store = store;
        let mut expiry: Option<(Instant, Generation)> = None;
        // Slices changed since their last write was queued.
        let mut dirty: BTreeSet<Slice> = BTreeSet::new();
        info!(lines = store.lines().len(), "cart runtime started");

        loop {
            let deadline = expiry.map(|(at, _)| at);
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    match cmd {
                        Command::Run(job) => job(&mut store),
                        Command::Flush { resp } => {
                            settle_dirty(&store, &mut dirty, &events_tx_loop, persist_tx.as_ref()).await;
                            flush_persistence(persist_tx.as_ref()).await;
                            let _ = resp.send(());
                        }
                        Command::Shutdown { resp } => {
                            publish(&mut store, &mut dirty, &events_tx_loop, persist_tx.as_ref());
                            settle_dirty(&store, &mut dirty, &events_tx_loop, persist_tx.as_ref()).await;
                            flush_persistence(persist_tx.as_ref()).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                permit = reserve_write(persist_tx.as_ref()), if !dirty.is_empty() => {
                    match (permit, dirty.pop_first()) {
                        (Some(permit), Some(slice)) => match persist::encode_slice(&store, slice) {
                            Ok(write) => permit.send(PersistMsg::Write(write)),
                            Err(err) => report_unqueued(&events_tx_loop, slice, err.to_string()),
                        },
                        (None, Some(slice)) => {
                            report_unqueued(&events_tx_loop, slice, "persistence worker stopped".to_string());
                            fail_dirty(&mut dirty, &events_tx_loop);
                        }
                        (_, None) => {}
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((_, generation)) = expiry.take() {
                        if let Some(line) = store.expire_recently_removed(generation) {
                            debug!(id = line.id(), "undo window elapsed");
                        }
                    }
                }
            }

            publish(&mut store, &mut dirty, &events_tx_loop, persist_tx.as_ref());
            expiry = rearm_expiry(&store, expiry, &config);
        }

        info!("cart runtime stopped");
    });

    CartHandle { cmd_tx, events_tx }
}

impl CartHandle {
    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.events_tx.subscribe()
    }

    /// Runs `f` against the store on the writer task and returns its result.
    pub async fn with_store<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce(&mut CartStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: StoreFn = Box::new(move |store: &mut CartStore| {
            let _ = tx.send(f(store));
        });
        self.cmd_tx
            .send(Command::Run(job))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Read-only variant of [`CartHandle::with_store`].
    pub async fn read<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce(&CartStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.with_store(move |store| f(store)).await
    }

    /// Mirrors [`CartStore::add_to_cart`].
    pub async fn add_to_cart(&self, item: CatalogItem, quantity: Quantity) -> Result<Quantity, RuntimeError> {
        Ok(self
            .with_store(move |store| store.add_to_cart(item, quantity))
            .await??)
    }

    /// Adds a single unit.
    pub async fn add_one(&self, item: CatalogItem) -> Result<Quantity, RuntimeError> {
        self.add_to_cart(item, 1).await
    }

    /// Mirrors [`CartStore::remove_from_cart`].
    pub async fn remove_from_cart(&self, id: ProductId) -> Result<Option<CartLine>, RuntimeError> {
        self.with_store(move |store| store.remove_from_cart(id)).await
    }

    /// Mirrors [`CartStore::update_quantity`].
    pub async fn update_quantity(&self, id: ProductId, quantity: Quantity) -> Result<bool, RuntimeError> {
        self.with_store(move |store| store.update_quantity(id, quantity))
            .await
    }

    /// Drops every line.
    pub async fn clear_cart(&self) -> Result<(), RuntimeError> {
        self.with_store(CartStore::clear_cart).await
    }

    /// Mirrors [`CartStore::undo_remove`].
    pub async fn undo_remove(&self) -> Result<Option<ProductId>, RuntimeError> {
        self.with_store(CartStore::undo_remove).await
    }

    /// Flips visibility and returns the new state.
    pub async fn toggle_cart(&self) -> Result<bool, RuntimeError> {
        self.with_store(CartStore::toggle_cart).await
    }

    /// Sets visibility.
    pub async fn set_cart_open(&self, open: bool) -> Result<(), RuntimeError> {
        self.with_store(move |store| store.set_cart_open(open)).await
    }

    /// Whether the cart panel is open.
    pub async fn is_cart_open(&self) -> Result<bool, RuntimeError> {
        self.read(CartStore::is_cart_open).await
    }

    /// Returns false if `id` was already a favorite.
    pub async fn add_to_favorites(&self, id: ProductId) -> Result<bool, RuntimeError> {
        self.with_store(move |store| store.add_to_favorites(id)).await
    }

    /// Returns false if `id` was not a favorite.
    pub async fn remove_from_favorites(&self, id: ProductId) -> Result<bool, RuntimeError> {
        self.with_store(move |store| store.remove_from_favorites(id))
            .await
    }

    /// Whether `id` is a favorite.
    pub async fn is_favorite(&self, id: ProductId) -> Result<bool, RuntimeError> {
        self.read(move |store| store.is_favorite(id)).await
    }

    /// Favorite ids in ascending order.
    pub async fn favorites(&self) -> Result<Vec<ProductId>, RuntimeError> {
        self.read(|store| {
            let mut ids: Vec<ProductId> = store.favorites().iter().copied().collect();
            ids.sort_unstable();
            ids
        })
        .await
    }

    /// Units of `id`, 0 when absent.
    pub async fn item_quantity(&self, id: ProductId) -> Result<Quantity, RuntimeError> {
        self.read(move |store| store.item_quantity(id)).await
    }

    /// Whether a line for `id` exists.
    pub async fn is_in_cart(&self, id: ProductId) -> Result<bool, RuntimeError> {
        self.read(move |store| store.is_in_cart(id)).await
    }

    /// Mirrors [`CartStore::apply_discount`].
    pub async fn apply_discount(&self, code: impl Into<String>) -> Result<bool, RuntimeError> {
        let code = code.into();
        self.with_store(move |store| store.apply_discount(&code))
            .await
    }

    /// Clears the active discount.
    pub async fn remove_discount(&self) -> Result<(), RuntimeError> {
        self.with_store(CartStore::remove_discount).await
    }

    /// Active discount, if any.
    pub async fn discount(&self) -> Result<Option<DiscountState>, RuntimeError> {
        self.read(|store| store.discount().cloned()).await
    }

    /// Current derived totals.
    pub async fn totals(&self) -> Result<CartTotals, RuntimeError> {
        self.read(CartStore::totals).await
    }

    /// Copy of the cart lines.
    pub async fn lines(&self) -> Result<Vec<CartLine>, RuntimeError> {
        self.read(|store| store.lines().to_vec()).await
    }

    /// Line parked for undo, if any.
    pub async fn recently_removed(&self) -> Result<Option<CartLine>, RuntimeError> {
        self.read(|store| store.recently_removed().cloned()).await
    }

    /// Mirrors [`CartStore::checkout_snapshot`].
    pub async fn checkout_snapshot(&self) -> Result<Option<CheckoutSnapshot>, RuntimeError> {
        self.read(CartStore::checkout_snapshot).await
    }

    /// Waits until every changed slice has been written or has failed.
    pub async fn flush(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Flushes pending writes and stops the writer task.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

fn publish(
    store: &mut CartStore,
    dirty: &mut BTreeSet<Slice>,
    events_tx: &broadcast::Sender<CartEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    let ops = store.drain_pending_ops();

    if let Some(tx) = persist_tx {
        dirty.extend(persist::dirty_slices(&ops));
        queue_dirty(store, dirty, events_tx, tx);
    }

    for op in ops {
        let _ = events_tx.send(CartEvent::Applied(op));
    }
}

/// Queues dirty slices without waiting. A slice that meets a full queue stays
/// dirty and is re-encoded from the store once there is room.
fn queue_dirty(
    store: &CartStore,
    dirty: &mut BTreeSet<Slice>,
    events_tx: &broadcast::Sender<CartEvent>,
    tx: &mpsc::Sender<PersistMsg>,
) {
    while let Some(slice) = dirty.first().copied() {
        let write = match persist::encode_slice(store, slice) {
            Ok(write) => write,
            Err(err) => {
                dirty.remove(&slice);
                report_unqueued(events_tx, slice, err.to_string());
                continue;
            }
        };
        match tx.try_send(PersistMsg::Write(write)) {
            Ok(()) => {
                dirty.remove(&slice);
            }
            Err(TrySendError::Full(_)) => {
                debug!(?slice, pending = dirty.len(), "persist queue full, deferring slice writes");
                return;
            }
            Err(TrySendError::Closed(_)) => {
                fail_dirty(dirty, events_tx);
                return;
            }
        }
    }
}

/// Waits for queue room and writes every dirty slice.
async fn settle_dirty(
    store: &CartStore,
    dirty: &mut BTreeSet<Slice>,
    events_tx: &broadcast::Sender<CartEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    let Some(tx) = persist_tx else {
        dirty.clear();
        return;
    };
    while let Some(slice) = dirty.pop_first() {
        let write = match persist::encode_slice(store, slice) {
            Ok(write) => write,
            Err(err) => {
                report_unqueued(events_tx, slice, err.to_string());
                continue;
            }
        };
        if tx.send(PersistMsg::Write(write)).await.is_err() {
            report_unqueued(events_tx, slice, "persistence worker stopped".to_string());
            fail_dirty(dirty, events_tx);
            return;
        }
    }
}

async fn reserve_write(
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> Option<mpsc::Permit<'_, PersistMsg>> {
    match persist_tx {
        Some(tx) => tx.reserve().await.ok(),
        None => std::future::pending().await,
    }
}

fn fail_dirty(dirty: &mut BTreeSet<Slice>, events_tx: &broadcast::Sender<CartEvent>) {
    while let Some(slice) = dirty.pop_first() {
        report_unqueued(events_tx, slice, "persistence worker stopped".to_string());
    }
}

fn report_unqueued(events_tx: &broadcast::Sender<CartEvent>, slice: Slice, reason: String) {
    warn!(?slice, %reason, "cart slice not queued for persistence");
    let _ = events_tx.send(CartEvent::PersistFailed { slice, reason });
}

fn rearm_expiry(
    store: &CartStore,
    armed: Option<(Instant, Generation)>,
    config: &RuntimeConfig,
) -> Option<(Instant, Generation)> {
    let generation = store.parked_generation()?;
    match armed {
        Some((at, armed_generation)) if armed_generation == generation => Some((at, generation)),
        _ => Some((Instant::now() + config.undo_window, generation)),
    }
}

async fn flush_persistence(persist_tx: Option<&mpsc::Sender<PersistMsg>>) {
    let Some(tx) = persist_tx else {
        return;
    };
    let (flush_tx, flush_rx) = oneshot::channel();
    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_ok() {
        let _ = flush_rx.await;
    }
}

fn spawn_persistence_worker(
    kv: Box<dyn KvStore>,
    mut rx: mpsc::Receiver<PersistMsg>,
    events_tx: broadcast::Sender<CartEvent>,
) {
    let kv = Arc::new(Mutex::new(kv));
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PersistMsg::Write(write) => {
                    let slice = write.slice;
                    let kv_ref = Arc::clone(&kv);
                    let result = tokio::task::spawn_blocking(move || {
                        let mut kv = kv_ref.blocking_lock();
                        persist::write_slice(kv.as_mut(), &write).map_err(|err| err.to_string())
                    })
                    .await
                    .unwrap_or_else(|e| Err(format!("join error: {e}")));

                    let event = match result {
                        Ok(()) => CartEvent::Persisted { slice },
                        Err(reason) => {
                            warn!(?slice, %reason, "failed to persist cart slice");
                            CartEvent::PersistFailed { slice, reason }
                        }
                    };
                    let _ = events_tx.send(event);
                }
                PersistMsg::Flush { resp } => {
                    let _ = resp.send(());
                }
            }
        }
        debug!("cart persistence worker stopped");
    });
}
