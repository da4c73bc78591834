use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::broadcast;

use cartstore::{
    core::store::CartStore,
    item::CatalogItem,
    op::{CartOp, Slice},
    persist::{KvStore, PersistError, PersistResult, load_store, memory::MemoryKvStore},
    runtime::{
        config::RuntimeConfig,
        events::CartEvent,
        handle::{RuntimeError, spawn_cart},
    },
};

fn tea(id: u64, cents: i64) -> CatalogItem {
    CatalogItem::new(id, format!("Tea {id}"), Decimal::new(cents, 2))
}

fn drain(sub: &mut broadcast::Receiver<CartEvent>) -> Vec<CartEvent> {
    let mut out = Vec::new();
    while let Ok(evt) = sub.try_recv() {
        out.push(evt);
    }
    out
}

struct BrokenKv;

impl KvStore for BrokenKv {
    fn get(&self, _key: &str) -> PersistResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set(&mut self, _key: &str, _value: &[u8]) -> PersistResult<()> {
        Err(PersistError::Message("disk full".to_string()))
    }

    fn delete(&mut self, _key: &str) -> PersistResult<()> {
        Err(PersistError::Message("disk full".to_string()))
    }
}

struct SlowKv {
    inner: MemoryKvStore,
    delay: Duration,
}

impl KvStore for SlowKv {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        std::thread::sleep(self.delay);
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &str) -> PersistResult<()> {
        std::thread::sleep(self.delay);
        self.inner.delete(key)
    }
}

#[tokio::test]
async fn mutations_emit_ordered_events() {
    let handle = spawn_cart(CartStore::new(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    assert_eq!(handle.add_to_cart(tea(1, 1899), 2).await.expect("add"), 2);
    assert!(handle.remove_from_cart(1).await.expect("remove").is_some());
    assert_eq!(handle.undo_remove().await.expect("undo"), Some(1));
    assert!(handle.apply_discount("onsen15").await.expect("discount"));

    let events = drain(&mut sub);
    assert_eq!(
        events,
        vec![
            CartEvent::Applied(CartOp::Added { id: 1, quantity: 2 }),
            CartEvent::Applied(CartOp::VisibilityChanged { open: true }),
            CartEvent::Applied(CartOp::Removed { id: 1 }),
            CartEvent::Applied(CartOp::RemovalUndone { id: 1 }),
            CartEvent::Applied(CartOp::DiscountApplied {
                code: "ONSEN15".to_string()
            }),
        ]
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn handle_mirrors_store_operations() {
    let handle = spawn_cart(CartStore::new(), None, RuntimeConfig::default());
    let other = handle.clone();

    handle.add_to_cart(tea(1, 1899), 2).await.expect("add1");
    other.add_one(tea(2, 1699)).await.expect("add2");
    assert!(handle.apply_discount("ONSEN15").await.expect("discount"));

    let totals = other.totals().await.expect("totals");
    assert_eq!(totals.count, 3);
    assert_eq!(totals.subtotal, Decimal::new(5497, 2));
    assert_eq!(totals.final_total, Decimal::new(4672, 2));

    assert!(handle.update_quantity(2, 0).await.expect("update"));
    assert!(!other.is_in_cart(2).await.expect("in cart"));
    assert_eq!(other.item_quantity(1).await.expect("qty"), 2);
    assert!(other.recently_removed().await.expect("parked").is_some());

    assert!(handle.add_to_favorites(9).await.expect("fav"));
    assert!(!handle.add_to_favorites(9).await.expect("fav again"));
    assert!(handle.add_to_favorites(4).await.expect("fav"));
    assert_eq!(other.favorites().await.expect("favs"), vec![4, 9]);
    assert!(handle.remove_from_favorites(9).await.expect("unfav"));
    assert!(!other.is_favorite(9).await.expect("is fav"));

    assert!(other.is_cart_open().await.expect("open"));
    assert!(!handle.toggle_cart().await.expect("toggle"));
    handle.set_cart_open(true).await.expect("set open");
    assert!(other.is_cart_open().await.expect("open"));

    handle.remove_discount().await.expect("remove discount");
    assert_eq!(other.discount().await.expect("discount"), None);

    handle.clear_cart().await.expect("clear");
    assert_eq!(other.checkout_snapshot().await.expect("snapshot"), None);
    assert_eq!(other.undo_remove().await.expect("undo"), None);

    let err = handle.add_to_cart(tea(3, 100), 0).await;
    assert!(matches!(err, Err(RuntimeError::Store(_))));

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(
        other.lines().await,
        Err(RuntimeError::ChannelClosed)
    ));
}

#[tokio::test]
async fn slices_are_persisted_and_reload_on_next_session() {
    let kv = MemoryKvStore::new();
    let handle = spawn_cart(
        load_store(&kv),
        Some(Box::new(kv.clone())),
        RuntimeConfig::default(),
    );
    let mut sub = handle.subscribe();

    handle.add_to_cart(tea(1, 1899), 2).await.expect("add");
    handle.add_to_favorites(1).await.expect("fav");
    handle.apply_discount("welcome10").await.expect("discount");
    handle.flush().await.expect("flush");

    let persisted: Vec<Slice> = drain(&mut sub)
        .into_iter()
        .filter_map(|evt| match evt {
            CartEvent::Persisted { slice } => Some(slice),
            _ => None,
        })
        .collect();
    assert_eq!(persisted, vec![Slice::Lines, Slice::Favorites, Slice::Discount]);

    handle.remove_discount().await.expect("remove discount");
    handle.shutdown().await.expect("shutdown");
    assert!(!kv.contains(Slice::Discount.key()));

    let next = spawn_cart(load_store(&kv), Some(Box::new(kv.clone())), RuntimeConfig::default());
    assert_eq!(next.item_quantity(1).await.expect("qty"), 2);
    assert!(next.is_favorite(1).await.expect("fav"));
    assert_eq!(next.discount().await.expect("discount"), None);
    next.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn persistence_failure_keeps_in_memory_state() {
    let handle = spawn_cart(CartStore::new(), Some(Box::new(BrokenKv)), RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.add_to_cart(tea(1, 500), 3).await.expect("add");
    handle.flush().await.expect("flush");

    let failed = drain(&mut sub)
        .into_iter()
        .any(|evt| matches!(evt, CartEvent::PersistFailed { slice: Slice::Lines, .. }));
    assert!(failed, "expected PersistFailed for lines");

    assert_eq!(handle.item_quantity(1).await.expect("qty"), 3);
    assert_eq!(
        handle.totals().await.expect("totals").subtotal,
        Decimal::new(1500, 2)
    );
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_persist_queue_defers_writes_until_flush() {
    let kv = MemoryKvStore::new();
    let slow = SlowKv {
        inner: kv.clone(),
        delay: Duration::from_millis(100),
    };
    let cfg = RuntimeConfig {
        persist_queue_bound: 1,
        ..RuntimeConfig::default()
    };
    let handle = spawn_cart(CartStore::new(), Some(Box::new(slow)), cfg);
    let mut sub = handle.subscribe();

    for i in 0..6u64 {
        handle.add_one(tea(i, 100)).await.expect("add never fails");
    }
    handle.add_to_favorites(3).await.expect("fav");
    let in_memory = handle.lines().await.expect("lines");
    assert_eq!(in_memory.len(), 6);

    handle.flush().await.expect("flush");
    assert_eq!(load_store(&kv).lines(), in_memory.as_slice());
    assert!(load_store(&kv).is_favorite(3));

    handle.update_quantity(0, 4).await.expect("update");
    handle.add_one(tea(6, 100)).await.expect("add");
    let in_memory = handle.lines().await.expect("lines");
    handle.shutdown().await.expect("shutdown");

    let reloaded = load_store(&kv);
    assert_eq!(reloaded.lines(), in_memory.as_slice());
    assert_eq!(reloaded.item_quantity(0), 4);

    let failures = drain(&mut sub)
        .into_iter()
        .filter(|evt| matches!(evt, CartEvent::PersistFailed { .. }))
        .count();
    assert_eq!(failures, 0, "a full queue is not a storage failure");
}

#[tokio::test(start_paused = true)]
async fn parked_line_expires_after_undo_window() {
    let handle = spawn_cart(CartStore::new(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.add_to_cart(tea(1, 1899), 2).await.expect("add");
    handle.remove_from_cart(1).await.expect("remove");

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(handle.recently_removed().await.expect("parked").is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.recently_removed().await.expect("parked"), None);
    assert_eq!(handle.undo_remove().await.expect("undo"), None);

    let expired = drain(&mut sub)
        .into_iter()
        .any(|evt| evt == CartEvent::Applied(CartOp::RemovalExpired { id: 1 }));
    assert!(expired);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn newer_removal_restarts_undo_window() {
    let handle = spawn_cart(CartStore::new(), None, RuntimeConfig::default());

    handle.add_one(tea(1, 100)).await.expect("add1");
    handle.add_one(tea(2, 100)).await.expect("add2");

    handle.remove_from_cart(1).await.expect("remove1");
    tokio::time::sleep(Duration::from_secs(6)).await;
    handle.remove_from_cart(2).await.expect("remove2");

    tokio::time::sleep(Duration::from_secs(6)).await;
    let parked = handle.recently_removed().await.expect("parked");
    assert_eq!(parked.map(|line| line.id()), Some(2));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.recently_removed().await.expect("parked"), None);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn undo_within_window_disarms_expiry() {
    let handle = spawn_cart(CartStore::new(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.add_to_cart(tea(1, 100), 4).await.expect("add");
    handle.remove_from_cart(1).await.expect("remove");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.undo_remove().await.expect("undo"), Some(1));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.item_quantity(1).await.expect("qty"), 4);
    let expired = drain(&mut sub)
        .into_iter()
        .any(|evt| matches!(evt, CartEvent::Applied(CartOp::RemovalExpired { .. })));
    assert!(!expired);

    handle.shutdown().await.expect("shutdown");
}
