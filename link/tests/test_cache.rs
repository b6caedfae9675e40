//! Integration tests for the table snapshot cache: prime coalescing, merge
//! of change events, invalidation and idle-key retention.
//!
//! Everything runs against in-process mocks (see `common/mod.rs`), so no
//! server is needed:
//!
//! ```bash
//! cd link && cargo test --test test_cache
//! ```

mod common;

use common::{ids, row, settle, wait_ready, wait_until, within, Harness};
use estate_link::{
    CacheOptions, ChangeEvent, Filter, LinkError, QueryOptions, SnapshotStatus, TableQuery,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn parcels() -> Vec<estate_link::Record> {
    vec![
        row(json!({"id": 1, "status": "available", "created_at": "2024-01-01"})),
        row(json!({"id": 2, "status": "sold", "created_at": "2024-02-01"})),
        row(json!({"id": 3, "status": "available", "created_at": "2024-03-01"})),
    ]
}

fn status(value: &str) -> QueryOptions {
    QueryOptions::new().with_filter(Filter::eq("status", value))
}

// ── coalescing ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_subscribers_share_one_prime() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.hold();

    let first = h.client.use_table("parcels", status("available")).unwrap();
    let second = h.client.use_table("parcels", status("available")).unwrap();
    settle().await;

    assert_eq!(h.backend.calls(), 1, "second subscriber must join the in-flight prime");
    assert!(first.loading());
    assert!(second.loading());

    h.backend.open();
    wait_ready(&first).await;
    wait_ready(&second).await;

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(ids(&first.data()), vec!["1", "3"]);
    assert_eq!(ids(&second.data()), vec!["1", "3"]);
    assert!(Arc::ptr_eq(&first.data(), &second.data()), "consumers share one row allocation");
}

#[tokio::test]
async fn test_concurrent_prime_calls_are_coalesced() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.hold();

    let cache = h.client.cache().clone();
    let query = TableQuery::new("parcels", QueryOptions::new());
    let backend = h.backend.clone();

    let (a, b, _) = within(async {
        tokio::join!(cache.prime(&query), cache.prime(&query), async {
            settle().await;
            backend.open();
        })
    })
    .await;

    assert_eq!(a.unwrap().len(), 3);
    assert_eq!(b.unwrap().len(), 3);
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn test_resubscribe_after_last_unsubscribe_primes_exactly_once() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    wait_ready(&hook).await;
    let key = hook.key();
    drop(hook);
    assert_eq!(h.client.cache().subscriber_count(&key), 0);
    assert_eq!(h.backend.calls(), 1);

    h.backend.hold();
    let again = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    settle().await;

    // Stale rows stay visible while the fresh prime runs.
    assert_eq!(again.data().len(), 3);
    assert!(again.loading());
    assert!(again.is_refreshing());

    h.backend.open();
    wait_ready(&again).await;
    settle().await;
    assert_eq!(h.backend.calls(), 2);
}

// ── teardown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unsubscribe_before_prime_resolves_is_silent() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.hold();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let query = TableQuery::new("parcels", QueryOptions::new());
    let mut subscription = h
        .client
        .cache()
        .subscribe_key(&query, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    settle().await;

    subscription.close();
    let seen = calls.load(Ordering::SeqCst);

    h.backend.open();
    let cache = h.client.cache().clone();
    let key = query.cache_key();
    wait_until("prime to land", || {
        cache.get_snapshot(&key).map_or(false, |s| s.status == SnapshotStatus::Ready)
    })
    .await;
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), seen, "no callback after close");
    // The request still ran to completion and updated the shared cache.
    assert_eq!(h.client.get_snapshot(&key).unwrap().len(), 3);
}

#[tokio::test]
async fn test_unmounted_hook_ignores_late_prime() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.hold();

    let mut hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = changes.clone();
    hook.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    hook.unmount();
    assert!(!hook.is_mounted());

    h.backend.open();
    let cache = h.client.cache().clone();
    let key = hook.key();
    wait_until("prime to land", || {
        cache.get_snapshot(&key).map_or(false, |s| s.is_primed())
    })
    .await;
    settle().await;

    assert_eq!(changes.load(Ordering::SeqCst), 0);
    assert!(hook.data().is_empty());
}

// ── merge ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_events_never_duplicate_rows() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    wait_ready(&hook).await;
    h.wait_connected("parcels").await;

    let fresh = row(json!({"id": 4, "status": "available", "created_at": "2024-04-01"}));
    h.transport.emit(ChangeEvent::insert("parcels", fresh.clone()));
    h.transport.emit(ChangeEvent::insert("parcels", fresh));
    h.transport.emit(ChangeEvent::insert("parcels", parcels()[0].clone()));
    h.transport.emit(ChangeEvent::update("parcels", row(json!({"id": 2, "status": "reserved"}))));
    h.transport.emit(ChangeEvent::delete("parcels", 3));
    h.transport.emit(ChangeEvent::delete("parcels", 3));

    wait_until("events to apply", || ids(&hook.data()) == vec!["1", "2", "4"]).await;
    settle().await;

    let data = hook.data();
    let unique: HashSet<String> = ids(&data).into_iter().collect();
    assert_eq!(unique.len(), data.len());
    assert_eq!(data[1].get("status"), Some(&json!("reserved")));
}

#[tokio::test]
async fn test_status_change_moves_parcel_between_views() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let available = h.client.use_table("parcels", status("available")).unwrap();
    let sold = h.client.use_table("parcels", status("sold")).unwrap();
    wait_ready(&available).await;
    wait_ready(&sold).await;
    h.wait_connected("parcels").await;
    assert_eq!(ids(&available.data()), vec!["1", "3"]);
    assert_eq!(ids(&sold.data()), vec!["2"]);
    let primes = h.backend.calls();

    h.transport.emit(ChangeEvent::update_from(
        "parcels",
        parcels()[0].clone(),
        row(json!({"id": 1, "status": "sold", "created_at": "2024-01-01"})),
    ));

    wait_until("parcel 1 to move", || {
        ids(&available.data()) == vec!["3"] && ids(&sold.data()) == vec!["1", "2"]
    })
    .await;
    assert_eq!(h.backend.calls(), primes, "simple filters merge locally");
}

#[tokio::test]
async fn test_redelivered_partial_update_enters_view_once() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let sold = h.client.use_table("parcels", status("sold")).unwrap();
    wait_ready(&sold).await;
    h.wait_connected("parcels").await;
    let primes = h.backend.calls();

    // The new values omit the key; it only travels in the old record.
    let update = ChangeEvent::update_from("parcels", parcels()[2].clone(), row(json!({"status": "sold"})));
    h.transport.emit(update.clone());
    h.transport.emit(update);
    wait_until("parcel 3 to join", || ids(&sold.data()) == vec!["2", "3"]).await;
    settle().await;

    let data = sold.data();
    assert_eq!(ids(&data), vec!["2", "3"]);
    assert_eq!(data[1].get("created_at"), Some(&json!("2024-03-01")));
    assert_eq!(h.backend.calls(), primes);

    h.transport.emit(ChangeEvent::delete("parcels", 3));
    wait_until("parcel 3 to leave", || ids(&sold.data()) == vec!["2"]).await;
}

#[tokio::test]
async fn test_partial_update_without_filter_column_reprimes() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let sold = h.client.use_table("parcels", status("sold")).unwrap();
    wait_ready(&sold).await;
    h.wait_connected("parcels").await;
    let primes = h.backend.calls();

    h.backend.upsert("parcels", row(json!({"id": 3, "status": "sold", "created_at": "2024-03-01"})));
    h.transport.emit(ChangeEvent::update("parcels", row(json!({"id": 3, "price": 1}))));

    let backend = h.backend.clone();
    wait_until("reprime", move || backend.calls() == primes + 1).await;
    wait_until("fresh rows", || ids(&sold.data()) == vec!["2", "3"]).await;
}

#[tokio::test]
async fn test_opaque_filter_view_reprimes_on_change() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let available = h.client.use_table("parcels", status("available")).unwrap();
    let closed = h
        .client
        .use_table(
            "parcels",
            QueryOptions::new().with_filter(Filter::opaque("status=in.(sold,reserved)")),
        )
        .unwrap();
    wait_ready(&available).await;
    wait_ready(&closed).await;
    h.wait_connected("parcels").await;
    let primes = h.backend.calls();

    h.transport.emit(ChangeEvent::update(
        "parcels",
        row(json!({"id": 1, "status": "sold", "created_at": "2024-01-01"})),
    ));

    wait_until("available view to drop parcel 1", || ids(&available.data()) == vec!["3"]).await;
    let backend = h.backend.clone();
    wait_until("opaque view to reprime", move || backend.calls() == primes + 1).await;
    settle().await;
    assert_eq!(h.backend.calls(), primes + 1, "only the opaque key refetches");
}

#[tokio::test]
async fn test_newest_first_insert_lands_on_top() {
    let h = Harness::new();
    h.backend.set_rows(
        "listings",
        vec![
            row(json!({"id": 1, "created_at": "2024-01-01T00:00:00Z"})),
            row(json!({"id": 2, "created_at": "2024-02-01T00:00:00Z"})),
        ],
    );

    let hook = h
        .client
        .use_table("listings", QueryOptions::new().with_order_by("created_at", false))
        .unwrap();
    wait_ready(&hook).await;
    h.wait_connected("listings").await;
    assert_eq!(ids(&hook.data()), vec!["2", "1"]);

    let before = hook.data();
    h.transport.emit(ChangeEvent::insert(
        "listings",
        row(json!({"id": 3, "created_at": "2024-03-01T00:00:00Z"})),
    ));

    wait_until("insert to apply", || hook.data().len() == 3).await;
    assert_eq!(ids(&hook.data()), vec!["3", "2", "1"]);
    assert_eq!(ids(&before), vec!["2", "1"], "published rows are never mutated");
}

#[tokio::test]
async fn test_event_during_prime_is_applied_after_install() {
    let h = Harness::new();
    h.backend.set_rows("parcels", vec![row(json!({"id": 1}))]);

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    wait_ready(&hook).await;
    h.wait_connected("parcels").await;

    h.backend.hold();
    hook.refetch();
    settle().await;
    assert!(hook.is_refreshing());

    h.transport.emit(ChangeEvent::insert("parcels", row(json!({"id": 2}))));
    settle().await;
    assert_eq!(ids(&hook.data()), vec!["1"], "queued until the prime installs");

    h.backend.open();
    wait_until("queued insert to apply", || ids(&hook.data()) == vec!["1", "2"]).await;
    assert!(!hook.loading());
}

// ── invalidation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalidate_table_reprimes_every_key() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.set_rows("listings", vec![row(json!({"id": 9}))]);

    let hooks = vec![
        h.client.use_table("parcels", status("available")).unwrap(),
        h.client.use_table("parcels", status("sold")).unwrap(),
        h.client.use_table("parcels", QueryOptions::new()).unwrap(),
        h.client.use_table("listings", QueryOptions::new()).unwrap(),
    ];
    for hook in &hooks {
        wait_ready(hook).await;
    }
    let parcels_before = h.backend.calls_for("parcels");
    let listings_before = h.backend.calls_for("listings");

    assert_eq!(h.client.invalidation().invalidate("parcels", None).unwrap(), 3);

    let backend = h.backend.clone();
    wait_until("three reprimes", move || backend.calls_for("parcels") == parcels_before + 3).await;
    settle().await;
    assert_eq!(h.backend.calls_for("listings"), listings_before);

    let sold = Filter::eq("status", "sold");
    assert_eq!(h.client.invalidation().invalidate("parcels", Some(&sold)).unwrap(), 1);
    assert_eq!(h.client.invalidation().invalidate_expr("parcels", Some("status=eq.sold")).unwrap(), 1);
}

#[tokio::test]
async fn test_invalidate_during_prime_runs_one_follow_up() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());
    h.backend.hold();

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    settle().await;
    assert_eq!(h.backend.calls(), 1);

    h.client.invalidation().invalidate("parcels", None).unwrap();
    h.client.invalidation().invalidate("parcels", None).unwrap();
    settle().await;
    assert_eq!(h.backend.calls(), 1, "follow-up waits for the running prime");

    h.backend.open();
    let backend = h.backend.clone();
    wait_until("follow-up prime", move || backend.calls() == 2).await;
    wait_ready(&hook).await;
    settle().await;
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_rejects_bad_table() {
    let h = Harness::new();
    let err = h.client.invalidation().invalidate("parcels; drop", None).unwrap_err();
    assert!(matches!(err, LinkError::ValidationError(_)));
}

// ── errors ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_refresh_keeps_last_good_rows() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    wait_ready(&hook).await;

    h.backend.fail_next(LinkError::NetworkError("connection reset".into()));
    let err = within(hook.refetch_and_wait()).await.unwrap_err();
    assert!(err.is_retriable());

    let snapshot = hook.snapshot();
    assert_eq!(snapshot.status, SnapshotStatus::Error);
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.error.is_some());
    assert!(hook.error().is_none(), "stale data wins over the error");
    assert!(!hook.loading());
}

#[tokio::test]
async fn test_failed_first_prime_surfaces_error() {
    let h = Harness::new();
    h.backend.fail_next(LinkError::ValidationError("unknown column".into()));

    let hook = h.client.use_table("parcels", QueryOptions::new()).unwrap();
    wait_ready(&hook).await;

    assert!(hook.data().is_empty());
    assert!(matches!(hook.error(), Some(LinkError::ValidationError(_))));
    assert_eq!(hook.result().error, hook.error());
}

// ── retention ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalidate_marks_idle_key_stale() {
    let h = Harness::new();
    h.backend.set_rows("parcels", parcels());

    let hook = h.client.use_table("parcels", status("available")).unwrap();
    wait_ready(&hook).await;
    let key = hook.key();
    drop(hook);
    let primes = h.backend.calls();

    assert_eq!(h.client.invalidation().invalidate("parcels", None).unwrap(), 0);
    settle().await;
    assert_eq!(h.backend.calls(), primes, "idle keys are not fetched");

    let snapshot = h.client.get_snapshot(&key).unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Stale);
    assert!(snapshot.is_stale());
    assert_eq!(ids(&snapshot.rows), vec!["1", "3"]);

    let hook = h.client.use_table("parcels", status("available")).unwrap();
    wait_ready(&hook).await;
    assert_eq!(h.client.get_snapshot(&key).unwrap().status, SnapshotStatus::Ready);
}

#[tokio::test]
async fn test_idle_keys_evicted_oldest_first() {
    let h = Harness::custom(|builder| builder.cache_options(CacheOptions::default().with_max_idle_keys(1)));
    h.backend.set_rows("parcels", parcels());

    let mut keys = Vec::new();
    for value in ["available", "sold", "reserved"] {
        let hook = h.client.use_table("parcels", status(value)).unwrap();
        wait_ready(&hook).await;
        keys.push(hook.key());
    }

    assert_eq!(h.client.cache().key_count(), 1);
    assert_eq!(h.client.cache().keys_for_table("parcels"), vec![keys[2].clone()]);
    assert!(h.client.get_snapshot(&keys[0]).is_none());
}

#[tokio::test]
async fn test_prime_limit_is_capped() {
    let h = Harness::custom(|builder| builder.cache_options(CacheOptions::default().with_max_rows(2)));
    h.backend.set_rows("parcels", parcels());

    let hook = h
        .client
        .use_table("parcels", QueryOptions::new().with_limit(50))
        .unwrap();
    wait_ready(&hook).await;

    assert_eq!(hook.data().len(), 2);
    assert_eq!(h.backend.requests()[0].limit, 2);
}
