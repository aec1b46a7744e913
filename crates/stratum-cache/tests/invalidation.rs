//! Cross-instance invalidation tests.
//!
//! A second "process" is simulated by giving its publisher a foreign
//! instance id: the listener under test then treats those messages as
//! peer traffic, while messages stamped with this process's own id are
//! discarded as self-echoes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

use stratum_cache::{
    CacheConfig, CacheMessage, INVALIDATION_CHANNEL, InvalidationPublisher, LockManager,
    RemoteStore, TieredCacheManager, connect,
};

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .with_tag("7.4-alpine")
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> deadpool_redis::Pool {
    let url = redis_url().await;
    connect(&url, 5, 5000).expect("create pool")
}

/// A manager whose published messages look like they come from another
/// process.
async fn peer_manager(config: CacheConfig) -> TieredCacheManager {
    let pool = pool().await;
    TieredCacheManager::with_components(
        Arc::new(RemoteStore::new(pool.clone())),
        Arc::new(LockManager::new(pool.clone())),
        Arc::new(InvalidationPublisher::with_instance_id(pool, "peer-host:1")),
        config,
    )
}

async fn local_manager_with_listener(config: CacheConfig) -> TieredCacheManager {
    let manager = TieredCacheManager::new(pool().await, config);
    manager.listener(redis_url().await).start();
    // give the subscription a moment to establish
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager
}

#[tokio::test]
async fn test_peer_evict_drops_local_entry() {
    let local = local_manager_with_listener(CacheConfig::default()).await;
    let peer = peer_manager(CacheConfig::default()).await;

    let local_cache = local.get_tiered_cache("inv_evict").unwrap();
    let peer_cache = peer.get_tiered_cache("inv_evict").unwrap();

    // both processes hold the entry in their local tier; let the put's
    // own EVICT broadcast drain before the local side back-fills
    peer_cache.put("user_7", Some(json!({"name": "ada"}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let wrapper = local_cache.get("user_7").await.unwrap().expect("from L2");
    assert!(!wrapper.is_null());
    local_cache.sync_local().await;
    assert_eq!(local_cache.local_entry_count(), 1);

    // the peer evicts: shared tier emptied, EVICT broadcast
    peer_cache.evict("user_7").await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    local_cache.sync_local().await;
    assert_eq!(
        local_cache.local_entry_count(),
        0,
        "peer EVICT must drop the local entry"
    );
    assert!(local_cache.get("user_7").await.unwrap().is_none());
}

#[tokio::test]
async fn test_own_messages_are_discarded() {
    let local = local_manager_with_listener(CacheConfig::default()).await;
    let cache = local.get_tiered_cache("inv_self").unwrap();

    // put publishes an EVICT stamped with this process's identity; the
    // listener must not tear down the entry we just wrote
    cache.put("k", Some(json!(1))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    cache.sync_local().await;
    assert_eq!(cache.local_entry_count(), 1, "self-echo must be ignored");

    let wrapper = cache.get("k").await.unwrap().expect("still cached");
    assert_eq!(wrapper.get(), Some(&json!(1)));
}

#[tokio::test]
async fn test_peer_clear_empties_local_tier_only() {
    let local = local_manager_with_listener(CacheConfig::default()).await;
    let peer = peer_manager(CacheConfig::default()).await;

    let local_cache = local.get_tiered_cache("inv_clear").unwrap();
    let peer_cache = peer.get_tiered_cache("inv_clear").unwrap();

    local_cache.put("k1", Some(json!(1))).await.unwrap();
    local_cache.put("k2", Some(json!(2))).await.unwrap();
    local_cache.sync_local().await;
    assert_eq!(local_cache.local_entry_count(), 2);

    // SAFE clear on the peer: local tiers drop everywhere, L2 untouched
    peer_cache.clear().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    local_cache.sync_local().await;
    assert_eq!(local_cache.local_entry_count(), 0);

    // the shared tier still serves and back-fills
    let wrapper = local_cache.get("k1").await.unwrap().expect("from L2");
    assert_eq!(wrapper.get(), Some(&json!(1)));
}

#[tokio::test]
async fn test_listener_survives_bad_and_unroutable_messages() {
    let config = CacheConfig {
        cache_names: vec!["inv_known".to_string()],
        ..Default::default()
    };
    let local = local_manager_with_listener(config).await;
    let cache = local.get_tiered_cache("inv_known").unwrap();

    cache.put("k", Some(json!(1))).await.unwrap();
    cache.sync_local().await;
    assert_eq!(cache.local_entry_count(), 1);

    let mut conn = pool().await.get().await.unwrap();

    // garbage payload
    let _: () = redis::cmd("PUBLISH")
        .arg(INVALIDATION_CHANNEL)
        .arg("{ not json")
        .query_async(&mut conn)
        .await
        .unwrap();

    // well-formed message for a cache this manager does not know
    let unroutable =
        serde_json::to_string(&CacheMessage::evict_from("peer-host:1", "inv_missing", "k"))
            .unwrap();
    let _: () = redis::cmd("PUBLISH")
        .arg(INVALIDATION_CHANNEL)
        .arg(unroutable)
        .query_async(&mut conn)
        .await
        .unwrap();

    // a valid peer evict must still be processed afterwards
    let evict = serde_json::to_string(&CacheMessage::evict_from("peer-host:1", "inv_known", "k"))
        .unwrap();
    let _: () = redis::cmd("PUBLISH")
        .arg(INVALIDATION_CHANNEL)
        .arg(evict)
        .query_async(&mut conn)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    cache.sync_local().await;
    assert_eq!(
        cache.local_entry_count(),
        0,
        "listener must keep processing after bad messages"
    );
}
