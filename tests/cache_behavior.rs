//! Behaviour tests for the two cache tiers as seen through the federator.

use std::sync::Arc;
use std::time::Duration;

use tickfed_tests::*;

#[tokio::test]
async fn when_another_instance_filled_the_shared_tier_it_answers_without_upstream_calls() {
    // Given: instance one has cached AAPL in the shared tier
    let tier = Arc::new(InMemoryDistributedTier::new());
    let first_source = ScriptedSource::with_price("alpha", 100.0);
    let first = Harness::new()
        .source(&first_source, 1)
        .tier(tier.clone())
        .build();
    first
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // When: instance two, with a cold memory tier, asks twice
    let second_source = ScriptedSource::with_price("alpha", 999.0);
    let second = Harness::new()
        .source(&second_source, 1)
        .tier(tier)
        .build();
    let from_shared = second
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("shared hit");
    let from_memory = second
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("backfilled hit");

    // Then: the shared tier answers first, then the backfilled memory tier
    assert_eq!(from_shared.origin, RecordOrigin::Distributed);
    assert_eq!(from_shared.record.value("price"), Some(FieldValue::Number(100.0)));
    assert_eq!(from_memory.origin, RecordOrigin::Memory);
    assert_eq!(second_source.calls(), 0);
    let stats = second.cache_stats();
    assert_eq!(stats.distributed_hits, 1);
    assert_eq!(stats.memory_hits, 1);
}

#[tokio::test]
async fn when_the_shared_tier_is_down_requests_still_succeed() {
    // Given: a federator whose distributed tier refuses every command
    let source = ScriptedSource::with_price("alpha", 100.0);
    let federator = Harness::new()
        .source(&source, 1)
        .tier(Arc::new(FailingTier))
        .build();

    // When: the same entity is requested twice
    let first = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("upstream answers");
    let second = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("memory answers");

    // Then: the memory tier carries on and the tier errors are counted
    assert_eq!(first.origin, RecordOrigin::Upstream);
    assert_eq!(second.origin, RecordOrigin::Memory);
    assert_eq!(source.calls(), 1);
    assert!(federator.cache_stats().distributed_errors >= 2);
}

#[tokio::test]
async fn when_the_field_set_differs_a_separate_entry_is_fetched() {
    // Given: a cached price-only answer
    let source = ScriptedSource::with_price("alpha", 100.0);
    source.set_field("volume", FieldValue::Number(10.0));
    let federator = Harness::new().source(&source, 1).build();
    federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // When: price and volume are requested together
    let response = federator
        .get_data("AAPL", &["price", "volume"], "price")
        .await
        .expect("data available");

    // Then: the wider request goes upstream
    assert_eq!(response.origin, RecordOrigin::Upstream);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn when_the_ttl_expires_the_next_read_goes_upstream() {
    // Given: a record cached with a 50ms TTL
    let source = ScriptedSource::with_price("alpha", 100.0);
    let federator = Harness::new()
        .source(&source, 1)
        .ttl(Duration::from_millis(50))
        .build();
    federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // When: the TTL passes
    tokio::time::sleep(Duration::from_millis(120)).await;
    source.set_field("price", FieldValue::Number(101.0));
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: a fresh value is fetched and not flagged stale
    assert_eq!(response.origin, RecordOrigin::Upstream);
    assert!(!response.stale);
    assert_eq!(response.record.value("price"), Some(FieldValue::Number(101.0)));
}

#[tokio::test]
async fn when_reads_mix_hits_and_misses_the_hit_rate_reflects_them() {
    // Given: one miss followed by three hits
    let source = ScriptedSource::with_price("alpha", 100.0);
    let federator = Harness::new().source(&source, 1).build();
    for _ in 0..4 {
        federator
            .get_data("AAPL", &["price"], "price")
            .await
            .expect("data available");
    }

    // When: stats are read
    let stats = federator.cache_stats();

    // Then: 3 of 4 lookups were hits
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 3);
    assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    assert_eq!(stats.tier_sizes.memory, 1);
}
