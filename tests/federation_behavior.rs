//! Behaviour tests for federated reads.
//!
//! These tests verify HOW answers from several sources are combined into
//! one reconciled record, and how the cache short-circuits repeated reads.

use tickfed_core::FederationError;
use tickfed_tests::*;

// =============================================================================
// Reconciliation: agreement and disagreement
// =============================================================================

#[tokio::test]
async fn when_two_equal_sources_nearly_agree_the_mean_is_returned_without_conflict() {
    // Given: two priority-1 sources reporting 100.0 and 102.0
    let a = ScriptedSource::with_price("alpha", 100.0);
    let b = ScriptedSource::with_price("beta", 102.0);
    let federator = Harness::new().source(&a, 1).source(&b, 1).build();

    // When: the price is requested
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: the average is returned with high confidence and no conflict
    let record = &response.record;
    assert!((price_of(record.value("price")) - 101.0).abs() < 1e-9);
    assert!(record.confidence("price").expect("confidence") > 0.9);
    assert!(record.conflicts.is_empty());
    assert_eq!(record.sources_used.len(), 2);
    assert_eq!(response.origin, RecordOrigin::Upstream);
    assert!(!response.stale);
}

#[tokio::test]
async fn when_two_sources_disagree_widely_a_conflict_lists_both_raw_values() {
    // Given: two equally weighted sources 50% apart
    let a = ScriptedSource::with_price("alpha", 100.0);
    let b = ScriptedSource::with_price("beta", 150.0);
    let federator = Harness::new().source(&a, 1).source(&b, 1).build();

    // When: the price is requested
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: the weighted mean is kept and the conflict is audited
    let record = &response.record;
    assert!((price_of(record.value("price")) - 125.0).abs() < 1e-9);
    let conflict = record.conflict_for("price").expect("conflict recorded");
    assert_eq!(conflict.values_by_source.len(), 2);
    assert_eq!(
        conflict.values_by_source.get(&SourceId::parse("alpha").expect("id")),
        Some(&FieldValue::Number(100.0))
    );
    assert_eq!(
        conflict.values_by_source.get(&SourceId::parse("beta").expect("id")),
        Some(&FieldValue::Number(150.0))
    );
    assert!(conflict.spread_pct >= 10.0);
}

#[tokio::test]
async fn when_one_of_three_sources_is_far_off_it_does_not_move_the_answer() {
    // Given: two agreeing sources and one wild outlier
    let a = ScriptedSource::with_price("alpha", 100.0);
    let b = ScriptedSource::with_price("beta", 101.0);
    let c = ScriptedSource::with_price("gamma", 500.0);
    let federator = Harness::new().source(&a, 1).source(&b, 1).source(&c, 1).build();

    // When: the price is requested
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: the outlier is rejected
    assert!((price_of(response.record.value("price")) - 100.5).abs() < 1e-9);
}

#[tokio::test]
async fn when_priorities_differ_the_answer_leans_toward_the_higher_priority_source() {
    // Given: a priority-4 source at 100 and a priority-1 source at 105
    let primary = ScriptedSource::with_price("primary", 100.0);
    let backup = ScriptedSource::with_price("backup", 105.0);
    let federator = Harness::new()
        .source(&primary, 4)
        .source(&backup, 1)
        .build();

    // When: the price is requested
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: the weighted mean is (4·100 + 1·105) / 5
    assert!((price_of(response.record.value("price")) - 101.0).abs() < 1e-9);
}

#[tokio::test]
async fn when_sources_cover_different_fields_the_record_merges_them() {
    // Given: one source with price only, another with volume only
    let quotes = ScriptedSource::with_price("quotes", 42.0);
    let volumes = ScriptedSource::new("volumes");
    volumes.set_field("volume", FieldValue::Number(1_000.0));
    let federator = Harness::new().source(&quotes, 1).source(&volumes, 1).build();

    // When: both fields are requested
    let response = federator
        .get_data("AAPL", &["price", "volume"], "price")
        .await
        .expect("data available");

    // Then: each field comes from the source that had it
    let record = &response.record;
    assert_eq!(record.value("price"), Some(FieldValue::Number(42.0)));
    assert_eq!(record.value("volume"), Some(FieldValue::Number(1_000.0)));
    assert_eq!(record.sources_used.len(), 2);
}

#[tokio::test]
async fn when_one_source_fails_the_other_still_answers() {
    // Given: one healthy and one failing source
    let healthy = ScriptedSource::with_price("healthy", 100.0);
    let broken = ScriptedSource::with_price("broken", 999.0);
    broken.set_failing(true);
    let federator = Harness::new().source(&healthy, 1).source(&broken, 1).build();

    // When: the price is requested
    let response = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("partial data available");

    // Then: only the healthy source contributes
    assert_eq!(response.record.value("price"), Some(FieldValue::Number(100.0)));
    assert_eq!(
        response.record.sources_used,
        vec![SourceId::parse("healthy").expect("id")]
    );
}

// =============================================================================
// Caching: idempotence and key normalization
// =============================================================================

#[tokio::test]
async fn when_the_same_request_repeats_the_cache_answers_without_upstream_calls() {
    // Given: a federator that has already served one request
    let a = ScriptedSource::with_price("alpha", 100.0);
    let b = ScriptedSource::with_price("beta", 102.0);
    let federator = Harness::new().source(&a, 1).source(&b, 1).build();
    let first = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // When: the identical request is made immediately again
    let second = federator
        .get_data("AAPL", &["price"], "price")
        .await
        .expect("data available");

    // Then: the record is identical and no source was called again
    assert_eq!(first.record, second.record);
    assert_eq!(second.origin, RecordOrigin::Memory);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn when_entity_case_and_field_order_differ_the_same_entry_is_used() {
    // Given: a cached answer for AAPL [price, volume]
    let source = ScriptedSource::with_price("alpha", 10.0);
    source.set_field("volume", FieldValue::Number(5.0));
    let federator = Harness::new().source(&source, 1).build();
    federator
        .get_data("AAPL", &["price", "volume"], "price")
        .await
        .expect("data available");

    // When: the request is repeated with different casing and field order
    let response = federator
        .get_data("  aapl ", &["Volume", "price"], "price")
        .await
        .expect("data available");

    // Then: the cached entry answers
    assert_eq!(response.origin, RecordOrigin::Memory);
    assert_eq!(response.record.entity_key.as_str(), "AAPL");
    assert_eq!(source.calls(), 1);
}

// =============================================================================
// Input validation
// =============================================================================

#[tokio::test]
async fn when_the_request_is_malformed_no_source_is_called() {
    // Given: a federator with one source
    let source = ScriptedSource::with_price("alpha", 10.0);
    let federator = Harness::new().source(&source, 1).build();
    let no_fields: [&str; 0] = [];

    // When: requests with an empty key, no fields, or an unknown class arrive
    let empty_key = federator.get_data("   ", &["price"], "price").await;
    let empty_fields = federator.get_data("AAPL", &no_fields, "price").await;
    let unknown_class = federator.get_data("AAPL", &["price"], "macro").await;

    // Then: each is rejected before any upstream call
    assert!(matches!(empty_key, Err(FederationError::Validation(_))));
    assert!(matches!(empty_fields, Err(FederationError::Validation(_))));
    assert!(matches!(
        unknown_class,
        Err(FederationError::UnknownDataClass(_))
    ));
    assert_eq!(source.calls(), 0);
}
