//! Behaviour tests for the config-driven service.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tickfed_core::{
    CannedHttpClient, ConfigError, EntityKey, FederationConfig, FederationService, FieldValue,
    HttpResponse, RecordOrigin,
};

const CONFIG: &str = r#"
[federation]
fetch_deadline_ms = 1000
max_retries = 0

[warmer]
enabled = true
run_on_startup = true
inter_batch_delay_ms = 0

[[sources]]
id = "fixture"
priority = 2
adapter = { kind = "static", entities = { AAPL = { price = 190.0 }, MSFT = { price = 410.0 } } }

[[sources]]
id = "quotes"
priority = 2
adapter = { kind = "http_json", url_template = "https://quotes.test/{entity}", fields = { price = "/last" } }

[[data_classes]]
name = "price"
sources = ["fixture", "quotes"]
default_fields = ["price"]
hot_keys = ["MSFT"]
"#;

fn http() -> Arc<CannedHttpClient> {
    Arc::new(
        CannedHttpClient::new()
            .respond(
                "https://quotes.test/AAPL",
                Ok(HttpResponse::ok_json(r#"{"last": 192.0}"#)),
            )
            .respond(
                "https://quotes.test/MSFT",
                Ok(HttpResponse::ok_json(r#"{"last": "410.0"}"#)),
            ),
    )
}

#[tokio::test]
async fn when_started_from_a_config_file_the_service_federates_both_adapters() {
    // Given: a config file on disk with a static and an HTTP source
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CONFIG.as_bytes()).expect("write config");
    let config = FederationConfig::from_path(file.path()).expect("valid config");

    // When: the service is built and AAPL is requested
    let service = FederationService::builder(config)
        .http_client(http())
        .background_tasks(false)
        .build()
        .await
        .expect("service");
    let response = service
        .get_data("aapl", &["price"], "price")
        .await
        .expect("data available");

    // Then: both answers are averaged with equal priority
    assert_eq!(response.record.value("price"), Some(FieldValue::Number(191.0)));
    assert_eq!(response.record.sources_used.len(), 2);
    assert_eq!(service.provider_health().len(), 2);
    service.shutdown().await;
}

#[tokio::test]
async fn when_warming_on_startup_hot_keys_are_cached_before_any_request() {
    // Given: a service whose warmer runs at startup for MSFT
    let config = FederationConfig::from_toml_str(CONFIG).expect("valid config");
    let service = FederationService::builder(config)
        .http_client(http())
        .build()
        .await
        .expect("service");

    // When: the warmer has had a moment to run
    let mut cached = false;
    for _ in 0..50 {
        if service.cache_stats().tier_sizes.memory > 0 {
            cached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Then: MSFT is served from memory without a miss
    assert!(cached, "warmer never populated the cache");
    let response = service
        .get_data("MSFT", &["price"], "price")
        .await
        .expect("data available");
    assert_eq!(response.origin, RecordOrigin::Memory);
    service.shutdown().await;
}

#[tokio::test]
async fn when_warming_manually_every_listed_entity_is_refreshed() {
    // Given: a service without background tasks
    let config = FederationConfig::from_toml_str(CONFIG).expect("valid config");
    let service = FederationService::builder(config)
        .http_client(http())
        .background_tasks(false)
        .build()
        .await
        .expect("service");

    // When: AAPL and an unknown entity are warmed
    let report = service
        .warm_keys(&[
            EntityKey::parse("AAPL").expect("entity"),
            EntityKey::parse("ZZZZ").expect("entity"),
        ])
        .await;

    // Then: AAPL is refreshed and the unknown entity is counted as failed
    assert_eq!(report.attempted, 2);
    assert_eq!(report.refreshed, 1);
    assert_eq!(report.failed, 1);
}

#[test]
fn when_a_class_names_an_unknown_source_the_config_is_rejected() {
    // Given: a data class referencing a source that does not exist
    let broken = CONFIG.replace(r#"sources = ["fixture", "quotes"]"#, r#"sources = ["ghost"]"#);

    // When: the config is parsed
    let result = FederationConfig::from_toml_str(&broken);

    // Then: validation fails
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
