//! Integration tests for the `stratum-db` persistence gateway.
//!
//! The `Dragonfly` tests require a live instance. Run with:
//!
//! ```bash
//! docker compose up -d
//! cargo test -p stratum-db -- --ignored
//! docker compose down
//! ```
//!
//! They are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs. The in-memory tests always run.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use chrono::Utc;
use stratum_db::codec::{decode_f32s, encode_f32s};
use stratum_db::{
    DbError, DragonflyGateway, MemoryGateway, PersistenceGateway, Substore, get_json, keys,
    put_json,
};
use stratum_types::{LayerMeta, SchemaRecord};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

async fn exercise_gateway(gateway: &dyn PersistenceGateway) {
    // JSON records.
    let schema = SchemaRecord {
        id: 3,
        fields: vec![String::from("O2"), String::from("N2")],
    };
    put_json(gateway, Substore::Meta, keys::SCHEMA, &schema)
        .await
        .expect("Failed to put schema");
    let loaded: Option<SchemaRecord> = get_json(gateway, Substore::Meta, keys::SCHEMA)
        .await
        .expect("Failed to get schema");
    assert_eq!(loaded, Some(schema));

    // Binary quadrant slices.
    let slice = vec![1.0_f32, 2.5, -3.0, 0.0];
    let key = keys::quadrant(0, 5);
    gateway
        .put(Substore::Overlay, &key, &encode_f32s(&slice))
        .await
        .expect("Failed to put slice");
    let bytes = gateway
        .get(Substore::Overlay, &key)
        .await
        .expect("Failed to get slice")
        .expect("slice missing");
    assert_eq!(bytes.len(), 16);
    let decoded = decode_f32s(&bytes).unwrap();
    assert_eq!(decoded.len(), slice.len());
    for (a, b) in decoded.iter().zip(&slice) {
        assert_eq!(a.to_bits(), b.to_bits());
    }

    // Absent keys read as None.
    let missing = gateway
        .get(Substore::Overlay, &keys::quadrant(99, 0))
        .await
        .unwrap();
    assert!(missing.is_none());
}

// =============================================================================
// Memory gateway
// =============================================================================

#[tokio::test]
async fn memory_gateway_contract() {
    let gateway = MemoryGateway::new();
    exercise_gateway(&gateway).await;
    assert_eq!(gateway.backend(), "memory");
}

#[tokio::test]
async fn memory_gateway_rejects_bad_json() {
    let gateway = MemoryGateway::new();
    gateway
        .put(Substore::OverlayMeta, &keys::layer(0), b"not json")
        .await
        .unwrap();
    let result: Result<Option<LayerMeta>, DbError> =
        get_json(&gateway, Substore::OverlayMeta, &keys::layer(0)).await;
    assert!(matches!(result, Err(DbError::Serialization(_))));
}

#[tokio::test]
async fn memory_gateway_layer_meta() {
    let gateway = MemoryGateway::new();
    let meta = LayerMeta {
        schema_id: 1,
        field_names: vec![String::from("O2")],
        quadrant_count: 16,
        updated_at: Utc::now(),
    };
    put_json(&gateway, Substore::OverlayMeta, &keys::layer(2), &meta)
        .await
        .unwrap();
    let loaded: LayerMeta = get_json(&gateway, Substore::OverlayMeta, &keys::layer(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, meta);
}

// =============================================================================
// Dragonfly
// =============================================================================

#[tokio::test]
#[ignore = "requires live Dragonfly instance (docker compose up -d)"]
async fn dragonfly_gateway_contract() {
    let gateway = DragonflyGateway::connect(DRAGONFLY_URL, "stratum-test")
        .await
        .expect("Failed to connect to Dragonfly");
    gateway.flush_all().await.expect("Failed to flush");

    exercise_gateway(&gateway).await;
    assert_eq!(
        gateway.full_key(Substore::Overlay, "0,5"),
        "stratum-test:overlay:0,5"
    );

    gateway.flush_all().await.expect("Failed to flush");
}

#[tokio::test]
async fn dragonfly_rejects_invalid_url() {
    let result = DragonflyGateway::connect("not a url", "stratum").await;
    assert!(result.is_err());
}
